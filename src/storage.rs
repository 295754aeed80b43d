//! `SQLite` upsert store for harvested conversations.
//!
//! Every write is idempotent by unique key. Message writes choose a
//! [`ConflictPolicy`]; accounts are always last-write-wins. Batches are
//! deduplicated by key (last occurrence wins) and, if the batch statement set
//! fails, retried record by record so one malformed row cannot sink the rest.

use crate::error::HarvestError;
use crate::model::{Account, ConflictPolicy, FetchKind, Message, StoreCounts};
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use itertools::Itertools;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Statement, params};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::Path;
use tracing::{debug, info, warn};

const SCHEMA_VERSION: i32 = 1;
// SQLite default limit on host parameters is usually 999 or 32766.
// We use a safe batch size to avoid "too many SQL variables" errors.
const SQLITE_BATCH_SIZE: usize = 900;

const INSERT_MESSAGE_IGNORE: &str = r"
    INSERT INTO messages
    (id, author_id, author_screen_name, created_at, text, truncated,
     in_reply_to, in_reply_to_screen_name, data, observed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO NOTHING
";

const INSERT_MESSAGE_OVERWRITE: &str = r"
    INSERT INTO messages
    (id, author_id, author_screen_name, created_at, text, truncated,
     in_reply_to, in_reply_to_screen_name, data, observed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(id) DO UPDATE SET
        author_id = excluded.author_id,
        author_screen_name = excluded.author_screen_name,
        created_at = excluded.created_at,
        text = excluded.text,
        truncated = excluded.truncated,
        in_reply_to = excluded.in_reply_to,
        in_reply_to_screen_name = excluded.in_reply_to_screen_name,
        data = excluded.data
";

const UPSERT_ACCOUNT: &str = r"
    INSERT INTO accounts (id, screen_name, data, observed_at)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT(id) DO UPDATE SET
        screen_name = excluded.screen_name,
        data = excluded.data,
        observed_at = excluded.observed_at
";

/// Fixed-width UTC timestamp so lexical order in SQL matches time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn placeholders(n: usize) -> String {
    std::iter::repeat_n("?", n).join(",")
}

/// Deduplicate by key, keeping the last occurrence in the first-seen slot.
fn dedup_last_wins<'a, T, K, F>(items: &'a [T], key: F) -> Vec<&'a T>
where
    K: Eq + Hash,
    F: Fn(&'a T) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<&T> = Vec::with_capacity(items.len());
    for item in items {
        match slots.entry(key(item)) {
            Entry::Occupied(slot) => out[*slot.get()] = item,
            Entry::Vacant(slot) => {
                slot.insert(out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Errors attributable to the record itself rather than the database.
fn is_record_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => e.code == ErrorCode::ConstraintViolation,
        rusqlite::Error::ToSqlConversionFailure(_) => true,
        _ => false,
    }
}

/// Outcome of a batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Rows inserted or updated.
    pub written: usize,
    /// Records rejected by the store and dropped.
    pub discarded: usize,
}

/// Latest successful fetch per kind for one screen name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchHistory {
    pub replies: Option<DateTime<Utc>>,
    pub mentions: Option<DateTime<Utc>>,
}

impl FetchHistory {
    /// Most recent fetch of any kind.
    #[must_use]
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.replies.max(self.mentions)
    }

    fn record(&mut self, kind: FetchKind, at: DateTime<Utc>) {
        let slot = match kind {
            FetchKind::Replies => &mut self.replies,
            FetchKind::Mentions => &mut self.mentions,
        };
        *slot = (*slot).max(Some(at));
    }
}

/// Message counts attributed to one screen name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    /// Messages created inside the trailing window.
    pub recent: i64,
    /// Messages ever stored.
    pub total: i64,
}

/// Outcome of a run lease attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired,
    Held {
        holder: String,
        expires_at: DateTime<Utc>,
    },
}

/// A message row as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub id: String,
    pub author_id: String,
    pub author_screen_name: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub truncated: bool,
    pub in_reply_to: Option<String>,
    pub payload: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

/// `SQLite` storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        let storage = Self { conn };
        storage.migrate()?;
        Ok(storage)
    }

    /// Get a reference to the underlying database connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> Result<()> {
        let current_version = self.get_schema_version();

        if current_version > SCHEMA_VERSION {
            return Err(HarvestError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: current_version,
            }
            .into());
        }

        if current_version < SCHEMA_VERSION {
            info!(
                "Migrating database from version {} to {}",
                current_version, SCHEMA_VERSION
            );
            self.create_schema()?;
            self.set_schema_version(SCHEMA_VERSION)?;
        }

        Ok(())
    }

    fn get_schema_version(&self) -> i32 {
        let result: rusqlite::Result<i32> = self.conn.query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| {
                let value: String = row.get(0)?;
                Ok(value.parse().unwrap_or(0))
            },
        );

        // Treat missing schema table as version 0.
        result.unwrap_or_default()
    }

    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![version.to_string()],
        )?;
        Ok(())
    }

    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY CHECK (id <> '' AND id NOT GLOB '*[^0-9]*'),
                screen_name TEXT NOT NULL,
                data TEXT NOT NULL CHECK (json_valid(data)),
                observed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_screen_name
                ON accounts(screen_name COLLATE NOCASE);

            -- Screen name columns are stored lowercase.
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY CHECK (id <> '' AND id NOT GLOB '*[^0-9]*'),
                author_id TEXT NOT NULL,
                author_screen_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                text TEXT NOT NULL,
                truncated INTEGER NOT NULL DEFAULT 0,
                in_reply_to TEXT,
                in_reply_to_screen_name TEXT,
                data TEXT NOT NULL CHECK (json_valid(data)),
                observed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
            CREATE INDEX IF NOT EXISTS idx_messages_author ON messages(author_screen_name);
            CREATE INDEX IF NOT EXISTS idx_messages_reply_sn ON messages(in_reply_to_screen_name);
            CREATE INDEX IF NOT EXISTS idx_messages_in_reply_to ON messages(in_reply_to);
            CREATE INDEX IF NOT EXISTS idx_messages_observed_at ON messages(observed_at);
            CREATE INDEX IF NOT EXISTS idx_messages_truncated
                ON messages(created_at) WHERE truncated = 1;

            -- Append-only audit log.
            CREATE TABLE IF NOT EXISTS fetch_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                screen_name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('replies', 'mentions')),
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fetch_attempts_sn
                ON fetch_attempts(screen_name, kind, created_at);

            CREATE TABLE IF NOT EXISTS inaccessible_messages (
                id TEXT PRIMARY KEY,
                marked_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS run_lease (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                holder TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            ",
        )?;

        Ok(())
    }

    // =========================================================================
    // Upserts
    // =========================================================================

    /// Write a deduplicated batch in one transaction, falling back to
    /// per-record writes (discarding rejected records) if the batch fails.
    fn write_with_fallback<T, I, B>(
        &mut self,
        what: &'static str,
        sql: &str,
        rows: &[&T],
        id_of: I,
        bind: B,
    ) -> Result<UpsertReport>
    where
        I: Fn(&T) -> &str,
        B: Fn(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    {
        if rows.is_empty() {
            return Ok(UpsertReport::default());
        }

        let batch: rusqlite::Result<usize> = (|| {
            let tx = self.conn.transaction()?;
            let mut written = 0;
            {
                let mut stmt = tx.prepare_cached(sql)?;
                for row in rows {
                    written += bind(&mut stmt, *row)?;
                }
            }
            tx.commit()?;
            Ok(written)
        })();

        let err = match batch {
            Ok(written) => {
                return Ok(UpsertReport {
                    written,
                    discarded: 0,
                });
            }
            Err(e) => e,
        };
        warn!(
            what,
            rows = rows.len(),
            error = %err,
            "Batch write failed; retrying record by record"
        );

        let tx = self.conn.transaction()?;
        let mut report = UpsertReport::default();
        {
            let mut stmt = tx.prepare_cached(sql)?;
            for row in rows {
                match bind(&mut stmt, *row) {
                    Ok(n) => report.written += n,
                    Err(e) if is_record_error(&e) => {
                        warn!(what, id = id_of(*row), error = %e, "Discarding rejected record");
                        report.discarded += 1;
                    }
                    Err(e) => {
                        return Err(e).with_context(|| format!("Failed to write {what}"));
                    }
                }
            }
        }
        tx.commit()?;
        Ok(report)
    }

    /// Upsert accounts, last write wins.
    ///
    /// # Errors
    ///
    /// Returns an error if the database fails for reasons other than a
    /// rejected record.
    pub fn upsert_accounts(&mut self, accounts: &[Account]) -> Result<UpsertReport> {
        self.upsert_accounts_at(accounts, Utc::now())
    }

    fn upsert_accounts_at(
        &mut self,
        accounts: &[Account],
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        let unique = dedup_last_wins(accounts, |a| a.id.as_str());
        let observed = ts(observed_at);
        self.write_with_fallback(
            "account",
            UPSERT_ACCOUNT,
            &unique,
            |a| a.id.as_str(),
            |stmt, a| {
                let data = serde_json::to_string(&a.payload)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                stmt.execute(params![a.id, a.screen_name, data, observed])
            },
        )
    }

    /// Upsert messages and their authors.
    ///
    /// # Errors
    ///
    /// Returns an error if the database fails for reasons other than a
    /// rejected record.
    pub fn upsert_messages(
        &mut self,
        messages: &[Message],
        policy: ConflictPolicy,
    ) -> Result<UpsertReport> {
        self.upsert_messages_at(messages, policy, Utc::now())
    }

    /// Upsert messages with an explicit observation time.
    ///
    /// # Errors
    ///
    /// Returns an error if the database fails for reasons other than a
    /// rejected record.
    pub fn upsert_messages_at(
        &mut self,
        messages: &[Message],
        policy: ConflictPolicy,
        observed_at: DateTime<Utc>,
    ) -> Result<UpsertReport> {
        let unique = dedup_last_wins(messages, |m| m.id.as_str());
        if unique.is_empty() {
            return Ok(UpsertReport::default());
        }

        let authors: Vec<Account> = unique.iter().map(|m| m.author.clone()).collect();
        let author_report = self.upsert_accounts_at(&authors, observed_at)?;
        if author_report.discarded > 0 {
            debug!(discarded = author_report.discarded, "Some authors were rejected");
        }

        let sql = match policy {
            ConflictPolicy::Ignore => INSERT_MESSAGE_IGNORE,
            ConflictPolicy::Overwrite => INSERT_MESSAGE_OVERWRITE,
        };
        let observed = ts(observed_at);
        let report = self.write_with_fallback(
            "message",
            sql,
            &unique,
            |m| m.id.as_str(),
            |stmt, m| {
                let data = serde_json::to_string(&m.payload)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                stmt.execute(params![
                    m.id,
                    m.author.id,
                    m.author.screen_name.to_lowercase(),
                    ts(m.created_at),
                    m.text,
                    i32::from(m.truncated),
                    m.in_reply_to,
                    m.in_reply_to_screen_name.as_deref().map(str::to_lowercase),
                    data,
                    observed,
                ])
            },
        )?;

        debug!(
            written = report.written,
            discarded = report.discarded,
            ?policy,
            "Stored messages"
        );
        Ok(report)
    }

    // =========================================================================
    // Message queries
    // =========================================================================

    /// Return the subset of `ids` already stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn existing_message_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(SQLITE_BATCH_SIZE) {
            let sql = format!(
                "SELECT id FROM messages WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(chunk.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            for row in rows {
                found.insert(row?);
            }
        }
        Ok(found)
    }

    /// Get a stored message by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_message(&self, id: &str) -> Result<Option<StoredMessage>> {
        let row = self
            .conn
            .query_row(
                r"
                SELECT id, author_id, author_screen_name, created_at, text, truncated,
                       in_reply_to, data, observed_at
                FROM messages WHERE id = ?
                ",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i32>(5)? != 0,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, author_id, author_sn, created, text, truncated, in_reply_to, data, observed)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(StoredMessage {
            payload: serde_json::from_str(&data)
                .with_context(|| format!("Stored payload for {id} is not JSON"))?,
            created_at: parse_ts(&created).unwrap_or_default(),
            observed_at: parse_ts(&observed).unwrap_or_default(),
            id,
            author_id,
            author_screen_name: author_sn,
            text,
            truncated,
            in_reply_to,
        }))
    }

    /// Message counts per lowercase screen name, attributing a message to its
    /// author and to the account it replies to.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn message_activity(&self, window_start: DateTime<Utc>) -> Result<HashMap<String, Activity>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT screen_name, SUM(recent), COUNT(*) FROM (
                SELECT author_screen_name AS screen_name, created_at >= ?1 AS recent
                FROM messages
                UNION ALL
                SELECT in_reply_to_screen_name AS screen_name, created_at >= ?1 AS recent
                FROM messages
                WHERE in_reply_to_screen_name IS NOT NULL
                  AND in_reply_to_screen_name <> author_screen_name
            )
            GROUP BY screen_name
            ",
        )?;

        let rows = stmt.query_map(params![ts(window_start)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                Activity {
                    recent: row.get(1)?,
                    total: row.get(2)?,
                },
            ))
        })?;

        let mut activity = HashMap::new();
        for row in rows {
            let (screen_name, counts) = row?;
            activity.insert(screen_name, counts);
        }
        Ok(activity)
    }

    /// Parent ids of replies observed since `since` that are neither stored
    /// nor marked inaccessible.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn orphan_parent_ids(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            r"
            SELECT m.in_reply_to, MIN(m.observed_at) AS first_seen
            FROM messages m
            WHERE m.in_reply_to IS NOT NULL
              AND m.observed_at >= ?1
              AND NOT EXISTS (SELECT 1 FROM messages p WHERE p.id = m.in_reply_to)
              AND NOT EXISTS (SELECT 1 FROM inaccessible_messages i WHERE i.id = m.in_reply_to)
            GROUP BY m.in_reply_to
            ORDER BY first_seen ASC, m.in_reply_to ASC
            LIMIT ?2
            ",
        )?;

        let ids = stmt
            .query_map(params![ts(since), limit_to_i64(limit)], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Ids of messages flagged truncated, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn truncated_message_ids(&self, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM messages WHERE truncated = 1 ORDER BY created_at ASC, id ASC LIMIT ?",
        )?;
        let ids = stmt
            .query_map(params![limit_to_i64(limit)], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Permanently mark ids as unretrievable.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails.
    pub fn mark_inaccessible(&mut self, ids: &[String]) -> Result<usize> {
        let marked_at = ts(Utc::now());
        let tx = self.conn.transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO inaccessible_messages (id, marked_at) VALUES (?, ?)
                 ON CONFLICT(id) DO NOTHING",
            )?;
            for id in ids {
                count += stmt.execute(params![id, marked_at])?;
            }
        }
        tx.commit()?;
        Ok(count)
    }

    /// Whether an id carries an inaccessible marker.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn is_inaccessible(&self, id: &str) -> Result<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM inaccessible_messages WHERE id = ?",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Hard-delete messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database delete fails.
    pub fn delete_messages(&mut self, ids: &[String]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut count = 0;
        for chunk in ids.chunks(SQLITE_BATCH_SIZE) {
            let sql = format!(
                "DELETE FROM messages WHERE id IN ({})",
                placeholders(chunk.len())
            );
            count += tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;
        Ok(count)
    }

    // =========================================================================
    // Fetch audit log
    // =========================================================================

    /// Append a fetch attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the database insert fails.
    pub fn record_fetch_attempt(
        &self,
        screen_name: &str,
        kind: FetchKind,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO fetch_attempts (screen_name, kind, created_at) VALUES (?, ?, ?)",
            params![screen_name, kind.as_str(), ts(at)],
        )?;
        Ok(())
    }

    /// Latest fetch per screen name and kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn fetch_history(&self) -> Result<HashMap<String, FetchHistory>> {
        let mut stmt = self.conn.prepare(
            "SELECT screen_name, kind, MAX(created_at) FROM fetch_attempts GROUP BY screen_name, kind",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut history: HashMap<String, FetchHistory> = HashMap::new();
        for row in rows {
            let (screen_name, kind, created_at) = row?;
            let (Some(kind), Some(at)) = (FetchKind::from_db(&kind), parse_ts(&created_at)) else {
                warn!(screen_name, kind, created_at, "Ignoring unreadable fetch attempt");
                continue;
            };
            history.entry(screen_name).or_default().record(kind, at);
        }
        Ok(history)
    }

    /// Number of audit rows, optionally for one screen name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn fetch_attempt_count(&self, screen_name: Option<&str>) -> Result<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM fetch_attempts WHERE ?1 IS NULL OR screen_name = ?1",
            params![screen_name],
            |row| row.get(0),
        )?)
    }

    // =========================================================================
    // Run lease
    // =========================================================================

    /// Take the singleton run lease, clearing expired leases first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn acquire_run_lease(
        &mut self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<LeaseOutcome> {
        let tx = self.conn.transaction()?;
        let reaped = tx.execute("DELETE FROM run_lease WHERE expires_at <= ?", params![ts(now)])?;
        if reaped > 0 {
            warn!("Cleared an expired run lease");
        }

        let inserted = tx.execute(
            "INSERT INTO run_lease (id, holder, acquired_at, expires_at) VALUES (1, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
            params![holder, ts(now), ts(now + ttl)],
        )?;

        let outcome = if inserted == 1 {
            LeaseOutcome::Acquired
        } else {
            let (holder, expires_at): (String, String) = tx.query_row(
                "SELECT holder, expires_at FROM run_lease WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            LeaseOutcome::Held {
                holder,
                expires_at: parse_ts(&expires_at).unwrap_or(now),
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Release the run lease if `holder` owns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database delete fails.
    pub fn release_run_lease(&self, holder: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM run_lease WHERE holder = ?", params![holder])?;
        Ok(deleted > 0)
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Row counts for all tables in a single query.
    ///
    /// # Errors
    ///
    /// Returns an error if the consolidated query fails.
    pub fn counts(&self) -> Result<StoreCounts> {
        let query = r"
            SELECT
                (SELECT COUNT(*) FROM messages),
                (SELECT COUNT(*) FROM accounts),
                (SELECT COUNT(*) FROM fetch_attempts),
                (SELECT COUNT(*) FROM inaccessible_messages),
                (SELECT COUNT(*) FROM messages WHERE truncated = 1),
                (SELECT COUNT(DISTINCT m.in_reply_to) FROM messages m
                 WHERE m.in_reply_to IS NOT NULL
                   AND NOT EXISTS (SELECT 1 FROM messages p WHERE p.id = m.in_reply_to)
                   AND NOT EXISTS (SELECT 1 FROM inaccessible_messages i WHERE i.id = m.in_reply_to))
        ";

        Ok(self.conn.query_row(query, [], |row| {
            Ok(StoreCounts {
                messages: row.get(0)?,
                accounts: row.get(1)?,
                fetch_attempts: row.get(2)?,
                inaccessible: row.get(3)?,
                truncated: row.get(4)?,
                pending_orphans: row.get(5)?,
            })
        })?)
    }
}

fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
