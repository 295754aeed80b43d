//! Data models for harvested conversation data.
//!
//! Messages and accounts keep their raw upstream payload verbatim; the typed
//! fields are the subset the scheduler and repair passes query on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message (status) harvested from the upstream platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Platform id, decimal string to avoid precision loss.
    pub id: String,
    pub author: Account,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub truncated: bool,
    pub in_reply_to: Option<String>,
    pub in_reply_to_screen_name: Option<String>,
    /// Raw upstream payload.
    pub payload: serde_json::Value,
}

/// An account referenced as a message author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub screen_name: String,
    pub payload: serde_json::Value,
}

/// Which orchestrator phase produced a fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchKind {
    /// The account's own timeline, replies included.
    Replies,
    /// Search results mentioning the account.
    Mentions,
}

impl FetchKind {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Replies => "replies",
            Self::Mentions => "mentions",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "replies" => Some(Self::Replies),
            "mentions" => Some(Self::Mentions),
            _ => None,
        }
    }
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict handling for message writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Insert only if absent (ingestion and backfill).
    Ignore,
    /// Replace stored content (truncation repair).
    Overwrite,
}

/// Normalize a monitored screen name: strip a leading `@`, trim, lowercase.
#[must_use]
pub fn normalize_screen_name(raw: &str) -> String {
    raw.trim().trim_start_matches('@').to_lowercase()
}

/// Result of a single orchestrator phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PhaseOutcome {
    Completed { fetched: usize, stored: usize },
    Skipped { reason: String },
}

impl PhaseOutcome {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Number of newly stored messages (zero when skipped).
    #[must_use]
    pub const fn stored(&self) -> usize {
        match self {
            Self::Completed { stored, .. } => *stored,
            Self::Skipped { .. } => 0,
        }
    }
}

/// Per-account collection result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountReport {
    pub screen_name: String,
    pub replies: PhaseOutcome,
    pub mentions: PhaseOutcome,
}

/// Collection orchestrator result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionReport {
    pub quota: usize,
    pub accounts: Vec<AccountReport>,
}

impl CollectionReport {
    /// Total newly stored messages across all phases.
    #[must_use]
    pub fn stored(&self) -> usize {
        self.accounts
            .iter()
            .map(|a| a.replies.stored() + a.mentions.stored())
            .sum()
    }

    /// Number of phases skipped because of failures.
    #[must_use]
    pub fn skipped_phases(&self) -> usize {
        self.accounts
            .iter()
            .flat_map(|a| [&a.replies, &a.mentions])
            .filter(|p| !p.is_completed())
            .count()
    }
}

/// Orphan resolver result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanReport {
    pub candidates: usize,
    pub batches_used: usize,
    pub recovered: usize,
    pub marked_inaccessible: usize,
    /// Parents returned by lookup that failed to decode; left for a later run.
    pub unreadable: usize,
    pub failed_batches: usize,
}

/// Truncation repair result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationReport {
    pub candidates: usize,
    pub batches_used: usize,
    pub repaired: usize,
    pub deleted: usize,
    /// Returned by lookup but undecodable; kept as stored.
    pub unreadable: usize,
    /// Set when an upstream error stopped the phase early.
    pub aborted: Option<String>,
}

/// Aggregated summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ranked: Vec<String>,
    pub collection: Option<CollectionReport>,
    pub orphans: Option<OrphanReport>,
    pub truncation: Option<TruncationReport>,
}

/// Row counts for `twcs status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub messages: i64,
    pub accounts: i64,
    pub fetch_attempts: i64,
    pub inaccessible: i64,
    pub truncated: i64,
    pub pending_orphans: i64,
}
