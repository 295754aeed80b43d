//! Orphan resolver: backfill missing parents of recently observed replies.

use super::reconcile;
use crate::config::RepairConfig;
use crate::model::{ConflictPolicy, OrphanReport};
use crate::storage::Storage;
use crate::upstream::Upstream;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Look up missing parents in batches. Parents the platform no longer serves
/// are marked inaccessible so they are never requested again.
///
/// # Errors
///
/// Returns an error if the store fails. Upstream failures only skip a batch.
pub fn resolve_orphans(
    storage: &mut Storage,
    upstream: &dyn Upstream,
    config: &RepairConfig,
    now: DateTime<Utc>,
) -> Result<OrphanReport> {
    let since = now - Duration::hours(i64::from(config.orphan_window_hours));
    let candidates = storage.orphan_parent_ids(since, config.max_orphan_candidates)?;
    let mut report = OrphanReport {
        candidates: candidates.len(),
        ..OrphanReport::default()
    };

    let batches = candidates.chunks(config.batch_size.max(1)).take(config.max_batches);
    for (batch_index, batch) in batches.enumerate() {
        report.batches_used += 1;

        let returned = match upstream.lookup(batch) {
            Ok(returned) => returned,
            Err(e) => {
                warn!(batch = batch_index, ids = batch.len(), error = %e, "Lookup failed; skipping batch");
                report.failed_batches += 1;
                continue;
            }
        };

        let reconciled = reconcile(batch, returned);
        if !reconciled.unreadable.is_empty() {
            warn!(
                batch = batch_index,
                ids = ?reconciled.unreadable,
                "Parents returned but undecodable; leaving them for a later run"
            );
        }
        let written = storage.upsert_messages(&reconciled.found, ConflictPolicy::Ignore)?;
        let marked = storage.mark_inaccessible(&reconciled.missing)?;
        debug!(
            batch = batch_index,
            ids = batch.len(),
            recovered = written.written,
            marked,
            unreadable = reconciled.unreadable.len(),
            "Orphan batch resolved"
        );
        report.recovered += written.written;
        report.marked_inaccessible += marked;
        report.unreadable += reconciled.unreadable.len();
    }

    info!(
        candidates = report.candidates,
        batches = report.batches_used,
        recovered = report.recovered,
        marked_inaccessible = report.marked_inaccessible,
        unreadable = report.unreadable,
        "Orphan resolution finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Account, Message};
    use crate::payload::DecodedBatch;
    use crate::upstream::UpstreamError;
    use chrono::NaiveDate;
    use std::cell::Cell;

    struct LookupStub {
        known: Vec<Message>,
        unreadable: Vec<String>,
        fail_first: Cell<usize>,
        calls: Cell<usize>,
    }

    impl Upstream for LookupStub {
        fn search(&self, _: &str, _: Option<NaiveDate>, _: usize) -> crate::upstream::Result<Vec<Message>> {
            Ok(vec![])
        }

        fn user_timeline(
            &self,
            _: &str,
            _: Option<&str>,
            _: usize,
            _: bool,
        ) -> crate::upstream::Result<Vec<Message>> {
            Ok(vec![])
        }

        fn lookup(&self, ids: &[String]) -> crate::upstream::Result<DecodedBatch> {
            self.calls.set(self.calls.get() + 1);
            if self.fail_first.get() > 0 {
                self.fail_first.set(self.fail_first.get() - 1);
                return Err(UpstreamError::Network("timeout".to_string()));
            }
            Ok(DecodedBatch {
                messages: self
                    .known
                    .iter()
                    .filter(|m| ids.contains(&m.id))
                    .cloned()
                    .collect(),
                undecodable: self
                    .unreadable
                    .iter()
                    .filter(|id| ids.contains(id))
                    .cloned()
                    .collect(),
            })
        }
    }

    fn account(id: &str) -> Account {
        Account {
            id: id.to_string(),
            screen_name: format!("user{id}"),
            payload: serde_json::json!({}),
        }
    }

    fn message(id: &str, parent: Option<&str>) -> Message {
        Message {
            id: id.to_string(),
            author: account("7"),
            created_at: Utc::now(),
            text: format!("message {id}"),
            truncated: false,
            in_reply_to: parent.map(str::to_string),
            in_reply_to_screen_name: parent.map(|_| "support".to_string()),
            payload: serde_json::json!({"id_str": id}),
        }
    }

    fn stub(known: Vec<Message>, fail_first: usize) -> LookupStub {
        LookupStub {
            known,
            unreadable: vec![],
            fail_first: Cell::new(fail_first),
            calls: Cell::new(0),
        }
    }

    fn seed_replies(storage: &mut Storage, parents: &[&str]) {
        let replies: Vec<Message> = parents
            .iter()
            .enumerate()
            .map(|(i, parent)| message(&(9000 + i).to_string(), Some(parent)))
            .collect();
        storage
            .upsert_messages(&replies, ConflictPolicy::Ignore)
            .unwrap();
    }

    #[test]
    fn recovers_found_parents_and_marks_missing_ones() {
        let mut storage = Storage::open_memory().unwrap();
        seed_replies(&mut storage, &["100", "101"]);
        let upstream = stub(vec![message("100", None)], 0);

        let report =
            resolve_orphans(&mut storage, &upstream, &RepairConfig::default(), Utc::now()).unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.batches_used, 1);
        assert_eq!(report.recovered, 1);
        assert_eq!(report.marked_inaccessible, 1);
        assert!(storage.get_message("100").unwrap().is_some());
        assert!(storage.is_inaccessible("101").unwrap());
    }

    #[test]
    fn undecodable_parents_are_neither_marked_nor_stored() {
        let mut storage = Storage::open_memory().unwrap();
        seed_replies(&mut storage, &["19", "20"]);
        let mut upstream = stub(vec![], 0);
        upstream.unreadable = vec!["19".to_string()];
        let config = RepairConfig::default();

        let report = resolve_orphans(&mut storage, &upstream, &config, Utc::now()).unwrap();
        assert_eq!(report.recovered, 0);
        assert_eq!(report.marked_inaccessible, 1);
        assert_eq!(report.unreadable, 1);
        assert!(!storage.is_inaccessible("19").unwrap());
        assert!(storage.is_inaccessible("20").unwrap());

        // Still a candidate on the next run.
        let again = resolve_orphans(&mut storage, &upstream, &config, Utc::now()).unwrap();
        assert_eq!(again.candidates, 1);
        assert_eq!(again.unreadable, 1);
    }

    #[test]
    fn rejected_parent_is_not_counted_as_recovered() {
        let mut storage = Storage::open_memory().unwrap();
        seed_replies(&mut storage, &["12x"]);
        let upstream = stub(vec![message("12x", None)], 0);

        let report =
            resolve_orphans(&mut storage, &upstream, &RepairConfig::default(), Utc::now()).unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.recovered, 0);
        assert_eq!(report.marked_inaccessible, 0);
        assert!(storage.get_message("12x").unwrap().is_none());
        assert!(!storage.is_inaccessible("12x").unwrap());
    }

    #[test]
    fn marked_parents_are_not_retried() {
        let mut storage = Storage::open_memory().unwrap();
        seed_replies(&mut storage, &["101"]);
        let upstream = stub(vec![], 0);
        let config = RepairConfig::default();

        let first = resolve_orphans(&mut storage, &upstream, &config, Utc::now()).unwrap();
        assert_eq!(first.marked_inaccessible, 1);

        let second = resolve_orphans(&mut storage, &upstream, &config, Utc::now()).unwrap();
        assert_eq!(second.candidates, 0);
        assert_eq!(second.batches_used, 0);
        assert_eq!(upstream.calls.get(), 1);
    }

    #[test]
    fn failed_batch_is_skipped_and_still_counts() {
        let mut storage = Storage::open_memory().unwrap();
        seed_replies(&mut storage, &["101", "102", "103"]);
        let upstream = stub(vec![], 1);
        let config = RepairConfig {
            batch_size: 2,
            ..RepairConfig::default()
        };

        let report = resolve_orphans(&mut storage, &upstream, &config, Utc::now()).unwrap();
        assert_eq!(report.batches_used, 2);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.marked_inaccessible, 1);
        // The failed batch's ids stay candidates.
        assert_eq!(storage.counts().unwrap().pending_orphans, 2);
    }

    #[test]
    fn batch_cap_bounds_lookups() {
        let mut storage = Storage::open_memory().unwrap();
        seed_replies(&mut storage, &["101", "102", "103", "104", "105"]);
        let upstream = stub(vec![], 0);
        let config = RepairConfig {
            batch_size: 2,
            max_batches: 2,
            ..RepairConfig::default()
        };

        let report = resolve_orphans(&mut storage, &upstream, &config, Utc::now()).unwrap();
        assert_eq!(report.candidates, 5);
        assert_eq!(report.batches_used, 2);
        assert_eq!(report.marked_inaccessible, 4);
        assert_eq!(upstream.calls.get(), 2);
    }

    #[test]
    fn replies_outside_window_are_ignored() {
        let mut storage = Storage::open_memory().unwrap();
        let old = Utc::now() - Duration::days(3);
        storage
            .upsert_messages_at(&[message("9000", Some("101"))], ConflictPolicy::Ignore, old)
            .unwrap();
        let upstream = stub(vec![], 0);

        let report =
            resolve_orphans(&mut storage, &upstream, &RepairConfig::default(), Utc::now()).unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(upstream.calls.get(), 0);
    }
}
