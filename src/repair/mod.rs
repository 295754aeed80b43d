//! Gap repair passes run after collection.
//!
//! Both passes spend lookup batches. With `repair.shared_budget` on, truncation
//! repair only gets what the orphan resolver left of `repair.max_batches`.

pub mod orphans;
pub mod truncation;

pub use orphans::resolve_orphans;
pub use truncation::repair_truncated;

use crate::config::RepairConfig;
use crate::model::Message;
use crate::payload::DecodedBatch;
use std::collections::HashSet;

/// Lookup batches available to truncation repair.
#[must_use]
pub const fn truncation_budget(config: &RepairConfig, orphan_batches_used: usize) -> usize {
    if config.shared_budget {
        config.max_batches.saturating_sub(orphan_batches_used)
    } else {
        config.truncation_max_batches
    }
}

/// A lookup response matched against the ids that were asked for.
#[derive(Debug, Default)]
struct Reconciled {
    /// Requested messages that came back and decoded.
    found: Vec<Message>,
    /// Requested ids the platform did not return.
    missing: Vec<String>,
    /// Requested ids that came back but could not be decoded.
    unreadable: Vec<String>,
}

/// Split a lookup response by requested id. Unrequested statuses are dropped.
fn reconcile(requested: &[String], returned: DecodedBatch) -> Reconciled {
    let wanted: HashSet<&str> = requested.iter().map(String::as_str).collect();
    let found: Vec<Message> = returned
        .messages
        .into_iter()
        .filter(|m| wanted.contains(m.id.as_str()))
        .collect();
    let found_ids: HashSet<&str> = found.iter().map(|m| m.id.as_str()).collect();
    let undecodable: HashSet<&str> = returned.undecodable.iter().map(String::as_str).collect();

    let (unreadable, missing): (Vec<String>, Vec<String>) = requested
        .iter()
        .filter(|id| !found_ids.contains(id.as_str()))
        .cloned()
        .partition(|id| undecodable.contains(id.as_str()));
    Reconciled {
        found,
        missing,
        unreadable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Account;
    use chrono::Utc;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            author: Account {
                id: "1".to_string(),
                screen_name: "support".to_string(),
                payload: serde_json::json!({}),
            },
            created_at: Utc::now(),
            text: String::new(),
            truncated: false,
            in_reply_to: None,
            in_reply_to_screen_name: None,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn budget_sharing() {
        let mut config = RepairConfig::default();
        assert_eq!(truncation_budget(&config, 40), 210);
        assert_eq!(truncation_budget(&config, 300), 0);
        config.shared_budget = false;
        config.truncation_max_batches = 7;
        assert_eq!(truncation_budget(&config, 250), 7);
    }

    #[test]
    fn reconcile_ignores_unrequested_and_reports_missing() {
        let requested = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let returned = DecodedBatch {
            messages: vec![message("2"), message("9")],
            undecodable: vec![],
        };
        let reconciled = reconcile(&requested, returned);
        assert_eq!(reconciled.found.len(), 1);
        assert_eq!(reconciled.found[0].id, "2");
        assert_eq!(reconciled.missing, ["1", "3"]);
        assert!(reconciled.unreadable.is_empty());
    }

    #[test]
    fn undecodable_ids_are_not_missing() {
        let requested = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let returned = DecodedBatch {
            messages: vec![message("1")],
            undecodable: vec!["2".to_string(), "8".to_string()],
        };
        let reconciled = reconcile(&requested, returned);
        assert_eq!(reconciled.missing, ["3"]);
        assert_eq!(reconciled.unreadable, ["2"]);
    }
}
