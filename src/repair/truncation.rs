//! Truncation repair: refetch messages stored with cut-off text.

use super::reconcile;
use crate::model::{ConflictPolicy, TruncationReport};
use crate::storage::Storage;
use crate::upstream::Upstream;
use anyhow::Result;
use tracing::{debug, info, warn};

/// Refetch truncated messages, oldest first, spending at most `budget`
/// batches. Recovered messages overwrite the stored copy; ids the platform no
/// longer returns are deleted. The first upstream error ends the pass.
///
/// # Errors
///
/// Returns an error if the store fails.
pub fn repair_truncated(
    storage: &mut Storage,
    upstream: &dyn Upstream,
    batch_size: usize,
    budget: usize,
) -> Result<TruncationReport> {
    let batch_size = batch_size.max(1);
    let candidates = storage.truncated_message_ids(batch_size.saturating_mul(budget))?;
    let mut report = TruncationReport {
        candidates: candidates.len(),
        ..TruncationReport::default()
    };

    for (batch_index, batch) in candidates.chunks(batch_size).take(budget).enumerate() {
        report.batches_used += 1;

        let returned = match upstream.lookup(batch) {
            Ok(returned) => returned,
            Err(e) => {
                warn!(batch = batch_index, ids = batch.len(), error = %e, "Lookup failed; stopping truncation repair");
                report.aborted = Some(e.to_string());
                break;
            }
        };

        let reconciled = reconcile(batch, returned);
        if !reconciled.unreadable.is_empty() {
            warn!(
                batch = batch_index,
                ids = ?reconciled.unreadable,
                "Messages returned but undecodable; keeping stored copies"
            );
        }
        let written = storage.upsert_messages(&reconciled.found, ConflictPolicy::Overwrite)?;
        let deleted = storage.delete_messages(&reconciled.missing)?;
        debug!(
            batch = batch_index,
            ids = batch.len(),
            repaired = written.written,
            deleted,
            unreadable = reconciled.unreadable.len(),
            "Truncation batch reconciled"
        );
        report.repaired += written.written;
        report.deleted += deleted;
        report.unreadable += reconciled.unreadable.len();
    }

    info!(
        candidates = report.candidates,
        batches = report.batches_used,
        repaired = report.repaired,
        deleted = report.deleted,
        unreadable = report.unreadable,
        aborted = report.aborted.is_some(),
        "Truncation repair finished"
    );
    Ok(report)
}
