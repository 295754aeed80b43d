//! Collection orchestrator.
//!
//! Walks the ranked list up to the quota. Each account gets a replies phase
//! (its own timeline) and a mentions phase (a search for `@name`). A failing
//! phase is reported as skipped and the run moves on.

use super::scorer::{RankedAccount, ScoringSnapshot};
use crate::model::{
    AccountReport, CollectionReport, ConflictPolicy, FetchKind, Message, PhaseOutcome,
};
use crate::storage::Storage;
use crate::upstream::Upstream;
use chrono::Utc;
use indicatif::ProgressBar;
use tracing::{debug, info, warn};

pub struct Collector<'a> {
    storage: &'a mut Storage,
    upstream: &'a dyn Upstream,
    snapshot: &'a ScoringSnapshot,
    page_size: usize,
    progress: ProgressBar,
}

impl<'a> Collector<'a> {
    pub fn new(
        storage: &'a mut Storage,
        upstream: &'a dyn Upstream,
        snapshot: &'a ScoringSnapshot,
        page_size: usize,
    ) -> Self {
        Self {
            storage,
            upstream,
            snapshot,
            page_size,
            progress: ProgressBar::hidden(),
        }
    }

    /// Report per-account progress on `bar`.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    /// Process at most `quota` accounts in ranked order.
    pub fn collect(&mut self, ranked: &[RankedAccount], quota: usize) -> CollectionReport {
        let selected = &ranked[..ranked.len().min(quota)];
        self.progress.set_length(selected.len() as u64);

        let mut report = CollectionReport {
            quota,
            accounts: Vec::with_capacity(selected.len()),
        };
        for account in selected {
            let screen_name = account.screen_name.as_str();
            self.progress.set_message(screen_name.to_string());

            let replies = self.run_phase(screen_name, FetchKind::Replies);
            let mentions = self.run_phase(screen_name, FetchKind::Mentions);
            report.accounts.push(AccountReport {
                screen_name: screen_name.to_string(),
                replies,
                mentions,
            });
            self.progress.inc(1);
        }
        self.progress.finish_and_clear();

        info!(
            accounts = report.accounts.len(),
            stored = report.stored(),
            skipped_phases = report.skipped_phases(),
            "Collection finished"
        );
        report
    }

    fn fetch(&self, screen_name: &str, kind: FetchKind) -> crate::upstream::Result<Vec<Message>> {
        match kind {
            FetchKind::Replies => {
                self.upstream
                    .user_timeline(screen_name, None, self.page_size, true)
            }
            FetchKind::Mentions => {
                let since = self
                    .snapshot
                    .last_mentions_fetch(screen_name)
                    .map(|at| at.date_naive());
                self.upstream
                    .search(&format!("@{screen_name}"), since, self.page_size)
            }
        }
    }

    fn run_phase(&mut self, screen_name: &str, kind: FetchKind) -> PhaseOutcome {
        let messages = match self.fetch(screen_name, kind) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(screen_name, %kind, error = %e, "Fetch failed; skipping phase");
                return PhaseOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        match self.persist(screen_name, kind, &messages) {
            Ok(stored) => {
                debug!(screen_name, %kind, fetched = messages.len(), stored, "Phase completed");
                PhaseOutcome::Completed {
                    fetched: messages.len(),
                    stored,
                }
            }
            Err(e) => {
                warn!(screen_name, %kind, error = %format!("{e:#}"), "Store failed; skipping phase");
                PhaseOutcome::Skipped {
                    reason: format!("store: {e:#}"),
                }
            }
        }
    }

    /// Store the messages not already present, then log the attempt.
    fn persist(
        &mut self,
        screen_name: &str,
        kind: FetchKind,
        messages: &[Message],
    ) -> anyhow::Result<usize> {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let existing = self.storage.existing_message_ids(&ids)?;
        let fresh: Vec<Message> = messages
            .iter()
            .filter(|m| !existing.contains(&m.id))
            .cloned()
            .collect();

        let report = self.storage.upsert_messages(&fresh, ConflictPolicy::Ignore)?;
        self.storage
            .record_fetch_attempt(screen_name, kind, Utc::now())?;
        Ok(report.written)
    }
}
