//! One harvesting run: lease, score, collect, repair, summarize.

use crate::config::Config;
use crate::error::{HarvestError, Result};
use crate::logging::OperationGuard;
use crate::model::RunSummary;
use crate::repair::{repair_truncated, resolve_orphans, truncation_budget};
use crate::scheduler::{Collector, ScoringSnapshot, prioritize};
use crate::storage::{LeaseOutcome, Storage};
use crate::upstream::Upstream;
use chrono::{DateTime, Duration, Utc};
use indicatif::ProgressBar;
use tracing::{info, warn};

/// Which parts of the run to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stages {
    pub collect: bool,
    pub repair: bool,
}

impl Stages {
    pub const ALL: Self = Self {
        collect: true,
        repair: true,
    };
    pub const COLLECT_ONLY: Self = Self {
        collect: true,
        repair: false,
    };
    pub const REPAIR_ONLY: Self = Self {
        collect: false,
        repair: true,
    };
}

pub struct Pipeline<'a> {
    storage: &'a mut Storage,
    upstream: &'a dyn Upstream,
    config: &'a Config,
    holder: String,
    progress: Option<ProgressBar>,
}

impl<'a> Pipeline<'a> {
    pub fn new(storage: &'a mut Storage, upstream: &'a dyn Upstream, config: &'a Config) -> Self {
        Self {
            storage,
            upstream,
            config,
            holder: format!("twcs-{}", std::process::id()),
            progress: None,
        }
    }

    /// Show collection progress on `bar`.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Execute one run under the run lease.
    ///
    /// Phase failures are recorded in the summary. Only lease contention and
    /// store failures outside a phase are returned as errors.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::RunInProgress`] if another run holds the lease,
    /// or a database error if the scoring snapshot cannot be read.
    pub fn run(&mut self, screen_names: &[String], stages: Stages) -> Result<RunSummary> {
        let started_at = Utc::now();
        let ttl = Duration::minutes(i64::from(self.config.lease.ttl_minutes));

        match self.storage.acquire_run_lease(&self.holder, started_at, ttl)? {
            LeaseOutcome::Acquired => {}
            LeaseOutcome::Held { holder, expires_at } => {
                return Err(HarvestError::RunInProgress {
                    holder,
                    expires_at: expires_at.to_rfc3339(),
                });
            }
        }

        let result = self.run_stages(screen_names, stages, started_at);

        if let Err(e) = self.storage.release_run_lease(&self.holder) {
            warn!(error = %format!("{e:#}"), "Failed to release run lease");
        }
        result
    }

    fn run_stages(
        &mut self,
        screen_names: &[String],
        stages: Stages,
        started_at: DateTime<Utc>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            started_at,
            finished_at: started_at,
            ranked: vec![],
            collection: None,
            orphans: None,
            truncation: None,
        };

        if stages.collect {
            let guard = OperationGuard::new("collect");
            let snapshot =
                match ScoringSnapshot::load(self.storage, started_at, &self.config.scoring) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        guard.fail(&format!("{e:#}"));
                        return Err(e.into());
                    }
                };
            let ranked = prioritize(screen_names, &snapshot, &self.config.scoring);
            summary.ranked = ranked.iter().map(|r| r.screen_name.clone()).collect();

            let mut collector = Collector::new(
                self.storage,
                self.upstream,
                &snapshot,
                self.config.collect.page_size,
            );
            if let Some(bar) = self.progress.take() {
                collector = collector.with_progress(bar);
            }
            summary.collection = Some(collector.collect(&ranked, self.config.collect.quota));
            guard.complete();
        }

        if stages.repair {
            let repair = &self.config.repair;

            let guard = OperationGuard::new("orphans");
            let mut orphan_batches = 0;
            match resolve_orphans(self.storage, self.upstream, repair, Utc::now()) {
                Ok(report) => {
                    guard.complete();
                    orphan_batches = report.batches_used;
                    summary.orphans = Some(report);
                }
                Err(e) => guard.fail(&format!("{e:#}")),
            }

            let budget = truncation_budget(repair, orphan_batches);
            let guard = OperationGuard::new("truncation");
            match repair_truncated(self.storage, self.upstream, repair.batch_size, budget) {
                Ok(report) => {
                    guard.complete();
                    summary.truncation = Some(report);
                }
                Err(e) => guard.fail(&format!("{e:#}")),
            }
        }

        summary.finished_at = Utc::now();
        info!(
            ranked = summary.ranked.len(),
            stored = summary.collection.as_ref().map_or(0, |c| c.stored()),
            duration_ms = (summary.finished_at - started_at).num_milliseconds(),
            "Run finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::FixtureUpstream;
    use serde_json::json;

    fn fixture() -> FixtureUpstream {
        FixtureUpstream::from_value(json!({
            "timelines": {
                "support": [{
                    "id_str": "20",
                    "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                    "full_text": "@customer happy to help",
                    "in_reply_to_status_id_str": "19",
                    "in_reply_to_screen_name": "customer",
                    "user": {"id_str": "1", "screen_name": "Support"}
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn lease_held_elsewhere_blocks_run() {
        let mut storage = Storage::open_memory().unwrap();
        storage
            .acquire_run_lease("someone-else", Utc::now(), Duration::minutes(10))
            .unwrap();
        let upstream = fixture();
        let config = Config::default();

        let err = Pipeline::new(&mut storage, &upstream, &config)
            .run(&["support".to_string()], Stages::ALL)
            .unwrap_err();
        match err {
            HarvestError::RunInProgress { holder, .. } => assert_eq!(holder, "someone-else"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(upstream.calls().is_empty());
        assert_eq!(storage.counts().unwrap().fetch_attempts, 0);
    }

    #[test]
    fn run_releases_lease_and_reports_phases() {
        let mut storage = Storage::open_memory().unwrap();
        let upstream = fixture();
        let config = Config::default();

        let summary = Pipeline::new(&mut storage, &upstream, &config)
            .run(&["support".to_string()], Stages::ALL)
            .unwrap();
        assert_eq!(summary.ranked, ["support"]);
        assert_eq!(summary.collection.as_ref().unwrap().stored(), 1);
        // Parent 19 is not in the fixture's lookup pool.
        assert_eq!(summary.orphans.as_ref().unwrap().marked_inaccessible, 1);
        assert_eq!(summary.truncation.as_ref().unwrap().candidates, 0);

        assert_eq!(
            storage
                .acquire_run_lease("next", Utc::now(), Duration::minutes(1))
                .unwrap(),
            LeaseOutcome::Acquired
        );
    }

    #[test]
    fn repair_only_skips_collection() {
        let mut storage = Storage::open_memory().unwrap();
        let upstream = fixture();
        let config = Config::default();

        let summary = Pipeline::new(&mut storage, &upstream, &config)
            .run(&[], Stages::REPAIR_ONLY)
            .unwrap();
        assert!(summary.collection.is_none());
        assert!(summary.ranked.is_empty());
        assert!(summary.orphans.is_some());
        assert!(upstream.calls().iter().all(|c| c.starts_with("lookup")));
    }
}
