//! Priority scorer.
//!
//! Ranks monitored accounts by inferred missing volume: days since the last
//! successful fetch times the recent daily posting rate.

use crate::config::ScoringConfig;
use crate::storage::{Activity, FetchHistory, Storage};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Store aggregates read once at run start.
#[derive(Debug, Clone)]
pub struct ScoringSnapshot {
    taken_at: DateTime<Utc>,
    history: HashMap<String, FetchHistory>,
    activity: HashMap<String, Activity>,
}

impl ScoringSnapshot {
    /// Read fetch history and windowed message activity from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if either aggregate query fails.
    pub fn load(storage: &Storage, now: DateTime<Utc>, config: &ScoringConfig) -> Result<Self> {
        let window_start = now - Duration::days(i64::from(config.rate_window_days));
        Ok(Self {
            taken_at: now,
            history: storage.fetch_history()?,
            activity: storage.message_activity(window_start)?,
        })
    }

    #[must_use]
    pub const fn from_parts(
        taken_at: DateTime<Utc>,
        history: HashMap<String, FetchHistory>,
        activity: HashMap<String, Activity>,
    ) -> Self {
        Self {
            taken_at,
            history,
            activity,
        }
    }

    #[must_use]
    pub const fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Latest successful fetch of any kind.
    #[must_use]
    pub fn last_fetch(&self, screen_name: &str) -> Option<DateTime<Utc>> {
        self.history.get(screen_name).and_then(FetchHistory::latest)
    }

    #[must_use]
    pub fn last_mentions_fetch(&self, screen_name: &str) -> Option<DateTime<Utc>> {
        self.history.get(screen_name).and_then(|h| h.mentions)
    }

    #[must_use]
    pub fn activity(&self, screen_name: &str) -> Activity {
        self.activity.get(screen_name).copied().unwrap_or_default()
    }
}

/// One entry of the priority order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedAccount {
    pub screen_name: String,
    /// `None` for accounts with no stored messages at all.
    pub weight: Option<f64>,
    pub scrape_age_days: f64,
    pub daily_rate: f64,
}

#[allow(clippy::cast_precision_loss)]
fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    ((later - earlier).num_milliseconds() as f64 / MILLIS_PER_DAY).max(0.0)
}

/// Rank normalized screen names, highest weight first.
///
/// Ties keep input order. Unscored accounts follow all scored ones, also in
/// input order. Repeated names keep only their first occurrence.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn prioritize(
    screen_names: &[String],
    snapshot: &ScoringSnapshot,
    config: &ScoringConfig,
) -> Vec<RankedAccount> {
    let now = snapshot.taken_at();
    let window_days = f64::from(config.rate_window_days.max(1));

    let mut seen = HashSet::new();
    let (mut scored, unscored): (Vec<RankedAccount>, Vec<RankedAccount>) = screen_names
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .map(|name| {
            let scrape_age_days = snapshot
                .last_fetch(name)
                .map_or(config.default_scrape_age_days, |at| days_between(at, now));
            let activity = snapshot.activity(name);
            let daily_rate = (activity.recent as f64 / window_days).max(config.rate_floor);
            RankedAccount {
                screen_name: name.clone(),
                weight: (activity.total > 0).then_some(scrape_age_days * daily_rate),
                scrape_age_days,
                daily_rate,
            }
        })
        .partition(|ranked| ranked.weight.is_some());

    // sort_by is stable, so equal weights keep input order.
    scored.sort_by(|a, b| {
        let (wa, wb) = (a.weight.unwrap_or_default(), b.weight.unwrap_or_default());
        wb.total_cmp(&wa)
    });
    scored.extend(unscored);
    scored
}
