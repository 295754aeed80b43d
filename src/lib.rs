//! twcs - conversation harvester for monitored social accounts
//!
//! Collects replies and mentions for a set of accounts under a per-run quota,
//! stores them idempotently in `SQLite`, and repairs gaps left by earlier runs.
//!
//! # Modules
//!
//! - [`scheduler`] - Priority scorer and collection orchestrator
//! - [`repair`] - Orphan resolver and truncation repair
//! - [`pipeline`] - One leased run over all phases
//! - [`storage`] - `SQLite` upsert store
//! - [`upstream`] - Platform client trait and adapters
//! - [`payload`] - Status JSON decoding
//! - [`config`] - Layered configuration
//! - [`error`] - Custom error types with rich context

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod payload;
pub mod pipeline;
pub mod repair;
pub mod scheduler;
pub mod storage;
pub mod upstream;

pub use cli::*;
pub use config::Config;
pub use error::{
    HarvestError, Result, VALID_CONFIG_KEYS, find_closest_match, format_did_you_mean,
    format_error, format_unknown_value_error,
};
pub use model::*;
pub use pipeline::{Pipeline, Stages};
pub use storage::Storage;

use chrono::{DateTime, Datelike, Utc};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "twcs.db";

/// Standard width for content dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

/// Get the default data directory for twcs
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("twcs")
}

/// Get the default database path
#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Format an integer with thousands separators.
#[must_use]
pub fn format_number(value: i64) -> String {
    let abs = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(abs.len() + abs.len() / 3);

    for (idx, ch) in abs.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    let mut formatted: String = out.chars().rev().collect();
    if value < 0 {
        formatted.insert(0, '-');
    }
    formatted
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_count(value: usize) -> String {
    format_number(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Format a datetime as a human-friendly relative string.
///
/// Uses smart thresholds for readability:
/// - < 1 minute: "just now"
/// - < 1 hour: "Nm ago"
/// - < 24 hours: "Nh ago"
/// - < 7 days: "Nd ago"
/// - Same calendar year: "Mon D"
/// - Different year: "Mon D, YYYY"
#[must_use]
pub fn format_relative_date(dt: DateTime<Utc>) -> String {
    format_relative_date_with_base(dt, Utc::now())
}

/// Format a datetime relative to a fixed base time (useful for tests).
#[must_use]
pub fn format_relative_date_with_base(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(dt);

    if duration.num_seconds() < 0 {
        return dt.format("%b %d, %Y").to_string();
    }

    let seconds = duration.num_seconds();
    let minutes = duration.num_minutes();
    let hours = duration.num_hours();
    let days = duration.num_days();

    if seconds < 60 {
        "just now".to_string()
    } else if minutes < 60 {
        format!("{minutes}m ago")
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else if dt.year() == now.year() {
        dt.format("%b %d").to_string()
    } else {
        dt.format("%b %d, %Y").to_string()
    }
}

/// Format an optional last-fetch time; absent means never fetched.
#[must_use]
pub fn format_last_fetch(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(|| "never".to_string(), format_relative_date)
}

#[cfg(test)]
mod tests {
    use super::{format_count, format_last_fetch, format_number, format_relative_date_with_base};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn format_number_adds_separators() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(12_345_678), "12,345,678");
        assert_eq!(format_number(-12_345), "-12,345");
        assert_eq!(format_count(25_000), "25,000");
    }

    #[test]
    fn format_relative_date_thresholds() {
        let base = Utc
            .with_ymd_and_hms(2025, 1, 10, 12, 0, 0)
            .single()
            .unwrap();

        assert_eq!(
            format_relative_date_with_base(base - Duration::seconds(30), base),
            "just now"
        );
        assert_eq!(
            format_relative_date_with_base(base - Duration::minutes(5), base),
            "5m ago"
        );
        assert_eq!(
            format_relative_date_with_base(base - Duration::hours(3), base),
            "3h ago"
        );
        assert_eq!(
            format_relative_date_with_base(base - Duration::days(2), base),
            "2d ago"
        );

        let same_year = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap();
        assert_eq!(format_relative_date_with_base(same_year, base), "Jan 01");

        let different_year = Utc
            .with_ymd_and_hms(2024, 12, 11, 0, 0, 0)
            .single()
            .unwrap();
        assert_eq!(
            format_relative_date_with_base(different_year, base),
            "Dec 11, 2024"
        );
    }

    #[test]
    fn never_fetched_accounts() {
        assert_eq!(format_last_fetch(None), "never");
    }
}
