//! Upstream platform client.
//!
//! The pipeline only talks to the platform through [`Upstream`]. Two adapters
//! exist: [`HttpUpstream`] for the live REST API and [`FixtureUpstream`] for
//! canned JSON used by tests and offline runs.

mod fixture;
mod http;

pub use fixture::{FixtureData, FixtureUpstream};
pub use http::{DEFAULT_BASE_URL, HttpUpstream};

use crate::model::Message;
use crate::payload::DecodedBatch;
use chrono::NaiveDate;
use thiserror::Error;

/// Maximum number of ids accepted by one lookup call.
pub const MAX_LOOKUP_IDS: usize = 100;

pub type Result<T> = std::result::Result<T, UpstreamError>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited{}", reset.map(|r| format!(" until {r}")).unwrap_or_default())]
    RateLimited { reset: Option<i64> },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Read access to the upstream platform.
pub trait Upstream {
    /// Search recent messages matching `query`, optionally not older than `since`.
    fn search(&self, query: &str, since: Option<NaiveDate>, limit: usize) -> Result<Vec<Message>>;

    /// Most recent messages posted by `screen_name`.
    fn user_timeline(
        &self,
        screen_name: &str,
        since_id: Option<&str>,
        limit: usize,
        include_replies: bool,
    ) -> Result<Vec<Message>>;

    /// Fetch messages by id. Ids that no longer exist are simply absent;
    /// statuses that came back but failed to decode are listed by id.
    fn lookup(&self, ids: &[String]) -> Result<DecodedBatch>;
}
