//! Upstream status payload decoding.
//!
//! Statuses arrive as platform JSON objects. The raw object is kept verbatim
//! as the message payload; the fields below are lifted out for querying.

use crate::model::{Account, Message};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

/// Text cut off by the platform ends in an ellipsis, optionally followed by
/// the shortened link back to the full status.
static TRUNCATION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"…(?:\s+https://t\.co/[A-Za-z0-9]+)?\s*$").expect("truncation marker regex")
});

/// Parse the platform date format: "Wed Oct 10 20:19:24 +0000 2018".
#[must_use]
pub fn parse_platform_date(date_str: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(date_str, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Whether message text carries the textual truncation marker.
#[must_use]
pub fn has_truncation_marker(text: &str) -> bool {
    TRUNCATION_MARKER.is_match(text)
}

/// Read an id that may be given as `<field>_str` or as a bare number.
fn id_field(value: &Value, field: &str) -> Option<String> {
    value[format!("{field}_str")]
        .as_str()
        .map(str::to_string)
        .or_else(|| value[field].as_u64().map(|id| id.to_string()))
}

/// Id of a status object, readable even when the rest of it is not.
#[must_use]
pub fn status_id(status: &Value) -> Option<String> {
    id_field(status, "id")
}

/// Best available body text: extended, then full, then classic text.
fn body_text(status: &Value) -> Option<&str> {
    status["extended_tweet"]["full_text"]
        .as_str()
        .or_else(|| status["full_text"].as_str())
        .or_else(|| status["text"].as_str())
}

/// Decode the author object of a status.
///
/// # Errors
///
/// Returns an error if the user object lacks an id or screen name.
pub fn decode_user(user: &Value) -> Result<Account> {
    Ok(Account {
        id: id_field(user, "id").context("user has no id")?,
        screen_name: user["screen_name"]
            .as_str()
            .context("user has no screen_name")?
            .to_string(),
        payload: user.clone(),
    })
}

/// Decode one status object into a [`Message`].
///
/// # Errors
///
/// Returns an error if a required field is missing or malformed.
pub fn decode_status(status: Value) -> Result<Message> {
    let id = id_field(&status, "id").context("status has no id")?;
    let created_at = status["created_at"]
        .as_str()
        .and_then(parse_platform_date)
        .with_context(|| format!("status {id} has no valid created_at"))?;
    let author = decode_user(&status["user"]).with_context(|| format!("status {id}"))?;

    let text = body_text(&status).unwrap_or_default().to_string();
    // An extended body is complete whatever the classic flag says. Otherwise
    // an explicit flag wins and the marker only fills in for a missing one.
    let truncated = if status["extended_tweet"]["full_text"].is_string() {
        false
    } else {
        status["truncated"]
            .as_bool()
            .unwrap_or_else(|| has_truncation_marker(&text))
    };

    Ok(Message {
        id,
        in_reply_to: id_field(&status, "in_reply_to_status_id"),
        in_reply_to_screen_name: status["in_reply_to_screen_name"]
            .as_str()
            .map(str::to_string),
        author,
        created_at,
        text,
        truncated,
        payload: status,
    })
}

/// Statuses from one response: the decoded ones, and the ids of those that
/// came back but could not be decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    pub messages: Vec<Message>,
    pub undecodable: Vec<String>,
}

impl DecodedBatch {
    pub fn extend(&mut self, other: Self) {
        self.messages.extend(other.messages);
        self.undecodable.extend(other.undecodable);
    }
}

/// Decode a list of statuses, skipping (and logging) any that fail.
#[must_use]
pub fn decode_batch(statuses: Vec<Value>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();
    for status in statuses {
        let id = status_id(&status);
        match decode_status(status) {
            Ok(message) => batch.messages.push(message),
            Err(e) => {
                warn!(id = id.as_deref().unwrap_or("?"), error = %format!("{e:#}"), "Skipping undecodable status");
                batch.undecodable.extend(id);
            }
        }
    }
    batch
}

/// Decode a list of statuses, keeping only the ones that decode.
#[must_use]
pub fn decode_statuses(statuses: Vec<Value>) -> Vec<Message> {
    decode_batch(statuses).messages
}
