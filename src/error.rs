//! Custom error types for twcs.
//!
//! Fatal errors surface here. Per-phase and per-batch upstream failures are
//! carried as [`crate::upstream::UpstreamError`] values inside run reports and
//! never reach this type.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for twcs operations.
#[derive(Error, Debug)]
pub enum HarvestError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

    /// A configuration value is out of range.
    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidConfig { key: &'static str, reason: String },

    /// Environment variable error.
    #[error("Invalid environment variable {var}: {reason}")]
    EnvVarError { var: String, reason: String },

    /// A credential required by the selected upstream adapter is absent.
    #[error("Missing credential: {name}")]
    MissingCredential { name: &'static str },

    /// No accounts were configured for collection.
    #[error("No monitored screen names configured")]
    NoScreenNames,

    // =========================================================================
    // Run Coordination Errors
    // =========================================================================
    /// Another pipeline run holds the lease.
    #[error("Another run is in progress (held by '{holder}' until {expires_at})")]
    RunInProgress { holder: String, expires_at: String },

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Database file not found.
    #[error("No database found at: {path}")]
    DatabaseNotFound { path: PathBuf },

    /// Database schema version is newer than this binary understands.
    #[error("Database schema version mismatch: expected at most {expected}, found {found}")]
    SchemaMismatch { expected: i32, found: i32 },

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    // =========================================================================
    // IO / Data Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Path-specific IO error with context.
    #[error("Failed to {operation} '{path}': {source}")]
    PathError {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Data not found.
    #[error("{item_type} with ID '{id}' not found")]
    NotFound { item_type: &'static str, id: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Wrapped anyhow error from the storage layer.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for twcs operations.
pub type Result<T> = std::result::Result<T, HarvestError>;

impl HarvestError {
    /// Create an invalid config value error.
    pub fn invalid_config(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key,
            reason: reason.into(),
        }
    }

    /// Create a database not found error.
    pub fn database_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DatabaseNotFound { path: path.into() }
    }

    /// Create a not found error.
    pub fn not_found(item_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            item_type,
            id: id.into(),
        }
    }

    /// Create a path error with context.
    pub fn path_error(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::PathError {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::MissingCredential { .. } => {
                Some("Export TWCS_BEARER_TOKEN, or pass --fixture <file> for an offline run.")
            }
            Self::NoScreenNames => Some(
                "Set collect.screen_names in the config file, TWCS_SCREEN_NAMES, or --screen-names.",
            ),
            Self::InvalidConfig { .. } | Self::ConfigError { .. } => {
                Some("Run 'twcs config --show' to inspect the effective configuration.")
            }
            Self::RunInProgress { .. } => {
                Some("Wait for the other run to finish; stale leases expire after lease.ttl_minutes.")
            }
            Self::DatabaseNotFound { .. } => Some("Run 'twcs run' once to create the database."),
            Self::SchemaMismatch { .. } => Some("Upgrade twcs to a version that knows this schema."),
            _ => None,
        }
    }
}

// =============================================================================
// CLI Error Formatting Utilities
// =============================================================================

use colored::Colorize;

/// Format a structured CLI error with explanation and suggestions.
#[must_use]
pub fn format_error(title: &str, explanation: &str, suggestions: &[&str]) -> String {
    use std::fmt::Write;

    let mut output = format!("{} {}", "✗".red().bold(), title.bold());

    if !explanation.is_empty() {
        let _ = write!(output, "\n\n   {explanation}");
    }

    match suggestions {
        [] => {}
        [only] => {
            let _ = write!(output, "\n\n   {} {only}", "Hint:".cyan());
        }
        many => {
            let _ = write!(output, "\n\n   {}:", "Try".cyan());
            for suggestion in many {
                let _ = write!(output, "\n     {} {}", "•".dimmed(), suggestion);
            }
        }
    }

    output
}

/// Calculate the Levenshtein edit distance between two strings.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    if a_chars.is_empty() {
        return b_chars.len();
    }
    if b_chars.is_empty() {
        return a_chars.len();
    }

    let mut prev_row: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr_row: Vec<usize> = vec![0; b_chars.len() + 1];

    for (i, a_char) in a_chars.iter().enumerate() {
        curr_row[0] = i + 1;

        for (j, b_char) in b_chars.iter().enumerate() {
            let cost = usize::from(a_char != b_char);
            curr_row[j + 1] = (prev_row[j + 1] + 1)
                .min(curr_row[j] + 1)
                .min(prev_row[j] + cost);
        }

        std::mem::swap(&mut prev_row, &mut curr_row);
    }

    prev_row[b_chars.len()]
}

/// Find the best match from a list of candidates for a given input.
///
/// Exact matches are not returned; they need no suggestion.
#[must_use]
pub fn find_closest_match<'a>(
    input: &str,
    candidates: &[&'a str],
    max_distance: Option<usize>,
) -> Option<&'a str> {
    let max_dist = max_distance.unwrap_or(2);
    let input_lower = input.to_lowercase();

    candidates
        .iter()
        .map(|&candidate| {
            let distance = levenshtein_distance(&input_lower, &candidate.to_lowercase());
            (candidate, distance)
        })
        .filter(|(_, distance)| *distance <= max_dist && *distance > 0)
        .min_by_key(|(_, distance)| *distance)
        .map(|(candidate, _)| candidate)
}

/// Format a "did you mean?" suggestion.
#[must_use]
pub fn format_did_you_mean(suggestion: &str) -> String {
    format!("Did you mean '{}'?", suggestion.green())
}

/// Format an error for an unknown value with "did you mean?" support.
#[must_use]
pub fn format_unknown_value_error(kind: &str, input: &str, valid_options: &[&str]) -> String {
    let title = format!("Unknown {kind}: '{input}'");

    let mut suggestions = Vec::new();
    if let Some(closest) = find_closest_match(input, valid_options, None) {
        suggestions.push(format_did_you_mean(closest));
    }
    if valid_options.len() <= 8 {
        suggestions.push(format!("Valid {kind}s: {}", valid_options.join(", ")));
    }

    let suggestion_refs: Vec<&str> = suggestions.iter().map(String::as_str).collect();
    format_error(&title, "", &suggestion_refs)
}

/// Config keys readable through `twcs config --get`.
pub const VALID_CONFIG_KEYS: &[&str] = &[
    "paths.db",
    "collect.screen_names",
    "collect.quota",
    "collect.page_size",
    "scoring.rate_window_days",
    "scoring.rate_floor",
    "scoring.default_scrape_age_days",
    "repair.orphan_window_hours",
    "repair.max_orphan_candidates",
    "repair.batch_size",
    "repair.max_batches",
    "repair.shared_budget",
    "repair.truncation_max_batches",
    "upstream.base_url",
    "upstream.timeout_secs",
    "lease.ttl_minutes",
];
