//! Configuration system for twcs.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **User config file** - `~/.config/twcs/config.toml` (or `--config`)
//! 3. **Environment variables** - `TWCS_*` prefix
//! 4. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/twcs/twcs.db"
//!
//! [collect]
//! screen_names = ["comcastcares", "@AmazonHelp"]
//! quota = 180
//! page_size = 100
//!
//! [scoring]
//! rate_window_days = 7
//! rate_floor = 1.0
//! default_scrape_age_days = 365.0
//!
//! [repair]
//! orphan_window_hours = 24
//! batch_size = 100
//! max_batches = 250
//! shared_budget = true
//!
//! [upstream]
//! base_url = "https://api.twitter.com/1.1"
//! timeout_secs = 30
//!
//! [lease]
//! ttl_minutes = 60
//! ```
//!
//! The bearer token is never read from the file; set `TWCS_BEARER_TOKEN`.

use crate::error::{HarvestError, Result};
use crate::model::normalize_screen_name;
use crate::upstream::MAX_LOOKUP_IDS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Largest page the platform serves for timelines and searches.
pub const MAX_PAGE_SIZE: usize = 200;

/// Main configuration structure for twcs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub collect: CollectConfig,
    pub scoring: ScoringConfig,
    pub repair: RepairConfig,
    pub upstream: UpstreamConfig,
    pub lease: LeaseConfig,
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `TWCS_DB`
    pub db: Option<PathBuf>,
}

/// Collection orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
    /// Monitored accounts. A leading `@` and letter case are ignored.
    /// Environment variables: `TWCS_SCREEN_NAMES`, `MONITORED_SCREEN_NAMES`
    pub screen_names: Vec<String>,

    /// Accounts processed per run.
    /// Environment variable: `TWCS_QUOTA`
    pub quota: usize,

    /// Messages requested per timeline or search call.
    pub page_size: usize,
}

/// Priority scorer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Trailing window for the posting-rate estimate.
    pub rate_window_days: u32,

    /// Lower bound for the daily rate.
    pub rate_floor: f64,

    /// Scrape age assumed for accounts never fetched.
    pub default_scrape_age_days: f64,
}

/// Orphan resolver and truncation repair settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub orphan_window_hours: u32,
    pub max_orphan_candidates: usize,
    pub batch_size: usize,
    pub max_batches: usize,
    /// Truncation repair gets whatever the orphan resolver left of `max_batches`.
    pub shared_budget: bool,
    /// Truncation budget when `shared_budget` is off.
    pub truncation_max_batches: usize,
}

/// Upstream adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Environment variable: `TWCS_BASE_URL`
    pub base_url: String,
    pub timeout_secs: u64,
    /// Environment variable only: `TWCS_BEARER_TOKEN`
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

/// Run lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub ttl_minutes: u32,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            screen_names: vec![],
            quota: 180,
            page_size: 100,
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rate_window_days: 7,
            rate_floor: 1.0,
            default_scrape_age_days: 365.0,
        }
    }
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            orphan_window_hours: 24,
            max_orphan_candidates: 25_000,
            batch_size: MAX_LOOKUP_IDS,
            max_batches: 250,
            shared_budget: true,
            truncation_max_batches: 250,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: crate::upstream::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            bearer_token: None,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl_minutes: 60 }
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| HarvestError::EnvVarError {
        var: var.to_string(),
        reason: e.to_string(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from all sources using the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file or an environment variable is invalid.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit_path, |var| std::env::var(var).ok())
    }

    /// Load configuration, resolving environment variables through `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file or an environment variable is invalid.
    pub fn load_with<F>(explicit_path: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = env("TWCS_CONFIG").map(PathBuf::from);
        let mut config = match explicit_path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load_from_file(&path)?,
            None => match Self::user_config_path().filter(|p| p.exists()) {
                Some(path) => Self::load_from_file(&path)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides(&env)?;
        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HarvestError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&content).map_err(|e| HarvestError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("twcs").join("config.toml"))
    }

    fn apply_env_overrides<F>(&mut self, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = env("TWCS_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }

        // Legacy variable name accepted as a fallback.
        if let Some(names) = env("TWCS_SCREEN_NAMES").or_else(|| env("MONITORED_SCREEN_NAMES")) {
            self.collect.screen_names = split_list(&names);
        }
        if let Some(quota) = env("TWCS_QUOTA") {
            self.collect.quota = parse_env("TWCS_QUOTA", &quota)?;
        }

        if let Some(url) = env("TWCS_BASE_URL") {
            self.upstream.base_url = url;
        }
        if let Some(token) = env("TWCS_BEARER_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.upstream.bearer_token = Some(token.trim().to_string());
        }
        Ok(())
    }

    /// Replace the monitored set from a comma-separated CLI value.
    pub fn set_screen_names(&mut self, value: &str) {
        self.collect.screen_names = split_list(value);
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::InvalidConfig`] for the first out-of-range value.
    pub fn validate(&self) -> Result<()> {
        if self.collect.quota == 0 {
            return Err(HarvestError::invalid_config("collect.quota", "must be at least 1"));
        }
        if self.collect.page_size == 0 || self.collect.page_size > MAX_PAGE_SIZE {
            return Err(HarvestError::invalid_config(
                "collect.page_size",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            ));
        }
        if self.scoring.rate_window_days == 0 {
            return Err(HarvestError::invalid_config(
                "scoring.rate_window_days",
                "must be at least 1",
            ));
        }
        if self.scoring.rate_floor.is_nan() || self.scoring.rate_floor <= 0.0 {
            return Err(HarvestError::invalid_config(
                "scoring.rate_floor",
                "must be greater than 0",
            ));
        }
        if self.scoring.default_scrape_age_days.is_nan() || self.scoring.default_scrape_age_days < 0.0
        {
            return Err(HarvestError::invalid_config(
                "scoring.default_scrape_age_days",
                "must not be negative",
            ));
        }
        if self.repair.orphan_window_hours == 0 {
            return Err(HarvestError::invalid_config(
                "repair.orphan_window_hours",
                "must be at least 1",
            ));
        }
        if self.repair.batch_size == 0 || self.repair.batch_size > MAX_LOOKUP_IDS {
            return Err(HarvestError::invalid_config(
                "repair.batch_size",
                format!("must be between 1 and {MAX_LOOKUP_IDS}"),
            ));
        }
        if self.repair.max_batches == 0 {
            return Err(HarvestError::invalid_config(
                "repair.max_batches",
                "must be at least 1",
            ));
        }
        if self.repair.max_orphan_candidates == 0 {
            return Err(HarvestError::invalid_config(
                "repair.max_orphan_candidates",
                "must be at least 1",
            ));
        }
        if self.repair.truncation_max_batches == 0 {
            return Err(HarvestError::invalid_config(
                "repair.truncation_max_batches",
                "must be at least 1",
            ));
        }
        if self.lease.ttl_minutes == 0 {
            return Err(HarvestError::invalid_config(
                "lease.ttl_minutes",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Normalized monitored screen names, duplicates removed.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::NoScreenNames`] if none are configured.
    pub fn screen_names(&self) -> Result<Vec<String>> {
        let mut seen = std::collections::HashSet::new();
        let names: Vec<String> = self
            .collect
            .screen_names
            .iter()
            .map(|s| normalize_screen_name(s))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        if names.is_empty() {
            return Err(HarvestError::NoScreenNames);
        }
        Ok(names)
    }

    /// Bearer token for the HTTP adapter.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::MissingCredential`] if unset.
    pub fn bearer_token(&self) -> Result<&str> {
        self.upstream
            .bearer_token
            .as_deref()
            .ok_or(HarvestError::MissingCredential {
                name: "TWCS_BEARER_TOKEN",
            })
    }

    /// Get the database path, using defaults if not configured.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Read one dotted key as display text.
    #[must_use]
    pub fn get_key(&self, key: &str) -> Option<String> {
        let value = match key {
            "paths.db" => self.db_path().display().to_string(),
            "collect.screen_names" => self.collect.screen_names.join(","),
            "collect.quota" => self.collect.quota.to_string(),
            "collect.page_size" => self.collect.page_size.to_string(),
            "scoring.rate_window_days" => self.scoring.rate_window_days.to_string(),
            "scoring.rate_floor" => self.scoring.rate_floor.to_string(),
            "scoring.default_scrape_age_days" => self.scoring.default_scrape_age_days.to_string(),
            "repair.orphan_window_hours" => self.repair.orphan_window_hours.to_string(),
            "repair.max_orphan_candidates" => self.repair.max_orphan_candidates.to_string(),
            "repair.batch_size" => self.repair.batch_size.to_string(),
            "repair.max_batches" => self.repair.max_batches.to_string(),
            "repair.shared_budget" => self.repair.shared_budget.to_string(),
            "repair.truncation_max_batches" => self.repair.truncation_max_batches.to_string(),
            "upstream.base_url" => self.upstream.base_url.clone(),
            "upstream.timeout_secs" => self.upstream.timeout_secs.to_string(),
            "lease.ttl_minutes" => self.lease.ttl_minutes.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Write the default configuration to the user config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined,
    /// the parent directory cannot be created, or the file cannot be written.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_config_content())?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Generate a default configuration file content.
    #[must_use]
    pub fn default_config_content() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}
