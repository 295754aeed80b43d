//! Logging setup for twcs.
//!
//! Structured logging through the `tracing` ecosystem. Logs go to stderr so
//! that command output on stdout stays machine-readable.
//!
//! # Usage
//!
//! ```rust
//! use twcs::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::default();
//! init_logging(&config);
//!
//! tracing::info!("Application started");
//! ```

use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Minimum log level to display.
    pub level: LogLevel,
    /// Output format for log messages.
    pub format: LogFormat,
    /// Include timestamps in log output.
    pub timestamps: bool,
    /// Include target (module path) in log output.
    pub target: bool,
    /// Include span events (enter/exit).
    pub spans: bool,
    /// Enable ANSI colors in output.
    pub colors: bool,
}

/// Log level configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    /// No logging at all.
    Off,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    Compact,
    /// Full format with thread and source location.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            spans: false,
            colors: true,
        }
    }
}

impl LogConfig {
    /// Create a config for quiet mode (errors only).
    #[must_use]
    pub const fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            format: LogFormat::Compact,
            timestamps: false,
            target: false,
            spans: false,
            colors: true,
        }
    }

    /// Create a config for verbose mode (debug level).
    #[must_use]
    pub const fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            format: LogFormat::Pretty,
            timestamps: true,
            target: true,
            spans: false,
            colors: true,
        }
    }

    /// Create a config for trace mode (maximum verbosity).
    #[must_use]
    pub const fn trace() -> Self {
        Self {
            level: LogLevel::Trace,
            format: LogFormat::Full,
            timestamps: true,
            target: true,
            spans: true,
            colors: true,
        }
    }
}

impl LogLevel {
    /// Convert to env filter directive string.
    const fn to_filter_string(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" | "e" => Ok(Self::Error),
            "warn" | "warning" | "w" => Ok(Self::Warn),
            "info" | "i" => Ok(Self::Info),
            "debug" | "d" => Ok(Self::Debug),
            "trace" | "t" => Ok(Self::Trace),
            "off" | "none" | "quiet" => Ok(Self::Off),
            _ => Err(format!("Invalid log level: {s}")),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "p" => Ok(Self::Pretty),
            "compact" | "c" => Ok(Self::Compact),
            "full" | "f" => Ok(Self::Full),
            _ => Err(format!("Invalid log format: {s}")),
        }
    }
}

/// Pick the filter directive: `RUST_LOG` verbatim, else `LOG_LEVEL` for the
/// twcs target, else the configured level.
fn filter_directive(config: &LogConfig, rust_log: Option<String>, log_level: Option<&str>) -> String {
    if let Some(directive) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directive;
    }
    let level = log_level
        .and_then(|l| l.parse::<LogLevel>().ok())
        .unwrap_or(config.level);
    format!("twcs={}", level.to_filter_string())
}

/// Initialize the logging system with the given configuration.
///
/// This should be called once at the start of the application.
/// Subsequent calls will be ignored.
pub fn init_logging(config: &LogConfig) {
    let directive = filter_directive(
        config,
        std::env::var("RUST_LOG").ok(),
        std::env::var("LOG_LEVEL").ok().as_deref(),
    );
    let env_filter = EnvFilter::new(directive);

    let span_events = if config.spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_writer(std::io::stderr)
                .with_ansi(config.colors)
                .with_target(config.target)
                .with_span_events(span_events);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init()
                    .ok();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer.without_time())
                    .try_init()
                    .ok();
            }
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_writer(std::io::stderr)
                .with_ansi(config.colors)
                .with_target(config.target)
                .with_span_events(span_events);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer)
                    .try_init()
                    .ok();
            } else {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(layer.without_time())
                    .try_init()
                    .ok();
            }
        }
        LogFormat::Full => {
            let layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.colors)
                .with_target(config.target)
                .with_span_events(span_events)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .ok();
        }
    }
}

/// Initialize logging with defaults suitable for CLI use.
pub fn init_cli_logging(quiet: bool, verbose: u8) {
    let config = match (quiet, verbose) {
        (true, _) => LogConfig::quiet(),
        (false, 0) => LogConfig::default(),
        (false, 1) => LogConfig::verbose(),
        (false, _) => LogConfig::trace(),
    };
    init_logging(&config);
}

/// Logs the start and end of a pipeline phase.
pub struct OperationGuard {
    name: &'static str,
    start: std::time::Instant,
}

impl OperationGuard {
    /// Start tracking an operation.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        tracing::info!(operation = name, "Starting operation");
        Self {
            name,
            start: std::time::Instant::now(),
        }
    }

    /// Complete the operation successfully.
    pub fn complete(self) {
        tracing::info!(
            operation = self.name,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation completed"
        );
    }

    /// Mark the operation as failed.
    pub fn fail(self, error: &dyn std::fmt::Display) {
        tracing::error!(
            operation = self.name,
            duration_ms = self.start.elapsed().as_millis(),
            error = %error,
            "Operation failed"
        );
    }
}
