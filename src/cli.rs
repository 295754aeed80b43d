//! CLI definitions for twcs.
//!
//! Uses clap for argument parsing with derive macros.

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// twcs - conversation harvester for monitored accounts
#[derive(Parser, Debug)]
#[command(name = "twcs")]
#[command(version)]
#[command(about = "Harvest replies and mentions for monitored accounts, and repair gaps")]
#[command(long_about = r#"
twcs collects public conversations around a set of monitored accounts from a
rate-limited platform API and keeps them in a local SQLite database.

Each run:
  1. Ranks accounts by how much they have probably posted since the last fetch
  2. Fetches replies and mentions for the top accounts, up to the quota
  3. Backfills parents of recent replies that are missing from the store
  4. Refetches messages stored with truncated text

Quick start:
  1. export TWCS_BEARER_TOKEN=...
  2. export TWCS_SCREEN_NAMES=comcastcares,amazonhelp
  3. twcs run
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, env = "TWCS_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Path to the config file
    #[arg(long, env = "TWCS_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Be verbose (repeat for trace output)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline: rank, collect, repair
    Run(RunArgs),

    /// Show the priority order without fetching anything
    Rank(RankArgs),

    /// Rank and collect, without repair passes
    Collect(CollectArgs),

    /// Run only the orphan and truncation repair passes
    Repair(RepairArgs),

    /// Show store counts and last fetch per account
    Status,

    /// Show a stored message
    Show(ShowArgs),

    /// Show or manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Upstream selection shared by fetching commands.
#[derive(Args, Debug, Clone, Default)]
pub struct UpstreamArgs {
    /// Serve upstream responses from a JSON fixture file instead of the API
    #[arg(long, value_name = "FILE")]
    pub fixture: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Accounts to process this run (overrides collect.quota)
    #[arg(long)]
    pub quota: Option<usize>,

    /// Comma-separated screen names (overrides collect.screen_names)
    #[arg(long)]
    pub screen_names: Option<String>,

    /// Skip the orphan and truncation repair passes
    #[arg(long)]
    pub skip_repair: bool,

    #[command(flatten)]
    pub upstream: UpstreamArgs,
}

#[derive(Args, Debug)]
pub struct RankArgs {
    /// Comma-separated screen names (overrides collect.screen_names)
    #[arg(long)]
    pub screen_names: Option<String>,
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Accounts to process this run (overrides collect.quota)
    #[arg(long)]
    pub quota: Option<usize>,

    /// Comma-separated screen names (overrides collect.screen_names)
    #[arg(long)]
    pub screen_names: Option<String>,

    #[command(flatten)]
    pub upstream: UpstreamArgs,
}

#[derive(Args, Debug)]
pub struct RepairArgs {
    #[command(flatten)]
    pub upstream: UpstreamArgs,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Message id
    pub id: String,

    /// Print the raw stored payload
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show current configuration
    #[arg(long)]
    pub show: bool,

    /// Print the config file path
    #[arg(long)]
    pub path: bool,

    /// Write a default config file if none exists
    #[arg(long)]
    pub init: bool,

    /// Print one configuration value (e.g. collect.quota)
    #[arg(long, value_name = "KEY")]
    pub get: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
}

impl OutputFormat {
    #[must_use]
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json | Self::JsonPretty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from([
            "twcs",
            "-vv",
            "--format",
            "json",
            "run",
            "--quota",
            "3",
            "--screen-names",
            "a,b",
            "--fixture",
            "f.json",
            "--skip-repair",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.format.is_json());
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.quota, Some(3));
                assert_eq!(args.screen_names.as_deref(), Some("a,b"));
                assert!(args.skip_repair);
                assert_eq!(args.upstream.fixture, Some(PathBuf::from("f.json")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
