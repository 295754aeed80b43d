//! twcs - conversation harvester CLI
//!
//! Main entry point for the twcs command-line tool.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::process::ExitCode;
use std::time::Duration;
use tracing::debug;

use twcs::config::Config;
use twcs::logging::init_cli_logging;
use twcs::scheduler::{ScoringSnapshot, prioritize};
use twcs::upstream::{FixtureUpstream, HttpUpstream, Upstream};
use twcs::*;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_cli_logging(cli.quiet, cli.verbose);

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Rank(args) => cmd_rank(&cli, args),
        Commands::Collect(args) => cmd_collect(&cli, args),
        Commands::Repair(args) => cmd_repair(&cli, args),
        Commands::Status => cmd_status(&cli),
        Commands::Show(args) => cmd_show(&cli, args),
        Commands::Config(args) => cmd_config(&cli, args),
        Commands::Completions(args) => cmd_completions(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(err: &anyhow::Error) {
    if let Some(harvest) = err.downcast_ref::<HarvestError>() {
        let suggestions: Vec<&str> = harvest.suggestion().into_iter().collect();
        eprintln!("{}", format_error(&harvest.to_string(), "", &suggestions));
    } else {
        eprintln!("{}", format_error("Error", &format!("{err:#}"), &[]));
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.paths.db = Some(db.clone());
    }
    Ok(config)
}

fn apply_overrides(config: &mut Config, quota: Option<usize>, screen_names: Option<&str>) {
    if let Some(quota) = quota {
        config.collect.quota = quota;
    }
    if let Some(names) = screen_names {
        config.set_screen_names(names);
    }
}

fn build_upstream(config: &Config, args: &UpstreamArgs) -> Result<Box<dyn Upstream>> {
    if let Some(path) = &args.fixture {
        debug!("Using fixture upstream from {}", path.display());
        let fixture = FixtureUpstream::load(path)
            .with_context(|| format!("Failed to load fixture {}", path.display()))?;
        return Ok(Box::new(fixture));
    }

    let token = config.bearer_token()?;
    let http = HttpUpstream::new(
        config.upstream.base_url.clone(),
        token,
        Duration::from_secs(config.upstream.timeout_secs),
    )
    .context("Failed to build HTTP client")?;
    Ok(Box::new(http))
}

fn progress_bar(cli: &Cli) -> Option<ProgressBar> {
    if cli.quiet || cli.format.is_json() {
        return None;
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░"),
    );
    Some(pb)
}

fn print_json<T: Serialize>(format: OutputFormat, value: &T) -> Result<()> {
    let json = if format == OutputFormat::JsonPretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn execute(
    cli: &Cli,
    config: &Config,
    upstream_args: &UpstreamArgs,
    screen_names: &[String],
    stages: Stages,
) -> Result<()> {
    let upstream = build_upstream(config, upstream_args)?;
    let mut storage = Storage::open(config.db_path())?;

    let mut pipeline = Pipeline::new(&mut storage, upstream.as_ref(), config);
    if let Some(bar) = progress_bar(cli) {
        pipeline = pipeline.with_progress(bar);
    }
    let summary = pipeline.run(screen_names, stages)?;

    if cli.format.is_json() {
        print_json(cli.format, &summary)
    } else {
        if !cli.quiet {
            print_summary(&summary);
        }
        Ok(())
    }
}

fn cmd_run(cli: &Cli, args: &cli::RunArgs) -> Result<()> {
    let mut config = load_config(cli)?;
    apply_overrides(&mut config, args.quota, args.screen_names.as_deref());
    config.validate()?;
    let names = config.screen_names()?;

    let stages = if args.skip_repair {
        Stages::COLLECT_ONLY
    } else {
        Stages::ALL
    };
    execute(cli, &config, &args.upstream, &names, stages)
}

fn cmd_collect(cli: &Cli, args: &cli::CollectArgs) -> Result<()> {
    let mut config = load_config(cli)?;
    apply_overrides(&mut config, args.quota, args.screen_names.as_deref());
    config.validate()?;
    let names = config.screen_names()?;
    execute(cli, &config, &args.upstream, &names, Stages::COLLECT_ONLY)
}

fn cmd_repair(cli: &Cli, args: &cli::RepairArgs) -> Result<()> {
    let config = load_config(cli)?;
    config.validate()?;
    execute(cli, &config, &args.upstream, &[], Stages::REPAIR_ONLY)
}

fn cmd_rank(cli: &Cli, args: &cli::RankArgs) -> Result<()> {
    let mut config = load_config(cli)?;
    apply_overrides(&mut config, None, args.screen_names.as_deref());
    config.validate()?;
    let names = config.screen_names()?;

    let storage = Storage::open(config.db_path())?;
    let snapshot = ScoringSnapshot::load(&storage, Utc::now(), &config.scoring)?;
    let ranked = prioritize(&names, &snapshot, &config.scoring);

    if cli.format.is_json() {
        return print_json(cli.format, &ranked);
    }

    println!("{}", "Priority Order".bold().cyan());
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    println!(
        "  {:>4}  {:<24} {:>12} {:>10} {:>8}",
        "#", "Account", "Weight", "Age (d)", "Rate/d"
    );
    for (idx, account) in ranked.iter().enumerate() {
        let weight = account
            .weight
            .map_or_else(|| "unscored".dimmed().to_string(), |w| format!("{w:.1}"));
        let marker = if idx < config.collect.quota {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!(
            "{marker} {:>4}  {:<24} {:>12} {:>10.1} {:>8.1}",
            idx + 1,
            format!("@{}", account.screen_name),
            weight,
            account.scrape_age_days,
            account.daily_rate
        );
    }
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    println!(
        "  {} of {} accounts fit the quota of {}",
        ranked.len().min(config.collect.quota),
        ranked.len(),
        config.collect.quota
    );
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    counts: StoreCounts,
    accounts: Vec<AccountStatus>,
}

#[derive(Serialize)]
struct AccountStatus {
    screen_name: String,
    last_replies: Option<chrono::DateTime<Utc>>,
    last_mentions: Option<chrono::DateTime<Utc>>,
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let db_path = config.db_path();
    if !db_path.exists() {
        return Err(HarvestError::database_not_found(db_path).into());
    }

    let storage = Storage::open(&db_path)?;
    let counts = storage.counts()?;
    let history = storage.fetch_history()?;

    let mut names = config.screen_names().unwrap_or_default();
    if names.is_empty() {
        names = history.keys().cloned().collect();
        names.sort();
    }
    let accounts: Vec<AccountStatus> = names
        .into_iter()
        .map(|screen_name| {
            let entry = history.get(&screen_name).copied().unwrap_or_default();
            AccountStatus {
                screen_name,
                last_replies: entry.replies,
                last_mentions: entry.mentions,
            }
        })
        .collect();

    if cli.format.is_json() {
        return print_json(cli.format, &StatusReport { counts, accounts });
    }

    println!("{}", "Store Status".bold().cyan());
    println!("{}", "─".repeat(40));
    println!("  {:<20} {:>10}", "Messages:", format_number(counts.messages));
    println!("  {:<20} {:>10}", "Accounts:", format_number(counts.accounts));
    println!("  {:<20} {:>10}", "Fetch attempts:", format_number(counts.fetch_attempts));
    println!("  {:<20} {:>10}", "Inaccessible:", format_number(counts.inaccessible));
    println!("  {:<20} {:>10}", "Truncated:", format_number(counts.truncated));
    println!("  {:<20} {:>10}", "Pending orphans:", format_number(counts.pending_orphans));
    println!("{}", "─".repeat(40));

    if !accounts.is_empty() {
        println!();
        println!("{}", "Last Fetch".bold().cyan());
        for account in &accounts {
            println!(
                "  {:<24} replies {:<14} mentions {}",
                format!("@{}", account.screen_name),
                format_last_fetch(account.last_replies),
                format_last_fetch(account.last_mentions)
            );
        }
    }
    Ok(())
}

fn cmd_show(cli: &Cli, args: &cli::ShowArgs) -> Result<()> {
    let config = load_config(cli)?;
    let db_path = config.db_path();
    if !db_path.exists() {
        return Err(HarvestError::database_not_found(db_path).into());
    }

    let storage = Storage::open(&db_path)?;
    let message = storage
        .get_message(&args.id)?
        .ok_or_else(|| HarvestError::not_found("Message", &args.id))?;

    if args.raw {
        println!("{}", serde_json::to_string_pretty(&message.payload)?);
        return Ok(());
    }
    if cli.format.is_json() {
        #[derive(Serialize)]
        struct ShowOutput<'a> {
            id: &'a str,
            author_id: &'a str,
            author_screen_name: &'a str,
            created_at: chrono::DateTime<Utc>,
            observed_at: chrono::DateTime<Utc>,
            text: &'a str,
            truncated: bool,
            in_reply_to: Option<&'a str>,
        }
        return print_json(
            cli.format,
            &ShowOutput {
                id: &message.id,
                author_id: &message.author_id,
                author_screen_name: &message.author_screen_name,
                created_at: message.created_at,
                observed_at: message.observed_at,
                text: &message.text,
                truncated: message.truncated,
                in_reply_to: message.in_reply_to.as_deref(),
            },
        );
    }

    println!("{}", format!("Message {}", message.id).bold().cyan());
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    println!("  {:<14} @{}", "Author:", message.author_screen_name);
    println!("  {:<14} {}", "Posted:", message.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  {:<14} {}", "Observed:", format_relative_date(message.observed_at));
    if let Some(parent) = &message.in_reply_to {
        println!("  {:<14} {}", "In reply to:", parent);
    }
    if message.truncated {
        println!("  {:<14} {}", "Truncated:", "yes".yellow());
    }
    println!("{}", "─".repeat(CONTENT_DIVIDER_WIDTH));
    println!("{}", message.text);
    Ok(())
}

fn cmd_config(cli: &Cli, args: &cli::ConfigArgs) -> Result<()> {
    let config_path = cli.config.clone().or_else(Config::user_config_path);

    if args.path {
        match &config_path {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", "No config directory available".yellow()),
        }
    }

    if args.init {
        let path = config_path
            .as_deref()
            .context("Could not determine config directory")?;
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::write_default(path)
                .map_err(|e| HarvestError::path_error("write", path, e))?;
            println!("{} {}", "Wrote".green(), path.display());
        }
    }

    if let Some(key) = &args.get {
        let config = load_config(cli)?;
        match config.get_key(key) {
            Some(value) => println!("{value}"),
            None => {
                eprintln!(
                    "{}",
                    format_unknown_value_error("config key", key, VALID_CONFIG_KEYS)
                );
                std::process::exit(2);
            }
        }
    }

    if args.show || !(args.path || args.init || args.get.is_some()) {
        let config = load_config(cli)?;
        if cli.format.is_json() {
            print_json(cli.format, &config)?;
        } else {
            println!("{}", "Current Configuration".bold().cyan());
            println!("  Database: {}", config.db_path().display());
            println!(
                "  Bearer token: {}",
                if config.upstream.bearer_token.is_some() {
                    "set".green()
                } else {
                    "not set".yellow()
                }
            );
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn cmd_completions(args: &cli::CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    generate(args.shell, &mut cmd, "twcs", &mut io::stdout());
    Ok(())
}

fn phase_cell(outcome: &PhaseOutcome) -> String {
    match outcome {
        PhaseOutcome::Completed { fetched, stored } => format!("{stored}/{fetched}"),
        PhaseOutcome::Skipped { .. } => "skipped".yellow().to_string(),
    }
}

fn print_summary(summary: &RunSummary) {
    let elapsed = summary.finished_at - summary.started_at;
    println!(
        "{} in {:.1}s",
        "Run complete".bold().green(),
        elapsed.num_milliseconds() as f64 / 1000.0
    );

    if let Some(collection) = &summary.collection {
        println!();
        println!(
            "{} ({} of {} ranked, quota {})",
            "Collection".bold().cyan(),
            collection.accounts.len(),
            summary.ranked.len(),
            collection.quota
        );
        println!("  {:<24} {:>12} {:>12}", "Account", "Replies", "Mentions");
        for account in &collection.accounts {
            println!(
                "  {:<24} {:>12} {:>12}",
                format!("@{}", account.screen_name),
                phase_cell(&account.replies),
                phase_cell(&account.mentions)
            );
            for (kind, outcome) in [("replies", &account.replies), ("mentions", &account.mentions)] {
                if let PhaseOutcome::Skipped { reason } = outcome {
                    println!("    {} {kind}: {}", "↳".dimmed(), reason.dimmed());
                }
            }
        }
        println!(
            "  Stored {} new messages; {} phases skipped",
            format_count(collection.stored()),
            collection.skipped_phases()
        );
    }

    if let Some(orphans) = &summary.orphans {
        println!();
        println!("{}", "Orphan Resolution".bold().cyan());
        println!(
            "  {} candidates, {} batches ({} failed), {} recovered, {} marked inaccessible",
            format_count(orphans.candidates),
            orphans.batches_used,
            orphans.failed_batches,
            format_count(orphans.recovered),
            format_count(orphans.marked_inaccessible)
        );
        if orphans.unreadable > 0 {
            println!(
                "  {} {} returned but undecodable, retried next run",
                "Note:".yellow(),
                format_count(orphans.unreadable)
            );
        }
    }

    if let Some(truncation) = &summary.truncation {
        println!();
        println!("{}", "Truncation Repair".bold().cyan());
        println!(
            "  {} candidates, {} batches, {} repaired, {} deleted",
            format_count(truncation.candidates),
            truncation.batches_used,
            format_count(truncation.repaired),
            format_count(truncation.deleted)
        );
        if truncation.unreadable > 0 {
            println!(
                "  {} {} returned but undecodable, kept as stored",
                "Note:".yellow(),
                format_count(truncation.unreadable)
            );
        }
        if let Some(reason) = &truncation.aborted {
            println!("  {} {}", "Stopped early:".yellow(), reason);
        }
    }
}
