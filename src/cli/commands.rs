//! CLI command definitions for prep-forge.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::agents::{AgentKind, Side};
use crate::display::{ScreenGuard, StatusDisplay, StatusView};
use crate::external::{BraveSearch, HttpFetcher, JsonEvidenceWriter};
use crate::llm::{LiteLlmClient, LlmTextGenerator};
use crate::runner::{print_summary, Collaborators, Deadline, PrepConfig, PrepRunner};
use crate::store::PrepSession;

/// System prompt shared by every agent's generator.
const SYSTEM_PROMPT: &str =
    "You are a meticulous policy debate researcher. Follow the requested output format exactly.";

/// Deadline-bound multi-agent research prep for debate resolutions.
#[derive(Parser)]
#[command(name = "prep-forge")]
#[command(about = "Research a debate resolution with cooperating agents until a deadline")]
#[command(version)]
#[command(
    long_about = "prep-forge runs a strategy agent that plans research tasks and three consumer agents that search, cut evidence cards, and organize them into a brief.\n\nExample usage:\n  prep-forge run \"Resolved: The US should abolish tariffs\" --side pro --minutes 10"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

impl Cli {
    /// Whether this invocation takes over the terminal with the live display.
    pub fn uses_live_display(&self) -> bool {
        matches!(&self.command, Commands::Run(args) if !args.no_ui)
    }
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a prep session until the time limit.
    Run(RunArgs),

    /// Show queue counts and recent events for a session.
    Status(StatusArgs),

    /// List sessions in the staging directory.
    Sessions(SessionsArgs),
}

/// Arguments for `prep-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Resolution to research. Optional when resuming with --session.
    pub resolution: Option<String>,

    /// Side to prepare (pro or con).
    #[arg(short, long, default_value = "pro")]
    pub side: Side,

    /// Time limit in minutes.
    #[arg(short, long, default_value = "10")]
    pub minutes: f64,

    /// Comma-separated agents to run (strategy,search,cutter,organizer). Defaults to all.
    #[arg(short, long, value_delimiter = ',')]
    pub agents: Vec<AgentKind>,

    /// Resume an existing session by id.
    #[arg(long)]
    pub session: Option<String>,

    /// Disable the live display and log to stderr instead.
    #[arg(long)]
    pub no_ui: bool,

    /// Staging directory (overrides PREP_STAGING_ROOT).
    #[arg(long)]
    pub staging: Option<PathBuf>,

    /// LLM model; empty uses LITELLM_DEFAULT_MODEL.
    #[arg(long, default_value = "")]
    pub model: String,

    /// Print the summary as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `prep-forge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Session id; defaults to the most recent session.
    #[arg(long)]
    pub session: Option<String>,

    /// Number of recent events to show.
    #[arg(short = 'n', long, default_value = "10")]
    pub events: usize,

    /// Staging directory (overrides PREP_STAGING_ROOT).
    #[arg(long)]
    pub staging: Option<PathBuf>,

    /// Output as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments for `prep-forge sessions`.
#[derive(Parser, Debug)]
pub struct SessionsArgs {
    /// Staging directory (overrides PREP_STAGING_ROOT).
    #[arg(long)]
    pub staging: Option<PathBuf>,

    /// Output as JSON.
    #[arg(short, long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
///
/// `log_filter` is the effective filter directive; the run command uses it
/// to route logs into the session directory while the live display owns
/// the terminal.
pub async fn run_with_cli(cli: Cli, log_filter: String) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_prep_command(args, &log_filter).await,
        Commands::Status(args) => run_status_command(args),
        Commands::Sessions(args) => run_sessions_command(args),
    }
}

fn load_config(staging: Option<PathBuf>) -> anyhow::Result<PrepConfig> {
    let mut config = PrepConfig::from_env().context("invalid PREP_* configuration")?;
    if let Some(root) = staging {
        config = config.with_staging_root(root);
    }
    Ok(config)
}

fn build_collaborators(model: &str, session_dir: &Path, results_per_search: usize) -> anyhow::Result<Collaborators> {
    let handle = Handle::current();
    let client = Arc::new(LiteLlmClient::from_env().context("LLM client is not configured")?);
    let generator = LlmTextGenerator::new(client, handle.clone(), model).with_system_prompt(SYSTEM_PROMPT);
    let search = BraveSearch::from_env(results_per_search, handle.clone())?;
    let fetcher = HttpFetcher::new(handle)?;
    let evidence = JsonEvidenceWriter::new(session_dir.join("evidence"));

    Ok(Collaborators {
        generator: Arc::new(generator),
        search: Arc::new(search),
        fetcher: Arc::new(fetcher),
        evidence: Arc::new(evidence),
    })
}

async fn run_prep_command(args: RunArgs, log_filter: &str) -> anyhow::Result<()> {
    if !args.minutes.is_finite() || args.minutes <= 0.0 {
        anyhow::bail!("--minutes must be a positive number");
    }
    let config = load_config(args.staging.clone())?;

    let session = match (&args.session, &args.resolution) {
        (Some(id), resolution) => {
            let session = PrepSession::load(&config.staging_root, id)?;
            if let Some(resolution) = resolution {
                if resolution != session.resolution() {
                    warn!(session = %id, "Ignoring resolution argument; resuming the session's own");
                }
            }
            session
        }
        (None, Some(resolution)) => PrepSession::create(&config.staging_root, resolution, args.side)?,
        (None, None) => anyhow::bail!("a resolution is required unless --session is given"),
    };
    let session = Arc::new(session);

    let live_display = !args.no_ui;
    if live_display {
        super::init_tracing(log_filter, Some(&session.dir().join("prep.log")))?;
    }

    let agents = if args.agents.is_empty() {
        AgentKind::ALL.to_vec()
    } else {
        args.agents.clone()
    };

    let collaborators = build_collaborators(&args.model, session.dir(), config.search.results_per_search)?;
    let display_config = config.display;
    let runner = PrepRunner::new(config, collaborators)?;

    let deadline = Deadline::after(Duration::from_secs_f64(args.minutes * 60.0));
    {
        let deadline = deadline.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, stopping agents");
                deadline.cancel();
            }
        });
    }

    let mut guard = None;
    let display: Option<Box<dyn StatusView>> = if live_display {
        let (screen, terminal) = ScreenGuard::enter().context("failed to set up terminal")?;
        guard = Some(screen);
        Some(Box::new(StatusDisplay::new(terminal, display_config)))
    } else {
        None
    };

    info!(session = %session.id(), minutes = args.minutes, "Starting run");
    let result = runner.run_session(session, &deadline, &agents, display).await;

    if let Some(mut screen) = guard {
        screen.restore()?;
    }

    let summary = result?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let config = load_config(args.staging)?;
    let id = match args.session {
        Some(id) => id,
        None => PrepSession::most_recent(&config.staging_root)?
            .ok_or_else(|| anyhow::anyhow!("no sessions under {}", config.staging_root.display()))?,
    };
    let session = PrepSession::load(&config.staging_root, &id)?;
    let stats = session.stats();
    let events = session.recent_events(args.events)?;

    if args.json {
        let output = serde_json::json!({
            "session": session.info(),
            "stats": stats,
            "events": events,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Session:    {}", session.id());
    println!("Resolution: {}", session.resolution());
    println!("Side:       {}", session.side());
    println!();
    for (label, counts) in [
        ("Tasks", stats.tasks),
        ("Search results", stats.results),
        ("Cards", stats.cards),
        ("Feedback", stats.feedback),
    ] {
        println!(
            "{:<15} {:>4} total  {:>4} done  {:>4} failed  {:>4} pending",
            label,
            counts.total,
            counts.done,
            counts.failed,
            counts.pending()
        );
    }

    if !events.is_empty() {
        println!();
        println!("Recent events:");
        for event in &events {
            println!(
                "  {} {:<10} {}",
                event.ts.format("%H:%M:%S"),
                event.agent,
                event.action
            );
        }
    }
    Ok(())
}

fn run_sessions_command(args: SessionsArgs) -> anyhow::Result<()> {
    let config = load_config(args.staging)?;
    let sessions = PrepSession::list(&config.staging_root)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }
    if sessions.is_empty() {
        println!("No sessions found under {}.", config.staging_root.display());
        return Ok(());
    }
    for info in &sessions {
        println!("{}  {:<3}  {}", info.id, info.side.as_str(), info.resolution);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "prep-forge",
            "run",
            "Resolved: tariffs",
            "--side",
            "con",
            "--minutes",
            "2.5",
            "--agents",
            "search,cutter",
            "--no-ui",
        ])
        .unwrap();
        assert!(!cli.uses_live_display());
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.resolution.as_deref(), Some("Resolved: tariffs"));
                assert_eq!(args.side, Side::Con);
                assert!((args.minutes - 2.5).abs() < f64::EPSILON);
                assert_eq!(args.agents, vec![AgentKind::Search, AgentKind::Cutter]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_rejects_unknown_agent() {
        assert!(Cli::try_parse_from(["prep-forge", "run", "R", "--agents", "judge"]).is_err());
    }

    #[test]
    fn test_status_defaults() {
        let cli = Cli::try_parse_from(["prep-forge", "status", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(!cli.uses_live_display());
        match cli.command {
            Commands::Status(args) => {
                assert!(args.session.is_none());
                assert_eq!(args.events, 10);
            }
            _ => panic!("expected status"),
        }
    }
}
