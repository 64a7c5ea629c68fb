//! prep-forge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = prep_forge::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    // The live display writes logs into the session directory once it exists.
    if !cli.uses_live_display() {
        prep_forge::cli::init_tracing(&log_filter, None)?;
    }

    prep_forge::cli::run_with_cli(cli, log_filter).await
}
