//! Command-line interface for prep-forge.
//!
//! Provides commands to run a prep session, inspect a session's progress,
//! and list sessions in the staging directory.

mod commands;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use commands::{parse_cli, run_with_cli, Cli, Commands, RunArgs, SessionsArgs, StatusArgs};

/// Installs the global tracing subscriber.
///
/// With `log_file`, output is appended to that file without ANSI colors so
/// the terminal stays free for the live display; otherwise it goes to stderr.
/// `RUST_LOG` takes precedence over `log_filter`.
pub fn init_tracing(log_filter: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter));

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(filter)
                .try_init()?;
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .try_init()?;
        }
    }
    Ok(())
}
