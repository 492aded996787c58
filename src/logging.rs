//! File logging via `tracing`
//!
//! The TUI owns the terminal, so diagnostics go to
//! ~/.local/state/studybuddy/studybuddy.log instead of stderr.
//! Filter with STUDYBUDDY_LOG (EnvFilter syntax, default `info`).

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "STUDYBUDDY_LOG";
const LOG_FILE: &str = "studybuddy.log";

/// Install the global subscriber. Keep the guard alive until exit so
/// buffered lines get flushed.
pub fn init(dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log dir {}", dir.display()))?;

    let appender = tracing_appender::rolling::never(dir, LOG_FILE);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {}", e))?;

    Ok(guard)
}
