//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log filter:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `FLEETJOBS_LOG` environment variable, any `EnvFilter` directive
//!    (e.g. "info", "fleetjobs::engine=debug")
//! 3. default to `info`
//!
//! Logs go to STDERR; stdout carries the job report.

use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "FLEETJOBS_LOG";

/// Initialise the global logging subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = resolve_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("cannot install log subscriber: {e}"))
}

fn resolve_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::new(level.as_str());
    }
    env.and_then(|directives| EnvFilter::try_new(directives.trim()).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
