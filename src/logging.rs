// src/logging.rs

//! Diagnostics for `watchbuild`.
//!
//! Orchestrator events (installs, session phases, rebuild triggers) go
//! through `tracing` to stderr. Stdout carries the bundler and type-checker
//! output and dry-run plans.
//!
//! `--log-level` applies one level to every target. Without it,
//! `WATCHBUILD_LOG` is read as a filter directive list such as
//! `watchbuild::orchestrator=debug,info`; an unusable value falls back to
//! `info`. The file-watcher backend stays at `warn` unless a directive
//! names it.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "WATCHBUILD_LOG";

const WATCHER_TARGET: &str = "notify";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let filter = log_filter(cli_level, std::env::var(LOG_ENV).ok().as_deref());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

/// Filter for the given CLI level and `WATCHBUILD_LOG` value.
pub fn log_filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    let directives = match (cli_level, env.map(str::trim)) {
        (Some(level), _) => level_name(level).to_string(),
        (None, Some(raw)) if !raw.is_empty() => raw.to_lowercase(),
        _ => "info".to_string(),
    };

    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));
    if directives.contains(WATCHER_TARGET) {
        return filter;
    }
    match format!("{WATCHER_TARGET}=warn").parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
