// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::Overrides;
use crate::types::OutputFormat;

/// Command-line arguments for `watchbuild`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "watchbuild",
    version,
    about = "Build and watch a workspace of interdependent packages.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WATCHBUILD_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Install, type-check and bundle every project once.
    Build(BuildArgs),

    /// Build, then keep rebuilding as files and config change.
    Dev(BuildArgs),

    /// Write a skeleton `watchbuild.toml`.
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Scaffold a new project and register it in `watchbuild.toml`.
    Create {
        /// Project directory, relative to the workspace root.
        path: String,

        /// Project name. Defaults to the last path component.
        #[arg(long)]
        name: Option<String>,

        /// Workspace root.
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Print the version.
    Version,
}

#[derive(Debug, Clone, Args)]
pub struct BuildArgs {
    /// Workspace root containing `watchbuild.toml`.
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Build only this output format.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Build profiles, comma separated.
    #[arg(long, value_delimiter = ',', value_name = "PROFILES")]
    pub profiles: Vec<String>,

    /// Maximum number of concurrent bundler sessions.
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,

    /// Parse + validate, print the build plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl BuildArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            format: self.format,
            profiles: self.profiles.clone(),
            parallel: self.parallel,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
