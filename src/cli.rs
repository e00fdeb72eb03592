// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `runmanager`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runmanager",
    version,
    about = "Run trees of building-simulation jobs, skipping what is up to date.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job tree file (TOML).
    ///
    /// Default: `RunManager.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "RunManager.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNMANAGER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Build and print the job tree, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Rerun every job, even those that are up to date.
    #[arg(long)]
    pub force: bool,

    /// Keep the tree exactly as configured instead of merging compatible jobs.
    #[arg(long)]
    pub no_optimize: bool,
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
