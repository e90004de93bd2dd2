// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `cmdpipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdpipe",
    version,
    about = "Run a def-use ordered command pipeline under slot-based admission control.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Cmdpipe.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Cmdpipe.toml")]
    pub config: String,

    /// Override `[scheduler].cpu_slots` from the config file.
    #[arg(long, value_name = "N")]
    pub cpu_slots: Option<usize>,

    /// Run the pipeline this many times concurrently, each against a fresh
    /// session, all sharing one scheduler.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub repeat: usize,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDPIPE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the pipeline plan, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
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
