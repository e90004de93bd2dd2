// src/logging.rs

//! Subscriber setup for the `cmdpipe` binary.
//!
//! `--log-level` wins when given. Otherwise `CMDPIPE_LOG` is read as an
//! `EnvFilter` directive string, so per-module levels such as
//! `cmdpipe::scheduling=debug,info` work. With neither set the filter is `info`.
//!
//! Everything is written to stderr; stdout is reserved for pipeline results.

use anyhow::{anyhow, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "CMDPIPE_LOG";

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Filter for a CLI flag and the raw value of [`LOG_ENV`].
///
/// Unparseable directives fall back to `info` instead of failing startup.
pub fn log_filter(flag: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    if let Some(level) = flag {
        return EnvFilter::default().add_directive(LevelFilter::from(level).into());
    }
    env.map(str::trim)
        .filter(|directives| !directives.is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(flag: Option<LogLevel>) -> Result<()> {
    let env = std::env::var(LOG_ENV).ok();

    // Command bodies run on named blocking-pool threads.
    fmt()
        .with_env_filter(log_filter(flag, env.as_deref()))
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!("installing tracing subscriber: {e}"))
}
