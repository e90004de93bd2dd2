// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::exec::PipelineError;
use crate::scheduling::SchedulerError;

#[derive(Error, Debug)]
pub enum CmdpipeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline plan cycle: {0}")]
    PlanCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, CmdpipeError>;
