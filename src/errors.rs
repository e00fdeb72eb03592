// src/errors.rs

//! Crate-wide error types and aliases.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunManagerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Tool not found: {name} (version {version})")]
    ToolNotFound { name: String, version: String },

    #[error("File not found: no file with {criterion} '{value}'")]
    FileNotFound { criterion: String, value: String },

    #[error("Required file conflict: '{target}' is already staged from '{existing}', cannot stage '{requested}'")]
    RequiredFileConflict {
        target: String,
        existing: String,
        requested: String,
    },

    #[error("Job parameter not found: {0}")]
    ParamNotFound(String),

    #[error("Invalid job parameter: {0}")]
    BadParam(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Cycle detected in job tree: {0}")]
    TreeCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Raised by the merge optimizer when two jobs cannot be folded together.
///
/// This is an expected outcome of `JobFactory::merge_job`, not a failure of
/// the job tree; callers match on it and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot merge jobs: {0}")]
pub struct MergeJobError(pub String);

impl MergeJobError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunManagerError>;
