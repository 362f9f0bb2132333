//! Error taxonomy for repcheck.
//!
//! Failing target commands are not errors: they become [`RunOutcome`]s with
//! a non-zero exit code. Only faults that leave the tool unable to produce
//! durable evidence are surfaced here.
//!
//! [`RunOutcome`]: crate::runner::RunOutcome

use std::path::PathBuf;

/// Errors produced by the reproduction and verification engine.
#[derive(Debug, thiserror::Error)]
pub enum ReproError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run task failed: {0}")]
    TaskFailed(String),
}

impl ReproError {
    /// Wrap an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReproError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for repcheck operations.
pub type Result<T> = std::result::Result<T, ReproError>;
