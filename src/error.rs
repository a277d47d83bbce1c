//! Error types for batch orchestration.
//!
//! Failures inside a single worker never surface as errors past the
//! worker boundary; they are folded into a [`WorkerExitStatus`]. The
//! variants here cover what can stop a batch before or while it starts.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::exit_status::WorkerExitStatus;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Worker executable not found: {0}")]
    WorkerNotFound(String),

    #[error("Failed to spawn worker '{}': {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker protocol error: {0}")]
    Protocol(String),

    #[error("Failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchError {
    /// Exit status reported when this error ends the batch
    pub fn exit_status(&self) -> WorkerExitStatus {
        match self {
            BatchError::WorkerNotFound(_) | BatchError::Spawn { .. } | BatchError::ThreadPool(_) => {
                WorkerExitStatus::StartFailure
            }
            BatchError::Protocol(_) | BatchError::Io(_) => WorkerExitStatus::IoError,
            BatchError::Config(_) | BatchError::ConfigParse(_) => WorkerExitStatus::BadParams,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
