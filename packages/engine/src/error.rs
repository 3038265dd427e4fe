//! Error types for the engine and for job handlers.

use jobs_core::{JobId, JobStatus, StoreError, ValidationError};
use thiserror::Error;

use crate::config::ConfigError;

/// Result type for queue control operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced synchronously to callers of the control API.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job {job_id} is {status} and cannot be removed")]
    JobNotRemovable { job_id: JobId, status: JobStatus },

    #[error("No handler registered for {queue}/{name}")]
    HandlerNotFound { queue: String, name: String },

    #[error("Queue '{0}' is draining")]
    QueueDraining(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Actor error: {0}")]
    Actor(String),
}

/// Failure returned by a job handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Retried while attempts remain.
    #[error("{0}")]
    Retryable(String),

    /// Fails the job immediately.
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self::Retryable(msg)
    }
}

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self::Retryable(msg.to_string())
    }
}
