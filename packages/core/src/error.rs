//! Error types raised by the data model.

use thiserror::Error;

use crate::JobStatus;

/// Malformed job submission. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Queue name must not be empty")]
    EmptyQueueName,

    #[error("Job name must not be empty")]
    EmptyJobName,

    #[error("Attempts must be at least 1 (got {0})")]
    InvalidAttempts(u32),

    #[error("Concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("Invalid payload for '{job}': {reason}")]
    InvalidPayload { job: String, reason: String },
}

/// Attempted status change outside the legal lifecycle edges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}
