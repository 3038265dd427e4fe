//! Lifecycle events published on the event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobId};

/// Events emitted by the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Queue events
    /// A queue was created on first use.
    QueueCreated {
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A queue stopped claiming jobs.
    Paused {
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A queue resumed claiming jobs.
    Resumed {
        queue: String,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A new job was added in `waiting`.
    Added { job: Job, timestamp: DateTime<Utc> },
    /// A job was claimed and its handler invoked.
    Started {
        job_id: JobId,
        queue: String,
        name: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    /// The handler reported progress.
    Progress {
        job_id: JobId,
        queue: String,
        progress: u8,
        timestamp: DateTime<Utc>,
    },
    /// A job completed successfully.
    Completed {
        job_id: JobId,
        queue: String,
        attempts: u32,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// An attempt failed and the job went back to `waiting`.
    Retry {
        job_id: JobId,
        queue: String,
        attempt: u32,
        error: String,
        delay_ms: u64,
        next_run_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// A job failed for good.
    Failed {
        job: Job,
        error: String,
        timestamp: DateTime<Utc>,
    },
    /// An active job has been silent for longer than the stall timeout.
    Stalled {
        job_id: JobId,
        queue: String,
        attempt: u32,
        silent_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A waiting job was removed by the caller.
    Removed {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Short event name, as used in the serialized `event` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::QueueCreated { .. } => "queue_created",
            JobEvent::Paused { .. } => "paused",
            JobEvent::Resumed { .. } => "resumed",
            JobEvent::Added { .. } => "added",
            JobEvent::Started { .. } => "started",
            JobEvent::Progress { .. } => "progress",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Retry { .. } => "retry",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Stalled { .. } => "stalled",
            JobEvent::Removed { .. } => "removed",
        }
    }

    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::QueueCreated { timestamp, .. }
            | JobEvent::Paused { timestamp, .. }
            | JobEvent::Resumed { timestamp, .. }
            | JobEvent::Added { timestamp, .. }
            | JobEvent::Started { timestamp, .. }
            | JobEvent::Progress { timestamp, .. }
            | JobEvent::Completed { timestamp, .. }
            | JobEvent::Retry { timestamp, .. }
            | JobEvent::Failed { timestamp, .. }
            | JobEvent::Stalled { timestamp, .. }
            | JobEvent::Removed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue name associated with this event.
    pub fn queue(&self) -> &str {
        match self {
            JobEvent::Added { job, .. } | JobEvent::Failed { job, .. } => &job.queue,
            JobEvent::QueueCreated { queue, .. }
            | JobEvent::Paused { queue, .. }
            | JobEvent::Resumed { queue, .. }
            | JobEvent::Started { queue, .. }
            | JobEvent::Progress { queue, .. }
            | JobEvent::Completed { queue, .. }
            | JobEvent::Retry { queue, .. }
            | JobEvent::Stalled { queue, .. }
            | JobEvent::Removed { queue, .. } => queue,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::Added { job, .. } | JobEvent::Failed { job, .. } => Some(job.id),
            JobEvent::Started { job_id, .. }
            | JobEvent::Progress { job_id, .. }
            | JobEvent::Completed { job_id, .. }
            | JobEvent::Retry { job_id, .. }
            | JobEvent::Stalled { job_id, .. }
            | JobEvent::Removed { job_id, .. } => Some(*job_id),
            JobEvent::QueueCreated { .. } | JobEvent::Paused { .. } | JobEvent::Resumed { .. } => {
                None
            }
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::QueueCreated { queue, .. } => format!("Queue '{}' created", queue),
            JobEvent::Paused { queue, .. } => format!("Queue '{}' paused", queue),
            JobEvent::Resumed { queue, .. } => format!("Queue '{}' resumed", queue),
            JobEvent::Added { job, .. } => {
                format!("Job {} ({}/{}) added", job.id, job.queue, job.name)
            }
            JobEvent::Started {
                job_id, attempt, ..
            } => format!("Job {} started (attempt {})", job_id, attempt),
            JobEvent::Progress {
                job_id, progress, ..
            } => format!("Job {} at {}%", job_id, progress),
            JobEvent::Completed {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} completed in {}ms", job_id, duration_ms),
            JobEvent::Retry {
                job_id,
                attempt,
                error,
                delay_ms,
                ..
            } => format!(
                "Job {} attempt {} failed: {} (retry in {}ms)",
                job_id, attempt, error, delay_ms
            ),
            JobEvent::Failed { job, error, .. } => format!(
                "Job {} failed after {} attempts: {}",
                job.id, job.attempts, error
            ),
            JobEvent::Stalled {
                job_id, silent_ms, ..
            } => format!("Job {} stalled (silent for {}ms)", job_id, silent_ms),
            JobEvent::Removed { job_id, .. } => format!("Job {} removed", job_id),
        }
    }
}
