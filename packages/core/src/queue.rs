//! Queue domain types for job containers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Backoff, Job, JobStatus, ValidationError};

/// Current operational state of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Queue is claiming and executing jobs.
    #[default]
    Running,
    /// No new claims; in-flight jobs run to completion, waiting jobs are kept.
    Paused,
    /// Shutting down: finishing in-flight jobs, no new claims.
    Draining,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Running => write!(f, "running"),
            QueueState::Paused => write!(f, "paused"),
            QueueState::Draining => write!(f, "draining"),
        }
    }
}

/// How many finished jobs a queue keeps in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            keep_completed: 100,
            keep_failed: 500,
        }
    }
}

impl Retention {
    pub fn limit_for(&self, status: JobStatus) -> Option<usize> {
        match status {
            JobStatus::Completed => Some(self.keep_completed),
            JobStatus::Failed => Some(self.keep_failed),
            _ => None,
        }
    }
}

/// Defaults applied to jobs that don't override them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobDefaults {
    pub attempts: u32,
    pub backoff: Backoff,
    pub retention: Retention,
}

impl Default for JobDefaults {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Backoff::default(),
            retention: Retention::default(),
        }
    }
}

/// Configuration for queue behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of simultaneously active jobs.
    pub concurrency: u32,
    pub defaults: JobDefaults,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            defaults: JobDefaults::default(),
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_defaults(mut self, defaults: JobDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.concurrency < 1 {
            return Err(ValidationError::InvalidConcurrency);
        }
        if self.defaults.attempts < 1 {
            return Err(ValidationError::InvalidAttempts(self.defaults.attempts));
        }
        Ok(())
    }
}

/// A named, independently pausable collection of jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Queue {
    pub name: String,
    pub state: QueueState,
    pub config: QueueConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Queue {
    /// Create a new running queue with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            state: QueueState::Running,
            config: QueueConfig::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the configuration for this queue.
    pub fn with_config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn is_paused(&self) -> bool {
        self.state == QueueState::Paused
    }

    /// Check if the queue may claim new jobs.
    pub fn is_claiming(&self) -> bool {
        self.state == QueueState::Running
    }

    /// Check if the queue accepts new jobs.
    pub fn is_accepting_jobs(&self) -> bool {
        self.state != QueueState::Draining
    }
}

/// Point-in-time job counts for a queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStatus {
    pub queue: String,
    pub state: QueueState,
    /// Waiting and due.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    /// Waiting with `next_run_at` in the future.
    pub delayed: u64,
    /// Active jobs currently flagged as stalled.
    pub stalled: u64,
    /// The durable store rejected a write and claims are suspended.
    pub store_degraded: bool,
}

impl QueueStatus {
    /// Count the given jobs as of `now`.
    pub fn tally<'a>(
        queue: &Queue,
        jobs: impl IntoIterator<Item = &'a Job>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut status = Self {
            queue: queue.name.clone(),
            state: queue.state,
            ..Default::default()
        };
        for job in jobs {
            match job.status {
                JobStatus::Waiting if job.is_delayed(now) => status.delayed += 1,
                JobStatus::Waiting => status.waiting += 1,
                JobStatus::Active => status.active += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
            }
        }
        status
    }

    /// Jobs not yet finished.
    pub fn pending(&self) -> u64 {
        self.waiting + self.delayed + self.active
    }

    pub fn total(&self) -> u64 {
        self.pending() + self.completed + self.failed
    }
}
