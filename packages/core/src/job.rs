//! Job domain types for units of scheduled work.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::{Backoff, JobDefaults, JobOptions, TransitionError, ValidationError};

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level. Higher priorities are claimed first among eligible jobs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Current status of a job in its lifecycle.
///
/// Legal edges: waiting -> active, active -> completed,
/// active -> waiting (retry), active -> failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Waiting, JobStatus::Active)
                | (JobStatus::Active, JobStatus::Completed)
                | (JobStatus::Active, JobStatus::Waiting)
                | (JobStatus::Active, JobStatus::Failed)
        )
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// What a failed attempt led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Back to `waiting`, eligible again at `next_run_at`.
    Retry {
        delay: Duration,
        next_run_at: DateTime<Utc>,
    },
    /// Attempts exhausted (or the error was permanent).
    Failed,
}

/// A job represents a unit of work owned by exactly one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Name of the owning queue.
    pub queue: String,
    /// Handler selector within the queue.
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Percentage in `0..=100`; reset to 0 on retry.
    #[serde(default)]
    pub progress: u8,
    /// Creation order within the queue; FIFO tie-breaker.
    #[serde(default)]
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub next_run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Claim time or last progress report of the current attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    /// Reason of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a new waiting job, eligible immediately, with built-in defaults.
    pub fn new(
        queue: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        let defaults = JobDefaults::default();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            name: name.into(),
            payload,
            priority: Priority::default(),
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts: defaults.attempts,
            backoff: defaults.backoff,
            progress: 0,
            sequence: 0,
            created_at: now,
            next_run_at: now,
            started_at: None,
            completed_at: None,
            last_activity_at: None,
            result: None,
            error: None,
        }
    }

    /// Build a job from caller options layered over the queue defaults.
    pub fn from_options(
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: &JobOptions,
        defaults: &JobDefaults,
    ) -> Result<Self, ValidationError> {
        options.validate(queue, name)?;

        let mut job = Job::new(queue, name, payload)
            .with_max_attempts(options.attempts.unwrap_or(defaults.attempts))
            .with_backoff(options.backoff.unwrap_or(defaults.backoff))
            .with_priority(options.priority.unwrap_or_default());
        if job.max_attempts < 1 {
            return Err(ValidationError::InvalidAttempts(job.max_attempts));
        }
        if let Some(delay) = options.delay {
            job.next_run_at = add_delay(job.created_at, delay);
        }
        Ok(job)
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the attempt ceiling for this job.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the retry backoff for this job.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Waiting and due.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.next_run_at <= now
    }

    /// Waiting but not yet due.
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Waiting && self.next_run_at > now
    }

    /// Claim order among eligible jobs: priority, then `next_run_at`, then creation order.
    pub fn dispatch_order(&self, other: &Job) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.next_run_at.cmp(&other.next_run_at))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }

    /// waiting -> active. Returns the attempt number now running.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<u32, TransitionError> {
        self.transition(JobStatus::Active)?;
        self.attempts = self.attempts.saturating_add(1);
        self.progress = 0;
        self.started_at = Some(now);
        self.last_activity_at = Some(now);
        self.completed_at = None;
        Ok(self.attempts)
    }

    /// Record a progress report. Returns the stored value, or `None` if ignored.
    ///
    /// Reports lower than the current value are ignored; values above 100 are clamped.
    pub fn record_progress(&mut self, value: u32, now: DateTime<Utc>) -> Option<u8> {
        if self.status != JobStatus::Active {
            return None;
        }
        self.last_activity_at = Some(now);
        let value = value.min(100) as u8;
        if value < self.progress {
            return None;
        }
        self.progress = value;
        Some(value)
    }

    /// active -> completed.
    pub fn complete(&mut self, result: JobResult, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.completed_at = Some(now);
        self.progress = 100;
        self.result = Some(result);
        Ok(())
    }

    /// active -> waiting or active -> failed, depending on the remaining attempts.
    ///
    /// A `permanent` failure skips the remaining attempts.
    pub fn fail_attempt(
        &mut self,
        error: impl Into<String>,
        permanent: bool,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome, TransitionError> {
        let retry = !permanent && self.attempts < self.max_attempts;
        let next = if retry {
            JobStatus::Waiting
        } else {
            JobStatus::Failed
        };
        self.transition(next)?;
        self.error = Some(error.into());

        if retry {
            let delay = self.backoff.delay(self.attempts);
            let next_run_at = add_delay(now, delay);
            self.progress = 0;
            self.next_run_at = next_run_at;
            self.last_activity_at = None;
            Ok(AttemptOutcome::Retry { delay, next_run_at })
        } else {
            self.completed_at = Some(now);
            Ok(AttemptOutcome::Failed)
        }
    }

    /// Wall time of the last attempt, for finished jobs.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.completed_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }

    /// Make a job loaded from the store claimable again.
    ///
    /// An `active` job whose owner died goes back to `waiting` (due now), or
    /// to `failed` when its attempts are used up. Returns true if changed.
    pub fn reclaim_after_crash(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Active {
            return false;
        }
        let reason = "worker lost before the attempt finished";
        if self.attempts < self.max_attempts {
            self.status = JobStatus::Waiting;
            self.next_run_at = now;
            self.progress = 0;
            self.last_activity_at = None;
        } else {
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
        }
        self.error = Some(reason.to_string());
        true
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

fn add_delay(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
