//! Per-job submission options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Backoff, Priority, ValidationError};

/// Options accepted by AddJob. Unset fields fall back to the queue defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Initial delay before the job becomes eligible.
    #[serde(with = "millis_opt", skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Backoff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Check the submission before a job is created.
    pub fn validate(&self, queue: &str, name: &str) -> Result<(), ValidationError> {
        if queue.trim().is_empty() {
            return Err(ValidationError::EmptyQueueName);
        }
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyJobName);
        }
        match self.attempts {
            Some(attempts) if attempts < 1 => Err(ValidationError::InvalidAttempts(attempts)),
            _ => Ok(()),
        }
    }
}

/// `Option<Duration>` as integer milliseconds.
mod millis_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
