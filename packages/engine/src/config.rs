//! Engine configuration.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use jobs_core::{Backoff, HealthThresholds, QueueConfig, ValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What to do with an active job that went silent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StallPolicy {
    /// Emit `stalled` and surface it in health; leave the job active.
    #[default]
    Flag,
    /// Emit `stalled`, then fail the job and ignore the handler's late result.
    Fail,
}

impl FromStr for StallPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flag" => Ok(StallPolicy::Flag),
            "fail" => Ok(StallPolicy::Fail),
            other => Err(format!("unknown stall policy '{}'", other)),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Used for queues without an entry in `queues`.
    pub default_queue: QueueConfig,
    /// Per-queue overrides, applied when the queue is created.
    pub queues: HashMap<String, QueueConfig>,
    pub stall_timeout_ms: u64,
    pub stall_policy: StallPolicy,
    /// Housekeeping interval: stall checks, store recovery, fallback wake-up.
    pub tick_interval_ms: u64,
    pub health: HealthThresholds,
    /// Buffered events per subscriber before it lags.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_queue: QueueConfig::default(),
            queues: HashMap::new(),
            stall_timeout_ms: 30_000,
            stall_policy: StallPolicy::Flag,
            tick_interval_ms: 1_000,
            health: HealthThresholds::default(),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Build from `JOBS_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup over the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(concurrency) = parse::<u32>(&lookup, "JOBS_CONCURRENCY")? {
            config.default_queue.concurrency = concurrency;
        }
        if let Some(attempts) = parse::<u32>(&lookup, "JOBS_ATTEMPTS")? {
            config.default_queue.defaults.attempts = attempts;
        }
        if let Some(base) = parse::<u64>(&lookup, "JOBS_BACKOFF_MS")? {
            config.default_queue.defaults.backoff = Backoff {
                base_delay_ms: base,
                ..config.default_queue.defaults.backoff
            };
        }
        if let Some(secs) = parse::<u64>(&lookup, "JOBS_STALL_TIMEOUT_SECS")? {
            config.stall_timeout_ms = secs.saturating_mul(1_000);
        }
        if let Some(policy) = parse::<StallPolicy>(&lookup, "JOBS_STALL_POLICY")? {
            config.stall_policy = policy;
        }
        if let Some(tick) = parse::<u64>(&lookup, "JOBS_TICK_MS")? {
            config.tick_interval_ms = tick;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let queues = std::iter::once(("default", &self.default_queue))
            .chain(self.queues.iter().map(|(name, c)| (name.as_str(), c)));
        for (name, queue) in queues {
            queue.validate().map_err(|e| {
                let (field, value) = match e {
                    ValidationError::InvalidAttempts(attempts) => ("attempts", attempts.to_string()),
                    _ => ("concurrency", queue.concurrency.to_string()),
                };
                ConfigError::Invalid {
                    key: format!("queue '{}' {}", name, field),
                    value,
                    reason: e.to_string(),
                }
            })?;
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "tick_interval_ms".into(),
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }

    /// Effective configuration for a queue.
    pub fn queue_config(&self, name: &str) -> QueueConfig {
        self.queues
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_queue.clone())
    }

    pub fn with_default_queue(mut self, config: QueueConfig) -> Self {
        self.default_queue = config;
        self
    }

    pub fn with_queue(mut self, name: impl Into<String>, config: QueueConfig) -> Self {
        self.queues.insert(name.into(), config);
        self
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stall_policy(mut self, policy: StallPolicy) -> Self {
        self.stall_policy = policy;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = (interval.as_millis() as u64).max(1);
        self
    }

    pub fn with_health(mut self, health: HealthThresholds) -> Self {
        self.health = health;
        self
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn health_window(&self) -> Duration {
        Duration::from_secs(self.health.window_secs)
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
