//! Health classification derived from queue snapshots and outcome windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::QueueStatus;

/// Operator-facing health level, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthLevel::Healthy => write!(f, "healthy"),
            HealthLevel::Warning => write!(f, "warning"),
            HealthLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Thresholds used to classify a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Trailing window for the failure rate, in seconds.
    pub window_secs: u64,
    /// Outcomes required in the window before the failure rate counts.
    pub min_samples: u64,
    pub failure_rate_warning: f64,
    pub failure_rate_critical: f64,
    pub backlog_warning: u64,
    pub backlog_critical: u64,
    pub stalled_critical: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            window_secs: 300,
            min_samples: 4,
            failure_rate_warning: 0.25,
            failure_rate_critical: 0.5,
            backlog_warning: 100,
            backlog_critical: 1_000,
            stalled_critical: 3,
        }
    }
}

/// Attempt outcomes observed for a queue over the trailing window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowStats {
    pub successes: u64,
    /// Failed attempts, retried or final.
    pub failures: u64,
    /// Mean duration of successful attempts, lifetime.
    pub avg_duration_ms: Option<f64>,
    /// Successful jobs per minute over the window.
    pub throughput_per_min: Option<f64>,
}

impl WindowStats {
    pub fn samples(&self) -> u64 {
        self.successes + self.failures
    }

    /// Failure rate in `0.0..=1.0`, if anything was observed.
    pub fn failure_rate(&self) -> Option<f64> {
        let total = self.samples();
        if total == 0 {
            None
        } else {
            Some(self.failures as f64 / total as f64)
        }
    }
}

/// Health report for a single queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub queue: String,
    pub level: HealthLevel,
    pub issues: Vec<String>,
    pub status: QueueStatus,
    pub window: WindowStats,
}

/// Health report across all queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub overall: HealthLevel,
    pub queues: Vec<QueueHealth>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// Overall health is the worst of the queues; no queues is healthy.
    pub fn from_queues(mut queues: Vec<QueueHealth>) -> Self {
        queues.sort_by(|a, b| a.queue.cmp(&b.queue));
        let overall = queues
            .iter()
            .map(|q| q.level)
            .max()
            .unwrap_or(HealthLevel::Healthy);
        Self {
            overall,
            queues,
            checked_at: Utc::now(),
        }
    }

    pub fn queue(&self, name: &str) -> Option<&QueueHealth> {
        self.queues.iter().find(|q| q.queue == name)
    }
}

/// Classify one queue.
pub fn assess_queue(
    status: QueueStatus,
    window: WindowStats,
    thresholds: &HealthThresholds,
) -> QueueHealth {
    let mut level = HealthLevel::Healthy;
    let mut issues = Vec::new();
    let mut raise = |to: HealthLevel, issue: String| {
        level = level.max(to);
        issues.push(issue);
    };

    if status.store_degraded {
        raise(
            HealthLevel::Critical,
            "durable store unavailable, claims suspended".to_string(),
        );
    }

    if window.samples() >= thresholds.min_samples
        && let Some(rate) = window.failure_rate()
    {
        let pct = rate * 100.0;
        if rate >= thresholds.failure_rate_critical {
            raise(
                HealthLevel::Critical,
                format!(
                    "failure rate {:.0}% over the last {}s",
                    pct, thresholds.window_secs
                ),
            );
        } else if rate >= thresholds.failure_rate_warning {
            raise(
                HealthLevel::Warning,
                format!(
                    "failure rate {:.0}% over the last {}s",
                    pct, thresholds.window_secs
                ),
            );
        }
    }

    // Delayed retries are still waiting work.
    let backlog = status.waiting + status.delayed;
    if backlog >= thresholds.backlog_critical {
        raise(HealthLevel::Critical, format!("{} jobs waiting", backlog));
    } else if backlog >= thresholds.backlog_warning {
        raise(HealthLevel::Warning, format!("{} jobs waiting", backlog));
    }

    if status.stalled > 0 {
        let to = if status.stalled >= thresholds.stalled_critical {
            HealthLevel::Critical
        } else {
            HealthLevel::Warning
        };
        raise(to, format!("{} stalled jobs", status.stalled));
    }

    QueueHealth {
        queue: status.queue.clone(),
        level,
        issues,
        status,
        window,
    }
}
