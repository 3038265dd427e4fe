//! Retry delay policy applied between a failed attempt and its retry.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of the delay curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Delay doubles after every failed attempt.
    #[default]
    Exponential,
    /// Same delay after every failed attempt.
    Fixed,
}

impl std::fmt::Display for BackoffKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackoffKind::Exponential => write!(f, "exponential"),
            BackoffKind::Fixed => write!(f, "fixed"),
        }
    }
}

/// Backoff policy for retries. No jitter is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backoff {
    #[serde(rename = "type")]
    pub kind: BackoffKind,
    pub base_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(2_000)
    }
}

impl Backoff {
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay_ms,
        }
    }

    pub fn fixed(base_delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms,
        }
    }

    /// Delay before the next attempt, given the 1-based number of the
    /// attempt that just failed.
    ///
    /// Exponential: `base * 2^(attempt - 1)`, saturating at `u64::MAX` ms.
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis = match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                let exponent = attempt.saturating_sub(1);
                2u64.checked_pow(exponent)
                    .and_then(|factor| self.base_delay_ms.checked_mul(factor))
                    .unwrap_or(u64::MAX)
            }
        };
        Duration::from_millis(millis)
    }
}
