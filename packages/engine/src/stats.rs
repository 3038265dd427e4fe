//! Outcome statistics fed from the event bus.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobs_core::{JobEvent, WindowStats};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::messages::StatsMessage;

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: DateTime<Utc>,
    success: bool,
}

/// Attempt outcomes for one queue.
#[derive(Debug, Default)]
struct QueueOutcomes {
    recent: VecDeque<Outcome>,
    completed_total: u64,
    duration_total_ms: u64,
}

/// Trailing-window bookkeeping of attempt outcomes per queue.
///
/// A completed job counts as a success; a retried or failed attempt counts
/// as a failure. Average duration covers every completion seen.
#[derive(Debug)]
pub struct OutcomeTracker {
    window: chrono::Duration,
    queues: HashMap<String, QueueOutcomes>,
}

impl OutcomeTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            queues: HashMap::new(),
        }
    }

    /// Fold an event in. Events that are not attempt outcomes are ignored.
    pub fn record(&mut self, event: &JobEvent) {
        let (queue, at, success) = match event {
            JobEvent::Completed {
                queue,
                duration_ms,
                timestamp,
                ..
            } => {
                let entry = self.queues.entry(queue.clone()).or_default();
                entry.completed_total += 1;
                entry.duration_total_ms = entry.duration_total_ms.saturating_add(*duration_ms);
                (queue, *timestamp, true)
            }
            JobEvent::Retry {
                queue, timestamp, ..
            } => (queue, *timestamp, false),
            JobEvent::Failed { job, timestamp, .. } => (&job.queue, *timestamp, false),
            _ => return,
        };

        let window = self.window;
        let entry = self.queues.entry(queue.clone()).or_default();
        entry.recent.push_back(Outcome { at, success });
        prune(&mut entry.recent, at, window);
    }

    /// Outcome counts for `queue` over the window ending at `now`.
    pub fn window(&mut self, queue: &str, now: DateTime<Utc>) -> WindowStats {
        let window = self.window;
        let Some(entry) = self.queues.get_mut(queue) else {
            return WindowStats::default();
        };
        prune(&mut entry.recent, now, window);

        let successes = entry.recent.iter().filter(|o| o.success).count() as u64;
        let failures = entry.recent.len() as u64 - successes;
        let avg_duration_ms = (entry.completed_total > 0)
            .then(|| entry.duration_total_ms as f64 / entry.completed_total as f64);
        let minutes = window.num_milliseconds() as f64 / 60_000.0;
        let throughput_per_min = (minutes > 0.0).then(|| successes as f64 / minutes);

        WindowStats {
            successes,
            failures,
            avg_duration_ms,
            throughput_per_min,
        }
    }
}

fn prune(recent: &mut VecDeque<Outcome>, now: DateTime<Utc>, window: chrono::Duration) {
    let Some(cutoff) = now.checked_sub_signed(window) else {
        return;
    };
    while recent.front().is_some_and(|o| o.at < cutoff) {
        recent.pop_front();
    }
}

/// Actor holding the [`OutcomeTracker`].
pub struct StatsActor;

impl Actor for StatsActor {
    type Msg = StatsMessage;
    type State = OutcomeTracker;
    type Arguments = Duration;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        window: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting stats actor ({}s window)", window.as_secs());
        Ok(OutcomeTracker::new(window))
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            StatsMessage::Record(event) => state.record(&event),
            StatsMessage::GetWindow { queue, reply } => {
                let _ = reply.send(state.window(&queue, Utc::now()));
            }
        }
        Ok(())
    }
}
