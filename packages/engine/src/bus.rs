//! Publish/subscribe fan-out of lifecycle events.

use jobs_core::JobEvent;
use ractor::{ActorRef, Message};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Broadcast bus for [`JobEvent`]s.
///
/// Publishing never blocks; events published with no subscriber are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: JobEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Log every event through `tracing`.
pub fn spawn_event_logger(bus: &EventBus) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event logger lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &JobEvent) {
    let queue = event.queue();
    let kind = event.kind();
    match event {
        JobEvent::Failed { .. } | JobEvent::Stalled { .. } => {
            tracing::warn!(queue, kind, "{}", event.description());
        }
        JobEvent::Progress { .. } => {
            tracing::trace!(queue, kind, "{}", event.description());
        }
        JobEvent::Added { .. } | JobEvent::Started { .. } | JobEvent::Retry { .. } => {
            tracing::debug!(queue, kind, "{}", event.description());
        }
        _ => tracing::info!(queue, kind, "{}", event.description()),
    }
}

/// Forward every event into an actor's mailbox until either side goes away.
pub(crate) fn spawn_forwarder<M>(
    bus: &EventBus,
    actor: ActorRef<M>,
    wrap: fn(JobEvent) -> M,
) -> JoinHandle<()>
where
    M: Message,
{
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if actor.send_message(wrap(event)).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event forwarder lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let bus = EventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(JobEvent::Paused {
            queue: "alerts".into(),
            timestamp: Utc::now(),
        });

        assert_eq!(first.recv().await.unwrap().kind(), "paused");
        assert_eq!(second.recv().await.unwrap().kind(), "paused");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(0);
        bus.publish(JobEvent::Resumed {
            queue: "alerts".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
