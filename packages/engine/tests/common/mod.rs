#![allow(dead_code)]

use std::error::Error;
use std::future::Future;
use std::time::Duration;

use jobs_core::{Backoff, JobDefaults, JobEvent, QueueConfig};
use jobs_engine::EngineConfig;
use tokio::sync::broadcast;

pub const WAIT: Duration = Duration::from_secs(5);

/// Short timings so retries, stalls and ticks happen within a test.
pub fn fast_config() -> EngineConfig {
    let defaults = JobDefaults {
        backoff: Backoff::exponential(20),
        ..JobDefaults::default()
    };
    EngineConfig::default()
        .with_default_queue(QueueConfig::default().with_defaults(defaults))
        .with_tick_interval(Duration::from_millis(20))
}

/// Receive events until one matches, or fail after [`WAIT`].
pub async fn next_event(
    rx: &mut broadcast::Receiver<JobEvent>,
    matches: impl Fn(&JobEvent) -> bool,
) -> Result<JobEvent, Box<dyn Error>> {
    let found = tokio::time::timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}

/// Receive events until `stop` matches, returning everything seen on the way.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<JobEvent>,
    stop: impl Fn(&JobEvent) -> bool,
) -> Result<Vec<JobEvent>, Box<dyn Error>> {
    let mut seen = Vec::new();
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await?;
            let done = stop(&event);
            seen.push(event);
            if done {
                return Ok::<_, broadcast::error::RecvError>(());
            }
        }
    })
    .await??;
    Ok(seen)
}

/// Poll `check` until it returns true, or fail after [`WAIT`].
pub async fn eventually<F, Fut>(mut check: F) -> Result<(), Box<dyn Error>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(WAIT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    Ok(())
}
