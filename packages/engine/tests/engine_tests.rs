mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jobs_core::{
    Backoff, HealthLevel, HealthThresholds, Job, JobEvent, JobOptions, JobResult, JobStatus,
    MemoryStore, Priority, QueueConfig, QueueState,
};
use jobs_engine::{
    EngineError, FnHandler, HandlerError, HandlerFuture, JobContext, JobHandler, JobQueue,
    StallPolicy, TypedHandler, job_handler,
};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Notify;

/// Handler that records the job names it ran, in order.
fn recording_handler(order: Arc<Mutex<Vec<String>>>) -> impl JobHandler {
    FnHandler::new(move |ctx: JobContext| -> HandlerFuture {
        let order = order.clone();
        Box::pin(async move {
            let label = ctx.payload["label"].as_str().unwrap_or_default();
            order.lock().push(label.to_string());
            Ok(JobResult::new("done"))
        })
    })
}

/// Handler that blocks until the gate is opened.
fn gated_handler(gate: Arc<Notify>) -> impl JobHandler {
    FnHandler::new(move |_ctx: JobContext| -> HandlerFuture {
        let gate = gate.clone();
        Box::pin(async move {
            gate.notified().await;
            Ok(JobResult::new("released"))
        })
    })
}

fn is_failed(event: &JobEvent) -> bool {
    matches!(event, JobEvent::Failed { .. })
}

fn is_completed(event: &JobEvent) -> bool {
    matches!(event, JobEvent::Completed { .. })
}

#[tokio::test]
async fn failing_job_exhausts_attempts_with_exponential_backoff() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register("q", "always-fails", job_handler!(|_ctx| Err(HandlerError::retryable("boom"))));
    let mut rx = engine.subscribe();

    let options = JobOptions::new()
        .with_attempts(3)
        .with_backoff(Backoff::exponential(50));
    let job = engine.add_job("q", "always-fails", json!({}), options).await?;
    assert_eq!(job.status, JobStatus::Waiting);
    assert_eq!(job.attempts, 0);

    let events = common::collect_until(&mut rx, is_failed).await?;

    let retries: Vec<(u64, chrono::DateTime<chrono::Utc>)> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Retry {
                delay_ms,
                next_run_at,
                ..
            } => Some((*delay_ms, *next_run_at)),
            _ => None,
        })
        .collect();
    let starts: Vec<chrono::DateTime<chrono::Utc>> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Started { timestamp, .. } => Some(*timestamp),
            _ => None,
        })
        .collect();

    assert_eq!(retries.iter().map(|(d, _)| *d).collect::<Vec<_>>(), vec![50, 100]);
    assert_eq!(starts.len(), 3);
    // No attempt starts before its backoff elapsed.
    assert!(starts[1] >= retries[0].1);
    assert!(starts[2] >= retries[1].1);

    let failed = engine.get_job("q", job.id).await?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 3);
    assert_eq!(failed.error.as_deref(), Some("boom"));
    assert!(failed.completed_at.is_some());

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn succeeding_job_completes_on_first_attempt() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register(
        "q",
        "succeeds",
        job_handler!(|_ctx| Ok(JobResult::with_output("ok", json!({"rows": 3})))),
    );
    let mut rx = engine.subscribe();

    let job = engine.add_job("q", "succeeds", json!({}), JobOptions::new()).await?;
    let event = common::next_event(&mut rx, is_completed).await?;
    assert_eq!(event.job_id(), Some(job.id));

    let done = engine.get_job("q", job.id).await?;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 1);
    assert_eq!(done.progress, 100);
    assert_eq!(done.result.and_then(|r| r.output), Some(json!({"rows": 3})));

    let status = engine.get_status("q").await?;
    assert_eq!(status.completed, 1);
    assert_eq!(status.pending(), 0);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn paused_queue_holds_jobs_then_runs_them_in_fifo_order() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    let order = Arc::new(Mutex::new(Vec::new()));
    engine.register("q", "record", recording_handler(order.clone()));
    let mut rx = engine.subscribe();

    engine.pause("q").await?;
    let j1 = engine.add_job("q", "record", json!({"label": "j1"}), JobOptions::new()).await?;
    let j2 = engine.add_job("q", "record", json!({"label": "j2"}), JobOptions::new()).await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = engine.get_status("q").await?;
    assert_eq!(status.state, QueueState::Paused);
    assert_eq!(status.waiting, 2);
    assert_eq!(status.active, 0);
    assert_eq!(engine.get_job("q", j1.id).await?.status, JobStatus::Waiting);
    assert_eq!(engine.get_job("q", j2.id).await?.status, JobStatus::Waiting);

    engine.resume("q").await?;
    common::next_event(&mut rx, |e| matches!(e, JobEvent::Completed { job_id, .. } if *job_id == j2.id)).await?;
    common::eventually(|| {
        let engine = engine.clone();
        async move {
            engine
                .get_job("q", j1.id)
                .await
                .is_ok_and(|job| job.status == JobStatus::Completed)
        }
    })
    .await?;

    assert_eq!(*order.lock(), vec!["j1".to_string(), "j2".to_string()]);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn pause_lets_the_active_job_finish() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    let gate = Arc::new(Notify::new());
    engine.register("q", "slow", gated_handler(gate.clone()));
    let mut rx = engine.subscribe();

    let running = engine.add_job("q", "slow", json!({}), JobOptions::new()).await?;
    common::next_event(&mut rx, |e| matches!(e, JobEvent::Started { .. })).await?;

    engine.pause("q").await?;
    let held = engine.add_job("q", "slow", json!({}), JobOptions::new()).await?;
    gate.notify_one();

    let event = common::next_event(&mut rx, is_completed).await?;
    assert_eq!(event.job_id(), Some(running.id));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(engine.get_job("q", held.id).await?.status, JobStatus::Waiting);
    assert_eq!(engine.get_status("q").await?.active, 0);

    engine.resume("q").await?;
    gate.notify_one();
    let event = common::next_event(&mut rx, is_completed).await?;
    assert_eq!(event.job_id(), Some(held.id));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn empty_queue_is_healthy() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    let status = engine.get_status("empty").await?;
    assert_eq!(status.total(), 0);

    let health = engine.get_health().await?;
    assert_eq!(health.overall, HealthLevel::Healthy);
    let queue = health.queue("empty").ok_or("queue missing from health")?;
    assert_eq!(queue.level, HealthLevel::Healthy);
    assert!(queue.issues.is_empty());

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn job_recovers_on_second_attempt() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register(
        "q",
        "flaky",
        job_handler!(|ctx| {
            if ctx.attempt == 1 {
                Err(HandlerError::retryable("first attempt fails"))
            } else {
                Ok(JobResult::new("second time lucky"))
            }
        }),
    );
    let mut rx = engine.subscribe();

    let job = engine
        .add_job("q", "flaky", json!({}), JobOptions::new().with_attempts(3))
        .await?;
    let events = common::collect_until(&mut rx, is_completed).await?;
    assert_eq!(events.iter().filter(|e| e.kind() == "retry").count(), 1);

    let done = engine.get_job("q", job.id).await?;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 2);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn permanent_errors_and_panics_fail_as_expected() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register("q", "bad-input", job_handler!(|_ctx| Err(HandlerError::permanent("no such symbol"))));
    engine.register("q", "explodes", job_handler!(|_ctx| {
        if true {
            panic!("handler bug");
        }
        Ok(JobResult::new("unreachable"))
    }));
    let mut rx = engine.subscribe();

    let permanent = engine
        .add_job("q", "bad-input", json!({}), JobOptions::new().with_attempts(5))
        .await?;
    let event = common::next_event(&mut rx, is_failed).await?;
    assert_eq!(event.job_id(), Some(permanent.id));
    assert_eq!(engine.get_job("q", permanent.id).await?.attempts, 1);

    let panicking = engine
        .add_job("q", "explodes", json!({}), JobOptions::new().with_attempts(2))
        .await?;
    let events = common::collect_until(&mut rx, is_failed).await?;
    assert_eq!(events.iter().filter(|e| e.kind() == "retry").count(), 1);
    let failed = engine.get_job("q", panicking.id).await?;
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.error.as_deref(), Some("handler panicked"));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn missing_handler_fails_after_retries() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    let mut rx = engine.subscribe();

    let job = engine
        .add_job("q", "unregistered", json!({}), JobOptions::new().with_attempts(2))
        .await?;
    common::next_event(&mut rx, is_failed).await?;

    let failed = engine.get_job("q", job.id).await?;
    assert_eq!(failed.attempts, 2);
    assert!(failed.error.unwrap_or_default().contains("No handler registered"));

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn add_job_rejects_invalid_input() -> Result<(), Box<dyn Error>> {
    #[derive(Deserialize)]
    struct Score {
        #[allow(dead_code)]
        asset: String,
    }

    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register(
        "risk",
        "score",
        TypedHandler::new(|_payload: Score, _ctx: JobContext| -> HandlerFuture {
            Box::pin(async { Ok(JobResult::new("scored")) })
        }),
    );

    let empty_name = engine.add_job("risk", "", json!({}), JobOptions::new()).await;
    assert!(matches!(empty_name, Err(EngineError::Validation(_))));

    let empty_queue = engine.add_job(" ", "score", json!({}), JobOptions::new()).await;
    assert!(matches!(empty_queue, Err(EngineError::Validation(_))));

    let zero_attempts = engine
        .add_job("risk", "score", json!({"asset": "BTC"}), JobOptions::new().with_attempts(0))
        .await;
    assert!(matches!(zero_attempts, Err(EngineError::Validation(_))));

    let bad_payload = engine.add_job("risk", "score", json!({"asset": 1}), JobOptions::new()).await;
    assert!(matches!(bad_payload, Err(EngineError::Validation(_))));

    assert_eq!(engine.get_status("risk").await?.total(), 0);
    engine
        .add_job("risk", "score", json!({"asset": "BTC"}), JobOptions::new())
        .await?;

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_is_never_exceeded() -> Result<(), Box<dyn Error>> {
    let config = common::fast_config().with_queue("crawl", QueueConfig::default().with_concurrency(2));
    let engine = JobQueue::start(config).await?;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());
    engine.register(
        "crawl",
        "page",
        FnHandler::new(move |_ctx: JobContext| -> HandlerFuture {
            let (running, peak) = (r.clone(), p.clone());
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(JobResult::new("crawled"))
            })
        }),
    );

    for _ in 0..6 {
        engine.add_job("crawl", "page", json!({}), JobOptions::new()).await?;
    }
    common::eventually(|| {
        let engine = engine.clone();
        async move {
            engine
                .get_status("crawl")
                .await
                .is_ok_and(|status| status.completed == 6)
        }
    })
    .await?;

    assert_eq!(peak.load(Ordering::SeqCst), 2);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn progress_is_monotonic_and_clamped() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register(
        "q",
        "report",
        job_handler!(|ctx| {
            for value in [10, 50, 30, 150] {
                ctx.progress.report(value);
            }
            Ok(JobResult::new("reported"))
        }),
    );
    let mut rx = engine.subscribe();

    engine.add_job("q", "report", json!({}), JobOptions::new()).await?;
    let events = common::collect_until(&mut rx, is_completed).await?;
    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![10, 50, 100]);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn higher_priority_is_claimed_first() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    let order = Arc::new(Mutex::new(Vec::new()));
    engine.register("q", "record", recording_handler(order.clone()));

    engine.pause("q").await?;
    for (label, priority) in [
        ("low", Priority::Low),
        ("normal", Priority::Normal),
        ("critical", Priority::Critical),
    ] {
        engine
            .add_job("q", "record", json!({"label": label}), JobOptions::new().with_priority(priority))
            .await?;
    }
    engine.resume("q").await?;

    common::eventually(|| {
        let order = order.clone();
        async move { order.lock().len() == 3 }
    })
    .await?;
    assert_eq!(*order.lock(), vec!["critical", "normal", "low"]);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn delayed_job_waits_for_its_run_time() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register("q", "later", job_handler!(|_ctx| Ok(JobResult::new("ran"))));
    let mut rx = engine.subscribe();

    let job = engine
        .add_job("q", "later", json!({}), JobOptions::new().with_delay(Duration::from_millis(150)))
        .await?;
    let status = engine.get_status("q").await?;
    assert_eq!(status.delayed, 1);
    assert_eq!(status.waiting, 0);

    let started = common::next_event(&mut rx, |e| matches!(e, JobEvent::Started { .. })).await?;
    assert!(started.timestamp() >= job.next_run_at);
    common::next_event(&mut rx, is_completed).await?;

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn remove_job_only_applies_to_waiting_jobs() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    let gate = Arc::new(Notify::new());
    engine.register("q", "slow", gated_handler(gate.clone()));
    let mut rx = engine.subscribe();

    let active = engine.add_job("q", "slow", json!({}), JobOptions::new()).await?;
    common::next_event(&mut rx, |e| matches!(e, JobEvent::Started { .. })).await?;
    let waiting = engine.add_job("q", "slow", json!({}), JobOptions::new()).await?;

    let busy = engine.remove_job("q", active.id).await;
    assert!(matches!(busy, Err(EngineError::JobNotRemovable { status: JobStatus::Active, .. })));

    engine.remove_job("q", waiting.id).await?;
    let removed = common::next_event(&mut rx, |e| matches!(e, JobEvent::Removed { .. })).await?;
    assert_eq!(removed.job_id(), Some(waiting.id));
    assert!(matches!(
        engine.get_job("q", waiting.id).await,
        Err(EngineError::JobNotFound(_))
    ));
    assert!(matches!(
        engine.remove_job("q", waiting.id).await,
        Err(EngineError::JobNotFound(_))
    ));
    assert!(matches!(
        engine.remove_job("nowhere", waiting.id).await,
        Err(EngineError::QueueNotFound(_))
    ));
    assert!(!engine.list_queues().await?.contains(&"nowhere".to_string()));

    gate.notify_one();
    common::next_event(&mut rx, is_completed).await?;
    assert_eq!(engine.get_status("q").await?.total(), 1);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn silent_job_is_flagged_as_stalled() -> Result<(), Box<dyn Error>> {
    let config = common::fast_config().with_stall_timeout(Duration::from_millis(60));
    let engine = JobQueue::start(config).await?;
    let gate = Arc::new(Notify::new());
    engine.register("q", "hangs", gated_handler(gate.clone()));
    let mut rx = engine.subscribe();

    let job = engine.add_job("q", "hangs", json!({}), JobOptions::new()).await?;
    let stalled = common::next_event(&mut rx, |e| matches!(e, JobEvent::Stalled { .. })).await?;
    assert_eq!(stalled.job_id(), Some(job.id));

    let status = engine.get_status("q").await?;
    assert_eq!(status.stalled, 1);
    assert_eq!(status.active, 1);

    let health = engine.get_health().await?;
    let queue = health.queue("q").ok_or("queue missing from health")?;
    assert_eq!(queue.level, HealthLevel::Warning);
    assert!(queue.issues.iter().any(|issue| issue.contains("stalled")));

    gate.notify_one();
    common::next_event(&mut rx, is_completed).await?;
    assert_eq!(engine.get_status("q").await?.stalled, 0);
    assert_eq!(engine.get_job("q", job.id).await?.status, JobStatus::Completed);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn fail_policy_fails_stalled_jobs_and_ignores_late_results() -> Result<(), Box<dyn Error>> {
    let config = common::fast_config()
        .with_stall_timeout(Duration::from_millis(60))
        .with_stall_policy(StallPolicy::Fail);
    let engine = JobQueue::start(config).await?;
    let gate = Arc::new(Notify::new());
    engine.register("q", "hangs", gated_handler(gate.clone()));
    let mut rx = engine.subscribe();

    let job = engine.add_job("q", "hangs", json!({}), JobOptions::new()).await?;
    let failed = common::next_event(&mut rx, is_failed).await?;
    match failed {
        JobEvent::Failed { job: failed, error, .. } => {
            assert_eq!(failed.id, job.id);
            assert_eq!(error, "stalled");
        }
        other => return Err(format!("unexpected event {:?}", other).into()),
    }

    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let after = engine.get_job("q", job.id).await?;
    assert_eq!(after.status, JobStatus::Failed);
    assert_eq!(after.attempts, 1);
    assert!(after.result.is_none());

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn fail_policy_keeps_the_slot_until_the_abandoned_handler_returns() -> Result<(), Box<dyn Error>> {
    let config = common::fast_config()
        .with_stall_timeout(Duration::from_millis(60))
        .with_stall_policy(StallPolicy::Fail);
    let engine = JobQueue::start(config).await?;

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (running.clone(), peak.clone());
    engine.register(
        "slow",
        "silent",
        FnHandler::new(move |_ctx: JobContext| -> HandlerFuture {
            let (running, peak) = (r.clone(), p.clone());
            Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(400)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(JobResult::new("too late"))
            })
        }),
    );

    for _ in 0..3 {
        engine.add_job("slow", "silent", json!({}), JobOptions::new()).await?;
    }
    common::eventually(|| {
        let engine = engine.clone();
        async move {
            engine
                .get_status("slow")
                .await
                .is_ok_and(|status| status.failed == 3)
        }
    })
    .await?;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(engine.get_status("slow").await?.completed, 0);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn store_outage_fails_add_and_suspends_claims()-> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let engine = JobQueue::start_with_store(common::fast_config(), store.clone()).await?;
    engine.register("q", "work", job_handler!(|_ctx| Ok(JobResult::new("done"))));
    let mut rx = engine.subscribe();

    store.set_available(false);
    let rejected = engine.add_job("q", "work", json!({}), JobOptions::new()).await;
    assert!(matches!(rejected, Err(EngineError::Store(_))));
    assert_eq!(engine.get_status("q").await?.total(), 0);

    store.set_available(true);
    engine.pause("q").await?;
    let job = engine.add_job("q", "work", json!({}), JobOptions::new()).await?;
    assert!(store.get(job.id).is_some());

    store.set_available(false);
    engine.resume("q").await?;
    let status = engine.get_status("q").await?;
    assert!(status.store_degraded);
    assert_eq!(status.waiting, 1);
    assert_eq!(status.active, 0);

    let health = engine.get_health().await?;
    assert_eq!(health.overall, HealthLevel::Critical);

    store.set_available(true);
    let done = common::next_event(&mut rx, is_completed).await?;
    assert_eq!(done.job_id(), Some(job.id));
    assert!(!engine.get_status("q").await?.store_degraded);
    assert_eq!(
        store.get(job.id).map(|stored| stored.status),
        Some(JobStatus::Completed)
    );

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn recover_reinstates_unfinished_jobs() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let now = chrono::Utc::now();

    let waiting = Job::new("prices", "ingest", json!({}));
    let mut interrupted = Job::new("prices", "ingest", json!({})).with_max_attempts(3);
    interrupted.claim(now)?;
    let mut exhausted = Job::new("prices", "ingest", json!({})).with_max_attempts(1);
    exhausted.claim(now)?;
    let mut finished = Job::new("prices", "ingest", json!({}));
    finished.claim(now)?;
    finished.complete(JobResult::new("old"), now)?;
    for job in [&waiting, &interrupted, &exhausted, &finished] {
        jobs_core::JobStore::save(store.as_ref(), job).await?;
    }

    let engine = JobQueue::start_with_store(common::fast_config(), store.clone()).await?;
    engine.register("prices", "ingest", job_handler!(|_ctx| Ok(JobResult::new("ingested"))));

    assert_eq!(engine.recover().await?, 3);
    assert_eq!(engine.list_queues().await?, vec!["prices".to_string()]);

    common::eventually(|| {
        let engine = engine.clone();
        async move {
            engine
                .get_status("prices")
                .await
                .is_ok_and(|status| status.completed == 2 && status.failed == 1)
        }
    })
    .await?;

    let resumed = engine.get_job("prices", interrupted.id).await?;
    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.attempts, 2);

    let failures = engine.list_recent_failures(10).await?;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].id, exhausted.id);

    // Already known jobs are not restored twice.
    assert_eq!(engine.recover().await?, 0);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn recent_failures_span_queues_newest_first() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    for queue in ["alerts", "social"] {
        engine.register(queue, "broken", job_handler!(|_ctx| Err(HandlerError::retryable("upstream down"))));
    }
    let mut rx = engine.subscribe();
    let once = JobOptions::new().with_attempts(1);

    let first = engine.add_job("alerts", "broken", json!({}), once.clone()).await?;
    common::next_event(&mut rx, is_failed).await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = engine.add_job("social", "broken", json!({}), once).await?;
    common::next_event(&mut rx, is_failed).await?;

    let failures = engine.list_recent_failures(10).await?;
    let ids: Vec<_> = failures.iter().map(|job| job.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    let latest = engine.list_recent_failures(1).await?;
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].id, second.id);
    assert_eq!(latest[0].queue, "social");

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn health_reflects_failure_rate_and_backlog() -> Result<(), Box<dyn Error>> {
    let thresholds = HealthThresholds {
        min_samples: 2,
        backlog_warning: 3,
        ..HealthThresholds::default()
    };
    let engine = JobQueue::start(common::fast_config().with_health(thresholds)).await?;
    engine.register("risk", "broken", job_handler!(|_ctx| Err(HandlerError::retryable("model offline"))));
    let mut rx = engine.subscribe();

    for _ in 0..2 {
        engine
            .add_job("risk", "broken", json!({}), JobOptions::new().with_attempts(1))
            .await?;
        common::next_event(&mut rx, is_failed).await?;
    }
    common::eventually(|| {
        let engine = engine.clone();
        async move {
            engine.get_health().await.is_ok_and(|health| {
                health
                    .queue("risk")
                    .is_some_and(|q| q.level == HealthLevel::Critical && q.window.failures == 2)
            })
        }
    })
    .await?;

    engine.pause("backlog").await?;
    for _ in 0..3 {
        engine.add_job("backlog", "later", json!({}), JobOptions::new()).await?;
    }
    let health = engine.get_health().await?;
    let backlog = health.queue("backlog").ok_or("queue missing from health")?;
    assert_eq!(backlog.level, HealthLevel::Warning);
    assert!(backlog.issues.iter().any(|issue| issue.contains("3 jobs waiting")));
    assert_eq!(health.overall, HealthLevel::Critical);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn retention_prunes_oldest_finished_jobs() -> Result<(), Box<dyn Error>> {
    let mut queue = QueueConfig::default();
    queue.defaults.retention.keep_completed = 2;
    let store = Arc::new(MemoryStore::new());
    let engine = JobQueue::start_with_store(common::fast_config().with_queue("q", queue), store.clone()).await?;
    engine.register("q", "quick", job_handler!(|_ctx| Ok(JobResult::new("done"))));
    let mut rx = engine.subscribe();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(engine.add_job("q", "quick", json!({}), JobOptions::new()).await?.id);
        common::next_event(&mut rx, is_completed).await?;
    }

    assert_eq!(engine.get_status("q").await?.completed, 2);
    assert!(matches!(engine.get_job("q", ids[0]).await, Err(EngineError::JobNotFound(_))));
    assert!(engine.get_job("q", ids[3]).await.is_ok());
    assert_eq!(store.len(), 2);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_attempts() -> Result<(), Box<dyn Error>> {
    let engine = JobQueue::start(common::fast_config()).await?;
    engine.register(
        "q",
        "slow",
        job_handler!(|_ctx| {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(JobResult::new("finished"))
        }),
    );
    let mut rx = engine.subscribe();

    engine.add_job("q", "slow", json!({}), JobOptions::new()).await?;
    common::next_event(&mut rx, |e| matches!(e, JobEvent::Started { .. })).await?;

    engine.shutdown().await?;

    let mut completed = false;
    while let Ok(event) = rx.try_recv() {
        completed |= is_completed(&event);
    }
    assert!(completed);
    Ok(())
}
