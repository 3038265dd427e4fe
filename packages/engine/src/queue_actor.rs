//! Queue actor: owns one queue's jobs and runs its dispatcher loop.
//!
//! The actor handles one message at a time, so every mutation of the
//! queue's job map (including the waiting -> active claim) is serialized.
//! Handlers run in their own tasks and report back with messages.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jobs_core::{
    AttemptOutcome, Job, JobEvent, JobId, JobOptions, JobStatus, JobStore, Queue, QueueState,
    QueueStatus,
};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::config::StallPolicy;
use crate::error::{EngineError, EngineResult, HandlerError};
use crate::executor;
use crate::handler::{HandlerResult, JobHandlerRegistry};
use crate::messages::QueueMessage;

/// Timing and stall settings for one queue.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub stall_timeout: Duration,
    pub stall_policy: StallPolicy,
    pub tick_interval: Duration,
}

/// State for the queue actor.
pub struct QueueActorState {
    /// Queue metadata.
    pub queue: Queue,
    /// All jobs by ID.
    jobs: HashMap<JobId, Job>,
    next_sequence: u64,
    /// Active jobs flagged as stalled in their current attempt.
    stalled: HashSet<JobId>,
    /// Attempts failed by the stall policy whose handler has not returned yet.
    /// They keep their concurrency slot until the handler reports back.
    abandoned: HashSet<(JobId, u32)>,
    handlers: Arc<JobHandlerRegistry>,
    store: Arc<dyn JobStore>,
    bus: EventBus,
    settings: DispatchSettings,
    /// Set when a store write failed; no claims until the store answers again.
    store_degraded: bool,
    /// Writes and deletes to replay once the store is back.
    unsynced_saves: HashSet<JobId>,
    unsynced_removals: HashSet<JobId>,
    /// Single pending wake-up aimed at the earliest delayed job.
    wake_timer: Option<(DateTime<Utc>, JoinHandle<()>)>,
    tick_task: Option<JoinHandle<()>>,
    drain_waiters: Vec<RpcReplyPort<()>>,
}

impl QueueActorState {
    /// Create a new queue actor state.
    pub fn new(
        queue: Queue,
        handlers: Arc<JobHandlerRegistry>,
        store: Arc<dyn JobStore>,
        bus: EventBus,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queue,
            jobs: HashMap::new(),
            next_sequence: 1,
            stalled: HashSet::new(),
            abandoned: HashSet::new(),
            handlers,
            store,
            bus,
            settings,
            store_degraded: false,
            unsynced_saves: HashSet::new(),
            unsynced_removals: HashSet::new(),
            wake_timer: None,
            tick_task: None,
            drain_waiters: Vec::new(),
        }
    }

    /// Running handlers: active jobs plus abandoned attempts still in flight.
    fn active_count(&self) -> usize {
        let active = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Active)
            .count();
        active + self.abandoned.len()
    }

    /// Best eligible job: priority, then `next_run_at`, then creation order.
    fn next_eligible(&self, now: DateTime<Utc>) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|job| job.is_eligible(now))
            .min_by(|a, b| a.dispatch_order(b))
            .map(|job| job.id)
    }

    fn earliest_delayed(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter(|job| job.is_delayed(now))
            .map(|job| job.next_run_at)
            .min()
    }

    fn status(&self) -> QueueStatus {
        let mut status = QueueStatus::tally(&self.queue, self.jobs.values(), Utc::now());
        status.stalled = self.stalled.len() as u64;
        status.store_degraded = self.store_degraded;
        status
    }

    fn publish(&self, event: JobEvent) {
        self.bus.publish(event);
    }

    fn mark_degraded(&mut self) {
        if !self.store_degraded {
            tracing::warn!(
                "Queue '{}' suspends claims until the store recovers",
                self.queue.name
            );
        }
        self.store_degraded = true;
    }

    /// Persist a job snapshot; on failure remember it for replay.
    async fn persist(&mut self, job: &Job) {
        if let Err(e) = self.store.save(job).await {
            tracing::warn!("Failed to persist job {}: {}", job.id, e);
            self.unsynced_saves.insert(job.id);
            self.mark_degraded();
        } else {
            self.unsynced_saves.remove(&job.id);
        }
    }

    async fn forget(&mut self, job_id: JobId) {
        if let Err(e) = self.store.remove(job_id).await {
            tracing::warn!("Failed to delete job {} from store: {}", job_id, e);
            self.unsynced_removals.insert(job_id);
            self.mark_degraded();
        }
    }

    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.wake_timer.take() {
            handle.abort();
        }
    }

    /// Aim the wake-up timer at the earliest delayed job, if any.
    fn arm_timer(&mut self, myself: &ActorRef<QueueMessage>, now: DateTime<Utc>) {
        let Some(at) = self.earliest_delayed(now) else {
            self.cancel_timer();
            return;
        };
        if matches!(&self.wake_timer, Some((current, handle)) if *current == at && !handle.is_finished())
        {
            return;
        }
        self.cancel_timer();

        let delay = (at - now).to_std().unwrap_or_default();
        let me = myself.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = me.send_message(QueueMessage::Dispatch);
        });
        self.wake_timer = Some((at, handle));
    }

    /// One dispatcher pass: claim eligible jobs up to the concurrency limit.
    async fn dispatch(&mut self, myself: &ActorRef<QueueMessage>) {
        if !self.queue.is_claiming() || self.store_degraded {
            self.cancel_timer();
            return;
        }

        let now = Utc::now();
        let limit = self.queue.config.concurrency.max(1) as usize;
        while self.active_count() < limit {
            let Some(job_id) = self.next_eligible(now) else {
                break;
            };
            if !self.claim(myself, job_id, now).await {
                break;
            }
        }
        self.arm_timer(myself, now);
    }

    /// waiting -> active, persisted before the handler starts.
    async fn claim(
        &mut self,
        myself: &ActorRef<QueueMessage>,
        job_id: JobId,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return false;
        };
        let previous = job.clone();
        if let Err(e) = job.claim(now) {
            tracing::warn!("Skipping claim of job {}: {}", job_id, e);
            return false;
        }
        let claimed = job.clone();

        if let Err(e) = self.store.save(&claimed).await {
            tracing::warn!("Failed to mark job {} active: {}", job_id, e);
            self.jobs.insert(job_id, previous);
            self.mark_degraded();
            return false;
        }

        tracing::debug!(
            "Job {} claimed (attempt {}/{})",
            job_id,
            claimed.attempts,
            claimed.max_attempts
        );
        self.publish(JobEvent::Started {
            job_id,
            queue: claimed.queue.clone(),
            name: claimed.name.clone(),
            attempt: claimed.attempts,
            timestamp: now,
        });
        executor::spawn_attempt(myself.clone(), self.handlers.clone(), &claimed);
        true
    }

    async fn add(
        &mut self,
        name: String,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> EngineResult<Job> {
        if !self.queue.is_accepting_jobs() {
            return Err(EngineError::QueueDraining(self.queue.name.clone()));
        }

        let mut job = Job::from_options(
            &self.queue.name,
            &name,
            payload,
            &options,
            &self.queue.config.defaults,
        )?;
        job.sequence = self.next_sequence;

        self.store.save(&job).await?;
        self.next_sequence += 1;
        self.jobs.insert(job.id, job.clone());

        self.publish(JobEvent::Added {
            job: job.clone(),
            timestamp: Utc::now(),
        });
        Ok(job)
    }

    async fn restore(&mut self, jobs: Vec<Job>) -> usize {
        let now = Utc::now();
        let mut restored = 0;
        for mut job in jobs {
            if job.queue != self.queue.name || self.jobs.contains_key(&job.id) {
                continue;
            }
            if job.reclaim_after_crash(now) {
                self.persist(&job).await;
                if job.status == JobStatus::Failed {
                    self.publish(JobEvent::Failed {
                        job: job.clone(),
                        error: job.error.clone().unwrap_or_default(),
                        timestamp: now,
                    });
                }
            }
            self.next_sequence = self.next_sequence.max(job.sequence + 1);
            self.jobs.insert(job.id, job);
            restored += 1;
        }
        if restored > 0 {
            tracing::info!("Queue '{}' restored {} jobs", self.queue.name, restored);
        }
        restored
    }

    fn progress(&mut self, job_id: JobId, attempt: u32, value: u32) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        if job.status != JobStatus::Active || job.attempts != attempt {
            return;
        }
        let now = Utc::now();
        self.stalled.remove(&job_id);
        if let Some(progress) = job.record_progress(value, now) {
            let queue = job.queue.clone();
            self.publish(JobEvent::Progress {
                job_id,
                queue,
                progress,
                timestamp: now,
            });
        }
    }

    /// Apply the outcome of an attempt. Stale reports are ignored.
    async fn finish(&mut self, job_id: JobId, attempt: u32, outcome: HandlerResult) {
        if self.abandoned.remove(&(job_id, attempt)) {
            tracing::debug!(
                "Abandoned attempt {} of job {} returned, result dropped",
                attempt,
                job_id
            );
            return;
        }
        let Some(job) = self.jobs.get_mut(&job_id) else {
            tracing::debug!("Job {} finished but is no longer tracked", job_id);
            return;
        };
        if job.status != JobStatus::Active || job.attempts != attempt {
            tracing::debug!("Ignoring stale report for job {} attempt {}", job_id, attempt);
            return;
        }

        let now = Utc::now();
        let event = match outcome {
            Ok(result) => match job.complete(result, now) {
                Ok(()) => JobEvent::Completed {
                    job_id,
                    queue: job.queue.clone(),
                    attempts: job.attempts,
                    duration_ms: job.duration_ms().unwrap_or(0),
                    timestamp: now,
                },
                Err(e) => {
                    tracing::warn!("Cannot complete job {}: {}", job_id, e);
                    return;
                }
            },
            Err(error) => {
                let message = error.message().to_string();
                match job.fail_attempt(message.clone(), error.is_permanent(), now) {
                    Ok(AttemptOutcome::Retry { delay, next_run_at }) => JobEvent::Retry {
                        job_id,
                        queue: job.queue.clone(),
                        attempt,
                        error: message,
                        delay_ms: delay.as_millis() as u64,
                        next_run_at,
                        timestamp: now,
                    },
                    Ok(AttemptOutcome::Failed) => JobEvent::Failed {
                        job: job.clone(),
                        error: message,
                        timestamp: now,
                    },
                    Err(e) => {
                        tracing::warn!("Cannot fail job {}: {}", job_id, e);
                        return;
                    }
                }
            }
        };

        let snapshot = job.clone();
        self.stalled.remove(&job_id);
        self.persist(&snapshot).await;
        self.publish(event);
        if snapshot.status.is_terminal() {
            self.prune(snapshot.status).await;
        }
    }

    /// Drop the oldest finished jobs beyond the retention limit.
    async fn prune(&mut self, status: JobStatus) {
        let Some(limit) = self.queue.config.defaults.retention.limit_for(status) else {
            return;
        };
        let mut finished: Vec<(DateTime<Utc>, u64, JobId)> = self
            .jobs
            .values()
            .filter(|job| job.status == status)
            .map(|job| (job.completed_at.unwrap_or(job.created_at), job.sequence, job.id))
            .collect();
        if finished.len() <= limit {
            return;
        }
        finished.sort();
        let excess = finished.len() - limit;
        for (_, _, job_id) in finished.into_iter().take(excess) {
            self.jobs.remove(&job_id);
            self.forget(job_id).await;
        }
    }

    async fn remove(&mut self, job_id: JobId) -> EngineResult<()> {
        let Some(job) = self.jobs.get(&job_id) else {
            return Err(EngineError::JobNotFound(job_id));
        };
        if job.status != JobStatus::Waiting {
            return Err(EngineError::JobNotRemovable {
                job_id,
                status: job.status,
            });
        }
        self.store.remove(job_id).await?;
        self.jobs.remove(&job_id);
        self.publish(JobEvent::Removed {
            job_id,
            queue: self.queue.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn failures(&self, limit: usize) -> Vec<Job> {
        let mut failed: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        failed.truncate(limit);
        failed
    }

    /// Flag active jobs that have been silent past the stall timeout.
    async fn check_stalls(&mut self) {
        let now = Utc::now();
        let Ok(timeout) = chrono::Duration::from_std(self.settings.stall_timeout) else {
            return;
        };

        let silent: Vec<(JobId, u32, u64)> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Active && !self.stalled.contains(&job.id))
            .filter_map(|job| {
                let since = job.last_activity_at.or(job.started_at)?;
                let silent = now - since;
                (silent >= timeout).then(|| (job.id, job.attempts, silent.num_milliseconds() as u64))
            })
            .collect();

        for (job_id, attempt, silent_ms) in silent {
            tracing::warn!(
                "Job {} in queue '{}' stalled (no progress for {}ms)",
                job_id,
                self.queue.name,
                silent_ms
            );
            self.stalled.insert(job_id);
            self.publish(JobEvent::Stalled {
                job_id,
                queue: self.queue.name.clone(),
                attempt,
                silent_ms,
                timestamp: now,
            });

            if self.settings.stall_policy == StallPolicy::Fail {
                self.finish(
                    job_id,
                    attempt,
                    Err(HandlerError::permanent("stalled")),
                )
                .await;
                self.abandoned.insert((job_id, attempt));
            }
        }
    }

    /// Replay failed writes once the store answers again.
    async fn try_recover_store(&mut self) {
        if !self.store_degraded {
            return;
        }
        if let Err(e) = self.store.ping().await {
            tracing::debug!("Store still unavailable for '{}': {}", self.queue.name, e);
            return;
        }

        let saves: Vec<Job> = self
            .unsynced_saves
            .iter()
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect();
        for job in saves {
            if self.store.save(&job).await.is_err() {
                return;
            }
            self.unsynced_saves.remove(&job.id);
        }
        self.unsynced_saves.retain(|id| self.jobs.contains_key(id));

        let removals: Vec<JobId> = self.unsynced_removals.iter().copied().collect();
        for job_id in removals {
            if self.store.remove(job_id).await.is_err() {
                return;
            }
            self.unsynced_removals.remove(&job_id);
        }

        self.store_degraded = false;
        tracing::info!("Store recovered, queue '{}' resumes claims", self.queue.name);
    }

    fn set_state(&mut self, state: QueueState) {
        self.queue.state = state;
        self.queue.updated_at = Utc::now();
    }

    fn release_drain_waiters(&mut self) {
        if self.queue.state == QueueState::Draining && self.active_count() == 0 {
            for waiter in self.drain_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorState;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        mut args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(
            "Starting queue actor: {} (concurrency {})",
            args.queue.name,
            args.queue.config.concurrency
        );

        // Start periodic tick
        let myself_clone = myself.clone();
        let period = args.settings.tick_interval;
        args.tick_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                if myself_clone.send_message(QueueMessage::Tick).is_err() {
                    break;
                }
            }
        }));

        Ok(args)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Add {
                name,
                payload,
                options,
                reply,
            } => {
                let result = state.add(name, payload, options).await;
                let added = result.is_ok();
                let _ = reply.send(result);
                if added {
                    state.dispatch(&myself).await;
                }
            }

            QueueMessage::Restore { jobs, reply } => {
                let restored = state.restore(jobs).await;
                let _ = reply.send(Ok(restored));
                state.dispatch(&myself).await;
            }

            QueueMessage::Progress {
                job_id,
                attempt,
                progress,
            } => {
                state.progress(job_id, attempt, progress);
            }

            QueueMessage::AttemptFinished {
                job_id,
                attempt,
                outcome,
            } => {
                state.finish(job_id, attempt, outcome).await;
                state.release_drain_waiters();
                state.dispatch(&myself).await;
            }

            QueueMessage::Dispatch => {
                state.dispatch(&myself).await;
            }

            QueueMessage::Pause { reply } => {
                if state.queue.state == QueueState::Running {
                    state.set_state(QueueState::Paused);
                    state.cancel_timer();
                    state.publish(JobEvent::Paused {
                        queue: state.queue.name.clone(),
                        timestamp: Utc::now(),
                    });
                }
                let _ = reply.send(());
            }

            QueueMessage::Resume { reply } => {
                if state.queue.state == QueueState::Paused {
                    state.set_state(QueueState::Running);
                    state.publish(JobEvent::Resumed {
                        queue: state.queue.name.clone(),
                        timestamp: Utc::now(),
                    });
                }
                let _ = reply.send(());
                state.dispatch(&myself).await;
            }

            QueueMessage::Remove { job_id, reply } => {
                let result = state.remove(job_id).await;
                let _ = reply.send(result);
                state.arm_timer(&myself, Utc::now());
            }

            QueueMessage::GetJob { job_id, reply } => {
                let _ = reply.send(state.jobs.get(&job_id).cloned());
            }

            QueueMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            QueueMessage::ListFailures { limit, reply } => {
                let _ = reply.send(state.failures(limit));
            }

            QueueMessage::Drain { reply } => {
                tracing::info!("Draining queue: {}", state.queue.name);
                state.set_state(QueueState::Draining);
                state.cancel_timer();
                state.drain_waiters.push(reply);
                state.release_drain_waiters();
            }

            QueueMessage::Tick => {
                state.try_recover_store().await;
                state.check_stalls().await;
                state.release_drain_waiters();
                state.dispatch(&myself).await;
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.cancel_timer();
        if let Some(tick) = state.tick_task.take() {
            tick.abort();
        }
        tracing::info!("Queue actor stopped: {}", state.queue.name);
        Ok(())
    }
}
