//! Queue control API.

use std::sync::Arc;

use jobs_core::{
    Job, JobEvent, JobId, JobOptions, JobStore, MemoryStore, QueueStatus, SystemHealth,
    ValidationError,
};
use ractor::{Actor, ActorRef};
use tokio::sync::broadcast;

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::handler::{JobHandler, JobHandlerRegistry};
use crate::messages::{QueueMessage, SupervisorMessage, ask};
use crate::supervisor::{Supervisor, SupervisorArgs};

/// Handle to a running job engine.
///
/// Cheap to clone; every clone talks to the same supervisor.
#[derive(Clone)]
pub struct JobQueue {
    supervisor: ActorRef<SupervisorMessage>,
    handlers: Arc<JobHandlerRegistry>,
    bus: EventBus,
}

impl JobQueue {
    /// Start an engine backed by an in-process [`MemoryStore`].
    pub async fn start(config: EngineConfig) -> EngineResult<Self> {
        Self::start_with_store(config, Arc::new(MemoryStore::new())).await
    }

    /// Start an engine backed by `store`.
    pub async fn start_with_store(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
    ) -> EngineResult<Self> {
        config.validate()?;

        let handlers = Arc::new(JobHandlerRegistry::new());
        let bus = EventBus::new(config.event_capacity);
        let args = SupervisorArgs {
            config,
            handlers: handlers.clone(),
            store,
            bus: bus.clone(),
        };

        let (supervisor, _handle) = Actor::spawn(None, Supervisor, args)
            .await
            .map_err(|e| EngineError::Actor(format!("Failed to start supervisor: {}", e)))?;

        Ok(Self {
            supervisor,
            handlers,
            bus,
        })
    }

    /// Bind a handler to `(queue, name)`, replacing any previous one.
    pub fn register<H: JobHandler>(
        &self,
        queue: impl Into<String>,
        name: impl Into<String>,
        handler: H,
    ) {
        self.handlers.register(queue, name, handler);
    }

    pub fn handlers(&self) -> &JobHandlerRegistry {
        &self.handlers
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Receive every lifecycle event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.bus.subscribe()
    }

    /// Create a waiting job, creating the queue on first use.
    pub async fn add_job(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> EngineResult<Job> {
        options.validate(queue, name)?;
        if let Some(handler) = self.handlers.get(queue, name) {
            handler
                .validate(&payload)
                .map_err(|reason| ValidationError::InvalidPayload {
                    job: name.to_string(),
                    reason,
                })?;
        }

        let queue_ref = self.queue(queue).await?;
        ask(&queue_ref, |reply| QueueMessage::Add {
            name: name.to_string(),
            payload,
            options,
            reply,
        })
        .await?
    }

    /// Stop claiming new jobs on `queue`. Active attempts finish normally.
    pub async fn pause(&self, queue: &str) -> EngineResult<()> {
        let queue_ref = self.queue(queue).await?;
        ask(&queue_ref, |reply| QueueMessage::Pause { reply }).await
    }

    pub async fn resume(&self, queue: &str) -> EngineResult<()> {
        let queue_ref = self.queue(queue).await?;
        ask(&queue_ref, |reply| QueueMessage::Resume { reply }).await
    }

    /// Delete a waiting job.
    pub async fn remove_job(&self, queue: &str, job_id: JobId) -> EngineResult<()> {
        let queue_ref = self.existing_queue(queue).await?;
        ask(&queue_ref, |reply| QueueMessage::Remove { job_id, reply }).await?
    }

    pub async fn get_job(&self, queue: &str, job_id: JobId) -> EngineResult<Job> {
        let queue_ref = self.existing_queue(queue).await?;
        ask(&queue_ref, |reply| QueueMessage::GetJob { job_id, reply })
            .await?
            .ok_or(EngineError::JobNotFound(job_id))
    }

    pub async fn get_status(&self, queue: &str) -> EngineResult<QueueStatus> {
        let queue_ref = self.queue(queue).await?;
        ask(&queue_ref, |reply| QueueMessage::GetStatus { reply }).await
    }

    /// Names of every known queue, sorted.
    pub async fn list_queues(&self) -> EngineResult<Vec<String>> {
        ask(&self.supervisor, |reply| SupervisorMessage::ListQueues { reply }).await
    }

    pub async fn get_health(&self) -> EngineResult<SystemHealth> {
        ask(&self.supervisor, |reply| SupervisorMessage::GetHealth { reply }).await
    }

    /// Failed jobs across all queues, newest first.
    pub async fn list_recent_failures(&self, limit: usize) -> EngineResult<Vec<Job>> {
        ask(&self.supervisor, |reply| SupervisorMessage::RecentFailures {
            limit,
            reply,
        })
        .await
    }

    /// Reload unfinished jobs from the store. Returns how many were restored.
    pub async fn recover(&self) -> EngineResult<usize> {
        ask(&self.supervisor, |reply| SupervisorMessage::Recover { reply }).await?
    }

    /// Stop claiming everywhere, wait for in-flight attempts, then stop.
    pub async fn shutdown(self) -> EngineResult<()> {
        ask(&self.supervisor, |reply| SupervisorMessage::Shutdown { reply }).await
    }

    async fn queue(&self, name: &str) -> EngineResult<ActorRef<QueueMessage>> {
        if name.trim().is_empty() {
            return Err(ValidationError::EmptyQueueName.into());
        }
        ask(&self.supervisor, |reply| SupervisorMessage::GetQueue {
            name: name.to_string(),
            create: true,
            reply,
        })
        .await??
        .ok_or_else(|| EngineError::QueueNotFound(name.to_string()))
    }

    async fn existing_queue(&self, name: &str) -> EngineResult<ActorRef<QueueMessage>> {
        ask(&self.supervisor, |reply| SupervisorMessage::GetQueue {
            name: name.to_string(),
            create: false,
            reply,
        })
        .await??
        .ok_or_else(|| EngineError::QueueNotFound(name.to_string()))
    }
}
