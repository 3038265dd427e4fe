//! Message types for actor communication.

use jobs_core::{Job, JobEvent, JobId, JobOptions, QueueStatus, SystemHealth, WindowStats};
use ractor::{ActorRef, Message, RpcReplyPort};

use crate::error::{EngineError, EngineResult};
use crate::handler::HandlerResult;

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Add a new waiting job.
    Add {
        name: String,
        payload: serde_json::Value,
        options: JobOptions,
        reply: RpcReplyPort<EngineResult<Job>>,
    },

    /// Reinstate jobs loaded from the store.
    Restore {
        jobs: Vec<Job>,
        reply: RpcReplyPort<EngineResult<usize>>,
    },

    /// Progress reported by a running handler.
    Progress {
        job_id: JobId,
        attempt: u32,
        progress: u32,
    },

    /// An attempt returned.
    AttemptFinished {
        job_id: JobId,
        attempt: u32,
        outcome: HandlerResult,
    },

    /// Re-evaluate eligibility and claim what fits.
    Dispatch,

    /// Stop claiming new jobs.
    Pause { reply: RpcReplyPort<()> },

    /// Resume claiming.
    Resume { reply: RpcReplyPort<()> },

    /// Remove a waiting job.
    Remove {
        job_id: JobId,
        reply: RpcReplyPort<EngineResult<()>>,
    },

    /// Get a job by ID.
    GetJob {
        job_id: JobId,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// Get job counts.
    GetStatus { reply: RpcReplyPort<QueueStatus> },

    /// Most recent failed jobs, newest first.
    ListFailures {
        limit: usize,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Stop claiming and reply once no attempt is in flight.
    Drain { reply: RpcReplyPort<()> },

    /// Periodic tick for housekeeping.
    Tick,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Look up a queue actor, creating the queue if asked to.
    GetQueue {
        name: String,
        create: bool,
        reply: RpcReplyPort<EngineResult<Option<ActorRef<QueueMessage>>>>,
    },

    /// List all queue names.
    ListQueues { reply: RpcReplyPort<Vec<String>> },

    /// Per-queue and overall health.
    GetHealth { reply: RpcReplyPort<SystemHealth> },

    /// Most recent failed jobs across queues.
    RecentFailures {
        limit: usize,
        reply: RpcReplyPort<Vec<Job>>,
    },

    /// Load unfinished jobs from the store into their queues.
    Recover { reply: RpcReplyPort<EngineResult<usize>> },

    /// Drain every queue, then stop.
    Shutdown { reply: RpcReplyPort<()> },
}

/// Messages for the StatsActor.
#[derive(Debug)]
pub enum StatsMessage {
    /// An event seen on the bus.
    Record(Box<JobEvent>),

    /// Outcome window for a queue.
    GetWindow {
        queue: String,
        reply: RpcReplyPort<WindowStats>,
    },
}

/// Send a request and wait for the reply.
pub(crate) async fn ask<M, T>(
    actor: &ActorRef<M>,
    build: impl FnOnce(RpcReplyPort<T>) -> M,
) -> Result<T, EngineError>
where
    M: Message,
    T: Send + 'static,
{
    let (tx, rx) = ractor::concurrency::oneshot();
    actor
        .send_message(build(tx.into()))
        .map_err(|e| EngineError::Actor(format!("Failed to send message: {}", e)))?;
    rx.await
        .map_err(|_| EngineError::Actor("Failed to receive response".into()))
}
