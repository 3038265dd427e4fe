//! Actor-based job engine.
//!
//! This crate runs the queues on top of Ractor and exposes the queue
//! control API through [`JobQueue`].
//!
//! # Architecture
//!
//! - `Supervisor` - queue registry; creates queue actors on first use
//! - `QueueActor` - one per queue; owns its jobs and runs the dispatcher loop
//! - `StatsActor` - keeps outcome windows fed from the event bus
//! - attempts run as plain tokio tasks and report back to their queue
//!
//! # Usage
//!
//! ```ignore
//! use jobs_engine::{EngineConfig, JobQueue, job_handler};
//! use jobs_core::{JobOptions, JobResult};
//!
//! let engine = JobQueue::start(EngineConfig::default()).await?;
//! engine.register("prices", "ingest", job_handler!(|ctx| {
//!     ctx.progress.report(50);
//!     Ok(JobResult::new("ingested"))
//! }));
//! engine.add_job("prices", "ingest", serde_json::json!({}), JobOptions::new()).await?;
//! ```

mod bus;
mod client;
mod config;
mod error;
mod executor;
mod handler;
mod messages;
mod queue_actor;
mod stats;
mod supervisor;

pub use bus::{EventBus, spawn_event_logger};
pub use client::JobQueue;
pub use config::{ConfigError, EngineConfig, StallPolicy};
pub use error::{EngineError, EngineResult, HandlerError};
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, JobContext, JobHandler, JobHandlerRegistry,
    ProgressReporter, TypedHandler,
};
pub use stats::OutcomeTracker;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
