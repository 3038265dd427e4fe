//! Core domain types for the background job engine.
//!
//! This crate contains the types shared by every package:
//! - Job, JobStatus and JobOptions for units of work
//! - Queue, QueueConfig and QueueStatus for job containers
//! - Backoff for the retry delay policy
//! - JobEvent for lifecycle notifications
//! - Health classification and the durable store contract

mod backoff;
mod error;
mod events;
pub mod health;
mod job;
mod options;
mod queue;
pub mod store;

pub use backoff::{Backoff, BackoffKind};
pub use error::{TransitionError, ValidationError};
pub use events::JobEvent;
pub use health::{HealthLevel, HealthThresholds, QueueHealth, SystemHealth, WindowStats};
pub use job::{AttemptOutcome, Job, JobId, JobResult, JobStatus, Priority};
pub use options::JobOptions;
pub use queue::{JobDefaults, Queue, QueueConfig, QueueState, QueueStatus, Retention};
pub use store::{JobStore, MemoryStore, StoreError, StoreFuture};
