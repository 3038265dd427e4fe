//! Durable store contract and the in-process implementation.
//!
//! The engine persists a job before accepting it and on every status
//! change, and reloads unfinished jobs on startup. Any backend that can
//! honour at-least-once persistence of waiting jobs implements [`JobStore`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::{Job, JobId};

/// Future type returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// The store could not serve a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Persistence boundary for jobs.
pub trait JobStore: Send + Sync + 'static {
    /// Liveness check.
    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Insert or replace a job.
    fn save(&self, job: &Job) -> StoreFuture<'_, ()>;

    /// Delete a job. Deleting a missing job is not an error.
    fn remove(&self, id: JobId) -> StoreFuture<'_, ()>;

    /// Jobs in `waiting` or `active`, across all queues.
    fn load_unfinished(&self) -> StoreFuture<'_, Vec<Job>>;
}

/// Non-persistent store for single-process deployments and tests.
///
/// Can be switched offline to simulate an outage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`] until brought back.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".into()))
        } else {
            Ok(())
        }
    }
}

impl JobStore for MemoryStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check() })
    }

    fn save(&self, job: &Job) -> StoreFuture<'_, ()> {
        let job = job.clone();
        Box::pin(async move {
            self.check()?;
            self.jobs.write().insert(job.id, job);
            Ok(())
        })
    }

    fn remove(&self, id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check()?;
            self.jobs.write().remove(&id);
            Ok(())
        })
    }

    fn load_unfinished(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(async move {
            self.check()?;
            let mut jobs: Vec<Job> = self
                .jobs
                .read()
                .values()
                .filter(|job| !job.status.is_terminal())
                .cloned()
                .collect();
            jobs.sort_by(|a, b| a.queue.cmp(&b.queue).then(a.sequence.cmp(&b.sequence)));
            Ok(jobs)
        })
    }
}
