//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use jobs_core::{JobId, JobResult};
use parking_lot::RwLock;
use ractor::ActorRef;
use serde::de::DeserializeOwned;

use crate::error::{EngineError, HandlerError};
use crate::messages::QueueMessage;

/// Result type for job handlers.
pub type HandlerResult = Result<JobResult, HandlerError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Reports progress of the running attempt back to its queue.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    queue: Option<ActorRef<QueueMessage>>,
    job_id: JobId,
    attempt: u32,
}

impl ProgressReporter {
    pub(crate) fn new(queue: ActorRef<QueueMessage>, job_id: JobId, attempt: u32) -> Self {
        Self {
            queue: Some(queue),
            job_id,
            attempt,
        }
    }

    /// A reporter that goes nowhere, for calling handlers directly.
    pub fn detached(job_id: JobId) -> Self {
        Self {
            queue: None,
            job_id,
            attempt: 0,
        }
    }

    /// Report progress in percent. Values must not decrease within an attempt.
    pub fn report(&self, progress: u32) {
        if let Some(queue) = &self.queue
            && let Err(e) = queue.send_message(QueueMessage::Progress {
                job_id: self.job_id,
                attempt: self.attempt,
                progress,
            })
        {
            tracing::debug!("Dropped progress for job {}: {}", self.job_id, e);
        }
    }
}

/// Everything a handler gets for one attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue: String,
    pub name: String,
    /// 1-based attempt number.
    pub attempt: u32,
    pub payload: serde_json::Value,
    pub progress: ProgressReporter,
}

/// Trait for job handlers.
///
/// Handlers must be safe to run again after a failed attempt.
pub trait JobHandler: Send + Sync + 'static {
    /// Process one attempt and return the result.
    fn handle(&self, ctx: JobContext) -> HandlerFuture;

    /// Check a payload at AddJob time.
    fn validate(&self, _payload: &serde_json::Value) -> Result<(), String> {
        Ok(())
    }
}

/// Registry mapping `(queue, job name)` to handlers.
///
/// Registration overwrites any handler already bound to the same pair.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: RwLock<HashMap<(String, String), Arc<dyn JobHandler>>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a handler to a queue and job name.
    pub fn register<H: JobHandler>(
        &self,
        queue: impl Into<String>,
        name: impl Into<String>,
        handler: H,
    ) {
        self.handlers
            .write()
            .insert((queue.into(), name.into()), Arc::new(handler));
    }

    /// Look up the handler for a queue and job name.
    pub fn resolve(&self, queue: &str, name: &str) -> Result<Arc<dyn JobHandler>, EngineError> {
        self.get(queue, name)
            .ok_or_else(|| EngineError::HandlerNotFound {
                queue: queue.to_string(),
                name: name.to_string(),
            })
    }

    pub fn get(&self, queue: &str, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .get(&(queue.to_string(), name.to_string()))
            .cloned()
    }

    /// List all registered pairs, sorted.
    pub fn registered(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.handlers.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

/// Handler with a concrete payload type.
///
/// The payload is checked against `P` when the job is added and
/// deserialized before `handler` runs; a payload that no longer parses
/// fails the job permanently.
pub struct TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    handler: F,
    _payload: PhantomData<fn() -> P>,
}

impl<P, F> TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _payload: PhantomData,
        }
    }
}

impl<P, F> JobHandler for TypedHandler<P, F>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(P, JobContext) -> HandlerFuture + Send + Sync + 'static,
{
    fn handle(&self, ctx: JobContext) -> HandlerFuture {
        match serde_json::from_value::<P>(ctx.payload.clone()) {
            Ok(payload) => (self.handler)(payload, ctx),
            Err(e) => {
                let msg = format!("payload does not match {}: {}", ctx.name, e);
                Box::pin(async move { Err(HandlerError::Permanent(msg)) })
            }
        }
    }

    fn validate(&self, payload: &serde_json::Value) -> Result<(), String> {
        P::deserialize(payload).map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Helper macro for creating job handlers from async closures.
#[macro_export]
macro_rules! job_handler {
    (|$ctx:ident| $body:expr) => {
        $crate::FnHandler::new(|$ctx: $crate::JobContext| -> $crate::HandlerFuture {
            ::std::boxed::Box::pin(async move { $body })
        })
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Ingest {
        symbols: Vec<String>,
    }

    fn ctx(payload: serde_json::Value) -> JobContext {
        let job_id = JobId::new();
        JobContext {
            job_id,
            queue: "prices".into(),
            name: "ingest".into(),
            attempt: 1,
            payload,
            progress: ProgressReporter::detached(job_id),
        }
    }

    #[test]
    fn resolve_missing_handler_is_an_error() {
        let registry = JobHandlerRegistry::new();
        let err = registry.resolve("prices", "ingest").err();
        assert!(matches!(err, Some(EngineError::HandlerNotFound { .. })));
    }

    #[tokio::test]
    async fn registration_overwrites_per_pair() {
        let registry = JobHandlerRegistry::new();
        registry.register("prices", "ingest", job_handler!(|_ctx| Ok(JobResult::new("first"))));
        registry.register("prices", "ingest", job_handler!(|_ctx| Ok(JobResult::new("second"))));
        registry.register("alerts", "ingest", job_handler!(|_ctx| Ok(JobResult::new("other"))));

        let handler = registry.resolve("prices", "ingest").unwrap();
        let result = handler.handle(ctx(json!({}))).await.unwrap();
        assert_eq!(result.summary, "second");
        assert_eq!(registry.registered().len(), 2);
    }

    #[tokio::test]
    async fn typed_handler_validates_and_decodes_payload() {
        let handler = TypedHandler::new(|payload: Ingest, _ctx: JobContext| -> HandlerFuture {
            Box::pin(async move { Ok(JobResult::new(payload.symbols.join(","))) })
        });

        assert!(handler.validate(&json!({"symbols": ["BTC"]})).is_ok());
        assert!(handler.validate(&json!({"symbols": 7})).is_err());

        let result = handler.handle(ctx(json!({"symbols": ["BTC", "ETH"]}))).await;
        assert_eq!(result.unwrap().summary, "BTC,ETH");

        let bad = handler.handle(ctx(json!({}))).await.unwrap_err();
        assert!(bad.is_permanent());
    }
}
