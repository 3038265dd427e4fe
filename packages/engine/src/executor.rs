//! Runs one claimed attempt as its own task and reports the outcome.

use std::sync::Arc;

use jobs_core::Job;
use ractor::ActorRef;

use crate::error::HandlerError;
use crate::handler::{HandlerResult, JobContext, JobHandlerRegistry, ProgressReporter};
use crate::messages::QueueMessage;

/// Spawn the attempt of a freshly claimed job.
pub(crate) fn spawn_attempt(
    queue: ActorRef<QueueMessage>,
    handlers: Arc<JobHandlerRegistry>,
    job: &Job,
) {
    let job_id = job.id;
    let attempt = job.attempts;
    let ctx = JobContext {
        job_id,
        queue: job.queue.clone(),
        name: job.name.clone(),
        attempt,
        payload: job.payload.clone(),
        progress: ProgressReporter::new(queue.clone(), job_id, attempt),
    };

    tokio::spawn(async move {
        let outcome = run_attempt(&handlers, ctx).await;
        if let Err(e) = queue.send_message(QueueMessage::AttemptFinished {
            job_id,
            attempt,
            outcome,
        }) {
            tracing::warn!("Queue gone before job {} reported back: {}", job_id, e);
        }
    });
}

async fn run_attempt(handlers: &JobHandlerRegistry, ctx: JobContext) -> HandlerResult {
    let handler = match handlers.resolve(&ctx.queue, &ctx.name) {
        Ok(handler) => handler,
        // The handler may still be registered before the next attempt.
        Err(e) => return Err(HandlerError::retryable(e.to_string())),
    };

    // Run inside its own task so a panicking handler only fails the attempt.
    match tokio::spawn(handler.handle(ctx)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(HandlerError::retryable("handler panicked")),
        Err(e) => Err(HandlerError::retryable(format!("handler task aborted: {}", e))),
    }
}
