//! Handlers for the analytics job kinds.
//!
//! Provider calls live outside the worker; these handlers validate their
//! input, walk the work items and report progress as they go.

use jobs_core::JobResult;
use jobs_engine::{HandlerError, HandlerFuture, JobContext, JobQueue, TypedHandler};
use serde_json::json;

use crate::tasks::{EvaluateAlerts, IngestPrices, ScoreRisk, ScrapeSocial, Sweep};

/// Register every job kind on the engine.
pub fn register_all(engine: &JobQueue) {
    engine.register("prices", "ingest", TypedHandler::new(ingest_prices));
    engine.register("social", "scrape", TypedHandler::new(scrape_social));
    engine.register("alerts", "evaluate", TypedHandler::new(evaluate_alerts));
    engine.register("risk", "score", TypedHandler::new(score_risk));
    engine.register("maintenance", "sweep", TypedHandler::new(sweep));
}

/// Report `done / total` as a percentage.
fn report_step(ctx: &JobContext, done: usize, total: usize) {
    if total > 0 {
        ctx.progress.report((done * 100 / total) as u32);
    }
}

fn ingest_prices(payload: IngestPrices, ctx: JobContext) -> HandlerFuture {
    Box::pin(async move {
        if payload.symbols.is_empty() {
            return Err(HandlerError::permanent("no symbols to ingest"));
        }
        let total = payload.symbols.len();
        for (i, symbol) in payload.symbols.iter().enumerate() {
            tracing::debug!(job = %ctx.job_id, source = %payload.source, "Ingesting {}", symbol);
            tokio::task::yield_now().await;
            report_step(&ctx, i + 1, total);
        }
        Ok(JobResult::with_output(
            format!("Ingested {} symbols from {}", total, payload.source),
            json!({ "source": payload.source, "symbols": total }),
        ))
    })
}

fn scrape_social(payload: ScrapeSocial, ctx: JobContext) -> HandlerFuture {
    Box::pin(async move {
        if payload.query.trim().is_empty() {
            return Err(HandlerError::permanent("empty search query"));
        }
        if payload.limit == 0 {
            return Err(HandlerError::permanent("limit must be positive"));
        }
        tracing::debug!(job = %ctx.job_id, "Scraping {:?} for '{}'", payload.platform, payload.query);
        ctx.progress.report(50);
        tokio::task::yield_now().await;
        ctx.progress.report(100);
        Ok(JobResult::with_output(
            format!("Scraped {:?} for '{}'", payload.platform, payload.query),
            json!({ "platform": payload.platform, "query": payload.query, "requested": payload.limit }),
        ))
    })
}

fn evaluate_alerts(payload: EvaluateAlerts, ctx: JobContext) -> HandlerFuture {
    Box::pin(async move {
        let scope = payload.symbol.as_deref().unwrap_or("all symbols");
        let total = payload.alert_ids.len();
        for (i, alert) in payload.alert_ids.iter().enumerate() {
            tracing::trace!(job = %ctx.job_id, "Evaluating alert {}", alert);
            report_step(&ctx, i + 1, total);
        }
        ctx.progress.report(100);
        Ok(JobResult::with_output(
            format!("Evaluated alerts for {}", scope),
            json!({ "scope": scope, "alerts": total }),
        ))
    })
}

fn score_risk(payload: ScoreRisk, ctx: JobContext) -> HandlerFuture {
    Box::pin(async move {
        if payload.asset.trim().is_empty() {
            return Err(HandlerError::permanent("asset is required"));
        }
        if payload.window_hours == 0 {
            return Err(HandlerError::permanent("window must be at least one hour"));
        }
        tracing::debug!(job = %ctx.job_id, "Scoring {} over {}h", payload.asset, payload.window_hours);
        ctx.progress.report(100);
        Ok(JobResult::with_output(
            format!("Scored {}", payload.asset),
            json!({ "asset": payload.asset, "window_hours": payload.window_hours }),
        ))
    })
}

fn sweep(payload: Sweep, ctx: JobContext) -> HandlerFuture {
    Box::pin(async move {
        tracing::info!(job = %ctx.job_id, "Sweeping data older than {} days", payload.older_than_days);
        ctx.progress.report(100);
        Ok(JobResult::new(format!(
            "Swept data older than {} days",
            payload.older_than_days
        )))
    })
}
