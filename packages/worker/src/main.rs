//! Job worker process for the analytics platform.
//!
//! Environment:
//! - `JOBS_*` engine settings (see `EngineConfig::from_env`)
//! - `JOBS_DB_ENDPOINT`: SurrealDB endpoint, or `JOBS_DB_PATH` for embedded
//!   RocksDB (`rocksdb` feature); jobs stay in memory when neither is set
//! - `JOBS_DB_NAMESPACE`, `JOBS_DB_DATABASE`, `JOBS_DB_USER`, `JOBS_DB_PASS`
//! - `JOBS_SWEEP_SECS`: interval between maintenance sweeps (default 3600)
//! - `JOBS_LOG_FORMAT=json`: structured log output
//! - `RUST_LOG`: log filter (default `info`)

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use jobs_core::{JobOptions, JobStore, MemoryStore, Priority};
use jobs_engine::{EngineConfig, JobQueue, spawn_event_logger};
use jobs_store::{DbConfig, SurrealStore};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

mod handlers;
mod tasks;

use tasks::{Sweep, Task};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    let config = EngineConfig::from_env()?;
    let store = open_store().await?;
    let engine = JobQueue::start_with_store(config, store).await?;
    let _logger = spawn_event_logger(engine.events());

    handlers::register_all(&engine);
    let restored = engine.recover().await?;
    tracing::info!("Worker ready, {} unfinished jobs restored", restored);

    let maintenance = spawn_maintenance(engine.clone(), sweep_interval()?);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, draining queues");
    maintenance.abort();
    engine.shutdown().await?;
    tracing::info!("Worker stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("JOBS_LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store() -> Result<Arc<dyn JobStore>, Box<dyn Error>> {
    let env = |key: &str| std::env::var(key).ok();
    let mut config = match (env("JOBS_DB_ENDPOINT"), env("JOBS_DB_PATH")) {
        (Some(endpoint), _) => DbConfig::endpoint(endpoint),
        (None, Some(path)) => DbConfig::rocksdb(path),
        (None, None) => {
            tracing::warn!("No JOBS_DB_ENDPOINT or JOBS_DB_PATH, jobs will not survive a restart");
            return Ok(Arc::new(MemoryStore::new()));
        }
    };

    if let Some(namespace) = env("JOBS_DB_NAMESPACE") {
        config = config.with_namespace(namespace);
    }
    if let Some(database) = env("JOBS_DB_DATABASE") {
        config = config.with_database(database);
    }
    if let (Some(user), Some(pass)) = (env("JOBS_DB_USER"), env("JOBS_DB_PASS")) {
        config = config.with_credentials(user, pass);
    }

    let store = SurrealStore::connect(&config).await?;
    Ok(Arc::new(store))
}

fn sweep_interval() -> Result<Duration, Box<dyn Error>> {
    let secs = match std::env::var("JOBS_SWEEP_SECS") {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("Invalid value '{}' for JOBS_SWEEP_SECS: {}", raw, e))?,
        Err(_) => 3_600,
    };
    Ok(Duration::from_secs(secs.max(1)))
}

/// Enqueue a maintenance sweep on every interval.
fn spawn_maintenance(engine: JobQueue, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let sweep = Task::Sweep(Sweep::default());
            let options = JobOptions::new().with_priority(Priority::Low);
            match sweep.submit(&engine, options).await {
                Ok(job) => tracing::debug!("Scheduled maintenance sweep {}", job.id),
                Err(e) => tracing::warn!("Failed to schedule maintenance sweep: {}", e),
            }
        }
    })
}
