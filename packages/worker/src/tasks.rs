//! Typed payloads for the analytics job kinds.

use jobs_core::{Job, JobOptions, ValidationError};
use jobs_engine::{EngineResult, JobQueue};
use serde::{Deserialize, Serialize};

/// Pull latest prices for a set of symbols.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestPrices {
    pub symbols: Vec<String>,
    #[serde(default = "default_price_source")]
    pub source: String,
}

fn default_price_source() -> String {
    "coingecko".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Reddit,
    Telegram,
}

/// Collect recent posts matching a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSocial {
    pub platform: Platform,
    pub query: String,
    #[serde(default = "default_scrape_limit")]
    pub limit: u32,
}

fn default_scrape_limit() -> u32 {
    100
}

/// Evaluate user alerts, optionally only those on one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluateAlerts {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub alert_ids: Vec<String>,
}

/// Recompute the risk score of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRisk {
    pub asset: String,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
}

fn default_window_hours() -> u32 {
    24
}

/// Housekeeping over stale analytics data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    #[serde(default = "default_retention_days")]
    pub older_than_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            older_than_days: default_retention_days(),
        }
    }
}

/// Every job kind the worker knows, tagged by `queue.name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Task {
    #[serde(rename = "prices.ingest")]
    IngestPrices(IngestPrices),
    #[serde(rename = "social.scrape")]
    ScrapeSocial(ScrapeSocial),
    #[serde(rename = "alerts.evaluate")]
    EvaluateAlerts(EvaluateAlerts),
    #[serde(rename = "risk.score")]
    ScoreRisk(ScoreRisk),
    #[serde(rename = "maintenance.sweep")]
    Sweep(Sweep),
}

impl Task {
    /// `(queue, job name)` the task is routed to.
    pub fn route(&self) -> (&'static str, &'static str) {
        match self {
            Task::IngestPrices(_) => ("prices", "ingest"),
            Task::ScrapeSocial(_) => ("social", "scrape"),
            Task::EvaluateAlerts(_) => ("alerts", "evaluate"),
            Task::ScoreRisk(_) => ("risk", "score"),
            Task::Sweep(_) => ("maintenance", "sweep"),
        }
    }

    /// The payload without the `kind` tag, as the handler receives it.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Task::IngestPrices(p) => serde_json::to_value(p),
            Task::ScrapeSocial(p) => serde_json::to_value(p),
            Task::EvaluateAlerts(p) => serde_json::to_value(p),
            Task::ScoreRisk(p) => serde_json::to_value(p),
            Task::Sweep(p) => serde_json::to_value(p),
        }
    }

    /// Add the task to its queue.
    pub async fn submit(&self, engine: &JobQueue, options: JobOptions) -> EngineResult<Job> {
        let (queue, name) = self.route();
        let payload = self
            .payload()
            .map_err(|e| ValidationError::InvalidPayload {
                job: name.to_string(),
                reason: e.to_string(),
            })?;
        engine.add_job(queue, name, payload, options).await
    }
}
