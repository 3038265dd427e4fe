//! [`JobStore`] backed by SurrealDB.

use jobs_core::{Job, JobId, JobStore, StoreError, StoreFuture};
use serde::{Deserialize, Serialize};

use crate::{Database, DbConfig, DbError, connect_db, init_schema};

/// Row written for each job.
#[derive(Debug, Serialize)]
struct JobRow {
    queue: String,
    status: String,
    sequence: i64,
    body: String,
}

impl JobRow {
    fn from_job(job: &Job) -> Result<Self, DbError> {
        Ok(Self {
            queue: job.queue.clone(),
            status: job.status.as_str().to_string(),
            sequence: job.sequence as i64,
            body: serde_json::to_string(job)?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BodyRow {
    body: String,
}

/// Durable job store on a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealStore {
    db: Database,
}

impl SurrealStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect_db(config).await?;
        Self::from_db(db).await
    }

    /// Use an existing connection with the namespace and database selected.
    pub async fn from_db(db: Database) -> Result<Self, DbError> {
        init_schema(&db).await?;
        Ok(Self { db })
    }

    /// Look up a single stored job.
    pub async fn get(&self, id: JobId) -> Result<Option<Job>, DbError> {
        let mut response = self
            .db
            .query("SELECT body FROM type::thing('job', $id)")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<BodyRow> = response.take(0)?;
        rows.into_iter()
            .next()
            .map(|row| serde_json::from_str(&row.body))
            .transpose()
            .map_err(DbError::from)
    }

    /// Number of stored jobs.
    pub async fn count(&self) -> Result<usize, DbError> {
        let mut response = self
            .db
            .query("SELECT count() AS total FROM job GROUP ALL")
            .await?;
        let total: Option<i64> = response.take((0, "total"))?;
        Ok(total.unwrap_or(0).max(0) as usize)
    }

    async fn upsert(&self, job: Job) -> Result<(), DbError> {
        let row = JobRow::from_job(&job)?;
        self.db
            .query("UPSERT type::thing('job', $id) CONTENT $row RETURN NONE")
            .bind(("id", job.id.to_string()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<(), DbError> {
        self.db
            .query("DELETE type::thing('job', $id) RETURN NONE")
            .bind(("id", id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn unfinished(&self) -> Result<Vec<Job>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT body, queue, sequence FROM job
                WHERE status IN ["waiting", "active"]
                ORDER BY queue ASC, sequence ASC
                "#,
            )
            .await?;
        let rows: Vec<BodyRow> = response.take(0)?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(serde_json::from_str(&row.body)?);
        }
        Ok(jobs)
    }
}

impl JobStore for SurrealStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.db
                .health()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        })
    }

    fn save(&self, job: &Job) -> StoreFuture<'_, ()> {
        let job = job.clone();
        Box::pin(async move { self.upsert(job).await.map_err(StoreError::from) })
    }

    fn remove(&self, id: JobId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.delete(id).await.map_err(StoreError::from) })
    }

    fn load_unfinished(&self) -> StoreFuture<'_, Vec<Job>> {
        Box::pin(async move { self.unfinished().await.map_err(StoreError::from) })
    }
}
