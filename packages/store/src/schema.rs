//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Create the job table and its indexes if they are missing.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");
    db.query(JOB_SCHEMA).await?.check()?;
    tracing::info!("Database schema initialized");
    Ok(())
}

/// One row per job. The full job is kept as JSON in `body`; the other
/// fields exist for filtering and ordering.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS queue ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string;
DEFINE FIELD IF NOT EXISTS sequence ON job TYPE int;
DEFINE FIELD IF NOT EXISTS body ON job TYPE string;
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE datetime VALUE time::now();

DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_queue_sequence ON job FIELDS queue, sequence;
"#;
