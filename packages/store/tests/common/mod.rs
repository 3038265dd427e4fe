use jobs_store::{DbConfig, DbError, SurrealStore};

/// Fresh in-memory store; every `mem://` connection is its own datastore.
pub async fn memory_store() -> Result<SurrealStore, DbError> {
    SurrealStore::connect(&DbConfig::memory().with_namespace("jobs_test")).await
}
