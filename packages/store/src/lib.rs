//! SurrealDB persistence for the job engine.
//!
//! Provides [`SurrealStore`], an implementation of [`jobs_core::JobStore`].
//!
//! # Features
//!
//! - `memory` (default): in-memory storage, for tests and single-process runs
//! - `rocksdb`: RocksDB for persistent file-based storage

mod connection;
mod schema;
mod store;

pub use connection::{Database, DbConfig, DbError, connect_db};
pub use schema::init_schema;
pub use store::SurrealStore;
