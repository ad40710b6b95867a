//! Record store for instance records.
//!
//! This module provides:
//! - The `InstanceStore` contract used by the orchestrator and sweeper
//! - An in-memory store for tests and the `test` environment
//! - A Postgres store backed by SQLx
//!
//! The store offers no locking; writes are last-write-wins per key and
//! serialisation of operations on one instance is the orchestrator's job.

mod memory;
mod postgres;

pub use memory::MemoryInstanceStore;
pub use postgres::{Database, DbConfig, PgInstanceStore};

use async_trait::async_trait;
use thiserror::Error;

use crate::record::InstanceRecord;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with this identifier already exists.
    #[error("instance {0} already exists")]
    Conflict(String),

    /// No record with this identifier.
    #[error("instance {0} not found")]
    NotFound(String),

    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A record field does not fit its column.
    #[error("instance {instance_id}: {field} {value} is out of range")]
    OutOfRange {
        instance_id: String,
        field: &'static str,
        value: u64,
    },

    /// A stored row could not be decoded into a record.
    #[error("corrupt record {instance_id}: {reason}")]
    Corrupt { instance_id: String, reason: String },
}

/// Mapping from instance identifier to record.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    /// Insert a new record. Fails with `Conflict` if the identifier exists.
    async fn create(&self, record: &InstanceRecord) -> Result<(), StoreError>;

    /// Fetch a record. Fails with `NotFound` if it does not exist.
    async fn get(&self, instance_id: &str) -> Result<InstanceRecord, StoreError>;

    /// Overwrite an existing record in place.
    async fn update(&self, record: &InstanceRecord) -> Result<(), StoreError>;

    /// Remove a record. Fails with `NotFound` if it does not exist.
    async fn delete(&self, instance_id: &str) -> Result<(), StoreError>;

    /// All records, ordered by identifier.
    async fn list(&self) -> Result<Vec<InstanceRecord>, StoreError>;
}
