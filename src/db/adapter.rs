//! Storage interface consumed by the monitoring engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{CheckResult, Endpoint, StatusSnapshot, ValidationError};

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("not found")]
    NotFound,
    #[error("endpoint limit of {0} reached")]
    LimitReached(usize),
    #[error("invalid endpoint: {0}")]
    Invalid(#[from] ValidationError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Persistence operations the scheduler and aggregator rely on.
///
/// Implementations are expected to have scoped their data to the right
/// subject already; the engine performs no authorization of its own.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Enabled endpoints owned by `subject_id`, with their current snapshot.
    async fn list_enabled_endpoints(&self, subject_id: &str) -> Result<Vec<Endpoint>, StoreError>;

    /// Record a result and overwrite the endpoint's snapshot in one logical
    /// update. A result older than the stored snapshot is recorded in the
    /// history but leaves the snapshot untouched.
    async fn append_check_result(&self, result: &CheckResult) -> Result<(), StoreError>;

    /// Results for one endpoint at or after `since`, oldest first.
    async fn list_check_results(
        &self,
        endpoint_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StoreError>;

    async fn endpoint_snapshot(&self, endpoint_id: i64) -> Result<Option<StatusSnapshot>, StoreError>;
}
