use core_types::{CoreError, Phase};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Failed to load environment variables for database connection: {0}")]
    ConnectionConfigError(String),

    #[error("Database query failed: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("An error occurred during JSON serialization/deserialization: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("The requested data was not found in the database.")]
    NotFound,

    #[error("A stored row could not be decoded: {0}")]
    Corrupt(#[from] CoreError),

    #[error("Strategy {0} is no longer claimed by this worker")]
    LeaseLost(Uuid),

    #[error("Illegal transition for strategy {id}: {from} -> {to}")]
    IllegalTransition { id: Uuid, from: String, to: String },

    #[error("{phase} metrics for strategy {id} are already written")]
    MetricsAlreadyWritten { id: Uuid, phase: Phase },

    #[error("Pool aggregate moved on (expected version {expected})")]
    VersionConflict { expected: i64 },
}

impl DbError {
    /// Conflicts are expected under concurrency: the caller re-reads and retries
    /// instead of treating them as an outage.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DbError::LeaseLost(_) | DbError::VersionConflict { .. })
    }
}
