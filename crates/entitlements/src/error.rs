//! Entitlement error types

use thiserror::Error;

/// Counter storage failures. All variants are retryable by the caller;
/// the evaluator turns them into a fail-closed denial.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Counter store timed out after {0} ms")]
    Timeout(u64),

    #[error("Counter store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: String, reason: String },
}

/// Entitlement engine errors
#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for EntitlementError {
    fn from(err: sqlx::Error) -> Self {
        EntitlementError::Store(StoreError::from(err))
    }
}

impl From<sqlx::migrate::MigrateError> for EntitlementError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        EntitlementError::Migration(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type EntitlementResult<T> = Result<T, EntitlementError>;
