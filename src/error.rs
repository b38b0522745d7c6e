//! Error handling module
//!
//! Provides unified error types for the whole engine.

use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No usable primary key: {0}")]
    NoPrimaryKey(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Record missing: {0}")]
    RecordMissing(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations
pub type CoreResult<T> = Result<T, AppError>;

/// Helper function to create an invalid input error
pub fn invalid_input(msg: impl Into<String>) -> AppError {
    AppError::InvalidInput(msg.into())
}

/// Helper function to create a not found error
pub fn not_found(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

/// Helper function to create a conflict error
pub fn conflict(msg: impl Into<String>) -> AppError {
    AppError::Conflict(msg.into())
}
