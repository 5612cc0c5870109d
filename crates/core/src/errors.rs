//! Core error types for bizdesk.
//!
//! This module defines database-agnostic error types. Storage-specific errors
//! (from Diesel, SQLite, etc.) are converted to these types by the storage layer.
//!
//! The live feed errors (`SnapshotFetchError`, `SubscriptionError`,
//! `MalformedEventError`) are `Clone`: a feed keeps the last one
//! around as part of its renderable state.

use chrono::ParseError as ChronoParseError;
use thiserror::Error;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Snapshot fetch failed: {0}")]
    Snapshot(#[from] SnapshotFetchError),

    #[error("Subscription failed: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("Malformed event: {0}")]
    MalformedEvent(#[from] MalformedEventError),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Database-agnostic error type for storage operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a database connection.
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to create or configure the connection pool.
    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    /// A database query failed to execute.
    #[error("Database query failed: {0}")]
    QueryFailed(String),

    /// The requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A unique constraint was violated (e.g., duplicate key).
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// A database transaction failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Database migration failed.
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// The single-writer actor is gone.
    #[error("Database writer unavailable: {0}")]
    WriterUnavailable(String),

    /// Internal/unexpected database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Validation errors for user input and data parsing.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Required field '{0}' is missing")]
    MissingField(String),

    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("Failed to parse date/time: {0}")]
    DateTimeParse(#[from] ChronoParseError),
}

/// The one-time bulk read that seeds a live feed failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("snapshot of '{table}' failed: {reason}")]
pub struct SnapshotFetchError {
    pub table: String,
    pub reason: String,
}

impl SnapshotFetchError {
    pub fn new(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            reason: reason.into(),
        }
    }
}

/// The event channel could not be established or was dropped by the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("channel '{channel}' rejected the subscription: {reason}")]
    Rejected { channel: String, reason: String },

    #[error("channel '{channel}' is closed")]
    Closed { channel: String },

    #[error("live updates unavailable: {0}")]
    Unavailable(String),
}

/// An inbound payload that failed ingestion. Never merged, never raised.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MalformedEventError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no usable '{field}' identity")]
    MissingId { field: String },

    #[error("required field '{field}' is missing or null")]
    MissingField { field: String },

    #[error("field '{field}' is not a number: {value}")]
    NotANumber { field: String, value: String },

    #[error("field '{field}' value {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("field '{field}' is not a valid timestamp: {value}")]
    InvalidTimestamp { field: String, value: String },

    #[error("field '{field}' has an invalid value: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(ValidationError::InvalidInput(err.to_string()))
    }
}

impl From<ChronoParseError> for Error {
    fn from(err: ChronoParseError) -> Self {
        Error::Validation(ValidationError::DateTimeParse(err))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Unexpected(err.to_string())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_event_messages_name_the_field() {
        let err = MalformedEventError::NotANumber {
            field: "latitude".to_string(),
            value: "\"abc\"".to_string(),
        };
        assert!(err.to_string().contains("latitude"));

        let core: Error = err.into();
        assert!(matches!(core, Error::MalformedEvent(_)));
    }

    #[test]
    fn test_snapshot_error_display() {
        let err = SnapshotFetchError::new("sales", "connection reset");
        assert_eq!(
            err.to_string(),
            "snapshot of 'sales' failed: connection reset"
        );
    }
}
