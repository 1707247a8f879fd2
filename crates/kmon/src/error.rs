//! Error types for kmon.

use thiserror::Error;

/// Result type alias for kmon operations.
pub type Result<T> = std::result::Result<T, KmonError>;

/// Main error type for kmon.
#[derive(Error, Debug)]
pub enum KmonError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka client errors
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Shutdown observed while an operation was in flight
    #[error("shutdown requested")]
    Shutdown,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
