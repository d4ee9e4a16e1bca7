//! Error types for the Comando Central services.

use thiserror::Error;

/// Result type alias using the platform's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for edge routing and dispatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Inbox event not found
    #[error("Event not found: {0}")]
    EventNotFound(uuid::Uuid),

    /// Notification not found
    #[error("Notification not found: {0}")]
    NotificationNotFound(uuid::Uuid),

    /// Tenant could not be resolved for a hostname
    #[error("Tenant not resolved for host: {0}")]
    TenantNotResolved(String),

    /// Notification delivery failed
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Dispatch stage failed
    #[error("Stage error: {0}")]
    Stage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Forbidden (authenticated but not authorized)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
