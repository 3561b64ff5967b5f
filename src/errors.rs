//! Error types for the check-and-alert pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, JanuscopeError>;

#[derive(Debug, Error)]
pub enum JanuscopeError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or a request failed outside a probe
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// TLS connection or handshake error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Certificate could not be read or parsed
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Storage collaborator failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Worker pool could not accept or complete work
    #[error("Worker pool error: {0}")]
    Pool(String),

    /// Component used in the wrong lifecycle state
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Alert channel setup error
    #[error("Channel error: {0}")]
    Channel(String),

    /// Generic error with message
    #[error("Error: {0}")]
    Other(String),
}
