//! Error types for the Tollgate middleware.

use thiserror::Error;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors, fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors, recoverable per-request
    #[error("Store error: {0}")]
    Store(String),

    /// Errors surfaced by the Redis backend
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No configured limiter applies to the request
    #[error("no rate limiter applies to this request")]
    NoLimiter,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
