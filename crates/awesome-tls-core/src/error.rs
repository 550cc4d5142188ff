//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configured spoof-proxy address is not a usable network address.
    #[error("invalid spoof proxy address '{addr}': {reason}")]
    InvalidRedirectTarget { addr: String, reason: String },

    /// The intercepted request is missing the pieces needed to rewrite it.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The encoded config cannot be carried as an HTTP header value.
    #[error("config is not valid HTTP header text: {0}")]
    HeaderValue(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
