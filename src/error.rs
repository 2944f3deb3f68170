//! Error types for the forage decision core.

use std::time::Duration;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("No generation backend available: {reason}")]
    GenerationUnavailable { reason: String },
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Remote classifier errors. Always degraded to a fallback route before
/// reaching the caller; carried for logging only.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Classifier timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Classifier returned unknown label: {label}")]
    UnknownLabel { label: String },

    #[error("Invalid classifier response: {reason}")]
    InvalidResponse { reason: String },
}

/// Retrieval source errors. Degraded to an empty result set with a
/// warning; carried for logging only.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Structured lookup failed: {reason}")]
    Lookup { reason: String },

    #[error("Semantic search failed: {reason}")]
    Search { reason: String },
}

/// Cache store errors. The cache degrades to a miss on every one of these;
/// they never surface from the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store operation failed: {reason}")]
    Store { reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
