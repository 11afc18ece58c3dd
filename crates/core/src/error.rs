//! Error types for the ragchat domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own error enum; [`ErrorKind`] gives every failure a stable name
//! that retry policies and metrics key on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Error classification ---

/// Stable classification of a failure.
///
/// The string form (see [`ErrorKind::as_str`]) is what shows up in metrics
/// and health reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The remote endpoint could not be reached.
    Connection,
    /// The remote endpoint did not answer in time.
    Timeout,
    /// The remote endpoint asked us to slow down.
    RateLimited,
    /// The remote endpoint failed on its side (5xx).
    Upstream,
    /// The remote endpoint rejected the request (4xx other than auth).
    Api,
    /// Credentials were rejected.
    Authentication,
    /// A fragment stream broke after it started.
    Stream,
    /// The passage index could not answer the query.
    Retrieval,
    /// The passage index could not be read or written.
    Storage,
    /// The user's query was rejected by the input validator.
    Validation,
    /// No admission permit became available in time.
    AdmissionTimeout,
    /// All retry attempts were consumed.
    RetryExhausted,
    /// A configuration value was missing or invalid.
    Config,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// The name recorded in metrics and shown in health reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "ConnectionError",
            Self::Timeout => "TimeoutError",
            Self::RateLimited => "RateLimitError",
            Self::Upstream => "UpstreamError",
            Self::Api => "ApiError",
            Self::Authentication => "AuthenticationError",
            Self::Stream => "StreamError",
            Self::Retrieval => "RetrievalError",
            Self::Storage => "StorageError",
            Self::Validation => "ValidationError",
            Self::AdmissionTimeout => "AdmissionTimeout",
            Self::RetryExhausted => "RetryExhausted",
            Self::Config => "ConfigError",
            Self::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error value onto its [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl Classify for ProviderError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ApiError { status_code, .. } if *status_code >= 500 => ErrorKind::Upstream,
            Self::ApiError { .. } | Self::ModelNotFound(_) => ErrorKind::Api,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::AuthenticationFailed(_) => ErrorKind::Authentication,
            Self::StreamInterrupted(_) => ErrorKind::Stream,
            Self::NotConfigured(_) => ErrorKind::Config,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Connection,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum RetrievalError {
    #[error("Index not found at {0}")]
    IndexMissing(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Search timed out: {0}")]
    Timeout(String),
}

impl Classify for RetrievalError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::IndexMissing(_) | Self::Storage(_) => ErrorKind::Storage,
            Self::SearchFailed(_) | Self::EmbeddingFailed(_) => ErrorKind::Retrieval,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Why a raw query was refused. Always user-recoverable, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Query cannot be empty")]
    EmptyInput,

    #[error("Query too short. Minimum {min} characters required.")]
    TooShort { min: usize },

    #[error("Query too long. Maximum {max} characters allowed.")]
    TooLong { max: usize },

    #[error("Query contains potentially unsafe content")]
    UnsafeContent,
}

impl Classify for ValidationError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}
