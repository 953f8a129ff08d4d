//! Error types for quota-governor
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

use crate::governor::Provider;

/// Configuration and input errors.
#[derive(Debug, Error)]
pub enum GovernorError {
    /// Provider identifier not present in the default table
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Configuration value rejected
    #[error("Config error: {0}")]
    Config(String),

    /// Internal invariant broken (e.g. a poisoned lock)
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for quota-governor operations
pub type Result<T> = std::result::Result<T, GovernorError>;

/// Failure returned by
/// [`RateLimiter::execute_with_retry`](crate::governor::RateLimiter::execute_with_retry).
///
/// `E` is the error type of the wrapped call. Transient failures that were
/// retried successfully never surface here.
#[derive(Debug, Error)]
pub enum ExecuteError<E> {
    /// Provider reported insufficient quota or balance. Never retried.
    #[error("Insufficient quota/balance for {provider}: {error}")]
    QuotaExhausted { provider: Provider, error: E },

    /// Retryable failures kept coming until the retry budget ran out.
    #[error("Max retries exceeded for {provider} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        provider: Provider,
        attempts: u32,
        last_error: E,
    },

    /// Non-retryable failure from the wrapped call, passed through unchanged.
    #[error("{0}")]
    Call(E),
}

impl<E> ExecuteError<E> {
    /// HTTP status an upstream API layer should answer with.
    ///
    /// Quota exhaustion maps to service unavailable, retry exhaustion to
    /// too-many-requests. Pass-through call errors carry no opinion.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ExecuteError::QuotaExhausted { .. } => Some(503),
            ExecuteError::RetriesExhausted { .. } => Some(429),
            ExecuteError::Call(_) => None,
        }
    }

    /// Provider that produced a governor-level failure.
    pub fn provider(&self) -> Option<Provider> {
        match self {
            ExecuteError::QuotaExhausted { provider, .. }
            | ExecuteError::RetriesExhausted { provider, .. } => Some(*provider),
            ExecuteError::Call(_) => None,
        }
    }

    /// Unwrap the error returned by the wrapped call.
    pub fn into_inner(self) -> E {
        match self {
            ExecuteError::QuotaExhausted { error, .. } => error,
            ExecuteError::RetriesExhausted { last_error, .. } => last_error,
            ExecuteError::Call(e) => e,
        }
    }
}
