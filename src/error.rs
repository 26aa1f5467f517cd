//! Crate-wide error types.
//!
//! One enum per concern, all `thiserror`. `GuardError` is the only type
//! that crosses the HTTP boundary; the gateway maps it onto a status code
//! and a stable `{"detail": ...}` body.

use thiserror::Error;

/// Errors surfaced by the check pipelines and the admin surface.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The bearer token is missing, malformed, or does not match a project.
    #[error("invalid API key")]
    InvalidKey,

    /// A backing store could not be reached. Distinguishable from
    /// `InvalidKey` so callers can retry instead of rotating credentials.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The request body is malformed or missing a required field.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The referenced project or tool does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for GuardError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => GuardError::Unavailable(msg),
            StoreError::Query(msg) | StoreError::Corrupt(msg) => GuardError::Internal(msg),
        }
    }
}

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (pool exhausted, connection refused).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A statement failed to execute.
    #[error("query failed: {0}")]
    Query(String),

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Error from a single detector run.
///
/// Detector errors never become verdicts: the engine records them as a
/// non-triggered result with a `"detector error: "` detail prefix.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// A remote worker (the ML classifier) could not be reached.
    #[error("classifier request failed: {0}")]
    Rpc(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

/// Configuration errors raised by [`Config::from_env`](crate::config::Config::from_env).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is unset.
    #[error("missing required setting '{key}': {hint}")]
    MissingRequired { key: String, hint: String },

    /// An environment variable is set but unparseable.
    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}
