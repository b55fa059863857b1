//! Error types for the adapter
//!
//! Every adapter method reports failures through [`Error`]. Errors raised by the
//! wrapped Datastore client are carried unchanged inside [`Error::Backend`].

use std::fmt;

use thiserror::Error;

/// Result type alias using the adapter's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the adapter
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or duplicate datastore identity, unknown datastore or model
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    /// Missing or malformed datastore configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Missing required, unique or primary-key value
    #[error("Validation error: {0}")]
    Validation(String),

    /// Criteria feature the adapter does not translate (skip, operators)
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Failure reported by the wrapped Datastore client
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Input could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Short label used in logs and metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConsistencyViolation(_) => "consistency_violation",
            Error::Configuration(_) => "configuration",
            Error::Validation(_) => "validation",
            Error::NotImplemented(_) => "not_implemented",
            Error::Backend(_) => "backend",
            Error::Serialization(_) => "serialization",
        }
    }

    /// Whether the error was produced before any store call was made
    #[must_use]
    pub fn is_local(&self) -> bool {
        !matches!(self, Error::Backend(_))
    }
}

/// Error reported by the Datastore client, passed through without translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    /// HTTP status, when the failure came from an HTTP response
    pub status: Option<u16>,
    /// Canonical API status such as `ABORTED` or `PERMISSION_DENIED`
    pub code: Option<String>,
    /// Message as reported by the client
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "{} ({}): {}", status, code, self.message),
            (Some(status), None) => write!(f, "{}: {}", status, self.message),
            (None, Some(code)) => write!(f, "{}: {}", code, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let mut backend = BackendError::new(e.to_string());
        if let Some(status) = e.status() {
            backend = backend.with_status(status.as_u16());
        }
        Error::Backend(backend)
    }
}
