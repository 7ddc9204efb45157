//! Error types for the Quarry library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`QuarryError`] enum. Each variant corresponds to one error kind of the
//! engine; the transport maps kinds to HTTP-style status codes via
//! [`QuarryError::http_code`].

use std::io;

use thiserror::Error;

/// The main error type for Quarry operations.
#[derive(Error, Debug)]
pub enum QuarryError {
    /// Malformed request: schema violations, parse failures, invalid parameters.
    #[error("{0}")]
    BadRequest(String),

    /// A referenced collection, document, or field does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A name or id collides with an existing one.
    #[error("{0}")]
    Conflict(String),

    /// Authentication failure.
    #[error("{0}")]
    Unauthorized(String),

    /// Request body exceeds the configured limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Memory budget exceeded during ingestion.
    #[error("{0}")]
    ResourceExhausted(String),

    /// Store or parse failure mid-recovery, or any other engine-internal fault.
    #[error("{0}")]
    Internal(String),

    /// I/O errors from the underlying store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("Error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with [`QuarryError`].
pub type Result<T> = std::result::Result<T, QuarryError>;

impl QuarryError {
    /// Create a new bad-request error.
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        QuarryError::BadRequest(msg.into())
    }

    /// Create a new not-found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        QuarryError::NotFound(msg.into())
    }

    /// Create a new conflict error.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        QuarryError::Conflict(msg.into())
    }

    /// Create a new unauthorized error.
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        QuarryError::Unauthorized(msg.into())
    }

    /// Create a new payload-too-large error.
    pub fn payload_too_large<S: Into<String>>(msg: S) -> Self {
        QuarryError::PayloadTooLarge(msg.into())
    }

    /// Create a new resource-exhausted error.
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        QuarryError::ResourceExhausted(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        QuarryError::Internal(msg.into())
    }

    /// The HTTP-style status code a transport should attach to this error.
    pub fn http_code(&self) -> u16 {
        match self {
            QuarryError::BadRequest(_) => 400,
            QuarryError::NotFound(_) => 404,
            QuarryError::Conflict(_) => 409,
            QuarryError::Unauthorized(_) => 401,
            QuarryError::PayloadTooLarge(_) => 413,
            QuarryError::ResourceExhausted(_) => 507,
            QuarryError::Internal(_)
            | QuarryError::Io(_)
            | QuarryError::Json(_)
            | QuarryError::Anyhow(_) => 500,
        }
    }

    /// The `{message}` body a transport should serialize for this error.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "message": self.to_string() })
    }
}
