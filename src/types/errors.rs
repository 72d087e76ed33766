//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation. Per-message
//! failures (`Schema`, `PayloadUnavailable`, `Compute`, `Publish`) are contained
//! at the unit-of-work boundary by the engine; `Config` is fatal at startup.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the pipeline engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed envelope on decode (missing field, unknown enum value).
    #[error("schema error: {0}")]
    Schema(String),

    /// Off-band payload could not be fetched from the blob store.
    #[error("payload unavailable: {0}")]
    PayloadUnavailable(String),

    /// User compute failed or panicked.
    #[error("compute error: {0}")]
    Compute(String),

    /// An output envelope or lineage record could not be delivered.
    #[error("publish error: {0}")]
    Publish(String),

    /// Missing or invalid configuration (fatal at startup).
    #[error("config error: {0}")]
    Config(String),

    /// Internal errors (broken invariants, illegal state transitions).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification, used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    SchemaError,
    PayloadUnavailableError,
    ComputeError,
    PublishError,
    ConfigError,
    InternalError,
}

impl Error {
    /// Classify the error for logging and reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Schema(_) => ErrorKind::SchemaError,
            Error::PayloadUnavailable(_) => ErrorKind::PayloadUnavailableError,
            Error::Compute(_) => ErrorKind::ComputeError,
            Error::Publish(_) => ErrorKind::PublishError,
            Error::Config(_) => ErrorKind::ConfigError,
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => {
                ErrorKind::InternalError
            }
        }
    }

    /// Whether the error must abort the process rather than a single unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::SchemaError => "SchemaError",
            ErrorKind::PayloadUnavailableError => "PayloadUnavailableError",
            ErrorKind::ComputeError => "ComputeError",
            ErrorKind::PublishError => "PublishError",
            ErrorKind::ConfigError => "ConfigError",
            ErrorKind::InternalError => "InternalError",
        };
        f.write_str(s)
    }
}

// Convenience constructors
impl Error {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn payload_unavailable(msg: impl Into<String>) -> Self {
        Self::PayloadUnavailable(msg.into())
    }

    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
