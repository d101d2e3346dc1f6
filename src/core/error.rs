use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable substring carried by every immutability rejection.
pub const IMMUTABLE_UPDATE_MESSAGE: &str = "Updates are not permitted";

/// Broad classification of a [`StoreError`], used by requirements to assert
/// on failure modes without matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Transport,
    Authorization,
    Schema,
    Validation,
    ImmutabilityViolation,
    NotFound,
    PiiGate,
}

/// Field-level detail attached to a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub property: String,
    pub message: String,
}

impl FieldError {
    pub fn new(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation failed ({code}): {message}")]
    Validation {
        code: StatusCode,
        message: String,
        details: Vec<FieldError>,
    },

    #[error("Immutability violation: {0}")]
    ImmutabilityViolation(String),

    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    #[error("Entity '{0}' exists but no properties were loaded")]
    PropertiesNotLoaded(String),

    #[error("PII gate: {0}")]
    PiiGate(String),

    #[error("Marshal error: {0}")]
    Marshal(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Validation failure with the given status and no field details.
    pub fn validation(code: StatusCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Conflict-coded validation failure, the shape used for unmet
    /// expected-existing predicates.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::validation(StatusCode::CONFLICT, message)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Cancelled | Self::Codec(_) => ErrorKind::Transport,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Schema(_) | Self::Marshal(_) => ErrorKind::Schema,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::ImmutabilityViolation(_) => ErrorKind::ImmutabilityViolation,
            Self::EntityNotFound(_) | Self::PropertiesNotLoaded(_) => ErrorKind::NotFound,
            Self::PiiGate(_) => ErrorKind::PiiGate,
        }
    }

    /// HTTP-style status for validation failures.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Validation { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn details(&self) -> &[FieldError] {
        match self {
            Self::Validation { details, .. } => details,
            _ => &[],
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for the immutability rejection, whether classified by the
    /// server or only recognizable through its stable message.
    pub fn is_immutable_update(&self) -> bool {
        match self {
            Self::ImmutabilityViolation(_) => true,
            other => other.to_string().contains(IMMUTABLE_UPDATE_MESSAGE),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Codec(format!("Failed to encode frame: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Codec(format!("Failed to decode frame: {}", err))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(format!("Upload failed: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for StoreError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transport("Deadline elapsed".to_string())
    }
}
