//! Error taxonomy for sync runs.

use crate::model::EntityType;
use eventsync_validate::{Operation, ValidationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a target system call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetError {
    /// The idempotency field already exists in the target.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    /// Connection, timeout or other transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl TargetError {
    /// Transport errors, 5xx and rate limiting are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Classifies a non-success HTTP response.
    ///
    /// A 409, or a 400/422 whose body says `sourceSystemId` already
    /// exists, is a conflict.
    pub fn from_response(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = truncate(body.trim(), 300);
        match status {
            409 => Self::Conflict(message),
            400 | 422 if names_duplicate_source_id(body) => Self::Conflict(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimited { retry_after },
            _ => Self::Status { status, message },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Server-provided minimum wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn names_duplicate_source_id(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    (lower.contains("sourcesystemid") || lower.contains("source_system_id"))
        && ["already exist", "duplicate", "unique", "taken"]
            .iter()
            .any(|needle| lower.contains(needle))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Failure reported by the source system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Only raised for an unknown root event.
    #[error("source event not found: {0}")]
    NotFound(String),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Failure reported by the blob store while transferring a file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    #[error("upload rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("transfer failed: {0}")]
    Io(String),
}

/// A source record that cannot be turned into a target payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// The task lacks a parent id the entity must carry.
    #[error("{entity} '{source_id}': no parent id for field(s): {}", fields.join(", "))]
    Unresolved {
        entity: EntityType,
        source_id: String,
        fields: Vec<String>,
    },

    /// The payload was built but breaks the compiled schema.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("no DTO configuration for {entity} {operation}")]
    MissingSchema {
        entity: EntityType,
        operation: Operation,
    },
}

/// Any failure a sync task or run can end with.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The target signalled a duplicate that no lookup could find.
    #[error("{entity} '{source_id}' conflicts with an existing entity that could not be located")]
    ConflictUnresolved {
        entity: EntityType,
        source_id: String,
    },

    #[error("giving up after {attempts} attempts: {last}")]
    Transient { attempts: u32, last: TargetError },

    #[error("target rejected request: {0}")]
    Target(TargetError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("file transfer failed: {0}")]
    FileIo(String),

    /// Missing target event, location or DTO configuration. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run cancelled")]
    Cancelled,
}

impl SyncError {
    /// Report classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transform(TransformError::Invalid(_)) => ErrorKind::Validation,
            Self::Transform(TransformError::Unresolved { .. }) => ErrorKind::Transformation,
            Self::Transform(TransformError::MissingSchema { .. }) => ErrorKind::Configuration,
            Self::ConflictUnresolved { .. } => ErrorKind::ConflictUnresolved,
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Target(_) => ErrorKind::Target,
            Self::Source(_) => ErrorKind::Source,
            Self::FileIo(_) => ErrorKind::FileIo,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<BlobError> for SyncError {
    fn from(err: BlobError) -> Self {
        Self::FileIo(err.to_string())
    }
}

/// Classification attached to every report error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transformation,
    ConflictUnresolved,
    Transient,
    Target,
    Source,
    FileIo,
    Configuration,
    Cancelled,
    Panic,
}
