//! Errors raised while loading or compiling a DTO configuration.

use crate::common::Operation;
use std::path::PathBuf;
use thiserror::Error;

/// A DTO configuration that cannot be turned into validators.
///
/// All variants are startup-time problems; none is raised while
/// validating a payload.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The configuration file could not be read.
    #[error("failed to read DTO configuration {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("failed to parse DTO configuration: {0}")]
    Parse(String),

    /// A field rule carries a pattern that is not a valid regex.
    #[error("invalid pattern for {entity}.{field}: {source}")]
    InvalidPattern {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// Regex compilation error.
        source: regex::Error,
    },

    /// A field rule is internally inconsistent.
    #[error("invalid rule for {entity}.{field}: {message}")]
    InvalidRule {
        /// Entity name.
        entity: String,
        /// Field name.
        field: String,
        /// What is wrong with the rule.
        message: String,
    },

    /// A field is listed as both required and optional.
    #[error("{entity} {operation}: field '{field}' is both required and optional")]
    DuplicateField {
        /// Entity name.
        entity: String,
        /// Operation.
        operation: Operation,
        /// Field name.
        field: String,
    },

    /// No schema exists for an entity/operation pair the caller needs.
    #[error("no DTO configuration for {entity} {operation}")]
    MissingSchema {
        /// Entity name.
        entity: String,
        /// Operation.
        operation: Operation,
    },
}
