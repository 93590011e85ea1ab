//! DTO configuration as loaded from disk.
//!
//! The configuration describes, per target entity, which fields each
//! operation accepts and the rule every field must satisfy:
//!
//! ```json
//! {
//!   "entities": {
//!     "room": {
//!       "create": { "required": ["name"], "optional": ["description"] },
//!       "update": { "optional": ["name", "description"] },
//!       "rules": { "name": { "type": "string", "minLength": 1 } }
//!     }
//!   }
//! }
//! ```
//!
//! This is data only. [`crate::SchemaRegistry::compile`] turns it into
//! validators once at startup.

use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Declared type of a target field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Whole number.
    Integer,
    /// Any JSON number.
    Number,
    /// `true` or `false`.
    Boolean,
    /// RFC 3339 date-time string.
    #[serde(alias = "date-time", alias = "date_time")]
    Datetime,
    /// No type constraint.
    #[default]
    Any,
}

impl FieldType {
    /// Returns the configuration name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Any => "any",
        }
    }
}

/// Rule applied to one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FieldRule {
    /// Expected value type.
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    /// Minimum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    /// Maximum string length in characters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// Inclusive numeric lower bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Inclusive numeric upper bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// Regular expression string values must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Closed set of accepted string values.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    /// Whether an explicit `null` is accepted.
    #[serde(default)]
    pub nullable: bool,
}

/// Fields accepted by one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperationFields {
    /// Fields that must be present.
    #[serde(default)]
    pub required: Vec<String>,
    /// Fields that may be present.
    #[serde(default)]
    pub optional: Vec<String>,
}

/// Configuration for one target entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityDto {
    /// Create operation fields. Every entity can be created.
    pub create: OperationFields,
    /// Update operation fields; absent for create-only entities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<OperationFields>,
    /// Per-field rules shared by both operations.
    #[serde(default)]
    pub rules: BTreeMap<String, FieldRule>,
}

/// Complete DTO configuration keyed by entity name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DtoConfig {
    /// Entity configurations.
    pub entities: BTreeMap<String, EntityDto>,
}

impl DtoConfig {
    /// Parses a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(raw).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(raw: &str) -> Result<Self, SchemaError> {
        serde_yaml::from_str(raw).map_err(|e| SchemaError::Parse(e.to_string()))
    }

    /// Loads a configuration file, choosing the format from the extension.
    ///
    /// `.yaml` and `.yml` are read as YAML; anything else as JSON.
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml_str(&raw)
        } else {
            Self::from_json_str(&raw)
        }
    }
}
