//! Common types for payload validation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation a payload is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Payload sent when creating an entity.
    Create,
    /// Payload sent when updating an existing entity.
    Update,
}

impl Operation {
    /// Returns the configuration key for this operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single violated field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Target field name.
    pub field: String,
    /// Human-readable message.
    pub message: String,
}

impl Violation {
    /// Creates a violation for a field.
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found in one payload.
///
/// Validation never stops at the first problem, so a single error carries
/// the complete list for the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{entity} {operation} payload failed validation: {}", join_violations(.violations))]
pub struct ValidationError {
    /// Entity name the payload was built for.
    pub entity: String,
    /// Operation the payload was validated against.
    pub operation: Operation,
    /// Violated fields, in field-check order.
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// Returns the distinct field names with at least one violation.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for v in &self.violations {
            if !fields.contains(&v.field.as_str()) {
                fields.push(v.field.as_str());
            }
        }
        fields
    }

    /// Returns true when the given field has a violation.
    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_violation() {
        let err = ValidationError {
            entity: "session".into(),
            operation: Operation::Create,
            violations: vec![
                Violation::new("name", "required field is missing"),
                Violation::new("startsAt", "expected an RFC 3339 date-time"),
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("session create payload failed validation"));
        assert!(msg.contains("name: required field is missing"));
        assert!(msg.contains("startsAt: expected an RFC 3339 date-time"));
    }

    #[test]
    fn fields_are_deduplicated_in_order() {
        let err = ValidationError {
            entity: "room".into(),
            operation: Operation::Update,
            violations: vec![
                Violation::new("name", "too short"),
                Violation::new("capacity", "below minimum"),
                Violation::new("name", "does not match pattern"),
            ],
        };

        assert_eq!(err.fields(), vec!["name", "capacity"]);
        assert!(err.has_field("capacity"));
        assert!(!err.has_field("description"));
    }

    #[test]
    fn operation_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Operation::Update).unwrap(),
            "\"update\""
        );
        assert_eq!(Operation::Create.to_string(), "create");
    }
}
