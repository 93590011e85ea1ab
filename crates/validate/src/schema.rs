//! Compiled validators.
//!
//! A [`SchemaRegistry`] is built once from a [`DtoConfig`]. Patterns are
//! compiled, field sets are resolved, and rule consistency is checked at
//! that point, so validating a payload is a plain table walk.

use crate::common::{Operation, ValidationError, Violation};
use crate::config::{DtoConfig, EntityDto, FieldRule, FieldType, OperationFields};
use crate::error::SchemaError;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone)]
struct CompiledRule {
    field_type: FieldType,
    min_length: Option<usize>,
    max_length: Option<usize>,
    minimum: Option<f64>,
    maximum: Option<f64>,
    pattern: Option<Regex>,
    allowed: Option<BTreeSet<String>>,
    nullable: bool,
}

impl CompiledRule {
    fn compile(entity: &str, field: &str, rule: &FieldRule) -> Result<Self, SchemaError> {
        let invalid = |message: &str| SchemaError::InvalidRule {
            entity: entity.to_string(),
            field: field.to_string(),
            message: message.to_string(),
        };

        if let (Some(min), Some(max)) = (rule.min_length, rule.max_length) {
            if min > max {
                return Err(invalid("minLength is greater than maxLength"));
            }
        }
        if let (Some(min), Some(max)) = (rule.minimum, rule.maximum) {
            if min > max {
                return Err(invalid("minimum is greater than maximum"));
            }
        }
        if rule.allowed.as_ref().is_some_and(|values| values.is_empty()) {
            return Err(invalid("enum must list at least one value"));
        }

        let pattern = rule
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| SchemaError::InvalidPattern {
                entity: entity.to_string(),
                field: field.to_string(),
                source,
            })?;

        Ok(Self {
            field_type: rule.field_type,
            min_length: rule.min_length,
            max_length: rule.max_length,
            minimum: rule.minimum,
            maximum: rule.maximum,
            pattern,
            allowed: rule
                .allowed
                .as_ref()
                .map(|values| values.iter().cloned().collect()),
            nullable: rule.nullable,
        })
    }

    fn check(&self, field: &str, value: &Value, out: &mut Vec<Violation>) {
        if value.is_null() {
            if !self.nullable {
                out.push(Violation::new(field, "must not be null"));
            }
            return;
        }

        let type_ok = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Datetime => value
                .as_str()
                .is_some_and(|s| OffsetDateTime::parse(s, &Rfc3339).is_ok()),
            FieldType::Any => true,
        };
        if !type_ok {
            let expected = match self.field_type {
                FieldType::Datetime => "an RFC 3339 date-time".to_string(),
                other => format!("a value of type {}", other.as_str()),
            };
            out.push(Violation::new(field, format!("expected {expected}")));
            return;
        }

        if let Some(s) = value.as_str() {
            let len = s.chars().count();
            if let Some(min) = self.min_length {
                if len < min {
                    out.push(Violation::new(
                        field,
                        format!("length {len} is below minimum {min}"),
                    ));
                }
            }
            if let Some(max) = self.max_length {
                if len > max {
                    out.push(Violation::new(
                        field,
                        format!("length {len} exceeds maximum {max}"),
                    ));
                }
            }
            if let Some(re) = &self.pattern {
                if !re.is_match(s) {
                    out.push(Violation::new(
                        field,
                        format!("does not match pattern {}", re.as_str()),
                    ));
                }
            }
            if let Some(allowed) = &self.allowed {
                if !allowed.contains(s) {
                    let options: Vec<&str> = allowed.iter().map(String::as_str).collect();
                    out.push(Violation::new(
                        field,
                        format!("'{s}' is not one of [{}]", options.join(", ")),
                    ));
                }
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum {
                if n < min {
                    out.push(Violation::new(field, format!("{n} is below minimum {min}")));
                }
            }
            if let Some(max) = self.maximum {
                if n > max {
                    out.push(Violation::new(field, format!("{n} exceeds maximum {max}")));
                }
            }
        }
    }
}

/// Validator for one (entity, operation) pair.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    entity: String,
    operation: Operation,
    required: Vec<String>,
    allowed: BTreeSet<String>,
    rules: BTreeMap<String, CompiledRule>,
}

impl CompiledSchema {
    fn compile(
        entity: &str,
        operation: Operation,
        fields: &OperationFields,
        rules: &BTreeMap<String, CompiledRule>,
    ) -> Result<Self, SchemaError> {
        let mut allowed = BTreeSet::new();
        for field in fields.required.iter().chain(fields.optional.iter()) {
            if !allowed.insert(field.clone()) {
                return Err(SchemaError::DuplicateField {
                    entity: entity.to_string(),
                    operation,
                    field: field.clone(),
                });
            }
        }

        Ok(Self {
            entity: entity.to_string(),
            operation,
            required: fields.required.clone(),
            rules: rules
                .iter()
                .filter(|(field, _)| allowed.contains(*field))
                .map(|(field, rule)| (field.clone(), rule.clone()))
                .collect(),
            allowed,
        })
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Operation this schema validates.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Required fields in declaration order.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// Every field the operation accepts.
    pub fn allowed_fields(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    /// Returns true when the operation accepts the field.
    pub fn is_allowed(&self, field: &str) -> bool {
        self.allowed.contains(field)
    }

    /// Returns true when the field is required.
    pub fn is_required(&self, field: &str) -> bool {
        self.required.iter().any(|f| f == field)
    }

    /// Declared type of a field (`Any` when it has no rule).
    pub fn field_type(&self, field: &str) -> FieldType {
        self.rules
            .get(field)
            .map(|r| r.field_type)
            .unwrap_or_default()
    }

    /// Returns true when the field accepts an explicit `null`.
    pub fn is_nullable(&self, field: &str) -> bool {
        self.rules.get(field).is_some_and(|r| r.nullable)
    }

    /// Validates a payload, collecting every violation.
    pub fn validate(&self, payload: &Map<String, Value>) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        for field in &self.required {
            match payload.get(field) {
                None => violations.push(Violation::new(field, "required field is missing")),
                Some(Value::Null) if !self.is_nullable(field) => {
                    violations.push(Violation::new(field, "required field is null"))
                }
                _ => {}
            }
        }

        for (field, value) in payload {
            if !self.allowed.contains(field) {
                violations.push(Violation::new(
                    field,
                    format!("field is not accepted for {}", self.operation),
                ));
                continue;
            }
            if let Some(rule) = self.rules.get(field) {
                if value.is_null() && self.is_required(field) {
                    // already reported above when not nullable
                    continue;
                }
                rule.check(field, value, &mut violations);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                entity: self.entity.clone(),
                operation: self.operation,
                violations,
            })
        }
    }
}

/// Every compiled validator, keyed by entity name and operation.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<(String, Operation), CompiledSchema>,
}

impl SchemaRegistry {
    /// Compiles a DTO configuration.
    pub fn compile(config: &DtoConfig) -> Result<Self, SchemaError> {
        let mut schemas = BTreeMap::new();
        for (entity, dto) in &config.entities {
            for schema in compile_entity(entity, dto)? {
                schemas.insert((entity.clone(), schema.operation), schema);
            }
        }
        tracing::debug!(schemas = schemas.len(), "compiled DTO validators");
        Ok(Self { schemas })
    }

    /// Looks up a validator.
    pub fn get(&self, entity: &str, operation: Operation) -> Option<&CompiledSchema> {
        self.schemas.get(&(entity.to_string(), operation))
    }

    /// Looks up a validator the caller cannot proceed without.
    pub fn require(&self, entity: &str, operation: Operation) -> Result<&CompiledSchema, SchemaError> {
        self.get(entity, operation)
            .ok_or_else(|| SchemaError::MissingSchema {
                entity: entity.to_string(),
                operation,
            })
    }

    /// Returns true when the entity has an update operation configured.
    pub fn supports_update(&self, entity: &str) -> bool {
        self.get(entity, Operation::Update).is_some()
    }

    /// Number of compiled validators.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true when nothing was compiled.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

fn compile_entity(entity: &str, dto: &EntityDto) -> Result<Vec<CompiledSchema>, SchemaError> {
    let rules = dto
        .rules
        .iter()
        .map(|(field, rule)| Ok((field.clone(), CompiledRule::compile(entity, field, rule)?)))
        .collect::<Result<BTreeMap<_, _>, SchemaError>>()?;

    let mut out = vec![CompiledSchema::compile(
        entity,
        Operation::Create,
        &dto.create,
        &rules,
    )?];
    if let Some(update) = &dto.update {
        out.push(CompiledSchema::compile(
            entity,
            Operation::Update,
            update,
            &rules,
        )?);
    }
    Ok(out)
}
