//! Source record to target payload transformation.
//!
//! [`TransformEngine`] is pure: it resolves canonical fields through the
//! alias tables, injects parent ids, coerces values to the declared rule
//! types and validates the result against the compiled schemas. It never
//! performs I/O.

use crate::aliases::{self, aliases_for};
use crate::error::{SyncError, TransformError};
use crate::model::{EntityType, SyncTask, TargetPayload};
use eventsync_validate::{
    CompiledSchema, DtoConfig, FieldType, Operation, SchemaRegistry, ValidationError, Violation,
};
use serde_json::{Map, Number, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const SOURCE_SYSTEM_ID: &str = "sourceSystemId";
const NO_VALUE: &str = "no value under any known source field";

/// Payload for one operation plus soft-policy warnings.
#[derive(Debug, Clone, PartialEq)]
pub struct Transformed {
    pub payload: TargetPayload,
    pub warnings: Vec<String>,
}

/// A record validated for every operation it may need.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    pub entity: EntityType,
    /// Legacy identifier (or room name) used in logs and reports.
    pub source_id: String,
    pub create: TargetPayload,
    /// Filtered update payload; `None` for create-only entities.
    pub update: Option<TargetPayload>,
    pub warnings: Vec<String>,
}

/// Turns sync tasks into validated target payloads.
#[derive(Debug, Clone)]
pub struct TransformEngine {
    registry: SchemaRegistry,
}

impl TransformEngine {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Compiles a DTO configuration into an engine.
    pub fn from_config(config: &DtoConfig) -> Result<Self, SyncError> {
        crate::dto::compile_registry(config).map(Self::new)
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Builds and validates the payload for one operation.
    pub fn transform(
        &self,
        task: &SyncTask,
        operation: Operation,
    ) -> Result<Transformed, TransformError> {
        let prepared = self.prepare(task)?;
        let payload = match operation {
            Operation::Create => prepared.create,
            Operation::Update => prepared.update.ok_or(TransformError::MissingSchema {
                entity: task.entity,
                operation,
            })?,
        };
        Ok(Transformed {
            payload,
            warnings: prepared.warnings,
        })
    }

    /// Builds and validates the create payload and, when the entity can be
    /// updated, the update payload.
    ///
    /// The update payload is the create payload restricted to the fields
    /// the update schema accepts, so parent ids and creation-only fields
    /// never reach an update request.
    pub fn prepare(&self, task: &SyncTask) -> Result<Prepared, TransformError> {
        let entity = task.entity;
        let source_id = source_key(task);
        let create_schema = self.schema(entity, Operation::Create)?;

        let mut warnings = Vec::new();
        let fields = resolve_fields(task, create_schema, &source_id, &mut warnings)?;
        let create = TargetPayload {
            entity,
            operation: Operation::Create,
            fields,
        };

        let update = match self.registry.get(entity.as_str(), Operation::Update) {
            Some(schema) => {
                let fields: Map<String, Value> = create
                    .fields
                    .iter()
                    .filter(|(field, _)| schema.is_allowed(field))
                    .map(|(field, value)| (field.clone(), value.clone()))
                    .collect();
                schema.validate(&fields)?;
                Some(TargetPayload {
                    entity,
                    operation: Operation::Update,
                    fields,
                })
            }
            None => None,
        };

        Ok(Prepared {
            entity,
            source_id,
            create,
            update,
            warnings,
        })
    }

    fn schema(
        &self,
        entity: EntityType,
        operation: Operation,
    ) -> Result<&CompiledSchema, TransformError> {
        self.registry
            .get(entity.as_str(), operation)
            .ok_or(TransformError::MissingSchema { entity, operation })
    }
}

/// Identifier used for a task in logs and reports.
///
/// Falls back to the room name for rooms without a legacy id, then to
/// `"<unknown>"`.
pub fn source_key(task: &SyncTask) -> String {
    task.overrides
        .get(SOURCE_SYSTEM_ID)
        .and_then(crate::model::scalar_to_string)
        .or_else(|| aliases::source_id(&task.record, task.entity))
        .or_else(|| match task.entity {
            EntityType::Room => aliases::room_ref(&task.record),
            _ => None,
        })
        .unwrap_or_else(|| "<unknown>".to_string())
}

fn resolve_fields(
    task: &SyncTask,
    schema: &CompiledSchema,
    source_id: &str,
    warnings: &mut Vec<String>,
) -> Result<Map<String, Value>, TransformError> {
    let table = aliases_for(task.entity);
    let mut fields = Map::new();
    let mut missing_parents = Vec::new();
    let mut violations = Vec::new();

    for parent in table.parents {
        let field = parent.target_field();
        if !schema.is_allowed(field) {
            continue;
        }
        match task.parents.get(*parent) {
            Some(id) => {
                fields.insert(field.to_string(), Value::String(id.to_string()));
            }
            None if schema.is_required(field) => missing_parents.push(field.to_string()),
            None => {}
        }
    }

    if !missing_parents.is_empty() {
        return Err(TransformError::Unresolved {
            entity: task.entity,
            source_id: source_id.to_string(),
            fields: missing_parents,
        });
    }

    if schema.is_allowed(SOURCE_SYSTEM_ID) {
        let id = task
            .overrides
            .get(SOURCE_SYSTEM_ID)
            .and_then(crate::model::scalar_to_string)
            .or_else(|| aliases::source_id(&task.record, task.entity));
        match id {
            Some(id) => {
                fields.insert(SOURCE_SYSTEM_ID.to_string(), Value::String(id));
            }
            None if schema.is_required(SOURCE_SYSTEM_ID) => {
                violations.push(Violation::new(SOURCE_SYSTEM_ID, NO_VALUE));
            }
            None => {}
        }
    }

    for alias in table.fields {
        let field = alias.field;
        if !schema.is_allowed(field) {
            continue;
        }
        let raw = task
            .overrides
            .get(field)
            .or_else(|| aliases::resolve(&task.record, alias.candidates));

        let Some(raw) = raw else {
            if schema.is_required(field) {
                violations.push(Violation::new(field, NO_VALUE));
            } else if schema.is_nullable(field)
                && aliases::has_explicit_null(&task.record, alias.candidates)
            {
                fields.insert(field.to_string(), Value::Null);
            }
            continue;
        };

        match schema.field_type(field) {
            FieldType::Datetime => match parse_datetime(raw) {
                Some(ts) => {
                    fields.insert(field.to_string(), Value::String(ts));
                }
                None if schema.is_required(field) => {
                    violations.push(Violation::new(
                        field,
                        format!("could not parse date-time {raw}"),
                    ));
                }
                None => {
                    tracing::warn!(
                        entity = %task.entity,
                        source_id,
                        field,
                        value = %raw,
                        "dropping unparseable optional date-time"
                    );
                    warnings.push(format!("dropped unparseable {field} {raw}"));
                }
            },
            ty => {
                let value = coerce(raw, ty).unwrap_or_else(|| raw.clone());
                fields.insert(field.to_string(), value);
            }
        }
    }

    // Overrides for fields outside the alias table.
    for (field, value) in &task.overrides {
        if field != SOURCE_SYSTEM_ID && schema.is_allowed(field) && !fields.contains_key(field) {
            fields.insert(field.clone(), value.clone());
        }
    }

    if let Err(err) = schema.validate(&fields) {
        let already: Vec<String> = violations.iter().map(|v| v.field.clone()).collect();
        violations.extend(
            err.violations
                .into_iter()
                .filter(|v| !already.contains(&v.field)),
        );
    }

    if violations.is_empty() {
        Ok(fields)
    } else {
        Err(TransformError::Invalid(ValidationError {
            entity: task.entity.as_str().to_string(),
            operation: schema.operation(),
            violations,
        }))
    }
}

/// Lossless coercion to a declared type. `None` leaves the value as-is for
/// the validator to report.
fn coerce(value: &Value, ty: FieldType) -> Option<Value> {
    match ty {
        FieldType::String => match value {
            Value::String(s) => Some(Value::String(s.trim().to_string())),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => None,
        },
        FieldType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| Value::from(f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
            _ => None,
        },
        FieldType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .map(Value::from)
                    .or_else(|| {
                        trimmed
                            .parse::<f64>()
                            .ok()
                            .and_then(Number::from_f64)
                            .map(Value::Number)
                    })
            }
            _ => None,
        },
        FieldType::Boolean => match value {
            Value::Bool(_) => Some(value.clone()),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(Value::Bool(true)),
                Some(0) => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        FieldType::Datetime | FieldType::Any => Some(value.clone()),
    }
}

/// Parses a source date-time into RFC 3339 UTC.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` (both read
/// as UTC) and integer Unix seconds.
pub fn parse_datetime(value: &Value) -> Option<String> {
    let parsed = match value {
        Value::Number(n) => OffsetDateTime::from_unix_timestamp(n.as_i64()?).ok()?,
        Value::String(s) => parse_datetime_str(s.trim())?,
        _ => return None,
    };
    parsed.to_offset(time::UtcOffset::UTC).format(&Rfc3339).ok()
}

fn parse_datetime_str(s: &str) -> Option<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Some(dt);
    }
    let space = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    let t_sep = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    if let Ok(dt) = PrimitiveDateTime::parse(s, &space) {
        return Some(dt.assume_utc());
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, &t_sep) {
        return Some(dt.assume_utc());
    }
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        return OffsetDateTime::from_unix_timestamp(s.parse().ok()?).ok();
    }
    None
}
