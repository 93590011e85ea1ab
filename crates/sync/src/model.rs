//! Core data model shared by every stage of a sync run.

use crate::error::SyncError;
use eventsync_validate::Operation;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Kinds of target entity the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    Room,
    Session,
    SubSession,
    User,
    ModeratorLink,
    FileAsset,
}

impl EntityType {
    /// Every entity type, in traversal order.
    pub const ALL: [EntityType; 6] = [
        Self::Room,
        Self::Session,
        Self::SubSession,
        Self::User,
        Self::ModeratorLink,
        Self::FileAsset,
    ];

    /// Key used in the DTO configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Room => "room",
            Self::Session => "session",
            Self::SubSession => "subSession",
            Self::User => "user",
            Self::ModeratorLink => "moderatorLink",
            Self::FileAsset => "fileAsset",
        }
    }

    /// Label used in logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Room => "Rooms",
            Self::Session => "Sessions",
            Self::SubSession => "Sub-sessions",
            Self::User => "Users",
            Self::ModeratorLink => "Moderators",
            Self::FileAsset => "Files",
        }
    }

    /// How an existing target entity is located after a conflict.
    ///
    /// Rooms may fall back to a name match; every other type matches on
    /// `sourceSystemId` only.
    pub fn match_policy(&self) -> MatchPolicy {
        match self {
            Self::Room => MatchPolicy::SourceSystemIdThenName,
            _ => MatchPolicy::SourceSystemId,
        }
    }

    /// File assets are never updated; a conflict means "already there".
    pub fn is_create_only(&self) -> bool {
        matches!(self, Self::FileAsset)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duplicate-matching policy used by the lookup step of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Exact `sourceSystemId` match.
    SourceSystemId,
    /// Exact `sourceSystemId` match, then a case-insensitive name match
    /// among entities that carry no `sourceSystemId` of their own.
    SourceSystemIdThenName,
}

/// Untyped record read from the source system.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(Map<String, Value>);

impl SourceRecord {
    /// Wraps a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wraps a JSON value when it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Raw field access.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true when the field exists (even as `null`).
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Underlying fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for SourceRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Parent-scope field injected into a payload from resolved parent ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentField {
    Event,
    Location,
    Room,
    Session,
    User,
}

impl ParentField {
    /// Target payload field name.
    pub fn target_field(&self) -> &'static str {
        match self {
            Self::Event => "eventId",
            Self::Location => "eventLocationId",
            Self::Room => "roomId",
            Self::Session => "sessionId",
            Self::User => "userId",
        }
    }
}

/// Target identifiers of every resolved ancestor of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentIds {
    pub event_id: String,
    pub location_id: Option<String>,
    pub room_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

impl ParentIds {
    /// Scope rooted at a target event.
    pub fn event(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, id: impl Into<String>) -> Self {
        self.location_id = Some(id.into());
        self
    }

    pub fn with_room(mut self, id: impl Into<String>) -> Self {
        self.room_id = Some(id.into());
        self
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    /// Resolved id for a parent field.
    pub fn get(&self, field: ParentField) -> Option<&str> {
        match field {
            ParentField::Event => Some(self.event_id.as_str()),
            ParentField::Location => self.location_id.as_deref(),
            ParentField::Room => self.room_id.as_deref(),
            ParentField::Session => self.session_id.as_deref(),
            ParentField::User => self.user_id.as_deref(),
        }
    }

    /// Parent id that addresses the target collection holding `kind`.
    ///
    /// Rooms, users and files live under the event, sessions and moderator
    /// links under the room, sub-sessions under the session.
    pub fn scope_for(&self, kind: EntityType) -> Option<&str> {
        match kind {
            EntityType::Room | EntityType::User | EntityType::FileAsset => {
                Some(self.event_id.as_str())
            }
            EntityType::Session | EntityType::ModeratorLink => self.room_id.as_deref(),
            EntityType::SubSession => self.session_id.as_deref(),
        }
    }
}

/// One unit of work: an entity type, its source record, and its parents.
///
/// `overrides` carries values resolved during traversal (sub-session
/// position, upload results, composite keys); they win over anything the
/// record itself holds.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub entity: EntityType,
    pub record: SourceRecord,
    pub parents: ParentIds,
    pub overrides: BTreeMap<String, Value>,
}

impl SyncTask {
    pub fn new(entity: EntityType, record: SourceRecord, parents: ParentIds) -> Self {
        Self {
            entity,
            record,
            parents,
            overrides: BTreeMap::new(),
        }
    }

    /// Sets a resolved value for a target field.
    pub fn with_override(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.overrides.insert(field.into(), value.into());
        self
    }
}

/// Schema-conformant body for one target request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetPayload {
    #[serde(skip)]
    pub entity: EntityType,
    #[serde(skip)]
    pub operation: Operation,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TargetPayload {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Idempotency key, when present.
    pub fn source_system_id(&self) -> Option<&str> {
        self.fields.get("sourceSystemId").and_then(Value::as_str)
    }

    /// Display name, when the entity has one.
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }

    /// JSON body.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

/// Entity as it exists in the target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub kind: EntityType,
    pub id: String,
    pub source_system_id: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl TargetEntity {
    /// Reads an entity from a target API response body.
    ///
    /// Returns `None` when no identifier can be found.
    pub fn from_json(kind: EntityType, value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = ["id", "_id", "uuid"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(scalar_to_string))?;
        let source_system_id = ["sourceSystemId", "source_system_id"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(scalar_to_string));
        let name = ["name", "title", "email"]
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str).map(str::to_string));
        Some(Self {
            kind,
            id,
            source_system_id,
            name,
            fields: obj.clone(),
        })
    }
}

/// Target event that anchors a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEvent {
    pub id: String,
    pub name: Option<String>,
}

/// Target location rooms are anchored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLocation {
    pub id: String,
    pub name: Option<String>,
}

/// Terminal result of one task.
#[derive(Debug)]
pub enum SyncOutcome {
    Created(TargetEntity),
    Updated(TargetEntity),
    /// Dry run: transformed and validated, nothing sent.
    Planned,
    /// Intentionally not synchronized (reason attached).
    Skipped(String),
    Failed(SyncError),
}

impl SyncOutcome {
    /// Target id the outcome resolved to.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            Self::Created(e) | Self::Updated(e) => Some(e.id.as_str()),
            _ => None,
        }
    }
}

/// Scalar JSON value as a trimmed string; `None` for blanks and non-scalars.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
