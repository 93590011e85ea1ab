//! In-memory connectors for tests.
//!
//! [`MemoryTarget`] behaves like the target API where it matters for
//! upserts: `sourceSystemId` is unique per kind and scope, room names are
//! unique per event, and violations come back as conflicts.

use crate::connectors::{BlobMetadata, BlobTransfer, ByteStream, SourceConnector, StoredBlob, TargetConnector};
use crate::error::{BlobError, SourceError, TargetError};
use crate::model::{EntityType, EventLocation, ParentIds, SourceRecord, TargetEntity, TargetEvent, TargetPayload};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// A request the target received.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetCall {
    Create {
        kind: EntityType,
        payload: Map<String, Value>,
    },
    Update {
        kind: EntityType,
        id: String,
        payload: Map<String, Value>,
    },
    List {
        kind: EntityType,
    },
}

#[derive(Debug, Clone)]
struct Stored {
    scope: String,
    entity: TargetEntity,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    kind: EntityType,
    source_system_id: Option<String>,
    remaining: usize,
    error: TargetError,
}

#[derive(Debug, Default)]
struct TargetState {
    events: BTreeMap<String, TargetEvent>,
    locations: BTreeMap<String, Vec<EventLocation>>,
    entities: Vec<Stored>,
    next_id: u64,
    calls: Vec<TargetCall>,
    failures: Vec<InjectedFailure>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory target system.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    state: Mutex<TargetState>,
    latency: Option<Duration>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an event with one location.
    pub fn with_event(self, event_id: &str, location_id: &str) -> Self {
        {
            let mut state = self.state.lock();
            state.events.insert(
                event_id.to_string(),
                TargetEvent {
                    id: event_id.to_string(),
                    name: None,
                },
            );
            state
                .locations
                .entry(event_id.to_string())
                .or_default()
                .push(EventLocation {
                    id: location_id.to_string(),
                    name: None,
                });
        }
        self
    }

    /// Adds an event without any location.
    pub fn with_bare_event(self, event_id: &str) -> Self {
        self.state.lock().events.insert(
            event_id.to_string(),
            TargetEvent {
                id: event_id.to_string(),
                name: None,
            },
        );
        self
    }

    /// Makes every call take `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Stores an entity directly, bypassing uniqueness checks.
    pub fn seed(&self, kind: EntityType, scope: &str, fields: Value) -> String {
        let mut state = self.state.lock();
        let id = state.allocate_id(kind);
        let mut fields = fields.as_object().cloned().unwrap_or_default();
        fields.insert("id".to_string(), Value::String(id.clone()));
        if let Some(entity) = TargetEntity::from_json(kind, &Value::Object(fields)) {
            state.entities.push(Stored {
                scope: scope.to_string(),
                entity,
            });
        }
        id
    }

    /// Fails the next `times` creates of `kind` (optionally only the one
    /// with this `sourceSystemId`) with `error`.
    pub fn fail_creates(
        &self,
        kind: EntityType,
        source_system_id: Option<&str>,
        times: usize,
        error: TargetError,
    ) {
        self.state.lock().failures.push(InjectedFailure {
            kind,
            source_system_id: source_system_id.map(str::to_string),
            remaining: times,
            error,
        });
    }

    pub fn entities(&self, kind: EntityType) -> Vec<TargetEntity> {
        self.state
            .lock()
            .entities
            .iter()
            .filter(|s| s.entity.kind == kind)
            .map(|s| s.entity.clone())
            .collect()
    }

    pub fn count(&self, kind: EntityType) -> usize {
        self.entities(kind).len()
    }

    pub fn calls(&self) -> Vec<TargetCall> {
        self.state.lock().calls.clone()
    }

    /// Number of create requests received for `kind`, successful or not.
    pub fn creates(&self, kind: EntityType) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, TargetCall::Create { kind: k, .. } if *k == kind))
            .count()
    }

    /// Highest number of calls that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    async fn enter(&self, call: TargetCall) {
        {
            let mut state = self.state.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().in_flight -= 1;
    }
}

impl TargetState {
    fn allocate_id(&mut self, kind: EntityType) -> String {
        self.next_id += 1;
        format!("{}-{}", kind.as_str(), self.next_id)
    }

    fn take_failure(&mut self, kind: EntityType, payload: &TargetPayload) -> Option<TargetError> {
        let source_id = payload.source_system_id();
        let failure = self.failures.iter_mut().find(|f| {
            f.kind == kind
                && f.remaining > 0
                && f.source_system_id.as_deref().map_or(true, |id| Some(id) == source_id)
        })?;
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn in_scope<'a>(
        &'a self,
        kind: EntityType,
        scope: &'a str,
    ) -> impl Iterator<Item = &'a TargetEntity> + 'a {
        self.entities
            .iter()
            .filter(move |s| s.entity.kind == kind && s.scope == scope)
            .map(|s| &s.entity)
    }

    fn conflict(&self, kind: EntityType, scope: &str, payload: &TargetPayload) -> Option<TargetError> {
        if let Some(id) = payload.source_system_id() {
            if self
                .in_scope(kind, scope)
                .any(|e| e.source_system_id.as_deref() == Some(id))
            {
                return Some(TargetError::Conflict(format!(
                    "sourceSystemId {id} already exists"
                )));
            }
        }
        if kind == EntityType::Room {
            if let Some(name) = payload.name() {
                let wanted = name.trim().to_lowercase();
                let taken = self.in_scope(kind, scope).any(|e| {
                    e.name
                        .as_deref()
                        .is_some_and(|n| n.trim().to_lowercase() == wanted)
                });
                if taken {
                    return Some(TargetError::Conflict(format!("room name {name} already exists")));
                }
            }
        }
        None
    }
}

#[async_trait]
impl TargetConnector for MemoryTarget {
    async fn get_event(&self, event_id: &str) -> Result<Option<TargetEvent>, TargetError> {
        Ok(self.state.lock().events.get(event_id).cloned())
    }

    async fn get_event_locations(&self, event_id: &str) -> Result<Vec<EventLocation>, TargetError> {
        Ok(self
            .state
            .lock()
            .locations
            .get(event_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create(
        &self,
        kind: EntityType,
        scope: &ParentIds,
        payload: &TargetPayload,
    ) -> Result<TargetEntity, TargetError> {
        self.enter(TargetCall::Create {
            kind,
            payload: payload.fields.clone(),
        })
        .await;

        let scope = scope
            .scope_for(kind)
            .ok_or_else(|| TargetError::Status {
                status: 400,
                message: format!("{kind} create without parent scope"),
            })?
            .to_string();

        let mut state = self.state.lock();
        if let Some(err) = state.take_failure(kind, payload) {
            return Err(err);
        }
        if let Some(err) = state.conflict(kind, &scope, payload) {
            return Err(err);
        }

        let id = state.allocate_id(kind);
        let mut fields = payload.fields.clone();
        fields.insert("id".to_string(), Value::String(id));
        let entity = TargetEntity::from_json(kind, &Value::Object(fields))
            .ok_or_else(|| TargetError::Decode("stored entity has no id".to_string()))?;
        state.entities.push(Stored {
            scope,
            entity: entity.clone(),
        });
        Ok(entity)
    }

    async fn update(
        &self,
        kind: EntityType,
        id: &str,
        payload: &TargetPayload,
    ) -> Result<TargetEntity, TargetError> {
        self.enter(TargetCall::Update {
            kind,
            id: id.to_string(),
            payload: payload.fields.clone(),
        })
        .await;

        let mut state = self.state.lock();
        let stored = state
            .entities
            .iter_mut()
            .find(|s| s.entity.kind == kind && s.entity.id == id)
            .ok_or_else(|| TargetError::NotFound(format!("{kind} {id}")))?;

        let mut fields = stored.entity.fields.clone();
        fields.extend(payload.fields.clone());
        let updated = TargetEntity::from_json(kind, &Value::Object(fields))
            .ok_or_else(|| TargetError::Decode("stored entity has no id".to_string()))?;
        stored.entity = updated.clone();
        Ok(updated)
    }

    async fn list(&self, kind: EntityType, scope: &ParentIds) -> Result<Vec<TargetEntity>, TargetError> {
        self.enter(TargetCall::List { kind }).await;
        let Some(scope) = scope.scope_for(kind) else {
            return Ok(Vec::new());
        };
        let state = self.state.lock();
        Ok(state.in_scope(kind, scope).cloned().collect())
    }
}

/// In-memory legacy source.
#[derive(Debug, Default)]
pub struct MemorySource {
    events: BTreeSet<String>,
    rooms: BTreeMap<String, Vec<SourceRecord>>,
    sessions: BTreeMap<(String, String), Vec<SourceRecord>>,
    sub_sessions: BTreeMap<String, Vec<SourceRecord>>,
    users: BTreeMap<(String, String), Vec<SourceRecord>>,
    files: BTreeMap<(String, String), Vec<SourceRecord>>,
    contents: BTreeMap<String, Bytes>,
    failing: BTreeSet<String>,
}

fn records(values: Vec<Value>) -> Vec<SourceRecord> {
    values.into_iter().filter_map(SourceRecord::from_value).collect()
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, event: &str) -> Self {
        self.events.insert(event.to_string());
        self
    }

    pub fn with_room(mut self, event: &str, room: Value) -> Self {
        self.events.insert(event.to_string());
        self.rooms
            .entry(event.to_string())
            .or_default()
            .extend(records(vec![room]));
        self
    }

    pub fn with_sessions(mut self, event: &str, room_ref: &str, sessions: Vec<Value>) -> Self {
        self.sessions
            .insert((event.to_string(), room_ref.to_string()), records(sessions));
        self
    }

    pub fn with_sub_sessions(mut self, session_ref: &str, subs: Vec<Value>) -> Self {
        self.sub_sessions.insert(session_ref.to_string(), records(subs));
        self
    }

    pub fn with_users(mut self, event: &str, room_ref: &str, users: Vec<Value>) -> Self {
        self.users
            .insert((event.to_string(), room_ref.to_string()), records(users));
        self
    }

    pub fn with_files(mut self, event: &str, room_ref: &str, files: Vec<Value>) -> Self {
        self.files
            .insert((event.to_string(), room_ref.to_string()), records(files));
        self
    }

    pub fn with_content(mut self, file_ref: &str, content: &'static [u8]) -> Self {
        self.contents
            .insert(file_ref.to_string(), Bytes::from_static(content));
        self
    }

    /// Makes `get_sessions` for this room fail.
    pub fn fail_sessions(mut self, room_ref: &str) -> Self {
        self.failing.insert(format!("sessions:{room_ref}"));
        self
    }

    fn scoped(
        map: &BTreeMap<(String, String), Vec<SourceRecord>>,
        event: &str,
        room_ref: &str,
    ) -> Vec<SourceRecord> {
        map.get(&(event.to_string(), room_ref.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    async fn get_rooms(&self, event: &str) -> Result<Vec<SourceRecord>, SourceError> {
        if !self.events.contains(event) {
            return Err(SourceError::NotFound(event.to_string()));
        }
        Ok(self.rooms.get(event).cloned().unwrap_or_default())
    }

    async fn get_sessions(&self, event: &str, room_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        if self.failing.contains(&format!("sessions:{room_ref}")) {
            return Err(SourceError::Status {
                status: 500,
                message: "sessions unavailable".to_string(),
            });
        }
        Ok(Self::scoped(&self.sessions, event, room_ref))
    }

    async fn get_sub_sessions(&self, session_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(self.sub_sessions.get(session_ref).cloned().unwrap_or_default())
    }

    async fn get_users(&self, event: &str, room_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(Self::scoped(&self.users, event, room_ref))
    }

    async fn get_files(&self, event: &str, scope_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(Self::scoped(&self.files, event, scope_ref))
    }

    async fn download_file(&self, file_ref: &str) -> Result<ByteStream, SourceError> {
        let content = self
            .contents
            .get(file_ref)
            .cloned()
            .ok_or_else(|| SourceError::Status {
                status: 404,
                message: format!("no content for {file_ref}"),
            })?;
        Ok(futures::stream::iter(vec![Ok(content)]).boxed())
    }
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobs {
    uploads: Mutex<Vec<(BlobMetadata, Bytes)>>,
}

impl MemoryBlobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> Vec<(BlobMetadata, Bytes)> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl BlobTransfer for MemoryBlobs {
    async fn upload(&self, mut stream: ByteStream, metadata: BlobMetadata) -> Result<StoredBlob, BlobError> {
        let mut content = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BlobError::Io(e.to_string()))?;
            content.extend_from_slice(&chunk);
        }
        let mut uploads = self.uploads.lock();
        uploads.push((metadata, Bytes::from(content)));
        let id = format!("blob-{}", uploads.len());
        Ok(StoredBlob {
            url: format!("https://blobs.example.com/{id}"),
            id,
        })
    }
}
