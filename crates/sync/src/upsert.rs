//! Conflict-aware create-or-update against the target.
//!
//! Every entity is created first. A conflict on the idempotency key sends
//! the protocol to a lookup in the same parent scope; a match is updated
//! with the filtered update payload, and no match is reported as
//! [`SyncError::ConflictUnresolved`] rather than retried as a create.

use crate::connectors::TargetConnector;
use crate::error::{SyncError, TargetError, TransformError};
use crate::model::{MatchPolicy, ParentIds, TargetEntity, TargetPayload};
use crate::retry::RetryPolicy;
use crate::transform::Prepared;
use eventsync_validate::Operation;
use std::sync::Arc;

/// Where an upsert ended.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Created(TargetEntity),
    Updated(TargetEntity),
    /// Create-only entity that already exists; left untouched.
    AlreadyPresent,
}

impl UpsertOutcome {
    pub fn entity(&self) -> Option<&TargetEntity> {
        match self {
            Self::Created(e) | Self::Updated(e) => Some(e),
            Self::AlreadyPresent => None,
        }
    }
}

/// Upsert state machine bound to one target connector.
#[derive(Clone)]
pub struct UpsertProtocol {
    target: Arc<dyn TargetConnector>,
    retry: RetryPolicy,
}

impl UpsertProtocol {
    pub fn new(target: Arc<dyn TargetConnector>, retry: RetryPolicy) -> Self {
        Self { target, retry }
    }

    /// Creates the entity, or updates the existing one it conflicts with.
    pub async fn upsert(
        &self,
        prepared: &Prepared,
        scope: &ParentIds,
    ) -> Result<UpsertOutcome, SyncError> {
        let kind = prepared.entity;
        tracing::debug!(entity = %kind, source_id = %prepared.source_id, "creating");

        let created = self
            .retry
            .run("create", || self.target.create(kind, scope, &prepared.create))
            .await;

        match created {
            Ok(entity) => {
                tracing::debug!(entity = %kind, id = %entity.id, "created");
                Ok(UpsertOutcome::Created(entity))
            }
            Err(SyncError::Target(TargetError::Conflict(reason))) => {
                tracing::debug!(
                    entity = %kind,
                    source_id = %prepared.source_id,
                    %reason,
                    "conflict detected"
                );
                if kind.is_create_only() {
                    return Ok(UpsertOutcome::AlreadyPresent);
                }
                self.resolve_conflict(prepared, scope).await
            }
            Err(err) => Err(err),
        }
    }

    /// Looks up the existing entity the payload refers to, without writing.
    pub async fn find_existing(
        &self,
        prepared: &Prepared,
        scope: &ParentIds,
    ) -> Result<Option<TargetEntity>, SyncError> {
        let kind = prepared.entity;
        let existing = self
            .retry
            .run("list", || self.target.list(kind, scope))
            .await?;
        let found = find_match(kind.match_policy(), &prepared.create, &existing).cloned();
        if found.is_none() {
            tracing::debug!(entity = %kind, candidates = existing.len(), "lookup found no match");
        }
        Ok(found)
    }

    async fn resolve_conflict(
        &self,
        prepared: &Prepared,
        scope: &ParentIds,
    ) -> Result<UpsertOutcome, SyncError> {
        let kind = prepared.entity;
        let Some(found) = self.find_existing(prepared, scope).await? else {
            return Err(SyncError::ConflictUnresolved {
                entity: kind,
                source_id: prepared.source_id.clone(),
            });
        };

        let update = prepared
            .update
            .as_ref()
            .ok_or(TransformError::MissingSchema {
                entity: kind,
                operation: Operation::Update,
            })?;

        tracing::debug!(entity = %kind, id = %found.id, "updating existing entity");
        let updated = self
            .retry
            .run("update", || self.target.update(kind, &found.id, update))
            .await?;
        Ok(UpsertOutcome::Updated(updated))
    }
}

/// Finds the existing entity a conflicting payload refers to.
///
/// Always tries an exact `sourceSystemId` match. Under
/// [`MatchPolicy::SourceSystemIdThenName`] it then compares trimmed,
/// case-insensitive names, ignoring entities already claimed by a
/// different `sourceSystemId` unless the payload has none.
pub fn find_match<'a>(
    policy: MatchPolicy,
    payload: &TargetPayload,
    existing: &'a [TargetEntity],
) -> Option<&'a TargetEntity> {
    let source_id = payload.source_system_id();
    if let Some(id) = source_id {
        if let Some(found) = existing
            .iter()
            .find(|e| e.source_system_id.as_deref() == Some(id))
        {
            return Some(found);
        }
    }

    match policy {
        MatchPolicy::SourceSystemId => None,
        MatchPolicy::SourceSystemIdThenName => {
            let name = payload.name()?.trim().to_lowercase();
            existing.iter().find(|e| {
                (source_id.is_none() || e.source_system_id.is_none())
                    && e
                        .name
                        .as_deref()
                        .is_some_and(|n| n.trim().to_lowercase() == name)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::MockTargetConnector;
    use crate::model::{EntityType, SourceRecord, SyncTask};
    use crate::transform::TransformEngine;
    use serde_json::{json, Value};

    fn prepare(entity: EntityType, record: Value) -> Prepared {
        let engine =
            TransformEngine::from_config(&crate::dto::default_config().unwrap()).unwrap();
        let parents = ParentIds::event("46").with_location("500").with_room("r-1");
        let task = SyncTask::new(entity, SourceRecord::from_value(record).unwrap(), parents);
        engine.prepare(&task).unwrap()
    }

    fn entity(kind: EntityType, value: Value) -> TargetEntity {
        TargetEntity::from_json(kind, &value).unwrap()
    }

    fn conflict() -> TargetError {
        TargetError::Conflict("sourceSystemId already exists".into())
    }

    #[tokio::test]
    async fn creates_when_no_conflict() {
        let mut target = MockTargetConnector::new();
        target
            .expect_create()
            .times(1)
            .returning(|kind, _, _| Ok(TargetEntity::from_json(kind, &json!({"id": "t-1"})).unwrap()));

        let protocol = UpsertProtocol::new(Arc::new(target), RetryPolicy::no_retry());
        let prepared = prepare(EntityType::Session, json!({"id": 1, "name": "Talk", "start": 0, "end": 60}));
        let outcome = protocol
            .upsert(&prepared, &ParentIds::event("46").with_room("r-1"))
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::Created(ref e) if e.id == "t-1"));
    }

    #[tokio::test]
    async fn conflict_updates_matching_entity_with_filtered_payload() {
        let mut target = MockTargetConnector::new();
        target.expect_create().times(1).returning(|_, _, _| Err(conflict()));
        target.expect_list().times(1).returning(|kind, _| {
            Ok(vec![
                TargetEntity::from_json(kind, &json!({"id": "t-0", "sourceSystemId": "0"})).unwrap(),
                TargetEntity::from_json(kind, &json!({"id": "t-7", "sourceSystemId": "7"})).unwrap(),
            ])
        });
        target
            .expect_update()
            .withf(|_, id, payload| {
                id == "t-7" && !payload.contains("roomId") && !payload.contains("eventId")
            })
            .times(1)
            .returning(|kind, id, _| Ok(TargetEntity::from_json(kind, &json!({"id": id})).unwrap()));

        let protocol = UpsertProtocol::new(Arc::new(target), RetryPolicy::no_retry());
        let prepared = prepare(
            EntityType::Session,
            json!({"id": 7, "name": "Talk", "start": 0, "end": 60}),
        );
        let outcome = protocol
            .upsert(&prepared, &ParentIds::event("46").with_room("r-1"))
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::Updated(ref e) if e.id == "t-7"));
    }

    #[tokio::test]
    async fn conflict_without_match_is_unresolved() {
        let mut target = MockTargetConnector::new();
        target.expect_create().times(1).returning(|_, _, _| Err(conflict()));
        target.expect_list().times(1).returning(|_, _| Ok(Vec::new()));
        target.expect_update().never();

        let protocol = UpsertProtocol::new(Arc::new(target), RetryPolicy::no_retry());
        let prepared = prepare(EntityType::User, json!({
            "id": "u-1", "email": "a@example.com", "firstName": "Ada", "lastName": "L"
        }));
        let err = protocol
            .upsert(&prepared, &ParentIds::event("46"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::ConflictUnresolved { entity: EntityType::User, ref source_id } if source_id == "u-1"
        ));
    }

    #[tokio::test]
    async fn file_conflict_is_already_present() {
        let mut target = MockTargetConnector::new();
        target.expect_create().times(1).returning(|_, _, _| Err(conflict()));
        target.expect_list().never();

        let protocol = UpsertProtocol::new(Arc::new(target), RetryPolicy::no_retry());
        let engine =
            TransformEngine::from_config(&crate::dto::default_config().unwrap()).unwrap();
        let task = SyncTask::new(
            EntityType::FileAsset,
            SourceRecord::from_value(json!({"id": "f-1", "name": "slides.pdf"})).unwrap(),
            ParentIds::event("46").with_room("r-1"),
        )
        .with_override("url", "https://cdn.example.com/f-1");
        let prepared = engine.prepare(&task).unwrap();

        let outcome = protocol.upsert(&prepared, &task.parents).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn terminal_client_error_is_not_retried() {
        let mut target = MockTargetConnector::new();
        target.expect_create().times(1).returning(|_, _, _| {
            Err(TargetError::Status {
                status: 400,
                message: "bad payload".into(),
            })
        });

        let protocol = UpsertProtocol::new(Arc::new(target), RetryPolicy::new(3));
        let prepared = prepare(EntityType::Room, json!({"id": 10, "name": "Main Hall"}));
        let err = protocol
            .upsert(&prepared, &ParentIds::event("46"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Target(TargetError::Status { status: 400, .. })));
    }

    #[test]
    fn room_falls_back_to_name_match() {
        let prepared = prepare(EntityType::Room, json!({"id": 10, "name": "Main Hall"}));
        let existing = vec![
            entity(EntityType::Room, json!({"id": "a", "name": "Main Hall", "sourceSystemId": "99"})),
            entity(EntityType::Room, json!({"id": "b", "name": " main hall "})),
        ];
        let found = find_match(MatchPolicy::SourceSystemIdThenName, &prepared.create, &existing);
        assert_eq!(found.map(|e| e.id.as_str()), Some("b"));
    }

    #[test]
    fn identifier_match_wins_over_name() {
        let prepared = prepare(EntityType::Room, json!({"id": 10, "name": "Main Hall"}));
        let existing = vec![
            entity(EntityType::Room, json!({"id": "a", "name": "Main Hall"})),
            entity(EntityType::Room, json!({"id": "b", "name": "Renamed", "sourceSystemId": "10"})),
        ];
        let found = find_match(MatchPolicy::SourceSystemIdThenName, &prepared.create, &existing);
        assert_eq!(found.map(|e| e.id.as_str()), Some("b"));
    }

    #[test]
    fn descendants_never_match_by_name() {
        let prepared = prepare(
            EntityType::Session,
            json!({"id": 7, "name": "Talk", "start": 0, "end": 60}),
        );
        let existing = vec![entity(EntityType::Session, json!({"id": "a", "name": "Talk"}))];
        assert!(find_match(MatchPolicy::SourceSystemId, &prepared.create, &existing).is_none());
    }
}
