//! Sync orchestrator that walks the source hierarchy and drives upserts.
//!
//! Rooms are the unit of outer parallelism. Inside a room everything runs
//! sequentially in source order: the room itself, then each session
//! followed by its sub-sessions, then each user followed by its moderator
//! link, then files. A failed parent skips its subtree and records one
//! error; siblings are independent.

use crate::aliases;
use crate::connectors::{BlobMetadata, BlobTransfer, SourceConnector, StoredBlob, TargetConnector};
use crate::error::{SourceError, SyncError, TargetError};
use crate::limiter::{ConcurrencyLimiter, Settled};
use crate::model::{EntityType, ParentIds, SourceRecord, SyncOutcome, SyncTask};
use crate::report::{MigrationReport, ResultAggregator, RoomStatus, RoomTiming};
use crate::retry::RetryPolicy;
use crate::transform::{source_key, TransformEngine};
use crate::upsert::{UpsertOutcome, UpsertProtocol};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Parameters for a sync run.
///
/// ```
/// use eventsync_sync::SyncOptions;
///
/// let options = SyncOptions { dry_run: true, ..Default::default() };
/// assert!(options.dry_run);
/// assert_eq!(options.max_concurrent_rooms, 3);
/// ```
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Rooms processed at once (minimum 1).
    pub max_concurrent_rooms: usize,
    /// Transform and validate everything, send nothing.
    pub dry_run: bool,
    pub skip_files: bool,
    /// Only sync rooms with this name (case-insensitive).
    pub room_name: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_concurrent_rooms: 3,
            dry_run: false,
            skip_files: false,
            room_name: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a run needs, passed explicitly.
#[derive(Clone)]
pub struct SyncContext {
    pub source: Arc<dyn SourceConnector>,
    pub target: Arc<dyn TargetConnector>,
    /// Required unless files are skipped or the run is a dry run.
    pub blobs: Option<Arc<dyn BlobTransfer>>,
    pub engine: Arc<TransformEngine>,
    pub cancel: CancellationToken,
}

/// Cancellation observed between two entity operations.
struct Interrupted;

/// Per-room state threaded through the traversal.
struct Walk<'a> {
    source_event: &'a str,
    room_key: &'a str,
    agg: &'a ResultAggregator,
}

/// Drives a full synchronization run.
pub struct SyncOrchestrator {
    ctx: SyncContext,
    options: SyncOptions,
    upsert: UpsertProtocol,
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext, options: SyncOptions) -> Self {
        let upsert = UpsertProtocol::new(Arc::clone(&ctx.target), options.retry.clone());
        Self {
            ctx,
            options,
            upsert,
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Synchronizes every (matching) room of `source_event` into
    /// `target_event_id`.
    ///
    /// Preflight problems are returned as [`SyncError::Configuration`]
    /// before anything is written. Everything after that lands in the
    /// report.
    pub async fn run(
        &self,
        source_event: &str,
        target_event_id: &str,
    ) -> Result<MigrationReport, SyncError> {
        let (base, rooms) = self.preflight(source_event, target_event_id).await?;
        tracing::info!(
            rooms = rooms.len(),
            max_concurrent = self.options.max_concurrent_rooms,
            dry_run = self.options.dry_run,
            "starting sync"
        );

        let agg = ResultAggregator::new(source_event, target_event_id, self.options.dry_run);
        let limiter = ConcurrencyLimiter::new(self.options.max_concurrent_rooms);
        let settled = limiter
            .settle_all(rooms.iter(), &self.ctx.cancel, |room| {
                self.sync_room(room, source_event, &base, &agg)
            })
            .await;

        for (idx, result) in settled {
            let room_key = room_key(&rooms[idx]);
            let status = match result {
                Settled::Completed(_) => continue,
                Settled::NotAdmitted => {
                    agg.record_error(
                        EntityType::Room,
                        &room_key,
                        &format!("room {room_key} (not started)"),
                        &SyncError::Cancelled,
                    );
                    RoomStatus::NotAdmitted
                }
                Settled::Panicked(message) => {
                    agg.record_panic(&room_key, &message);
                    RoomStatus::Panicked
                }
            };
            agg.room_finished(RoomTiming {
                source_id: room_key,
                name: aliases::display_name(&rooms[idx], EntityType::Room),
                status,
                duration_ms: 0,
            });
        }

        let interrupted = self.ctx.cancel.is_cancelled();
        let report = agg.finish(limiter.peak(), interrupted);
        tracing::info!(
            success = report.success,
            errors = report.errors.len(),
            rooms = report.rooms_processed,
            "sync finished"
        );
        Ok(report)
    }

    async fn preflight(
        &self,
        source_event: &str,
        target_event_id: &str,
    ) -> Result<(ParentIds, Vec<SourceRecord>), SyncError> {
        let retry = &self.options.retry;
        let event = retry
            .run("get_event", || self.ctx.target.get_event(target_event_id))
            .await
            .map_err(|e| match e {
                SyncError::Target(TargetError::NotFound(_)) => None,
                other => Some(other),
            });
        match event {
            Ok(Some(event)) => {
                tracing::debug!(event = %event.id, name = ?event.name, "target event found")
            }
            Ok(None) | Err(None) => {
                return Err(SyncError::Configuration(format!(
                    "target event {target_event_id} not found"
                )))
            }
            Err(Some(e)) => {
                return Err(SyncError::Configuration(format!(
                    "could not load target event {target_event_id}: {e}"
                )))
            }
        }

        let locations = retry
            .run("get_event_locations", || {
                self.ctx.target.get_event_locations(target_event_id)
            })
            .await
            .map_err(|e| {
                SyncError::Configuration(format!(
                    "could not load locations of target event {target_event_id}: {e}"
                ))
            })?;
        let Some(location) = locations.into_iter().next() else {
            return Err(SyncError::Configuration(format!(
                "target event {target_event_id} has no event location"
            )));
        };

        if !self.options.skip_files && !self.options.dry_run && self.ctx.blobs.is_none() {
            return Err(SyncError::Configuration(
                "file sync needs a blob store (or skip files)".to_string(),
            ));
        }

        let mut rooms = self.ctx.source.get_rooms(source_event).await.map_err(|e| match e {
            SourceError::NotFound(_) => {
                SyncError::Configuration(format!("source event {source_event} not found"))
            }
            other => SyncError::Configuration(format!(
                "could not load rooms of source event {source_event}: {other}"
            )),
        })?;

        if let Some(wanted) = self.options.room_name.as_deref() {
            let wanted = wanted.trim();
            rooms.retain(|room| {
                aliases::display_name(room, EntityType::Room)
                    .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
            });
            if rooms.is_empty() {
                return Err(SyncError::Configuration(format!(
                    "no room named '{wanted}' in source event {source_event}"
                )));
            }
        }

        let base = ParentIds::event(target_event_id).with_location(location.id);
        Ok((base, rooms))
    }

    async fn sync_room(
        &self,
        room: &SourceRecord,
        source_event: &str,
        base: &ParentIds,
        agg: &ResultAggregator,
    ) -> RoomStatus {
        let room_key = room_key(room);
        let span = tracing::info_span!("room", room = %room_key);
        let walk = Walk {
            source_event,
            room_key: &room_key,
            agg,
        };
        self.run_room(room, base, &walk).instrument(span).await
    }

    async fn run_room(&self, room: &SourceRecord, base: &ParentIds, walk: &Walk<'_>) -> RoomStatus {
        let started = Instant::now();
        let status = match self.traverse_room(room, base, walk).await {
            Ok(status) => status,
            Err(Interrupted) => {
                walk.agg.record_error(
                    EntityType::Room,
                    walk.room_key,
                    &format!("room {} (interrupted before completion)", walk.room_key),
                    &SyncError::Cancelled,
                );
                RoomStatus::Interrupted
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(status = ?status, duration_ms, "room finished");
        walk.agg.room_finished(RoomTiming {
            source_id: walk.room_key.to_string(),
            name: aliases::display_name(room, EntityType::Room),
            status,
            duration_ms,
        });
        status
    }

    async fn traverse_room(
        &self,
        room: &SourceRecord,
        base: &ParentIds,
        walk: &Walk<'_>,
    ) -> Result<RoomStatus, Interrupted> {
        self.checkpoint()?;
        let subtree = if self.options.skip_files {
            "sessions, sub-sessions, users, moderator links"
        } else {
            "sessions, sub-sessions, users, moderator links, files"
        };
        let task = SyncTask::new(EntityType::Room, room.clone(), base.clone());
        let context = format!("room {} (skipped {subtree})", walk.room_key);
        let Some(room_id) = self.sync_entity(&task, &context, walk.agg).await else {
            return Ok(RoomStatus::Failed);
        };

        let scope = base.clone().with_room(room_id);
        self.sync_sessions(&scope, walk).await?;
        self.sync_users(&scope, walk).await?;
        if !self.options.skip_files {
            self.sync_files(&scope, walk).await?;
        }
        Ok(RoomStatus::Completed)
    }

    async fn sync_sessions(&self, scope: &ParentIds, walk: &Walk<'_>) -> Result<(), Interrupted> {
        let sessions = match self
            .ctx
            .source
            .get_sessions(walk.source_event, walk.room_key)
            .await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                self.fetch_failed(EntityType::Session, walk.room_key, "sessions", walk, err);
                return Ok(());
            }
        };
        tracing::debug!(count = sessions.len(), "sessions fetched");

        for session in sessions {
            self.checkpoint()?;
            let task = SyncTask::new(EntityType::Session, session, scope.clone());
            let session_key = source_key(&task);
            let context = format!(
                "room {} / session {session_key} (skipped sub-sessions)",
                walk.room_key
            );
            let Some(session_id) = self.sync_entity(&task, &context, walk.agg).await else {
                continue;
            };

            let subs = match self.ctx.source.get_sub_sessions(&session_key).await {
                Ok(subs) => subs,
                Err(err) => {
                    self.fetch_failed(EntityType::SubSession, &session_key, "sub-sessions", walk, err);
                    continue;
                }
            };
            let sub_scope = scope.clone().with_session(session_id);
            let context = format!("room {} / session {session_key}", walk.room_key);
            for (idx, sub) in subs.into_iter().enumerate() {
                self.checkpoint()?;
                let task = SyncTask::new(EntityType::SubSession, sub, sub_scope.clone())
                    .with_override("order", idx as u64 + 1);
                self.sync_entity(&task, &context, walk.agg).await;
            }
        }
        Ok(())
    }

    async fn sync_users(&self, scope: &ParentIds, walk: &Walk<'_>) -> Result<(), Interrupted> {
        let users = match self
            .ctx
            .source
            .get_users(walk.source_event, walk.room_key)
            .await
        {
            Ok(users) => users,
            Err(err) => {
                self.fetch_failed(EntityType::User, walk.room_key, "users", walk, err);
                return Ok(());
            }
        };
        tracing::debug!(count = users.len(), "users fetched");

        for user in users {
            self.checkpoint()?;
            let role = aliases::moderator_role(&user);
            let task = SyncTask::new(EntityType::User, user, scope.clone());
            let user_key = source_key(&task);
            let context = match role {
                Some(_) => format!(
                    "room {} / user {user_key} (skipped moderator link)",
                    walk.room_key
                ),
                None => format!("room {} / user {user_key}", walk.room_key),
            };
            let Some(user_id) = self.sync_entity(&task, &context, walk.agg).await else {
                continue;
            };

            if let Some(role) = role {
                self.checkpoint()?;
                let link = SyncTask::new(
                    EntityType::ModeratorLink,
                    task.record,
                    scope.clone().with_user(user_id),
                )
                .with_override("sourceSystemId", format!("{user_key}@{}", walk.room_key))
                .with_override("role", role);
                let context = format!("room {} / user {user_key}", walk.room_key);
                self.sync_entity(&link, &context, walk.agg).await;
            }
        }
        Ok(())
    }

    async fn sync_files(&self, scope: &ParentIds, walk: &Walk<'_>) -> Result<(), Interrupted> {
        let files = match self
            .ctx
            .source
            .get_files(walk.source_event, walk.room_key)
            .await
        {
            Ok(files) => files,
            Err(err) => {
                self.fetch_failed(EntityType::FileAsset, walk.room_key, "files", walk, err);
                return Ok(());
            }
        };
        tracing::debug!(count = files.len(), "files fetched");

        let context = format!("room {} / files", walk.room_key);
        for file in files {
            self.checkpoint()?;
            self.sync_file(file, scope, &context, walk.agg).await;
        }
        Ok(())
    }

    /// Files are create-only: validate, skip when already in the target,
    /// transfer the content, then create.
    async fn sync_file(
        &self,
        file: SourceRecord,
        scope: &ParentIds,
        context: &str,
        agg: &ResultAggregator,
    ) {
        let kind = EntityType::FileAsset;
        let (Some(source_id), Some(file_ref)) =
            (aliases::source_id(&file, kind), aliases::file_ref(&file))
        else {
            let key = aliases::display_name(&file, kind).unwrap_or_else(|| "<unknown>".into());
            tracing::warn!(file = %key, "file has no identifier, skipping");
            agg.record(
                kind,
                &key,
                context,
                &SyncOutcome::Skipped("missing file identifier".to_string()),
            );
            return;
        };

        let task = SyncTask::new(kind, file, scope.clone());
        // stand-in url so the record is validated before any transfer
        let staged = task
            .clone()
            .with_override("url", format!("https://pending.invalid/{file_ref}"));
        if self.options.dry_run {
            self.sync_entity(&staged, context, agg).await;
            return;
        }

        let prepared = match self.ctx.engine.prepare(&staged) {
            Ok(prepared) => prepared,
            Err(err) => {
                agg.record(kind, &source_id, context, &SyncOutcome::Failed(err.into()));
                return;
            }
        };

        match self.upsert.find_existing(&prepared, scope).await {
            Ok(Some(existing)) => {
                tracing::debug!(file = %file_ref, id = %existing.id, "file already in target");
                agg.record(
                    kind,
                    &source_id,
                    context,
                    &SyncOutcome::Skipped("already present in target".to_string()),
                );
                return;
            }
            Ok(None) => {}
            Err(err) => {
                agg.record(kind, &source_id, context, &SyncOutcome::Failed(err));
                return;
            }
        }

        let metadata = BlobMetadata {
            file_name: prepared.create.name().unwrap_or(&file_ref).to_string(),
            mime_type: prepared
                .create
                .get("mimeType")
                .and_then(Value::as_str)
                .map(str::to_string),
            size: prepared.create.get("size").and_then(Value::as_u64),
            source_id: source_id.clone(),
        };
        let stored = match self.transfer(&file_ref, metadata).await {
            Ok(stored) => stored,
            Err(err) => {
                agg.record(kind, &source_id, context, &SyncOutcome::Failed(err));
                return;
            }
        };

        let task = task
            .with_override("url", stored.url)
            .with_override("blobId", stored.id);
        self.sync_entity(&task, context, agg).await;
    }

    async fn transfer(&self, file_ref: &str, metadata: BlobMetadata) -> Result<StoredBlob, SyncError> {
        let blobs = self
            .ctx
            .blobs
            .as_ref()
            .ok_or_else(|| SyncError::FileIo("no blob store configured".to_string()))?;
        let stream = self
            .ctx
            .source
            .download_file(file_ref)
            .await
            .map_err(|e| SyncError::FileIo(format!("download of {file_ref} failed: {e}")))?;
        let stored = blobs.upload(stream, metadata).await?;
        tracing::debug!(file = file_ref, blob = %stored.id, "file transferred");
        Ok(stored)
    }

    /// Transforms and upserts one task, records its outcome, and returns
    /// the target id children should use.
    async fn sync_entity(
        &self,
        task: &SyncTask,
        context: &str,
        agg: &ResultAggregator,
    ) -> Option<String> {
        let kind = task.entity;
        let prepared = match self.ctx.engine.prepare(task) {
            Ok(prepared) => prepared,
            Err(err) => {
                let source_id = source_key(task);
                tracing::warn!(entity = %kind, source_id = %source_id, error = %err, "transform failed");
                agg.record(kind, &source_id, context, &SyncOutcome::Failed(err.into()));
                return None;
            }
        };
        for warning in &prepared.warnings {
            agg.warn(kind, &prepared.source_id, warning.clone());
        }

        let outcome = if self.options.dry_run {
            SyncOutcome::Planned
        } else {
            match self.upsert.upsert(&prepared, &task.parents).await {
                Ok(UpsertOutcome::Created(entity)) => SyncOutcome::Created(entity),
                Ok(UpsertOutcome::Updated(entity)) => SyncOutcome::Updated(entity),
                Ok(UpsertOutcome::AlreadyPresent) => {
                    SyncOutcome::Skipped("already present in target".to_string())
                }
                Err(err) => SyncOutcome::Failed(err),
            }
        };

        let target_id = match &outcome {
            SyncOutcome::Planned => Some(format!("dry-run:{kind}:{}", prepared.source_id)),
            other => other.target_id().map(str::to_string),
        };
        match &outcome {
            SyncOutcome::Failed(err) => tracing::warn!(
                entity = %kind,
                source_id = %prepared.source_id,
                error = %err,
                "sync failed"
            ),
            _ => tracing::debug!(
                entity = %kind,
                source_id = %prepared.source_id,
                target_id = ?target_id,
                "synced"
            ),
        }
        agg.record(kind, &prepared.source_id, context, &outcome);
        target_id
    }

    fn fetch_failed(
        &self,
        entity: EntityType,
        scope_key: &str,
        what: &str,
        walk: &Walk<'_>,
        err: SourceError,
    ) {
        tracing::warn!(entity = %entity, scope = scope_key, error = %err, "source fetch failed");
        walk.agg.record_error(
            entity,
            scope_key,
            &format!("room {} / {what} of {scope_key}", walk.room_key),
            &SyncError::from(err),
        );
    }

    fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.ctx.cancel.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

fn room_key(room: &SourceRecord) -> String {
    aliases::room_ref(room).unwrap_or_else(|| "<unknown>".to_string())
}
