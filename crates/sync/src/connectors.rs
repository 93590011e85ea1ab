//! Collaborator seams: the legacy source, the target API and blob storage.

use crate::error::{BlobError, SourceError, TargetError};
use crate::model::{EntityType, EventLocation, ParentIds, SourceRecord, TargetEntity, TargetEvent, TargetPayload};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

#[cfg(test)]
use mockall::automock;

/// File content streamed from the source to the blob store.
pub type ByteStream = BoxStream<'static, Result<Bytes, SourceError>>;

/// Read-only legacy system.
///
/// Collection calls return an empty list when nothing exists. Only an
/// unknown root event yields [`SourceError::NotFound`].
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn get_rooms(&self, event: &str) -> Result<Vec<SourceRecord>, SourceError>;

    async fn get_sessions(&self, event: &str, room_ref: &str)
        -> Result<Vec<SourceRecord>, SourceError>;

    async fn get_sub_sessions(&self, session_ref: &str) -> Result<Vec<SourceRecord>, SourceError>;

    async fn get_users(&self, event: &str, room_ref: &str) -> Result<Vec<SourceRecord>, SourceError>;

    async fn get_files(&self, event: &str, scope_ref: &str)
        -> Result<Vec<SourceRecord>, SourceError>;

    async fn download_file(&self, file_ref: &str) -> Result<ByteStream, SourceError>;
}

/// Mutable target system.
///
/// `scope` carries the parent ids that address the collection an entity
/// lives in (event for rooms and users, room for sessions, and so on).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TargetConnector: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<Option<TargetEvent>, TargetError>;

    async fn get_event_locations(&self, event_id: &str) -> Result<Vec<EventLocation>, TargetError>;

    async fn create(
        &self,
        kind: EntityType,
        scope: &ParentIds,
        payload: &TargetPayload,
    ) -> Result<TargetEntity, TargetError>;

    async fn update(
        &self,
        kind: EntityType,
        id: &str,
        payload: &TargetPayload,
    ) -> Result<TargetEntity, TargetError>;

    async fn list(&self, kind: EntityType, scope: &ParentIds)
        -> Result<Vec<TargetEntity>, TargetError>;
}

/// Describes an upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub file_name: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub source_id: String,
}

/// Where an uploaded blob ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub id: String,
    pub url: String,
}

/// Stores file content and returns an addressable location.
#[async_trait]
pub trait BlobTransfer: Send + Sync {
    async fn upload(&self, stream: ByteStream, metadata: BlobMetadata)
        -> Result<StoredBlob, BlobError>;
}
