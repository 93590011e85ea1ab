//! Hierarchical event data sync engine for eventsync.
//!
//! Moves rooms, sessions, sub-sessions, users, moderator links and file
//! assets from a read-only legacy source into a target event, creating or
//! updating each entity so that repeated runs never duplicate anything.
//!
//! The pieces, leaves first:
//!
//! - [`TransformEngine`] resolves source fields through static alias tables
//!   and validates payloads against compiled DTO schemas.
//! - [`UpsertProtocol`] creates, detects conflicts, looks up and updates.
//! - [`SyncOrchestrator`] walks each room's subtree in source order and runs
//!   rooms concurrently through a [`ConcurrencyLimiter`].
//! - [`ResultAggregator`] turns outcomes into a [`MigrationReport`].
//!
//! # Examples
//!
//! ```
//! use eventsync_sync::{dto, EntityType, ParentIds, SourceRecord, SyncTask, TransformEngine};
//! use serde_json::json;
//!
//! let engine = TransformEngine::from_config(&dto::default_config().unwrap()).unwrap();
//! let record = SourceRecord::from_value(json!({
//!     "SubSessionId": "ss-1",
//!     "Title": "Panel",
//!     "start_time": "2024-05-01 09:00:00"
//! }))
//! .unwrap();
//! let task = SyncTask::new(
//!     EntityType::SubSession,
//!     record,
//!     ParentIds::event("46").with_session("s-9"),
//! )
//! .with_override("order", 1);
//!
//! let prepared = engine.prepare(&task).unwrap();
//! assert_eq!(prepared.create.get("startsAt"), Some(&json!("2024-05-01T09:00:00Z")));
//! assert!(!prepared.update.unwrap().contains("sessionId"));
//! ```

#![deny(unsafe_code)]

pub mod aliases;
pub mod connectors;
pub mod dto;
pub mod error;
pub mod limiter;
pub mod model;
pub mod orchestrator;
pub mod report;
pub mod retry;
pub mod transform;
pub mod upsert;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use connectors::{BlobMetadata, BlobTransfer, ByteStream, SourceConnector, StoredBlob, TargetConnector};
pub use eventsync_validate::Operation;
pub use error::{BlobError, ErrorKind, SourceError, SyncError, TargetError, TransformError};
pub use limiter::{ConcurrencyLimiter, Settled};
pub use model::{
    EntityType, EventLocation, MatchPolicy, ParentField, ParentIds, SourceRecord, SyncOutcome,
    SyncTask, TargetEntity, TargetEvent, TargetPayload,
};
pub use orchestrator::{SyncContext, SyncOptions, SyncOrchestrator};
pub use report::{
    EntityCounts, MigrationReport, ReportError, ReportWarning, ResultAggregator, RoomStatus,
    RoomTiming,
};
pub use retry::RetryPolicy;
pub use transform::{Prepared, TransformEngine, Transformed};
pub use upsert::{UpsertOutcome, UpsertProtocol};
