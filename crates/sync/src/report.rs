//! Migration reporting: per-entity counters, errors, warnings and timings.

use crate::error::{ErrorKind, SyncError};
use crate::model::{EntityType, SyncOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

/// Outcome counters for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Dry run only: transformed and validated, not sent.
    pub planned: usize,
}

impl EntityCounts {
    /// Entities that resolved to a (real or planned) target entity.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.planned
    }

    pub fn total(&self) -> usize {
        self.processed() + self.failed + self.skipped
    }
}

/// One failure, with enough context to re-run just that record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportError {
    pub entity_type: EntityType,
    pub source_id: String,
    /// Where in the hierarchy the failure happened, and what it skipped.
    pub context: String,
    pub message: String,
    pub kind: ErrorKind,
}

/// Soft-policy event that did not fail the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportWarning {
    pub entity_type: EntityType,
    pub source_id: String,
    pub message: String,
}

/// How a room unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Completed,
    /// The room itself failed; its subtree was skipped.
    Failed,
    /// Cancellation stopped the room between entities.
    Interrupted,
    NotAdmitted,
    Panicked,
}

/// Wall-clock time spent on one room unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomTiming {
    pub source_id: String,
    pub name: Option<String>,
    pub status: RoomStatus,
    pub duration_ms: u64,
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub source_event: String,
    pub target_event_id: String,
    pub dry_run: bool,
    /// Cancellation cut the run short.
    pub interrupted: bool,
    /// True iff `errors` is empty.
    pub success: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    pub duration_ms: u64,
    pub rooms_processed: usize,
    pub peak_concurrency: usize,
    pub counts: BTreeMap<EntityType, EntityCounts>,
    pub errors: Vec<ReportError>,
    pub warnings: Vec<ReportWarning>,
    pub rooms: Vec<RoomTiming>,
}

impl MigrationReport {
    /// Counters for one entity type (zeroes when nothing was seen).
    pub fn counts(&self, entity: EntityType) -> EntityCounts {
        self.counts.get(&entity).copied().unwrap_or_default()
    }

    /// Source ids that failed for an entity type, in first-failure order.
    pub fn failed_source_ids(&self, entity: EntityType) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for err in self.errors.iter().filter(|e| e.entity_type == entity) {
            if !ids.contains(&err.source_id.as_str()) {
                ids.push(err.source_id.as_str());
            }
        }
        ids
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Generates a formatted summary for display.
    pub fn format_summary(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { " (dry run)" } else { "" };
        let status = match (self.success, self.interrupted) {
            (_, true) => "Migration interrupted",
            (true, false) => "Migration complete",
            (false, false) => "Migration finished with errors",
        };
        out.push_str(&format!(
            "{status}{mode}: {} → event {}\n",
            self.source_event, self.target_event_id
        ));

        for entity in EntityType::ALL {
            let c = self.counts(entity);
            if c.total() == 0 {
                continue;
            }
            if self.dry_run {
                out.push_str(&format!(
                    "  {:<13} {} planned, {} skipped, {} failed\n",
                    format!("{}:", entity.label()),
                    c.planned,
                    c.skipped,
                    c.failed
                ));
            } else {
                out.push_str(&format!(
                    "  {:<13} {} created, {} updated, {} skipped, {} failed\n",
                    format!("{}:", entity.label()),
                    c.created,
                    c.updated,
                    c.skipped,
                    c.failed
                ));
            }
        }

        out.push_str(&format!(
            "  Rooms processed: {}, peak concurrency: {}, duration: {:.1}s\n",
            self.rooms_processed,
            self.peak_concurrency,
            Duration::from_millis(self.duration_ms).as_secs_f64()
        ));

        if !self.warnings.is_empty() {
            out.push_str(&format!("\nWarnings ({}):\n", self.warnings.len()));
            for w in &self.warnings {
                out.push_str(&format!("  - {} {}: {}\n", w.entity_type, w.source_id, w.message));
            }
        }

        if !self.errors.is_empty() {
            out.push_str(&format!("\nErrors ({}):\n", self.errors.len()));
            for e in &self.errors {
                out.push_str(&format!(
                    "  - {} {} [{}]: {}\n",
                    e.entity_type, e.source_id, e.context, e.message
                ));
            }
        }

        out
    }
}

#[derive(Debug, Default)]
struct ReportState {
    counts: BTreeMap<EntityType, EntityCounts>,
    errors: Vec<ReportError>,
    warnings: Vec<ReportWarning>,
    rooms: Vec<RoomTiming>,
}

/// Collects outcomes from concurrently running rooms.
#[derive(Debug)]
pub struct ResultAggregator {
    source_event: String,
    target_event_id: String,
    dry_run: bool,
    started_at: OffsetDateTime,
    started: tokio::time::Instant,
    state: Mutex<ReportState>,
}

impl ResultAggregator {
    pub fn new(source_event: &str, target_event_id: &str, dry_run: bool) -> Self {
        Self {
            source_event: source_event.to_string(),
            target_event_id: target_event_id.to_string(),
            dry_run,
            started_at: OffsetDateTime::now_utc(),
            started: tokio::time::Instant::now(),
            state: Mutex::new(ReportState::default()),
        }
    }

    /// Records the terminal outcome of one task.
    ///
    /// Failures become report errors; skips are counted and kept as
    /// warnings so the reason stays visible.
    pub fn record(&self, entity: EntityType, source_id: &str, context: &str, outcome: &SyncOutcome) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let counts = state.counts.entry(entity).or_default();
        match outcome {
            SyncOutcome::Created(_) => counts.created += 1,
            SyncOutcome::Updated(_) => counts.updated += 1,
            SyncOutcome::Planned => counts.planned += 1,
            SyncOutcome::Skipped(reason) => {
                counts.skipped += 1;
                state.warnings.push(ReportWarning {
                    entity_type: entity,
                    source_id: source_id.to_string(),
                    message: format!("skipped: {reason}"),
                });
            }
            SyncOutcome::Failed(err) => {
                counts.failed += 1;
                state.errors.push(report_error(entity, source_id, context, err));
            }
        }
    }

    /// Records an error that is not tied to one task's outcome, such as a
    /// failed child-list fetch or a room that never ran.
    pub fn record_error(&self, entity: EntityType, source_id: &str, context: &str, err: &SyncError) {
        self.state
            .lock()
            .errors
            .push(report_error(entity, source_id, context, err));
    }

    /// Records a room unit that panicked.
    pub fn record_panic(&self, source_id: &str, message: &str) {
        self.state.lock().errors.push(ReportError {
            entity_type: EntityType::Room,
            source_id: source_id.to_string(),
            context: format!("room {source_id}"),
            message: format!("room task panicked: {message}"),
            kind: ErrorKind::Panic,
        });
    }

    pub fn warn(&self, entity: EntityType, source_id: &str, message: impl Into<String>) {
        self.state.lock().warnings.push(ReportWarning {
            entity_type: entity,
            source_id: source_id.to_string(),
            message: message.into(),
        });
    }

    pub fn room_finished(&self, timing: RoomTiming) {
        self.state.lock().rooms.push(timing);
    }

    /// Snapshot of the counters for one entity type.
    pub fn counts(&self, entity: EntityType) -> EntityCounts {
        self.state.lock().counts.get(&entity).copied().unwrap_or_default()
    }

    /// Produces the final report.
    pub fn finish(self, peak_concurrency: usize, interrupted: bool) -> MigrationReport {
        let state = self.state.into_inner();
        let rooms_processed = state
            .counts
            .get(&EntityType::Room)
            .map(EntityCounts::processed)
            .unwrap_or(0);
        MigrationReport {
            source_event: self.source_event,
            target_event_id: self.target_event_id,
            dry_run: self.dry_run,
            interrupted,
            success: state.errors.is_empty(),
            started_at: self.started_at,
            finished_at: OffsetDateTime::now_utc(),
            duration_ms: self.started.elapsed().as_millis() as u64,
            rooms_processed,
            peak_concurrency,
            counts: state.counts,
            errors: state.errors,
            warnings: state.warnings,
            rooms: state.rooms,
        }
    }
}

fn report_error(entity: EntityType, source_id: &str, context: &str, err: &SyncError) -> ReportError {
    ReportError {
        entity_type: entity,
        source_id: source_id.to_string(),
        context: context.to_string(),
        message: err.to_string(),
        kind: err.kind(),
    }
}
