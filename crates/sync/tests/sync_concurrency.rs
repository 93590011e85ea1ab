//! Concurrency bound and cancellation of sync runs.
//!
//! These run on paused tokio time so the target's simulated latency
//! advances instantly and elapsed time is deterministic.

use std::sync::Arc;
use std::time::Duration;

use eventsync_sync::testing::{MemorySource, MemoryTarget};
use eventsync_sync::{
    dto, EntityType, ErrorKind, RetryPolicy, RoomStatus, SyncContext, SyncOptions,
    SyncOrchestrator, TargetConnector, TransformEngine,
};
use eventsync_test_utils as fx;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SOURCE_EVENT: &str = "legacy-2024";
const TARGET_EVENT: &str = "46";
const LATENCY: Duration = Duration::from_secs(1);

fn orchestrator(
    source: MemorySource,
    target: &Arc<MemoryTarget>,
    cancel: CancellationToken,
    max_concurrent_rooms: usize,
) -> SyncOrchestrator {
    let config = dto::default_config().unwrap();
    let ctx = SyncContext {
        source: Arc::new(source),
        target: Arc::clone(target) as Arc<dyn TargetConnector>,
        blobs: None,
        engine: Arc::new(TransformEngine::from_config(&config).unwrap()),
        cancel,
    };
    SyncOrchestrator::new(
        ctx,
        SyncOptions {
            max_concurrent_rooms,
            skip_files: true,
            retry: RetryPolicy::no_retry(),
            ..Default::default()
        },
    )
}

fn rooms(count: u64) -> MemorySource {
    (0..count).fold(MemorySource::new(), |source, n| {
        source.with_room(SOURCE_EVENT, fx::room(10 + n, &format!("Room {n}")))
    })
}

fn slow_target() -> Arc<MemoryTarget> {
    Arc::new(
        MemoryTarget::new()
            .with_event(TARGET_EVENT, "500")
            .with_latency(LATENCY),
    )
}

#[tokio::test(start_paused = true)]
async fn test_rooms_never_exceed_the_bound() {
    // GIVEN 5 rooms whose only target call takes one second
    let target = slow_target();
    let sync = orchestrator(rooms(5), &target, CancellationToken::new(), 2);

    // WHEN synced two at a time
    let started = Instant::now();
    let report = sync.run(SOURCE_EVENT, TARGET_EVENT).await.unwrap();
    let elapsed = started.elapsed();

    // THEN the run takes three rounds and never overlaps more than two rooms
    assert!(report.success, "errors: {:?}", report.errors);
    assert_eq!(report.rooms_processed, 5);
    assert!(
        elapsed >= 3 * LATENCY && elapsed < 3 * LATENCY + Duration::from_millis(100),
        "elapsed {elapsed:?}"
    );
    assert_eq!(report.peak_concurrency, 2);
    assert_eq!(target.max_in_flight(), 2);
    assert_eq!(report.rooms.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_single_slot_runs_rooms_in_sequence() {
    let target = slow_target();
    let sync = orchestrator(rooms(3), &target, CancellationToken::new(), 1);

    let started = Instant::now();
    let report = sync.run(SOURCE_EVENT, TARGET_EVENT).await.unwrap();

    assert!(started.elapsed() >= 3 * LATENCY);
    assert_eq!(report.peak_concurrency, 1);
    assert_eq!(target.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_admits_no_room() {
    // GIVEN a token that is already cancelled
    let cancel = CancellationToken::new();
    cancel.cancel();
    let target = slow_target();
    let sync = orchestrator(rooms(3), &target, cancel, 2);

    // WHEN run
    let report = sync.run(SOURCE_EVENT, TARGET_EVENT).await.unwrap();

    // THEN every room is reported as not started
    assert!(report.interrupted);
    assert!(!report.success);
    assert!(target.calls().is_empty());
    assert_eq!(report.errors.len(), 3);
    assert!(report.errors.iter().all(|e| e.kind == ErrorKind::Cancelled));
    assert!(report
        .rooms
        .iter()
        .all(|room| room.status == RoomStatus::NotAdmitted));
    assert!(report.format_summary().contains("Migration interrupted"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_run_stops_between_entities() {
    // GIVEN three rooms, one at a time, the first with two sessions
    let source = rooms(3)
        .with_sessions(
            SOURCE_EVENT,
            "10",
            vec![
                fx::session("s1", "Keynote", "2024-05-01 09:00:00", "2024-05-01 10:00:00"),
                fx::session("s2", "Panel", "2024-05-01 11:00:00", "2024-05-01 12:00:00"),
            ],
        )
        .with_sub_sessions("s1", fx::three_parts("s1"));
    let target = slow_target();
    let cancel = CancellationToken::new();
    let sync = orchestrator(source, &target, cancel.clone(), 1);

    // WHEN cancelled while the first session is being created
    tokio::spawn(async move {
        tokio::time::sleep(LATENCY + LATENCY / 2).await;
        cancel.cancel();
    });
    let report = sync.run(SOURCE_EVENT, TARGET_EVENT).await.unwrap();

    // THEN the in-flight request finishes and nothing after it starts
    assert!(report.interrupted);
    assert_eq!(target.count(EntityType::Room), 1);
    assert_eq!(target.count(EntityType::Session), 1);
    assert_eq!(target.count(EntityType::SubSession), 0);

    let statuses: Vec<(String, RoomStatus)> = report
        .rooms
        .iter()
        .map(|r| (r.source_id.clone(), r.status))
        .collect();
    assert!(statuses.contains(&("10".to_string(), RoomStatus::Interrupted)));
    assert!(statuses.contains(&("11".to_string(), RoomStatus::NotAdmitted)));
    assert!(statuses.contains(&("12".to_string(), RoomStatus::NotAdmitted)));
    assert_eq!(report.errors.len(), 3);
    assert!(report.errors.iter().all(|e| e.kind == ErrorKind::Cancelled));
}
