//! Wires the HTTP connectors into the sync engine and runs one migration.

use anyhow::{Context, Result};
use eventsync_sync::{
    dto, BlobTransfer, MigrationReport, SyncContext, SyncOrchestrator, TransformEngine,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::http::{ApiClient, HttpBlobs, HttpSource, HttpTarget};

/// Builds the engine context for `config`.
pub fn build_context(config: &AppConfig, cancel: CancellationToken) -> Result<SyncContext> {
    let dto = dto::load_config(config.dto_config.as_deref())
        .context("failed to load DTO configuration")?;
    let engine = TransformEngine::from_config(&dto).context("invalid DTO configuration")?;

    let pool = config.max_concurrent;
    let source = ApiClient::new(&config.source, config.timeout, pool)?;
    let target = ApiClient::new(&config.target, config.timeout, pool)?;
    let blobs: Option<Arc<dyn BlobTransfer>> = if config.skip_files {
        None
    } else {
        Some(Arc::new(HttpBlobs::new(target.clone())))
    };

    Ok(SyncContext {
        source: Arc::new(HttpSource::new(source)),
        target: Arc::new(HttpTarget::new(target)),
        blobs,
        engine: Arc::new(engine),
        cancel,
    })
}

/// Runs the migration described by `config`.
///
/// Configuration problems found before anything is written come back as
/// errors; everything else is in the report.
pub async fn execute(config: &AppConfig, cancel: CancellationToken) -> Result<MigrationReport> {
    let ctx = build_context(config, cancel)?;
    let orchestrator = SyncOrchestrator::new(ctx, config.sync_options());
    let report = orchestrator
        .run(&config.source_event, &config.target_event_id)
        .await
        .with_context(|| {
            format!(
                "cannot migrate {} into target event {}",
                config.source_event, config.target_event_id
            )
        })?;
    Ok(report)
}

/// Writes the report as pretty JSON.
pub fn write_report(report: &MigrationReport, path: &Path) -> Result<()> {
    let json = report
        .to_json_pretty()
        .context("failed to serialize migration report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "report written");
    Ok(())
}
