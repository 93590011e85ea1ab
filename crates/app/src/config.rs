//! Resolved run configuration.
//!
//! Values come from CLI flags with `EVENTSYNC_*` environment fallbacks
//! (handled by clap). This module turns the raw strings into typed,
//! validated settings and the engine's [`SyncOptions`].

use anyhow::{bail, Context, Result};
use eventsync_sync::{RetryPolicy, SyncOptions};
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

/// One HTTP API the run talks to.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub base_url: Url,
    pub token: Option<String>,
}

/// Everything needed to run one migration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub source: Endpoint,
    pub target: Endpoint,
    pub source_event: String,
    pub target_event_id: String,
    pub room_name: Option<String>,
    pub max_concurrent: usize,
    pub timeout: Duration,
    pub max_retries: u32,
    pub dto_config: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub verbose: bool,
    pub skip_files: bool,
    pub dry_run: bool,
}

impl AppConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let source_event = cli.legacy_source_name.trim();
        if source_event.is_empty() {
            bail!("legacy source name must not be empty");
        }
        let target_event_id = cli.target_event_id.trim();
        if target_event_id.is_empty() {
            bail!("target event id must not be empty");
        }

        Ok(Self {
            source: Endpoint {
                base_url: parse_base_url("EVENTSYNC_SOURCE_URL", &cli.source_url)?,
                token: non_blank(cli.source_token.as_deref()),
            },
            target: Endpoint {
                base_url: parse_base_url("EVENTSYNC_TARGET_URL", &cli.target_url)?,
                token: non_blank(cli.target_token.as_deref()),
            },
            source_event: source_event.to_string(),
            target_event_id: target_event_id.to_string(),
            room_name: non_blank(cli.room_name.as_deref()),
            max_concurrent: cli.max_concurrent.max(1) as usize,
            timeout: Duration::from_secs(cli.timeout.max(1)),
            max_retries: cli.max_retries,
            dto_config: cli.dto_config.clone(),
            report: cli.report.clone(),
            verbose: cli.verbose,
            skip_files: cli.skip_files,
            dry_run: cli.dry_run,
        })
    }

    /// Default log filter; `RUST_LOG` overrides it.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "info,eventsync_sync=debug,eventsync_app=debug"
        } else {
            "info"
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrent_rooms: self.max_concurrent,
            dry_run: self.dry_run,
            skip_files: self.skip_files,
            room_name: self.room_name.clone(),
            retry: RetryPolicy::new(self.max_retries),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parses an API base URL; only absolute http(s) URLs are accepted.
fn parse_base_url(var: &str, raw: &str) -> Result<Url> {
    let raw = raw.trim();
    let url = Url::parse(raw).with_context(|| format!("invalid {var} url: {raw}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("{var} must be an http(s) url, got {raw}");
    }
    if url.cannot_be_a_base() {
        bail!("{var} cannot be used as a base url: {raw}");
    }
    Ok(url)
}
