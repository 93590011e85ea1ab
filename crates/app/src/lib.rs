//! Command-line front end for the eventsync migration engine.
//!
//! Parses the CLI, builds HTTP connectors for the legacy source and the
//! target API, runs [`eventsync_sync::SyncOrchestrator`] and renders the
//! report. Logs go to stderr; the summary goes to stdout.

#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod http;
pub mod migrate;
pub mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::config::AppConfig;

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Entry point of the `eventsync` binary.
///
/// Succeeds with [`ExitCode::SUCCESS`] only when every entity synced;
/// a run with entity failures or an interruption exits with 1.
pub fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = AppConfig::from_cli(&cli)?;
    init_tracing(config.log_filter());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let report = runtime.block_on(async {
        let cancel = CancellationToken::new();
        signals::cancel_on_ctrl_c(cancel.clone());
        migrate::execute(&config, cancel).await
    })?;

    println!("{}", report.format_summary());
    if let Some(path) = &config.report {
        migrate::write_report(&report, path)?;
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
