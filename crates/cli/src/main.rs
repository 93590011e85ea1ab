//! Command-line interface for the `eventsync` application.
//!
//! This crate serves as the main entry point for the executable, delegating
//! its functionality to the `eventsync-app` crate.

use std::process::ExitCode;

fn main() -> anyhow::Result<ExitCode> {
    eventsync_app::run()
}
