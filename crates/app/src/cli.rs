use clap::Parser;
use std::path::PathBuf;

/// Command-line interface for the `eventsync` application.
#[derive(Debug, Parser)]
#[command(
    name = "eventsync",
    version,
    about = "Migrates rooms, sessions, users and files from a legacy event into a target event"
)]
pub struct Cli {
    /// Name of the legacy event to read from.
    pub legacy_source_name: String,
    /// Identifier of the target event to write into.
    pub target_event_id: String,
    /// Only migrate the room with this name (case-insensitive).
    pub room_name: Option<String>,

    /// Base URL of the legacy API.
    #[arg(long, env = "EVENTSYNC_SOURCE_URL", value_name = "URL")]
    pub source_url: String,
    /// Bearer token for the legacy API.
    #[arg(long, env = "EVENTSYNC_SOURCE_TOKEN", hide_env_values = true)]
    pub source_token: Option<String>,
    /// Base URL of the target API.
    #[arg(long, env = "EVENTSYNC_TARGET_URL", value_name = "URL")]
    pub target_url: String,
    /// Bearer token for the target API.
    #[arg(long, env = "EVENTSYNC_TARGET_TOKEN", hide_env_values = true)]
    pub target_token: Option<String>,

    /// Rooms migrated at the same time.
    #[arg(
        long,
        env = "EVENTSYNC_MAX_CONCURRENT",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_concurrent: u32,
    /// Per-request timeout in seconds.
    #[arg(
        long,
        env = "EVENTSYNC_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 30,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,
    /// Retries for transient target failures.
    #[arg(long, env = "EVENTSYNC_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// DTO configuration file (JSON or YAML) replacing the built-in one.
    #[arg(long, value_name = "PATH")]
    pub dto_config: Option<PathBuf>,
    /// Writes the JSON migration report to this file.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Debug logging for the sync engine.
    #[arg(short, long)]
    pub verbose: bool,
    /// Do not migrate file assets.
    #[arg(long)]
    pub skip_files: bool,
    /// Transform and validate everything without writing to the target.
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let result = Cli::try_parse_from([
            "eventsync",
            "legacy",
            "46",
            "--source-url",
            "https://legacy.example.com",
            "--target-url",
            "https://target.example.com",
            "--max-concurrent",
            "0",
        ]);
        assert!(result.is_err());
    }
}
