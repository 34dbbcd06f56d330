//! Multi-engine database backup tool
//!
//! Dumps MySQL, PostgreSQL and MongoDB databases found on this host, uploads the compressed
//! artifacts to S3 and removes the local copies that were uploaded.

// dbbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use config::AppConfig;
use std::process::ExitCode;
use tracing::error;

/// Exit status when configuration cannot be read at all; treated like a missing destination.
const CONFIG_ERROR_EXIT: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    utils::logging::init();

    let app_config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Failed to load configuration");
            return ExitCode::from(CONFIG_ERROR_EXIT);
        }
    };

    let outcome = backup::run_backup_flow(&app_config).await;
    ExitCode::from(outcome.exit_code())
}
