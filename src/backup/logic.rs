// dbbackup/src/backup/logic.rs
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::artifact::Artifact;
use super::db_dump::{EngineDriver, RunContext};
use super::naming;
use super::run_log;
use super::s3_upload::{self, ObjectStore, UploadTarget, UploadedArtifact};
use crate::config::{AppConfig, StorageConfig};

/// Final state of a run; each variant has its own process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { deleted: usize, failed_deletions: usize },
    NothingToUpload,
    InvalidDestination,
    UploadFailed,
}

impl RunOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            RunOutcome::Completed { .. } => 0,
            RunOutcome::NothingToUpload => 1,
            RunOutcome::InvalidDestination => 2,
            RunOutcome::UploadFailed => 3,
        }
    }
}

#[derive(Debug, Default)]
struct DeletionReport {
    deleted: usize,
    failed: Vec<(PathBuf, String)>,
}

/// Runs every stage of a backup: dump, upload, log, clean up.
///
/// Engines run one after another and cannot affect each other. Only artifacts confirmed by the
/// upload stage are ever deleted.
pub async fn perform_backup_orchestration(
    app_config: &AppConfig,
    drivers: &[Box<dyn EngineDriver>],
    resolve_host_id: &dyn Fn() -> String,
    open_store: &dyn Fn(&StorageConfig) -> Arc<dyn ObjectStore>,
) -> RunOutcome {
    let Some(storage) = app_config.storage.as_ref() else {
        error!("S3_BUCKET environment variable is required");
        return RunOutcome::InvalidDestination;
    };

    let ctx = RunContext {
        host_id: resolve_host_id(),
        output_dir: app_config.output_dir.clone(),
    };
    info!(host_id = %ctx.host_id, output_dir = %ctx.output_dir.display(), "🚀 Starting database backup run");

    let created = collect_artifacts(drivers, &ctx);
    if created.is_empty() {
        warn!("No backups were created. Nothing to upload.");
        return RunOutcome::NothingToUpload;
    }

    let store = open_store(storage);
    let target = UploadTarget {
        host_id: ctx.host_id.clone(),
        date_folder: naming::date_folder(Utc::now()),
        prefix: storage.folder_prefix.clone(),
    };
    let uploaded = match s3_upload::upload_all(&created, store.as_ref(), &target).await {
        Ok(uploaded) => uploaded,
        Err(e) => {
            error!(error = %format!("{:#}", e), "Upload to S3 failed");
            error!(preserved = created.len(), "Local backup files preserved due to upload failure.");
            return RunOutcome::UploadFailed;
        }
    };

    match run_log::write_run_log(&ctx.output_dir, Utc::now(), storage, &uploaded, store.as_ref()) {
        Ok(path) => info!(path = %path.display(), "Wrote backup log"),
        Err(e) => error!(error = %format!("{:#}", e), "Failed to write backup log"),
    }

    let report = delete_uploaded(&uploaded);
    if !report.failed.is_empty() {
        warn!(
            count = report.failed.len(),
            "Failed to delete local file(s). They may need manual cleanup."
        );
    }
    info!(
        deleted = report.deleted,
        "🎉 Backup and upload completed successfully"
    );
    RunOutcome::Completed {
        deleted: report.deleted,
        failed_deletions: report.failed.len(),
    }
}

fn collect_artifacts(drivers: &[Box<dyn EngineDriver>], ctx: &RunContext) -> Vec<Artifact> {
    let mut created = Vec::new();
    for driver in drivers {
        let engine = driver.engine();
        if !driver.detect() {
            info!(%engine, "Dump tools not found; skipping engine");
            continue;
        }
        match driver.backup(ctx) {
            Ok(artifacts) => {
                info!(%engine, count = artifacts.len(), "Engine backup finished");
                created.extend(artifacts);
            }
            Err(e) => error!(%engine, error = %format!("{:#}", e), "Engine backup failed"),
        }
    }
    created
}

fn delete_uploaded(uploaded: &[UploadedArtifact]) -> DeletionReport {
    let mut report = DeletionReport::default();
    for entry in uploaded {
        let path = &entry.artifact.path;
        match fs::remove_file(path) {
            Ok(()) => {
                report.deleted += 1;
                info!(path = %path.display(), "Deleted local backup file");
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "Backup file already removed");
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Failed to delete local backup file");
                report.failed.push((path.clone(), e.to_string()));
            }
        }
    }
    report
}
