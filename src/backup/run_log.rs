// dbbackup/src/backup/run_log.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use super::naming;
use super::s3_upload::{ObjectStore, UploadedArtifact};
use crate::config::StorageConfig;

pub fn run_log_path(output_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    output_dir.join(format!("backup_log_{}.txt", naming::format_timestamp(at)))
}

/// Renders the run summary: a header, then one line per uploaded artifact with its size
/// (read now) and storage location.
pub fn render_run_log(
    at: DateTime<Utc>,
    storage: &StorageConfig,
    uploaded: &[UploadedArtifact],
    store: &dyn ObjectStore,
) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Backup run summary");
    let _ = writeln!(out, "UTC Timestamp: {}", naming::format_timestamp(at));
    let _ = writeln!(out, "S3 Bucket: {}", storage.bucket_name);
    let _ = writeln!(out, "S3 Prefix: {}", storage.folder_prefix.as_deref().unwrap_or(""));
    let _ = writeln!(out);
    let _ = writeln!(out, "Uploaded files:");
    for entry in uploaded {
        let _ = writeln!(
            out,
            "- {} | size={} bytes | {}",
            entry.artifact.path.display(),
            entry.artifact.size_bytes(),
            store.location(&entry.key)
        );
    }
    out
}

pub fn write_run_log(
    output_dir: &Path,
    at: DateTime<Utc>,
    storage: &StorageConfig,
    uploaded: &[UploadedArtifact],
    store: &dyn ObjectStore,
) -> Result<PathBuf> {
    let path = run_log_path(output_dir, at);
    let body = render_run_log(at, storage, uploaded, store);
    fs::write(&path, body).with_context(|| format!("Failed to write backup log: {}", path.display()))?;
    Ok(path)
}
