use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::naming::{self, EngineTag};

/// One database's compressed backup on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub engine: EngineTag,
    pub host_id: String,
    pub database: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

impl Artifact {
    /// Derives the artifact path inside `output_dir` from its naming components.
    pub fn new(
        engine: EngineTag,
        host_id: &str,
        database: &str,
        timestamp: DateTime<Utc>,
        output_dir: &Path,
    ) -> Self {
        let file_name = naming::artifact_filename(engine, host_id, database, timestamp);
        Artifact {
            engine,
            host_id: host_id.to_string(),
            database: database.to_string(),
            timestamp,
            path: output_dir.join(file_name),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Size on disk, read at call time. Missing or unreadable files report zero.
    pub fn size_bytes(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }
}
