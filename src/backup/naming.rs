// dbbackup/src/backup/naming.rs
//! Artifact naming and storage key layout.
//!
//! Everything here is pure. Artifact file names look like
//! `{engine}_{host}_{database}_{YYYYMMDDThhmmssZ}.{ext}` and storage keys like
//! `[prefix/]{host}/{engine}/{YYYY-MM-DD}/{file name}`.

use chrono::{DateTime, Utc};
use std::fmt;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
pub const DATE_FOLDER_FORMAT: &str = "%Y-%m-%d";
pub const UNKNOWN_ENGINE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTag {
    Mysql,
    Postgres,
    Mongo,
}

impl EngineTag {
    pub const ALL: [EngineTag; 3] = [EngineTag::Mysql, EngineTag::Postgres, EngineTag::Mongo];

    pub fn as_str(self) -> &'static str {
        match self {
            EngineTag::Mysql => "mysql",
            EngineTag::Postgres => "postgres",
            EngineTag::Mongo => "mongo",
        }
    }

    /// File extension of the compressed artifact, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            EngineTag::Mysql | EngineTag::Postgres => "sql.gz",
            EngineTag::Mongo => "archive.gz",
        }
    }
}

impl fmt::Display for EngineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn date_folder(at: DateTime<Utc>) -> String {
    at.format(DATE_FOLDER_FORMAT).to_string()
}

pub fn artifact_filename(
    engine: EngineTag,
    host_id: &str,
    database: &str,
    timestamp: DateTime<Utc>,
) -> String {
    format!(
        "{}_{}_{}_{}.{}",
        engine.as_str(),
        host_id,
        database,
        format_timestamp(timestamp),
        engine.extension()
    )
}

/// Infers the engine from the leading underscore-delimited token of a file name.
///
/// This is the only place the inference lives; every key computation goes through it.
pub fn classify_engine(filename: &str) -> Option<EngineTag> {
    let lowered = filename.to_ascii_lowercase();
    let (leading, _) = lowered.split_once('_')?;
    EngineTag::ALL.into_iter().find(|engine| engine.as_str() == leading)
}

/// Builds `[prefix/]host_id/engine/date_folder/filename`.
/// Leading and trailing `/` are stripped from the prefix; an empty prefix is ignored.
pub fn build_key(
    host_id: &str,
    engine: Option<EngineTag>,
    date_folder: &str,
    filename: &str,
    prefix: Option<&str>,
) -> String {
    let engine = engine.map(EngineTag::as_str).unwrap_or(UNKNOWN_ENGINE);
    let key = format!("{}/{}/{}/{}", host_id, engine, date_folder, filename);
    match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}", prefix, key),
        None => key,
    }
}

/// Storage key for a local artifact file name, classifying its engine from the name itself.
pub fn key_for_filename(
    filename: &str,
    host_id: &str,
    date_folder: &str,
    prefix: Option<&str>,
) -> String {
    build_key(host_id, classify_engine(filename), date_folder, filename, prefix)
}
