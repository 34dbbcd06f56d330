// dbbackup/src/backup/db_dump.rs
//! Engine driver contract and the dump-then-compress protocol shared by every engine.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::archive;
use super::artifact::Artifact;
use super::command::{CommandRunner, DumpCommand};
use super::naming::EngineTag;
use crate::errors::DriverError;
use crate::utils::restrict_permissions;

/// Per-run values every driver needs for naming its artifacts.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub host_id: String,
    pub output_dir: PathBuf,
}

pub trait EngineDriver: Send + Sync {
    fn engine(&self) -> EngineTag;

    /// Whether the dump capability is installed. Never panics, never errors.
    fn detect(&self) -> bool;

    /// Produces one artifact per target database.
    ///
    /// Re-validates its own preconditions and returns an empty list when they fail.
    /// Individual database failures are logged and skipped. An `Err` means the engine as a whole
    /// could not run (for example the output directory is unusable).
    fn backup(&self, ctx: &RunContext) -> Result<Vec<Artifact>>;
}

pub fn ensure_output_dir(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create backup output directory: {}", output_dir.display()))
}

/// Resolves the databases to dump. An explicit list takes precedence over enumeration.
///
/// Names are trimmed and de-duplicated in order. Names that cannot form a safe file name are
/// skipped with a warning.
pub fn select_databases<F>(
    engine: EngineTag,
    explicit: Option<&[String]>,
    enumerate: F,
) -> Result<Vec<String>, DriverError>
where
    F: FnOnce() -> Result<Vec<String>, DriverError>,
{
    let candidates = match explicit {
        Some(list) if !list.is_empty() => list.to_vec(),
        _ => {
            info!(%engine, "No explicit database list configured; enumerating databases");
            enumerate()?
        }
    };

    let mut selected: Vec<String> = Vec::with_capacity(candidates.len());
    for name in candidates {
        let name = name.trim();
        if !is_valid_database_name(name) {
            warn!(%engine, database = %name, "Skipping database with unusable name");
            continue;
        }
        if !selected.iter().any(|existing| existing == name) {
            selected.push(name.to_string());
        }
    }
    Ok(selected)
}

fn is_valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| c == '/' || c == '\\' || c.is_control())
}

/// Runs `make_artifact` for every database, isolating failures to the database they hit.
/// An engine-level error (tool gone, server unreachable) ends the loop for this engine.
pub fn dump_each<F>(engine: EngineTag, databases: &[String], mut make_artifact: F) -> Vec<Artifact>
where
    F: FnMut(&str) -> Result<Artifact, DriverError>,
{
    let mut created = Vec::with_capacity(databases.len());
    for database in databases {
        match make_artifact(database) {
            Ok(artifact) => {
                info!(%engine, %database, path = %artifact.path.display(), "✓ Database backed up");
                created.push(artifact);
            }
            Err(e) if e.is_per_database() => {
                error!(
                    %engine,
                    %database,
                    error = %e,
                    "Database backup failed; continuing with next database"
                );
            }
            Err(e) => {
                error!(
                    %engine,
                    %database,
                    error = %e,
                    "Engine unavailable; skipping remaining databases"
                );
                break;
            }
        }
    }
    created
}

/// Allocates the artifact for `database`, stamped with the current UTC instant.
pub fn new_artifact(engine: EngineTag, ctx: &RunContext, database: &str) -> Artifact {
    Artifact::new(engine, &ctx.host_id, database, Utc::now(), &ctx.output_dir)
}

/// Runs a dump into a scratch file and only on success compresses it into the artifact path.
///
/// A non-zero exit leaves nothing at the artifact path. A failed compression removes the partial
/// artifact.
pub fn dump_then_compress(
    runner: &dyn CommandRunner,
    command: &DumpCommand,
    artifact: &Artifact,
) -> Result<(), DriverError> {
    let database = artifact.database.clone();
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{}_dump_", artifact.engine))
        .tempdir()
        .map_err(|e| DriverError::DumpFailed {
            database: database.clone(),
            message: format!("failed to create scratch directory: {}", e),
        })?;
    let raw_path = scratch.path().join("dump.raw");

    info!(
        engine = %artifact.engine,
        database = %database,
        tool = %command.tool_name(),
        path = %artifact.path.display(),
        "Dumping database"
    );
    let output = runner
        .run_to_file(command, &raw_path)
        .map_err(|e| DriverError::DumpFailed {
            database: database.clone(),
            message: format!("failed to execute {}: {}", command.tool_name(), e),
        })?;
    if !output.success {
        return Err(DriverError::DumpFailed {
            database,
            message: format!("{} failed with {}", command.tool_name(), output.failure_message()),
        });
    }

    if let Err(e) = archive::gzip_file(&raw_path, &artifact.path) {
        discard_partial(&artifact.path);
        return Err(DriverError::ArchiveWriteFailed {
            database,
            message: format!("{:#}", e),
        });
    }
    restrict_permissions(&artifact.path);
    Ok(())
}

/// Removes a partially written artifact, ignoring a file that was never created.
pub fn discard_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove partial artifact");
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted command runner shared by the engine driver tests.

    use super::super::command::{CommandOutput, CommandRunner, DumpCommand};
    use std::collections::HashSet;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    type Responder = Box<dyn Fn(&DumpCommand) -> CommandOutput + Send + Sync>;

    pub struct ScriptedRunner {
        tools: HashSet<String>,
        respond: Responder,
        pub calls: Mutex<Vec<DumpCommand>>,
    }

    impl ScriptedRunner {
        pub fn new<F>(tools: &[&str], respond: F) -> Self
        where
            F: Fn(&DumpCommand) -> CommandOutput + Send + Sync + 'static,
        {
            ScriptedRunner {
                tools: tools.iter().map(|t| t.to_string()).collect(),
                respond: Box::new(respond),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn recorded(&self) -> Vec<DumpCommand> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub fn ok(stdout: &[u8]) -> CommandOutput {
        CommandOutput {
            success: true,
            code: Some(0),
            stdout: stdout.to_vec(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            success: false,
            code: Some(code),
            stdout: Vec::new(),
            stderr: stderr.to_string(),
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn locate(&self, tool: &str) -> Option<PathBuf> {
            self.tools
                .contains(tool)
                .then(|| PathBuf::from("/usr/bin").join(tool))
        }

        fn capture(&self, command: &DumpCommand) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(command.clone());
            Ok((self.respond)(command))
        }

        fn run_to_file(&self, command: &DumpCommand, stdout_path: &Path) -> io::Result<CommandOutput> {
            self.calls.lock().unwrap().push(command.clone());
            let mut output = (self.respond)(command);
            std::fs::write(stdout_path, std::mem::take(&mut output.stdout))?;
            Ok(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{failed, ok, ScriptedRunner};
    use super::*;

    fn ctx(dir: &Path) -> RunContext {
        RunContext {
            host_id: "10.0.0.7".into(),
            output_dir: dir.to_path_buf(),
        }
    }

    #[test]
    fn test_explicit_list_wins_over_enumeration() -> Result<()> {
        let explicit = vec!["orders".to_string(), " users ".to_string(), "orders".to_string()];
        let selected = select_databases(EngineTag::Mysql, Some(&explicit), || {
            panic!("enumeration must not run when a list is configured")
        })?;
        assert_eq!(selected, vec!["orders", "users"]);
        Ok(())
    }

    #[test]
    fn test_enumeration_used_without_list() -> Result<()> {
        let selected = select_databases(EngineTag::Postgres, None, || {
            Ok(vec!["app".into(), "../etc".into(), "".into(), "analytics".into()])
        })?;
        assert_eq!(selected, vec!["app", "analytics"]);
        Ok(())
    }

    #[test]
    fn test_enumeration_error_propagates() {
        let result = select_databases(EngineTag::Mongo, None, || {
            Err(DriverError::EnumerationFailed("refused".into()))
        });
        assert!(matches!(result, Err(DriverError::EnumerationFailed(_))));
    }

    #[test]
    fn test_dump_then_compress_success() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mysqldump"], |_| ok(b"-- dump\n"));
        let artifact = new_artifact(EngineTag::Mysql, &ctx(dir.path()), "orders");

        dump_then_compress(&runner, &DumpCommand::new("/usr/bin/mysqldump"), &artifact)?;

        assert!(artifact.exists());
        assert!(artifact.size_bytes() > 0);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(fs::metadata(&artifact.path)?.permissions().mode() & 0o777, 0o600);
        }
        Ok(())
    }

    #[test]
    fn test_failed_dump_creates_no_artifact() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mysqldump"], |_| failed(2, "Unknown database"));
        let artifact = new_artifact(EngineTag::Mysql, &ctx(dir.path()), "ghost");

        let err = dump_then_compress(&runner, &DumpCommand::new("/usr/bin/mysqldump"), &artifact)
            .expect_err("dump must fail");
        assert!(matches!(err, DriverError::DumpFailed { .. }));
        assert!(err.to_string().contains("Unknown database"));
        assert!(!artifact.exists());
        Ok(())
    }

    #[test]
    fn test_compress_failure_reports_archive_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["pg_dump"], |_| ok(b"PGDMP"));
        // Output directory does not exist, so the artifact cannot be created.
        let missing = dir.path().join("missing");
        let artifact = new_artifact(EngineTag::Postgres, &ctx(&missing), "app");

        let err = dump_then_compress(&runner, &DumpCommand::new("/usr/bin/pg_dump"), &artifact)
            .expect_err("archive must fail");
        assert!(matches!(err, DriverError::ArchiveWriteFailed { .. }));
        assert!(!artifact.exists());
        Ok(())
    }

    #[test]
    fn test_dump_each_isolates_failures() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = ctx(dir.path());
        let databases = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let created = dump_each(EngineTag::Mysql, &databases, |db| {
            if db == "b" {
                return Err(DriverError::DumpFailed {
                    database: db.into(),
                    message: "boom".into(),
                });
            }
            Ok(new_artifact(EngineTag::Mysql, &context, db))
        });
        let names: Vec<&str> = created.iter().map(|a| a.database.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        Ok(())
    }

    #[test]
    fn test_dump_each_stops_on_engine_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let context = ctx(dir.path());
        let databases = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut attempted = Vec::new();
        let created = dump_each(EngineTag::Mongo, &databases, |db| {
            attempted.push(db.to_string());
            if db == "b" {
                return Err(DriverError::ConnectionFailed("connection refused".into()));
            }
            Ok(new_artifact(EngineTag::Mongo, &context, db))
        });
        let names: Vec<&str> = created.iter().map(|a| a.database.as_str()).collect();
        assert_eq!(names, vec!["a"]);
        assert_eq!(attempted, vec!["a", "b"]);
        Ok(())
    }
}
