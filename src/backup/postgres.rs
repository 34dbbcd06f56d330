// dbbackup/src/backup/postgres.rs
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::artifact::Artifact;
use super::command::{CommandRunner, DumpCommand};
use super::db_dump::{self, EngineDriver, RunContext};
use super::naming::EngineTag;
use crate::config::PostgresConfig;
use crate::errors::DriverError;

const DUMP_TOOL: &str = "pg_dump";
const DUMPALL_TOOL: &str = "pg_dumpall";
const CLIENT_TOOL: &str = "psql";

// Templates, non-connectable databases and the RDS admin database are never dumped.
const LIST_DATABASES_QUERY: &str = "SELECT datname FROM pg_database \
     WHERE datistemplate = false AND datallowconn = true AND datname NOT IN ('rdsadmin');";

pub struct PostgresDriver {
    config: PostgresConfig,
    runner: Arc<dyn CommandRunner>,
}

impl PostgresDriver {
    pub fn new(config: PostgresConfig, runner: Arc<dyn CommandRunner>) -> Self {
        PostgresDriver { config, runner }
    }

    /// Connection settings are handed to libpq through its standard environment variables.
    fn with_connection(&self, mut command: DumpCommand) -> DumpCommand {
        let settings = [
            ("PGHOST", &self.config.host),
            ("PGPORT", &self.config.port),
            ("PGUSER", &self.config.user),
            ("PGPASSWORD", &self.config.password),
        ];
        for (name, value) in settings {
            if let Some(value) = value {
                command = command.env(name, value.as_str());
            }
        }
        command
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        let psql = self.runner.locate(CLIENT_TOOL).ok_or_else(|| {
            DriverError::ToolNotFound(format!("{} (needed to enumerate databases)", CLIENT_TOOL))
        })?;
        let command = self
            .with_connection(DumpCommand::new(psql))
            .args(["-Atc", LIST_DATABASES_QUERY]);
        let output = self
            .runner
            .capture(&command)
            .map_err(|e| DriverError::ConnectionFailed(format!("failed to execute {}: {}", CLIENT_TOOL, e)))?;
        if !output.success {
            return Err(DriverError::EnumerationFailed(output.failure_message()));
        }
        Ok(output.stdout_lines())
    }
}

impl EngineDriver for PostgresDriver {
    fn engine(&self) -> EngineTag {
        EngineTag::Postgres
    }

    fn detect(&self) -> bool {
        self.runner.locate(DUMP_TOOL).is_some() || self.runner.locate(DUMPALL_TOOL).is_some()
    }

    fn backup(&self, ctx: &RunContext) -> Result<Vec<Artifact>> {
        if !self.detect() {
            warn!(engine = %self.engine(), "pg_dump/pg_dumpall not found; skipping Postgres backup");
            return Ok(Vec::new());
        }
        let Some(pg_dump) = self.runner.locate(DUMP_TOOL) else {
            warn!(engine = %self.engine(), "pg_dump not found; cannot dump individual databases");
            return Ok(Vec::new());
        };
        db_dump::ensure_output_dir(&ctx.output_dir)?;

        let databases = match db_dump::select_databases(
            self.engine(),
            self.config.databases.as_deref(),
            || self.list_databases(),
        ) {
            Ok(databases) if databases.is_empty() => {
                warn!(engine = %self.engine(), "No databases found to back up; skipping");
                return Ok(Vec::new());
            }
            Ok(databases) => databases,
            Err(e) => {
                warn!(engine = %self.engine(), error = %e, "Unable to determine databases; skipping");
                return Ok(Vec::new());
            }
        };
        info!(engine = %self.engine(), ?databases, "Databases to be backed up");

        Ok(db_dump::dump_each(self.engine(), &databases, |database| {
            let artifact = db_dump::new_artifact(self.engine(), ctx, database);
            // Custom format; compressed again into the artifact.
            let command = self
                .with_connection(DumpCommand::new(&pg_dump))
                .args(["-d", database, "-Fc"]);
            db_dump::dump_then_compress(self.runner.as_ref(), &command, &artifact)?;
            Ok(artifact)
        }))
    }
}
