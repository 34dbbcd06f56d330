// dbbackup/src/backup/mysql.rs
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use super::artifact::Artifact;
use super::command::{CommandRunner, DumpCommand};
use super::db_dump::{self, EngineDriver, RunContext};
use super::naming::EngineTag;
use crate::config::MysqlConfig;
use crate::errors::DriverError;

const DUMP_TOOL: &str = "mysqldump";
const CLIENT_TOOL: &str = "mysql";
const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "performance_schema", "mysql", "sys"];

pub struct MysqlDriver {
    config: MysqlConfig,
    runner: Arc<dyn CommandRunner>,
}

impl MysqlDriver {
    pub fn new(config: MysqlConfig, runner: Arc<dyn CommandRunner>) -> Self {
        MysqlDriver { config, runner }
    }

    /// Connection flags shared by the client and dump tool. The password travels via `MYSQL_PWD`.
    fn with_connection(&self, command: DumpCommand) -> DumpCommand {
        let mut command = command
            .args(["-h", self.config.host.as_str()])
            .args(["-P", self.config.port.as_str()]);
        if let Some(user) = &self.config.user {
            command = command.args(["-u", user.as_str()]);
        }
        if let Some(ssl_mode) = &self.config.ssl_mode {
            command = command.args(["--ssl-mode", ssl_mode.as_str()]);
        }
        if let Some(password) = &self.config.password {
            command = command.env("MYSQL_PWD", password.as_str());
        }
        command
    }

    fn list_databases(&self) -> Result<Vec<String>, DriverError> {
        let client = self.runner.locate(CLIENT_TOOL).ok_or_else(|| {
            DriverError::ToolNotFound(format!("{} client (needed to enumerate databases)", CLIENT_TOOL))
        })?;
        let command = self
            .with_connection(DumpCommand::new(client))
            .args(["-N", "-e", "SHOW DATABASES;"]);
        let output = self
            .runner
            .capture(&command)
            .map_err(|e| DriverError::ConnectionFailed(format!("failed to execute {}: {}", CLIENT_TOOL, e)))?;
        if !output.success {
            return Err(DriverError::EnumerationFailed(output.failure_message()));
        }
        Ok(output
            .stdout_lines()
            .into_iter()
            .filter(|name| !SYSTEM_SCHEMAS.contains(&name.as_str()))
            .collect())
    }
}

impl EngineDriver for MysqlDriver {
    fn engine(&self) -> EngineTag {
        EngineTag::Mysql
    }

    fn detect(&self) -> bool {
        self.runner.locate(DUMP_TOOL).is_some()
    }

    fn backup(&self, ctx: &RunContext) -> Result<Vec<Artifact>> {
        let Some(dump_tool) = self.runner.locate(DUMP_TOOL) else {
            warn!(engine = %self.engine(), "{} not found; skipping MySQL backup", DUMP_TOOL);
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
            let command = self
                .with_connection(DumpCommand::new(&dump_tool))
                .args(["--single-transaction", "--routines", "--triggers"])
                .arg(database);
            db_dump::dump_then_compress(self.runner.as_ref(), &command, &artifact)?;
            Ok(artifact)
        }))
    }
}
