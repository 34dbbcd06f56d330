// dbbackup/src/backup/mongo.rs
//! Document-store driver: each collection is exported as a BSON stream and all collections of a
//! database are bundled into one gzip tar archive.

use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::archive;
use super::artifact::Artifact;
use super::command::{CommandOutput, CommandRunner, DumpCommand};
use super::db_dump::{self, EngineDriver, RunContext};
use super::naming::EngineTag;
use crate::config::MongoConfig;
use crate::errors::DriverError;
use crate::utils::restrict_permissions;

const DUMP_TOOL: &str = "mongodump";
const SHELL_TOOL: &str = "mongosh";
const EMPTY_MARKER_NAME: &str = "EMPTY_DB.txt";
const EMPTY_MARKER_BODY: &str = "No collections";

#[derive(Debug, Deserialize)]
struct DatabaseListing {
    databases: Vec<DatabaseEntry>,
}

#[derive(Debug, Deserialize)]
struct DatabaseEntry {
    name: String,
}

pub struct MongoDriver {
    config: MongoConfig,
    runner: Arc<dyn CommandRunner>,
}

impl MongoDriver {
    pub fn new(config: MongoConfig, runner: Arc<dyn CommandRunner>) -> Self {
        MongoDriver { config, runner }
    }

    fn shell(&self, uri: &str, script: String) -> Result<CommandOutput, DriverError> {
        let shell = self
            .runner
            .locate(SHELL_TOOL)
            .ok_or_else(|| DriverError::ToolNotFound(SHELL_TOOL.to_string()))?;
        let command = DumpCommand::new(shell)
            .arg(uri)
            .args(["--quiet", "--norc", "--eval"])
            .arg(script);
        self.runner
            .capture(&command)
            .map_err(|e| DriverError::ConnectionFailed(format!("failed to execute {}: {}", SHELL_TOOL, e)))
    }

    fn list_databases(&self, uri: &str) -> Result<Vec<String>, DriverError> {
        let output = self.shell(
            uri,
            "print(JSON.stringify(db.adminCommand({ listDatabases: 1, nameOnly: true })))".to_string(),
        )?;
        if !output.success {
            return Err(DriverError::EnumerationFailed(output.failure_message()));
        }
        let listing: DatabaseListing = parse_last_json_line(&output)
            .map_err(|e| DriverError::EnumerationFailed(format!("unexpected listDatabases output: {}", e)))?;
        Ok(listing.databases.into_iter().map(|entry| entry.name).collect())
    }

    fn list_collections(&self, uri: &str, database: &str) -> Result<Vec<String>, DriverError> {
        let quoted = serde_json::to_string(database).map_err(|e| DriverError::DumpFailed {
            database: database.to_string(),
            message: e.to_string(),
        })?;
        let output = self.shell(
            uri,
            format!("print(JSON.stringify(db.getSiblingDB({}).getCollectionNames()))", quoted),
        )?;
        if !output.success {
            return Err(DriverError::DumpFailed {
                database: database.to_string(),
                message: format!("listing collections failed with {}", output.failure_message()),
            });
        }
        parse_last_json_line(&output).map_err(|e| DriverError::DumpFailed {
            database: database.to_string(),
            message: format!("unexpected collection listing output: {}", e),
        })
    }

    /// Writes one `<collection>.bson` per collection into `staging`, or the empty-database
    /// marker when there are none.
    fn export_collections(
        &self,
        uri: &str,
        dump_tool: &Path,
        database: &str,
        staging: &Path,
    ) -> Result<(), DriverError> {
        let dump_failed = |message: String| DriverError::DumpFailed {
            database: database.to_string(),
            message,
        };

        let collections = self.list_collections(uri, database)?;
        if collections.is_empty() {
            std::fs::write(staging.join(EMPTY_MARKER_NAME), EMPTY_MARKER_BODY)
                .map_err(|e| dump_failed(format!("failed to write empty-database marker: {}", e)))?;
            return Ok(());
        }

        let server = server_uri(uri);
        for collection in &collections {
            let bson_path = staging.join(format!("{}.bson", collection_file_stem(collection)));
            let command = DumpCommand::new(dump_tool)
                .arg(format!("--uri={}", server))
                .arg(format!("--db={}", database))
                .arg(format!("--collection={}", collection))
                .args(["--out=-", "--quiet"]);
            debug!(engine = %EngineTag::Mongo, %database, %collection, "Exporting collection");
            let output = self
                .runner
                .run_to_file(&command, &bson_path)
                .map_err(|e| dump_failed(format!("failed to execute {}: {}", DUMP_TOOL, e)))?;
            if !output.success {
                return Err(dump_failed(format!(
                    "{} of collection '{}' failed with {}",
                    DUMP_TOOL,
                    collection,
                    output.failure_message()
                )));
            }
        }
        Ok(())
    }

    fn backup_database(
        &self,
        uri: &str,
        dump_tool: &Path,
        ctx: &RunContext,
        database: &str,
    ) -> Result<Artifact, DriverError> {
        let artifact = db_dump::new_artifact(self.engine(), ctx, database);
        info!(engine = %self.engine(), %database, path = %artifact.path.display(), "Dumping database");

        let staging = tempfile::Builder::new()
            .prefix(&format!("mongo_{}_", collection_file_stem(database)))
            .tempdir()
            .map_err(|e| DriverError::DumpFailed {
                database: database.to_string(),
                message: format!("failed to create scratch directory: {}", e),
            })?;
        self.export_collections(uri, dump_tool, database, staging.path())?;

        if let Err(e) = archive::create_tar_gz_archive(staging.path(), &artifact.path) {
            db_dump::discard_partial(&artifact.path);
            return Err(DriverError::ArchiveWriteFailed {
                database: database.to_string(),
                message: format!("{:#}", e),
            });
        }
        restrict_permissions(&artifact.path);
        Ok(artifact)
    }
}

impl EngineDriver for MongoDriver {
    fn engine(&self) -> EngineTag {
        EngineTag::Mongo
    }

    fn detect(&self) -> bool {
        self.runner.locate(DUMP_TOOL).is_some() && self.runner.locate(SHELL_TOOL).is_some()
    }

    fn backup(&self, ctx: &RunContext) -> Result<Vec<Artifact>> {
        let (Some(dump_tool), Some(_)) = (self.runner.locate(DUMP_TOOL), self.runner.locate(SHELL_TOOL)) else {
            warn!(engine = %self.engine(), "mongodump/mongosh not available; skipping MongoDB backup");
            return Ok(Vec::new());
        };
        let Some(uri) = self.config.uri.as_deref() else {
            warn!(
                engine = %self.engine(),
                "MONGO_URI (or MONGO_HOST) is required for MongoDB backup; skipping"
            );
            return Ok(Vec::new());
        };
        db_dump::ensure_output_dir(&ctx.output_dir)?;

        let databases = match db_dump::select_databases(
            self.engine(),
            self.config.databases.as_deref(),
            || self.list_databases(uri),
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
            self.backup_database(uri, &dump_tool, ctx, database)
        }))
    }
}

/// mongosh may print banners or warnings; the payload is the last non-empty line.
fn parse_last_json_line<T: serde::de::DeserializeOwned>(output: &CommandOutput) -> serde_json::Result<T> {
    let lines = output.stdout_lines();
    let payload = lines.last().map(String::as_str).unwrap_or("");
    serde_json::from_str(payload)
}

/// Drops any database path from a connection string, keeping the query options.
/// mongodump refuses a `--db` that differs from the database named in `--uri`.
fn server_uri(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let query = tail.find('?').map(|i| &tail[i..]).unwrap_or("");
    format!("{}://{}/{}", scheme, authority, query)
}

/// Percent-escapes path separators so distinct collection names never share a file.
fn collection_file_stem(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F").replace('\\', "%5C")
}

#[cfg(test)]
mod tests {
    use super::super::db_dump::testing::{failed, ok, ScriptedRunner};
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs::File;
    use std::io::Read;

    const URI: &str = "mongodb://backup:pw@127.0.0.1:27017/";

    fn ctx(dir: &Path) -> RunContext {
        RunContext {
            host_id: "10.0.0.9".into(),
            output_dir: dir.to_path_buf(),
        }
    }

    fn config(databases: Option<Vec<&str>>) -> MongoConfig {
        MongoConfig {
            uri: Some(URI.into()),
            databases: databases.map(|d| d.into_iter().map(String::from).collect()),
        }
    }

    fn archive_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
        let mut archive = tar::Archive::new(GzDecoder::new(File::open(path)?));
        let mut entries = Vec::new();
        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = entry.path()?.to_string_lossy().into_owned();
            let mut body = Vec::new();
            entry.read_to_end(&mut body)?;
            entries.push((name, body));
        }
        entries.sort();
        Ok(entries)
    }

    fn fake_server(cmd: &DumpCommand) -> CommandOutput {
        let script = cmd.args.last().cloned().unwrap_or_default();
        match cmd.tool_name().as_str() {
            "mongosh" if script.contains("listDatabases") => ok(
                b"Current Mongosh Log ID: 1\n{\"databases\":[{\"name\":\"shop\"},{\"name\":\"empty\"}],\"ok\":1}\n",
            ),
            "mongosh" if script.contains("\"shop\"") => ok(b"[\"orders\",\"users\"]\n"),
            "mongosh" => ok(b"[]\n"),
            "mongodump" => {
                let collection = cmd
                    .args
                    .iter()
                    .find_map(|a| a.strip_prefix("--collection="))
                    .unwrap_or_default();
                ok(format!("bson:{}", collection).as_bytes())
            }
            _ => failed(127, "unexpected tool"),
        }
    }

    #[test]
    fn test_detect_requires_both_tools() {
        let runner = ScriptedRunner::new(&["mongodump"], fake_server);
        assert!(!MongoDriver::new(config(None), Arc::new(runner)).detect());
        let runner = ScriptedRunner::new(&["mongodump", "mongosh"], fake_server);
        assert!(MongoDriver::new(config(None), Arc::new(runner)).detect());
    }

    #[test]
    fn test_missing_uri_skips_engine() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mongodump", "mongosh"], |_| panic!("nothing should run"));
        let driver = MongoDriver::new(MongoConfig::default(), Arc::new(runner));
        assert!(driver.backup(&ctx(dir.path()))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_bundles_collections_and_marks_empty_databases() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mongodump", "mongosh"], fake_server);
        let driver = MongoDriver::new(config(None), Arc::new(runner));

        let artifacts = driver.backup(&ctx(dir.path()))?;

        assert_eq!(artifacts.len(), 2);
        let shop = &artifacts[0];
        assert_eq!(shop.database, "shop");
        assert!(shop.file_name().starts_with("mongo_10.0.0.9_shop_"));
        assert!(shop.file_name().ends_with(".archive.gz"));
        assert_eq!(
            archive_entries(&shop.path)?,
            vec![
                ("orders.bson".to_string(), b"bson:orders".to_vec()),
                ("users.bson".to_string(), b"bson:users".to_vec()),
            ]
        );

        let empty = &artifacts[1];
        assert_eq!(empty.database, "empty");
        assert_eq!(
            archive_entries(&empty.path)?,
            vec![(EMPTY_MARKER_NAME.to_string(), EMPTY_MARKER_BODY.as_bytes().to_vec())]
        );
        Ok(())
    }

    #[test]
    fn test_failed_collection_export_skips_only_that_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mongodump", "mongosh"], |cmd| {
            if cmd.tool_name() == "mongodump" && cmd.args.iter().any(|a| a == "--collection=users") {
                failed(1, "Failed: error reading collection")
            } else {
                fake_server(cmd)
            }
        });
        let driver = MongoDriver::new(config(Some(vec!["shop", "empty"])), Arc::new(runner));

        let artifacts = driver.backup(&ctx(dir.path()))?;

        let databases: Vec<&str> = artifacts.iter().map(|a| a.database.as_str()).collect();
        assert_eq!(databases, vec!["empty"]);
        assert_eq!(std::fs::read_dir(dir.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn test_listing_failure_skips_engine() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mongodump", "mongosh"], |_| {
            failed(1, "MongoServerSelectionError: connect ECONNREFUSED")
        });
        let driver = MongoDriver::new(config(None), Arc::new(runner));
        assert!(driver.backup(&ctx(dir.path()))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_server_uri_strips_database_path() {
        assert_eq!(
            server_uri("mongodb://u:p@h:27017/admin?authSource=admin"),
            "mongodb://u:p@h:27017/?authSource=admin"
        );
        assert_eq!(server_uri("mongodb://h1:27017,h2:27017/app"), "mongodb://h1:27017,h2:27017/");
        assert_eq!(server_uri("mongodb://a:27017"), "mongodb://a:27017/");
        assert_eq!(
            server_uri("mongodb+srv://u:p@cluster.example.net/?tls=true"),
            "mongodb+srv://u:p@cluster.example.net/?tls=true"
        );
    }

    #[test]
    fn test_uri_database_path_does_not_pin_dumped_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = Arc::new(ScriptedRunner::new(&["mongodump", "mongosh"], fake_server));
        let config = MongoConfig {
            uri: Some("mongodb://u:p@h:27017/admin?authSource=admin".into()),
            databases: Some(vec!["shop".into()]),
        };
        let driver = MongoDriver::new(config, runner.clone());

        let artifacts = driver.backup(&ctx(dir.path()))?;

        assert_eq!(artifacts.len(), 1);
        let dumps: Vec<DumpCommand> = runner
            .recorded()
            .into_iter()
            .filter(|cmd| cmd.tool_name() == "mongodump")
            .collect();
        assert_eq!(dumps.len(), 2);
        for dump in &dumps {
            assert!(dump.args.contains(&"--uri=mongodb://u:p@h:27017/?authSource=admin".to_string()));
            assert!(dump.args.contains(&"--db=shop".to_string()));
        }
        Ok(())
    }

    #[test]
    fn test_similar_collection_names_get_distinct_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = ScriptedRunner::new(&["mongodump", "mongosh"], |cmd| {
            if cmd.tool_name() == "mongosh" {
                ok(br#"["a/b","a_b","a%2Fb"]"#)
            } else {
                fake_server(cmd)
            }
        });
        let driver = MongoDriver::new(config(Some(vec!["shop"])), Arc::new(runner));

        let artifacts = driver.backup(&ctx(dir.path()))?;

        let names: Vec<String> = archive_entries(&artifacts[0].path)?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a%252Fb.bson", "a%2Fb.bson", "a_b.bson"]);
        Ok(())
    }

    #[test]
    fn test_database_name_is_json_quoted_in_scripts() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let runner = Arc::new(ScriptedRunner::new(&["mongodump", "mongosh"], fake_server));
        let driver = MongoDriver::new(config(Some(vec!["we'ird\"db"])), runner.clone());

        driver.backup(&ctx(dir.path()))?;

        let calls = runner.recorded();
        let script = calls[0].args.last().cloned().unwrap_or_default();
        assert!(script.contains(r#"getSiblingDB("we'ird\"db")"#), "{}", script);
        Ok(())
    }
}
