mod logic;
pub(crate) mod archive;
pub(crate) mod artifact;
pub(crate) mod command;
pub(crate) mod db_dump;
pub(crate) mod mongo;
pub(crate) mod mysql;
pub(crate) mod naming;
pub(crate) mod postgres;
pub(crate) mod run_log;
pub(crate) mod s3_upload;

pub use logic::RunOutcome;

use std::sync::Arc;

use crate::config::{AppConfig, StorageConfig};
use crate::utils::host;
use command::{CommandRunner, SystemRunner};
use db_dump::EngineDriver;
use s3_upload::{ObjectStore, S3Store};

/// Engine drivers in the order they run.
fn system_drivers(app_config: &AppConfig) -> Vec<Box<dyn EngineDriver>> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    vec![
        Box::new(mysql::MysqlDriver::new(app_config.mysql.clone(), runner.clone())),
        Box::new(postgres::PostgresDriver::new(app_config.postgres.clone(), runner.clone())),
        Box::new(mongo::MongoDriver::new(app_config.mongo.clone(), runner)),
    ]
}

/// Public entry point for the backup process, wired to the real tools and S3.
pub async fn run_backup_flow(app_config: &AppConfig) -> RunOutcome {
    let drivers = system_drivers(app_config);
    let open_store = |storage: &StorageConfig| -> Arc<dyn ObjectStore> {
        Arc::new(S3Store::new(storage.clone()))
    };
    logic::perform_backup_orchestration(app_config, &drivers, &host::resolve_host_id, &open_store)
        .await
}
