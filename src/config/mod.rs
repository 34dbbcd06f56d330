// dbbackup/src/config/mod.rs
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_OUTPUT_DIR: &str = "backups";
const DEFAULT_MYSQL_HOST: &str = "127.0.0.1";
const DEFAULT_MYSQL_PORT: &str = "3306";
const DEFAULT_MONGO_PORT: &str = "27017";
const DEFAULT_MONGO_AUTH_DB: &str = "admin";

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub upload_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MysqlConfig {
    pub host: String,
    pub port: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: Option<String>,
    pub databases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct PostgresConfig {
    pub host: Option<String>,
    pub port: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub databases: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct MongoConfig {
    /// Connection string; `None` means the engine has nothing to connect to.
    pub uri: Option<String>,
    pub databases: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub output_dir: PathBuf,
    /// `None` when `S3_BUCKET` is missing, which the orchestrator treats as fatal.
    pub storage: Option<StorageConfig>,
    pub mysql: MysqlConfig,
    pub postgres: PostgresConfig,
    pub mongo: MongoConfig,
}

impl AppConfig {
    /// Loads `.env` (if any) and reads the process environment once.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenv::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to load .env file; continuing with process environment");
            }
        }
        let config = Self::from_lookup(|name| env::var(name).ok())?;

        let output_dir = if config.output_dir.is_absolute() {
            config.output_dir.clone()
        } else {
            env::current_dir()
                .context("Failed to determine current directory for BACKUP_OUTPUT_DIR")?
                .join(&config.output_dir)
        };
        Ok(AppConfig { output_dir, ..config })
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let first_of = |names: &[&str]| names.iter().find_map(|name| get(*name));

        let output_dir = PathBuf::from(get("BACKUP_OUTPUT_DIR").unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()));

        let storage = match get("S3_BUCKET") {
            Some(bucket_name) => {
                let upload_timeout = match get("S3_UPLOAD_TIMEOUT_SECS") {
                    Some(raw) => {
                        let secs: u64 = raw
                            .parse()
                            .with_context(|| format!("S3_UPLOAD_TIMEOUT_SECS must be a whole number of seconds, got '{}'", raw))?;
                        (secs > 0).then(|| Duration::from_secs(secs))
                    }
                    None => None,
                };
                let (access_key_id, secret_access_key) =
                    match (get("S3_ACCESS_KEY"), get("S3_SECRET_KEY")) {
                        (Some(key), Some(secret)) => (Some(key), Some(secret)),
                        _ => (None, None),
                    };
                Some(StorageConfig {
                    bucket_name,
                    folder_prefix: get("S3_PREFIX"),
                    region: get("S3_REGION"),
                    access_key_id,
                    secret_access_key,
                    endpoint_url: first_of(&["S3_ENDPOINT", "S3_ENDPOINT_URL"]),
                    upload_timeout,
                })
            }
            None => None,
        };

        let mysql = MysqlConfig {
            host: get("MYSQL_HOST").unwrap_or_else(|| DEFAULT_MYSQL_HOST.to_string()),
            port: get("MYSQL_PORT").unwrap_or_else(|| DEFAULT_MYSQL_PORT.to_string()),
            user: get("MYSQL_USER"),
            password: get("MYSQL_PASSWORD"),
            ssl_mode: get("MYSQL_SSL_MODE"),
            databases: parse_database_list(
                get("MYSQL_DATABASES").as_deref(),
                get("MYSQL_DATABASE").as_deref(),
            ),
        };

        let postgres = PostgresConfig {
            host: first_of(&["PGHOST", "POSTGRES_HOST"]),
            port: first_of(&["PGPORT", "POSTGRES_PORT"]),
            user: first_of(&["PGUSER", "POSTGRES_USER"]),
            password: first_of(&["PGPASSWORD", "POSTGRES_PASSWORD"]),
            databases: parse_database_list(
                first_of(&["PGDATABASES", "POSTGRES_DATABASES"]).as_deref(),
                first_of(&["PGDATABASE", "POSTGRES_DB", "POSTGRES_DATABASE"]).as_deref(),
            ),
        };

        let mongo_uri = match get("MONGO_URI") {
            Some(uri) => Some(uri),
            None => match get("MONGO_HOST") {
                Some(host) => match build_mongo_uri(
                    &host,
                    &get("MONGO_PORT").unwrap_or_else(|| DEFAULT_MONGO_PORT.to_string()),
                    get("MONGO_USER").as_deref(),
                    get("MONGO_PASSWORD").as_deref(),
                    &get("MONGO_AUTH_DB").unwrap_or_else(|| DEFAULT_MONGO_AUTH_DB.to_string()),
                ) {
                    Ok(uri) => Some(uri),
                    Err(e) => {
                        // Only this engine is affected; the rest of the run goes ahead.
                        tracing::warn!(
                            error = %e,
                            "MongoDB connection settings are unusable, skipping MongoDB"
                        );
                        None
                    }
                },
                None => None,
            },
        };
        let mongo = MongoConfig {
            uri: mongo_uri,
            databases: parse_database_list(
                get("MONGO_DATABASES").as_deref(),
                get("MONGO_DATABASE").as_deref(),
            ),
        };

        Ok(AppConfig {
            output_dir,
            storage,
            mysql,
            postgres,
            mongo,
        })
    }
}

/// Resolves the explicit database selection for an engine.
/// A comma-separated list wins; a single database name is the fallback.
fn parse_database_list(list: Option<&str>, single: Option<&str>) -> Option<Vec<String>> {
    if let Some(list) = list {
        let databases: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        if !databases.is_empty() {
            return Some(databases);
        }
    }
    single
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| vec![name.to_string()])
}

/// Assembles a `mongodb://` connection string from discrete settings.
fn build_mongo_uri(
    host: &str,
    port: &str,
    user: Option<&str>,
    password: Option<&str>,
    auth_db: &str,
) -> Result<String> {
    let mut uri = url::Url::parse(&format!("mongodb://{}:{}/", host, port))
        .with_context(|| format!("Invalid MONGO_HOST/MONGO_PORT combination: {}:{}", host, port))?;
    if let Some(user) = user {
        uri.set_username(user)
            .map_err(|_| anyhow::anyhow!("MONGO_USER cannot be set on the connection string"))?;
        if let Some(password) = password {
            uri.set_password(Some(password))
                .map_err(|_| anyhow::anyhow!("MONGO_PASSWORD cannot be set on the connection string"))?;
        }
        uri.query_pairs_mut().append_pair("authSource", auth_db);
    }
    Ok(uri.to_string())
}
