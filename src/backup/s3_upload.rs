// dbbackup/src/backup/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::primitives::ByteStream;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::artifact::Artifact;
use super::naming;
use crate::config::StorageConfig;

/// Object storage capability: store one local file under one key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, local_path: &Path, key: &str) -> Result<()>;

    /// Fully qualified location of `key`, as written to the run log.
    fn location(&self, key: &str) -> String;
}

/// S3 (or S3-compatible) bucket. The SDK client is built on first use and reused for the run.
pub struct S3Store {
    config: StorageConfig,
    client: OnceCell<s3::Client>,
}

impl S3Store {
    pub fn new(config: StorageConfig) -> Self {
        S3Store {
            config,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> &s3::Client {
        self.client.get_or_init(|| build_client(&self.config)).await
    }

    async fn put_object(&self, local_path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", local_path.display()))?;

        self.client()
            .await
            .put_object()
            .bucket(&self.config.bucket_name)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload {} to {}",
                    local_path.display(),
                    self.location(key)
                )
            })?;
        Ok(())
    }
}

async fn build_client(config: &StorageConfig) -> s3::Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    let mut described: Vec<&str> = Vec::new();
    if let Some(region) = &config.region {
        loader = loader.region(Region::new(region.clone()));
        described.push("region");
    }
    if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        loader = loader.credentials_provider(Credentials::new(
            key_id.clone(),
            secret.clone(),
            None,     // session_token
            None,     // expiry
            "Static", // provider_name
        ));
        described.push("static_credentials");
    }
    if let Some(endpoint) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint.clone());
        described.push("custom_endpoint");
    }
    let sdk_config = loader.load().await;

    let mut builder = s3::config::Builder::from(&sdk_config);
    if config.endpoint_url.is_some() {
        // Most S3-compatible services do not support virtual-hosted buckets.
        builder = builder.force_path_style(true);
    }
    if !described.is_empty() {
        info!(settings = %described.join("; "), "S3 client configured");
    }
    s3::Client::from_conf(builder.build())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, local_path: &Path, key: &str) -> Result<()> {
        match self.config.upload_timeout {
            Some(limit) => tokio::time::timeout(limit, self.put_object(local_path, key))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "Upload of {} to {} timed out after {} seconds",
                        local_path.display(),
                        self.location(key),
                        limit.as_secs()
                    )
                })?,
            None => self.put_object(local_path, key).await,
        }
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.config.bucket_name, key)
    }
}

/// Key inputs shared by every artifact of a run.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub host_id: String,
    /// `YYYY-MM-DD`, fixed once per run.
    pub date_folder: String,
    pub prefix: Option<String>,
}

impl UploadTarget {
    pub fn key_for(&self, artifact: &Artifact) -> String {
        naming::key_for_filename(
            &artifact.file_name(),
            &self.host_id,
            &self.date_folder,
            self.prefix.as_deref(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedArtifact {
    pub artifact: Artifact,
    pub key: String,
}

/// Uploads artifacts one at a time, in order.
///
/// Files missing from disk are skipped with a warning and left out of the result. The first
/// `put` failure aborts the call and is returned as the error; nothing after it is attempted.
pub async fn upload_all(
    artifacts: &[Artifact],
    store: &dyn ObjectStore,
    target: &UploadTarget,
) -> Result<Vec<UploadedArtifact>> {
    let mut uploaded = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        if !artifact.exists() {
            warn!(path = %artifact.path.display(), "File does not exist, skipping upload");
            continue;
        }
        let key = target.key_for(artifact);
        info!(path = %artifact.path.display(), location = %store.location(&key), "Uploading");
        store.put(&artifact.path, &key).await?;
        debug!(%key, "Upload complete");
        uploaded.push(UploadedArtifact {
            artifact: artifact.clone(),
            key,
        });
    }
    Ok(uploaded)
}
