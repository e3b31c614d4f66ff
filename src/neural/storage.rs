// projeto: lstmstocktrain
// file: src/neural/storage.rs
// Artifact upload to an S3-compatible object store (MinIO in deployment)

use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use log::{info, warn};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::neural::utils::TrainingError;

/// Outcome of one object put. A failed put is reported here instead of being
/// raised, so a partial upload never aborts the remaining files; the caller
/// decides what a partial failure means.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub key: String,
    pub error: Option<String>,
}

impl UploadReport {
    pub fn ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Builds the remote object key for `path` under `root`: the path relative to
/// `root`, joined with forward slashes regardless of the host separator, under
/// the given key prefix. Returns `None` for paths outside `root`.
pub fn object_key(prefix: &str, root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(c) => parts.push(c.to_string_lossy().into_owned()),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    let suffix = parts.join("/");
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        Some(suffix)
    } else {
        Some(format!("{}/{}", prefix, suffix))
    }
}

/// Walks `root` and pairs every regular file with its object key. Walk
/// failures (unreadable directories, permission errors) propagate.
pub fn collect_upload_entries(
    root: &Path,
    prefix: &str,
) -> Result<Vec<(PathBuf, String)>, TrainingError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let key = object_key(prefix, root, entry.path()).ok_or_else(|| {
            TrainingError::ObjectStore(format!(
                "cannot build object key for {:?}",
                entry.path()
            ))
        })?;
        entries.push((entry.into_path(), key));
    }
    Ok(entries)
}

/// A failed head-bucket means "go create it" only when the service reported
/// the bucket as missing; anything else (access denied, redirect) is fatal.
fn head_error_means_create(err: &HeadBucketError) -> bool {
    err.is_not_found()
}

/// A create-bucket rejection is harmless when the bucket is already there,
/// which happens when two runs race or the bucket was provisioned up front.
fn create_error_is_benign(err: &CreateBucketError) -> bool {
    err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists()
}

pub struct ObjectStore {
    client: Client,
}

impl ObjectStore {
    /// Connects using `AWS_S3_ENDPOINT` (default `minio:9000`, plain HTTP,
    /// path-style addressing). Credentials are taken from the standard
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` environment variables by
    /// the SDK's provider chain.
    pub async fn connect() -> Self {
        let raw = std::env::var("AWS_S3_ENDPOINT").unwrap_or_else(|_| "minio:9000".to_string());
        let endpoint = format!(
            "http://{}",
            raw.trim_start_matches("http://").trim_start_matches("https://")
        );
        info!("🔧 Using object store endpoint: {}", endpoint);

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .endpoint_url(&endpoint)
            .region(Region::new("us-east-1"))
            .load()
            .await;
        let conf = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(conf),
        }
    }

    /// Creates the bucket if it does not exist yet. Safe to call repeatedly:
    /// an existing or already-owned bucket is success.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), TrainingError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!("Bucket {} already exists", bucket);
                Ok(())
            }
            Err(err) => {
                let service = err.into_service_error();
                if !head_error_means_create(&service) {
                    return Err(TrainingError::ObjectStore(service.to_string()));
                }
                info!("Attempting to create bucket: {}", bucket);
                if let Err(create_err) = self.client.create_bucket().bucket(bucket).send().await {
                    let service = create_err.into_service_error();
                    if !create_error_is_benign(&service) {
                        return Err(TrainingError::ObjectStore(service.to_string()));
                    }
                }
                Ok(())
            }
        }
    }

    /// Puts one local file under `key`. A put failure is logged and carried in
    /// the report; it is never raised.
    pub async fn upload_file(&self, bucket: &str, key: &str, path: &Path) -> UploadReport {
        info!("⬆️ Pushing {:?} to {}/{}", path, bucket, key);
        match self.put_object(bucket, key, path).await {
            Ok(()) => UploadReport {
                key: key.to_string(),
                error: None,
            },
            Err(err) => {
                warn!("❌ Upload of {} failed: {}", key, err);
                UploadReport {
                    key: key.to_string(),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    /// Recursively uploads every file under `root`, preserving relative paths
    /// as key suffixes below `prefix`. Walk errors propagate; individual put
    /// failures are reported per object and later files are still attempted.
    pub async fn upload_dir(
        &self,
        bucket: &str,
        prefix: &str,
        root: &Path,
    ) -> Result<Vec<UploadReport>, TrainingError> {
        if !root.is_dir() {
            return Err(TrainingError::ObjectStore(format!(
                "{:?} is not a directory",
                root
            )));
        }

        let entries = collect_upload_entries(root, prefix)?;
        let mut reports = Vec::with_capacity(entries.len());
        for (path, key) in entries {
            reports.push(self.upload_file(bucket, &key, &path).await);
        }
        Ok(reports)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), TrainingError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| TrainingError::ObjectStore(e.to_string()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| TrainingError::ObjectStore(e.to_string()))?;
        Ok(())
    }
}
