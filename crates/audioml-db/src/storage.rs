//! Object store backends: local filesystem and S3-compatible.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use audioml_core::{Error, Result, StorageBackend};

/// Reject keys that could escape the storage root.
fn validate_key(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidInput("storage path must not be empty".into()));
    }
    let ok = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !ok {
        return Err(Error::InvalidInput(format!(
            "storage path must be relative without '..': {path}"
        )));
    }
    Ok(())
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Filesystem storage backend rooted at `base_path`.
///
/// Keys map directly to relative paths, e.g. `raw/{uuid}.wav` or
/// `features/audio_7/seg_0.npy`.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    base_path: PathBuf,
}

impl FilesystemBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_key(path)?;
        Ok(self.base_path.join(path))
    }

    /// Write, read back, and delete a probe file to surface permission or
    /// mount problems at startup.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let probe_dir = self.base_path.join(".health-check");
        let probe = probe_dir.join("probe.bin");
        let data = b"storage-health-check";

        fs::create_dir_all(&probe_dir)
            .await
            .map_err(|e| format!("create_dir_all({}): {e}", probe_dir.display()))?;
        fs::write(&probe, data)
            .await
            .map_err(|e| format!("write({}): {e}", probe.display()))?;
        let read_back = fs::read(&probe)
            .await
            .map_err(|e| format!("read({}): {e}", probe.display()))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }
        fs::remove_file(&probe)
            .await
            .map_err(|e| format!("remove_file({}): {e}", probe.display()))?;
        let _ = fs::remove_dir(&probe_dir).await;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path)?;
        debug!(
            subsystem = "storage",
            storage_path = %path,
            size = data.len(),
            "filesystem write"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(subsystem = "storage", parent = %parent.display(), error = %e, "create_dir_all failed");
                e
            })?;
        }

        // Temp file + rename so readers never see a partial blob.
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob");
        let temp_path = full_path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await?;
        if let Err(e) = file.write_all(data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(subsystem = "storage", to = %full_path.display(), error = %e, "rename failed");
            e
        })?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path)?;
        match fs::read(&full_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }
}

// =============================================================================
// S3-COMPATIBLE (object_store)
// =============================================================================

/// Connection settings for an S3-compatible bucket (AWS, MinIO, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct S3Config {
    /// Custom endpoint such as `http://minio:9000`. `None` targets AWS.
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

/// [`StorageBackend`] over any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Build an S3 client. Plain-HTTP endpoints are allowed for local MinIO.
    pub fn s3(config: &S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }
        if let Some(key) = &config.access_key {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_key {
            builder = builder.with_secret_access_key(secret);
        }

        let store = builder
            .build()
            .map_err(|e| Error::Config(format!("invalid S3 configuration: {e}")))?;
        Ok(Self::new(Arc::new(store)))
    }

    fn object_path(path: &str) -> Result<ObjectPath> {
        validate_key(path)?;
        Ok(ObjectPath::from(path))
    }
}

fn storage_error(op: &str, path: &str, e: object_store::Error) -> Error {
    match e {
        object_store::Error::NotFound { .. } => Error::NotFound(format!("object {path}")),
        other => Error::Storage(format!("{op} {path}: {other}")),
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        let location = Self::object_path(path)?;
        debug!(subsystem = "storage", storage_path = %path, size = data.len(), "object store put");
        self.store
            .put(&location, PutPayload::from(data.to_vec()))
            .await
            .map_err(|e| storage_error("put", path, e))?;
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let location = Self::object_path(path)?;
        let bytes = self
            .store
            .get(&location)
            .await
            .map_err(|e| storage_error("get", path, e))?
            .bytes()
            .await
            .map_err(|e| storage_error("get", path, e))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let location = Self::object_path(path)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(storage_error("delete", path, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let location = Self::object_path(path)?;
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(storage_error("head", path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_filesystem_write_creates_nested_dirs() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        backend
            .write("features/audio_7/seg_0.npy", b"npy")
            .await
            .unwrap();

        assert!(dir.path().join("features/audio_7/seg_0.npy").exists());
        assert_eq!(
            backend.read("features/audio_7/seg_0.npy").await.unwrap(),
            b"npy"
        );
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("features/audio_7"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        let err = backend.write("../escape.bin", b"x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(backend.read("/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_filesystem_missing_object() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        assert!(!backend.exists("raw/none.wav").await.unwrap());
        assert!(backend.read("raw/none.wav").await.unwrap_err().is_not_found());
        backend.delete("raw/none.wav").await.unwrap();
    }

    #[tokio::test]
    async fn test_filesystem_validate() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.validate().await.unwrap();
        assert!(!dir.path().join(".health-check").exists());
    }

    #[tokio::test]
    async fn test_object_store_backend() {
        let backend = ObjectStoreBackend::new(Arc::new(InMemory::new()));

        assert!(!backend.exists("raw/a.wav").await.unwrap());
        backend.write("raw/a.wav", b"RIFF").await.unwrap();
        assert!(backend.exists("raw/a.wav").await.unwrap());
        assert_eq!(backend.read("raw/a.wav").await.unwrap(), b"RIFF");

        backend.delete("raw/a.wav").await.unwrap();
        assert!(!backend.exists("raw/a.wav").await.unwrap());
        assert!(backend.read("raw/a.wav").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_s3_builder_accepts_minio_endpoint() {
        let backend = ObjectStoreBackend::s3(&S3Config {
            endpoint: Some("http://localhost:9000".into()),
            bucket: "audio-raw".into(),
            region: "us-east-1".into(),
            access_key: Some("minio".into()),
            secret_key: Some("minio123".into()),
        });
        assert!(backend.is_ok());
    }
}
