//! Server configuration from environment variables.

use std::path::PathBuf;

use audioml_core::defaults::{
    FILE_STORAGE_PATH, MAX_UPLOAD_BYTES, SERVER_PORT, STORAGE_BUCKET,
};
use audioml_core::{Error, Result};
use audioml_db::S3Config;

/// Where raw uploads and feature blobs live.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    Filesystem(PathBuf),
    S3(S3Config),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub run_migrations: bool,
    pub storage: StorageConfig,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Read configuration from the process environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `HOST` | `0.0.0.0` |
    /// | `PORT` | `8080` |
    /// | `DATABASE_URL` | `postgres://localhost/audioml` |
    /// | `RUN_MIGRATIONS` | `true` |
    /// | `STORAGE_BACKEND` | `filesystem` (or `s3`) |
    /// | `FILE_STORAGE_PATH` | `/var/lib/audioml/objects` |
    /// | `S3_ENDPOINT` | AWS default |
    /// | `S3_BUCKET` | `audio-raw` |
    /// | `S3_REGION` | `us-east-1` |
    /// | `S3_ACCESS_KEY` / `S3_SECRET_KEY` | ambient credentials |
    /// | `MAX_UPLOAD_BYTES` | 500 MiB |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] with an explicit variable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("PORT must be a port number, got {v:?}")))?,
            None => SERVER_PORT,
        };

        let storage = match get("STORAGE_BACKEND").as_deref().unwrap_or("filesystem") {
            "filesystem" | "fs" => StorageConfig::Filesystem(
                get("FILE_STORAGE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(FILE_STORAGE_PATH)),
            ),
            "s3" | "minio" => StorageConfig::S3(S3Config {
                endpoint: get("S3_ENDPOINT").filter(|v| !v.is_empty()),
                bucket: get("S3_BUCKET").unwrap_or_else(|| STORAGE_BUCKET.to_string()),
                region: get("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                access_key: get("S3_ACCESS_KEY").filter(|v| !v.is_empty()),
                secret_key: get("S3_SECRET_KEY").filter(|v| !v.is_empty()),
            }),
            other => {
                return Err(Error::Config(format!(
                    "STORAGE_BACKEND must be filesystem or s3, got {other:?}"
                )))
            }
        };

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost/audioml".to_string()),
            run_migrations: get("RUN_MIGRATIONS")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            storage,
            max_upload_bytes: get("MAX_UPLOAD_BYTES")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(MAX_UPLOAD_BYTES),
        })
    }
}
