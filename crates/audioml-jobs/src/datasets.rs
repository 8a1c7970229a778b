//! Local training datasets.
//!
//! Uploaded files land in `{datasets_root}/local-audio/{dataset}/`. Each one
//! is probed and removed again if it holds no readable audio.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use audioml_core::defaults::DATASET_NAMESPACE;
use audioml_core::{Error, Result};

use crate::tools::AudioToolchain;
use crate::training::validate_name;

/// Files accepted into a dataset.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatasetUpload {
    /// Reference usable as the `dataset` of a training request.
    pub dataset: String,
    pub files: Vec<String>,
}

/// Writes and validates dataset files on the local filesystem.
#[derive(Clone)]
pub struct DatasetStore {
    root: PathBuf,
    toolchain: Arc<dyn AudioToolchain>,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>, toolchain: Arc<dyn AudioToolchain>) -> Self {
        Self {
            root: root.into(),
            toolchain,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `files` (name, bytes) under `dataset`, keeping only valid audio.
    ///
    /// Returns `InvalidInput` for a bad dataset name, a bad file name, or
    /// when no file survives validation.
    pub async fn save_files(
        &self,
        dataset: &str,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<DatasetUpload> {
        validate_name("dataset", dataset)?;
        if files.is_empty() {
            return Err(Error::InvalidInput("no files uploaded".to_string()));
        }

        let reference = format!("{DATASET_NAMESPACE}{dataset}");
        let dir = self.root.join(&reference);
        tokio::fs::create_dir_all(&dir).await?;

        let mut kept = Vec::new();
        for (name, data) in files {
            let name = sanitize_file_name(&name)?;
            let path = dir.join(&name);
            tokio::fs::write(&path, &data).await?;

            match self.toolchain.probe(&path).await {
                Ok(_) => kept.push(name),
                Err(e) => {
                    warn!(
                        subsystem = "jobs",
                        component = "datasets",
                        dataset = %reference,
                        file = %name,
                        error = %e,
                        "Discarding invalid audio file"
                    );
                    if let Err(rm_err) = tokio::fs::remove_file(&path).await {
                        warn!(file = %path.display(), error = %rm_err, "Could not remove invalid file");
                    }
                }
            }
        }

        if kept.is_empty() {
            return Err(Error::InvalidInput(
                "no valid audio files in upload".to_string(),
            ));
        }

        info!(
            subsystem = "jobs",
            component = "datasets",
            dataset = %reference,
            result_count = kept.len(),
            "Dataset files stored"
        );
        Ok(DatasetUpload {
            dataset: reference,
            files: kept,
        })
    }
}

/// Keep only the final path component of an uploaded file name.
fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." || base.starts_with('.') {
        return Err(Error::InvalidInput(format!("invalid file name {name:?}")));
    }
    Ok(base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("clip.wav").unwrap(), "clip.wav");
        assert_eq!(sanitize_file_name("../../etc/clip.wav").unwrap(), "clip.wav");
        assert_eq!(sanitize_file_name("C:\\tmp\\a.flac").unwrap(), "a.flac");
        assert!(sanitize_file_name("").is_err());
        assert!(sanitize_file_name("dir/").is_err());
        assert!(sanitize_file_name("..").is_err());
        assert!(sanitize_file_name(".hidden").is_err());
    }
}
