//! Preprocessing pipeline for one ingestion event.
//!
//! Steps, strictly in order:
//! 1. mark the audio `processing` (best effort)
//! 2. fetch the raw object into a scratch dir
//! 3. normalise to mono at the target rate
//! 4. extract segment-0 features
//! 5. upload the feature blob
//! 6. record the feature row (only after the blob exists)
//! 7. mark the audio `features_ready`
//!
//! A failure in steps 2-7 marks the audio `failed` with the error text, so a
//! file never stays `processing` once its run ends. The scratch dir is
//! removed on every path when its `TempDir` drops.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use audioml_core::defaults::{FEATURE_TYPE_MEL, WHOLE_FILE_SEGMENT};
use audioml_core::{
    feature_storage_path, object_key_from_url, AudioFeature, AudioRepository, AudioStatus, Error,
    EventBus, IngestEvent, NewAudioFeature, PipelineEvent, Result, StorageBackend,
};

use crate::tools::AudioToolchain;

#[derive(Clone)]
pub struct PreprocessingPipeline {
    audio: Arc<dyn AudioRepository>,
    storage: Arc<dyn StorageBackend>,
    toolchain: Arc<dyn AudioToolchain>,
    events: Arc<EventBus>,
    work_root: Option<PathBuf>,
}

impl PreprocessingPipeline {
    pub fn new(
        audio: Arc<dyn AudioRepository>,
        storage: Arc<dyn StorageBackend>,
        toolchain: Arc<dyn AudioToolchain>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            audio,
            storage,
            toolchain,
            events,
            work_root: None,
        }
    }

    /// Create scratch dirs under `root` instead of the system temp dir.
    pub fn with_work_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.work_root = Some(root.into());
        self
    }

    /// Run every step for one event. Returns the recorded feature.
    pub async fn process(&self, event: &IngestEvent) -> Result<AudioFeature> {
        let start = Instant::now();
        let audio_id = event.audio_id;

        if let Err(e) = self
            .audio
            .set_status(audio_id, AudioStatus::Processing, None)
            .await
        {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                audio_id,
                error = %e,
                "Could not mark audio processing, continuing"
            );
        }
        self.events.emit(PipelineEvent::AudioProcessing { audio_id });

        let feature = match self.extract(event).await {
            Ok(feature) => feature,
            Err(e) => {
                self.mark_failed(audio_id, &e.to_string(), start).await;
                return Err(e);
            }
        };

        if let Err(e) = self
            .audio
            .set_status(audio_id, AudioStatus::FeaturesReady, None)
            .await
        {
            let message = format!("could not record features_ready: {e}");
            self.mark_failed(audio_id, &message, start).await;
            return Err(e);
        }

        info!(
            subsystem = "jobs",
            component = "pipeline",
            op = "features_ready",
            audio_id,
            storage_path = %feature.storage_path,
            duration_ms = start.elapsed().as_millis() as u64,
            "Features ready"
        );
        self.events.emit(PipelineEvent::AudioFeaturesReady {
            audio_id,
            feature_count: 1,
        });
        Ok(feature)
    }

    /// Record a failed run: log, mark the audio `failed`, emit the event.
    async fn mark_failed(&self, audio_id: i64, message: &str, start: Instant) {
        warn!(
            subsystem = "jobs",
            component = "pipeline",
            audio_id,
            error = %message,
            duration_ms = start.elapsed().as_millis() as u64,
            "Preprocessing failed"
        );
        if let Err(mark_err) = self
            .audio
            .set_status(audio_id, AudioStatus::Failed, Some(message))
            .await
        {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                audio_id,
                error = %mark_err,
                "Could not mark audio failed"
            );
        }
        self.events.emit(PipelineEvent::AudioFailed {
            audio_id,
            error: message.to_string(),
        });
    }

    async fn scratch_dir(&self, audio_id: i64) -> Result<TempDir> {
        let root = self.work_root.clone();
        tokio::task::spawn_blocking(move || -> Result<TempDir> {
            let mut builder = tempfile::Builder::new();
            let prefix = format!("audio_{audio_id}_");
            builder.prefix(&prefix);
            let dir = match root {
                Some(root) => {
                    std::fs::create_dir_all(&root)?;
                    builder.tempdir_in(&root)?
                }
                None => builder.tempdir()?,
            };
            Ok(dir)
        })
        .await
        .map_err(|e| Error::Internal(format!("scratch dir task failed: {e}")))?
    }

    /// Steps 2-6.
    async fn extract(&self, event: &IngestEvent) -> Result<AudioFeature> {
        let audio_id = event.audio_id;
        let work = self.scratch_dir(audio_id).await?;

        let key = object_key_from_url(&event.s3_path);
        let raw = self.storage.read(key).await?;
        let raw_local = work.path().join(format!("raw.{}", extension_of(key)));
        tokio::fs::write(&raw_local, &raw).await?;
        debug!(audio_id, key, size = raw.len(), "Raw audio materialised");

        let normalized = work.path().join("normalized.wav");
        self.toolchain.normalize(&raw_local, &normalized).await?;

        self.record_metadata(audio_id, &normalized).await;

        let feature_local = work.path().join(format!("seg_{WHOLE_FILE_SEGMENT}.npy"));
        self.toolchain
            .extract_features(&normalized, &feature_local, WHOLE_FILE_SEGMENT)
            .await?;
        let blob = match tokio::fs::read(&feature_local).await {
            Ok(blob) => blob,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Tool(
                    "feature extractor produced no output".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let storage_path = feature_storage_path(audio_id, WHOLE_FILE_SEGMENT);
        self.storage.write(&storage_path, &blob).await?;

        self.audio
            .insert_feature(NewAudioFeature {
                audio_file_id: audio_id,
                segment_index: WHOLE_FILE_SEGMENT,
                storage_path,
                feature_type: FEATURE_TYPE_MEL.to_string(),
            })
            .await
    }

    /// Probe the normalised file and record duration and rate (best effort).
    async fn record_metadata(&self, audio_id: i64, normalized: &Path) {
        let probe = match self.toolchain.probe(normalized).await {
            Ok(probe) => probe,
            Err(e) => {
                debug!(audio_id, error = %e, "Probe failed, skipping metadata");
                return;
            }
        };
        let sample_rate = probe
            .sample_rate
            .or_else(|| i32::try_from(self.toolchain.target_sample_rate()).ok());
        if let Err(e) = self
            .audio
            .set_metadata(audio_id, probe.duration_seconds, sample_rate)
            .await
        {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                audio_id,
                error = %e,
                "Could not record audio metadata"
            );
        }
    }
}

fn extension_of(key: &str) -> &str {
    Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin")
}
