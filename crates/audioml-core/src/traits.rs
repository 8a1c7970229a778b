//! Capability traits for the status store, event channel, and object store.
//!
//! Each entity family gets its own repository trait with one PostgreSQL
//! implementation and one in-memory double (see `audioml-db`). Services take
//! these as `Arc<dyn Trait>` so tests can substitute the doubles.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// AUDIO / INGESTION / FEATURES
// =============================================================================

/// Repository for audio files, their ingestion jobs, and extracted features.
#[async_trait]
pub trait AudioRepository: Send + Sync {
    /// Insert an audio file (`uploaded`) and its ingestion job (`queued`)
    /// in one transaction.
    async fn insert_with_ingestion(&self, req: NewAudioFile) -> Result<(AudioFile, IngestionJob)>;

    /// Get an audio file by id.
    async fn get(&self, audio_id: i64) -> Result<Option<AudioFile>>;

    /// Set the audio status and mirror it onto the latest ingestion job.
    ///
    /// `error` is stored for `failed` and cleared otherwise. Returns
    /// `NotFound` when the audio file does not exist.
    async fn set_status(
        &self,
        audio_id: i64,
        status: AudioStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Record probed duration and sample rate.
    async fn set_metadata(
        &self,
        audio_id: i64,
        duration_seconds: Option<f64>,
        sample_rate: Option<i32>,
    ) -> Result<()>;

    /// Record a feature row. Callers write the blob first. Recording the
    /// same segment and feature type again replaces its storage path.
    async fn insert_feature(&self, feature: NewAudioFeature) -> Result<AudioFeature>;

    /// All features of an audio file ordered by segment index.
    async fn list_features(&self, audio_id: i64) -> Result<Vec<AudioFeature>>;

    /// Most recent ingestion job of an audio file.
    async fn latest_ingestion(&self, audio_id: i64) -> Result<Option<IngestionJob>>;

    /// Reset an audio file to `uploaded` and open a fresh `queued` ingestion
    /// job on `subject` in one transaction. Earlier ingestion jobs keep
    /// their status.
    async fn requeue(&self, audio_id: i64, subject: &str) -> Result<IngestionJob>;

    /// Set the status of one ingestion job.
    async fn set_ingestion_status(&self, ingestion_id: i64, status: IngestionStatus)
        -> Result<()>;

    /// Ingestion jobs in a given status, oldest first.
    async fn list_ingestions_by_status(
        &self,
        status: IngestionStatus,
        limit: i64,
    ) -> Result<Vec<IngestionJob>>;
}

// =============================================================================
// TRAINING JOBS
// =============================================================================

/// Repository for training jobs.
///
/// Every `mark_*` call is a guarded transition: it only applies when the
/// stored status is a legal predecessor, and returns `Conflict` otherwise.
/// Terminal jobs therefore never change.
#[async_trait]
pub trait TrainingJobRepository: Send + Sync {
    /// Persist a new queued job.
    async fn create(&self, job: &TrainingJob) -> Result<()>;

    /// Get a job by id.
    async fn get(&self, job_id: Uuid) -> Result<Option<TrainingJob>>;

    /// Most recent jobs first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<TrainingJob>>;

    /// `queued → running`, stamping `started_at`.
    async fn mark_running(&self, job_id: Uuid) -> Result<()>;

    /// `running → completed`, stamping `finished_at` and the produced version.
    async fn mark_completed(&self, job_id: Uuid, model_version_id: Uuid) -> Result<()>;

    /// `{queued, running} → failed`, stamping `finished_at` and the error.
    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()>;
}

// =============================================================================
// MODEL VERSIONS
// =============================================================================

/// Repository for versioned models.
#[async_trait]
pub trait ModelVersionRepository: Send + Sync {
    /// Insert an inactive version numbered `max(version) + 1` for the name
    /// (1 for a new name). Returns `Conflict` if the number collided.
    async fn register(&self, req: NewModelVersion) -> Result<ModelVersion>;

    /// Get a version by id.
    async fn get(&self, model_id: Uuid) -> Result<Option<ModelVersion>>;

    /// All versions of a name, highest version first.
    async fn list_by_name(&self, name: &str) -> Result<Vec<ModelVersion>>;

    /// The active version of a name, if any.
    async fn get_active(&self, name: &str) -> Result<Option<ModelVersion>>;

    /// Atomically deactivate every version sharing the target's name and
    /// activate the target. Returns `NotFound` for an unknown id.
    async fn set_active(&self, model_id: Uuid) -> Result<ModelVersion>;
}

// =============================================================================
// EVENT CHANNEL
// =============================================================================

/// A message handed to a consumer. Must be acked or rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Channel sequence number.
    pub seq: i64,
    pub subject: String,
    pub payload: JsonValue,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: i32,
}

/// Durable, at-least-once publish/subscribe channel keyed by subject.
///
/// Consumers pull: `fetch` claims up to `max` messages; each claimed message
/// stays invisible to other consumers until acked, rejected, or its ack
/// window expires (then it is redelivered).
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Persist a message and return its sequence number.
    async fn publish(&self, subject: &str, payload: &JsonValue) -> Result<i64>;

    /// Claim up to `max` messages on a subject.
    async fn fetch(&self, subject: &str, max: usize) -> Result<Vec<Delivery>>;

    /// Mark a delivery as processed.
    async fn ack(&self, seq: i64) -> Result<()>;

    /// Dead-letter a delivery that can never be processed.
    async fn reject(&self, seq: i64, reason: &str) -> Result<()>;

    /// Wake-up handle notified on every local publish.
    fn notifier(&self) -> Arc<Notify>;
}

// =============================================================================
// OBJECT STORE
// =============================================================================

/// Path-addressed blob storage.
///
/// Allows abstracting over filesystem, S3, or other storage providers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write data to the specified path.
    async fn write(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Read data from the specified path.
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete data at the specified path.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if data exists at the specified path.
    async fn exists(&self, path: &str) -> Result<bool>;
}
