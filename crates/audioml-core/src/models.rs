//! Entity types and status state machines.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Metrics reported by a trainer run (`accuracy`, `loss`, ...).
pub type Metrics = BTreeMap<String, f64>;

/// Hyperparameters reported by a trainer run.
pub type Hyperparameters = BTreeMap<String, JsonValue>;

// =============================================================================
// AUDIO FILES
// =============================================================================

/// Processing status of an uploaded audio file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioStatus {
    Uploaded,
    Processing,
    FeaturesReady,
    Failed,
}

impl AudioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioStatus::Uploaded => "uploaded",
            AudioStatus::Processing => "processing",
            AudioStatus::FeaturesReady => "features_ready",
            AudioStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uploaded" => Ok(AudioStatus::Uploaded),
            "processing" => Ok(AudioStatus::Processing),
            "features_ready" => Ok(AudioStatus::FeaturesReady),
            "failed" => Ok(AudioStatus::Failed),
            other => Err(Error::Serialization(format!("unknown audio status: {other}"))),
        }
    }
}

/// Status of the ingestion job anchoring one publish event.
///
/// Mirrors [`AudioStatus`] once the worker picks the event up. `PublishFailed`
/// marks rows whose event never reached the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Queued,
    Processing,
    FeaturesReady,
    Failed,
    PublishFailed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Queued => "queued",
            IngestionStatus::Processing => "processing",
            IngestionStatus::FeaturesReady => "features_ready",
            IngestionStatus::Failed => "failed",
            IngestionStatus::PublishFailed => "publish_failed",
        }
    }
}

impl From<AudioStatus> for IngestionStatus {
    fn from(status: AudioStatus) -> Self {
        match status {
            AudioStatus::Uploaded => IngestionStatus::Queued,
            AudioStatus::Processing => IngestionStatus::Processing,
            AudioStatus::FeaturesReady => IngestionStatus::FeaturesReady,
            AudioStatus::Failed => IngestionStatus::Failed,
        }
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(IngestionStatus::Queued),
            "processing" => Ok(IngestionStatus::Processing),
            "features_ready" => Ok(IngestionStatus::FeaturesReady),
            "failed" => Ok(IngestionStatus::Failed),
            "publish_failed" => Ok(IngestionStatus::PublishFailed),
            other => Err(Error::Serialization(format!(
                "unknown ingestion status: {other}"
            ))),
        }
    }
}

/// An uploaded audio file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: i64,
    /// Object-store key of the raw upload.
    pub raw_path: String,
    pub filename: Option<String>,
    pub duration_seconds: Option<f64>,
    pub sample_rate: Option<i32>,
    pub status: AudioStatus,
    /// Error text from the last failed processing attempt.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to register an uploaded audio file.
#[derive(Debug, Clone)]
pub struct NewAudioFile {
    pub raw_path: String,
    pub filename: Option<String>,
    /// Subject the ingestion event will be published under.
    pub subject: String,
}

/// Audit/retry anchor for one ingestion publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: i64,
    pub audio_file_id: i64,
    pub subject: String,
    pub status: IngestionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Extracted feature blob for one segment of an audio file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFeature {
    pub id: i64,
    pub audio_file_id: i64,
    /// 0 for whole-file processing.
    pub segment_index: i32,
    /// Object-store key of the feature blob.
    pub storage_path: String,
    /// Feature-type tag, e.g. "mel".
    pub feature_type: String,
    pub created_at: DateTime<Utc>,
}

/// Request to record a feature row. The blob must already exist.
#[derive(Debug, Clone)]
pub struct NewAudioFeature {
    pub audio_file_id: i64,
    pub segment_index: i32,
    pub storage_path: String,
    pub feature_type: String,
}

/// An audio file with its ingestion job and features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioDetail {
    #[serde(flatten)]
    pub audio: AudioFile,
    pub ingestion: Option<IngestionJob>,
    pub features: Vec<AudioFeature>,
}

/// Payload published on the ingestion subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEvent {
    pub audio_id: i64,
    pub s3_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

// =============================================================================
// TRAINING JOBS
// =============================================================================

/// Status of a training job.
///
/// Transitions are monotonic: `queued → running → {completed | failed}`.
/// A queued job may also fail directly when it cannot be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Queued => "queued",
            TrainingStatus::Running => "running",
            TrainingStatus::Completed => "completed",
            TrainingStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrainingStatus::Completed | TrainingStatus::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: TrainingStatus) -> bool {
        matches!(
            (self, next),
            (TrainingStatus::Queued, TrainingStatus::Running)
                | (TrainingStatus::Queued, TrainingStatus::Failed)
                | (TrainingStatus::Running, TrainingStatus::Completed)
                | (TrainingStatus::Running, TrainingStatus::Failed)
        )
    }

    /// States from which `next` may be entered.
    pub fn predecessors(next: TrainingStatus) -> &'static [TrainingStatus] {
        match next {
            TrainingStatus::Queued => &[],
            TrainingStatus::Running => &[TrainingStatus::Queued],
            TrainingStatus::Completed => &[TrainingStatus::Running],
            TrainingStatus::Failed => &[TrainingStatus::Queued, TrainingStatus::Running],
        }
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TrainingStatus::Queued),
            "running" => Ok(TrainingStatus::Running),
            "completed" => Ok(TrainingStatus::Completed),
            "failed" => Ok(TrainingStatus::Failed),
            other => Err(Error::Serialization(format!(
                "unknown training status: {other}"
            ))),
        }
    }
}

/// A training job and its lifecycle timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: Uuid,
    pub status: TrainingStatus,
    pub dataset_source: String,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Model version registered by this job, once completed.
    pub model_version_id: Option<Uuid>,
}

impl TrainingJob {
    /// A fresh queued job.
    pub fn new(dataset_source: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            status: TrainingStatus::Queued,
            dataset_source: dataset_source.into(),
            model_name: model_name.into(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            model_version_id: None,
        }
    }
}

// =============================================================================
// MODEL VERSIONS
// =============================================================================

/// One trained artifact of a named model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub id: Uuid,
    /// Historical pointer to the producing job (no cascade).
    pub training_job_id: Uuid,
    pub name: String,
    /// 1-based, strictly increasing per name.
    pub version: i32,
    pub metrics: Metrics,
    pub hyperparameters: Hyperparameters,
    pub artifact_path: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Request to register a new model version.
#[derive(Debug, Clone)]
pub struct NewModelVersion {
    pub training_job_id: Uuid,
    pub name: String,
    pub metrics: Metrics,
    pub hyperparameters: Hyperparameters,
    pub artifact_path: String,
}
