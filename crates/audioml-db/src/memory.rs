//! In-memory implementations of the repository, channel, and storage traits.
//!
//! Used by service and HTTP tests that run without PostgreSQL or S3. Each
//! double mirrors the guarantees of its PostgreSQL counterpart (guarded
//! transitions, per-name version numbering, single active version, channel
//! redelivery) and exposes failure switches for error-path tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use audioml_core::{
    AudioFeature, AudioFile, AudioRepository, AudioStatus, Delivery, Error, EventChannel,
    IngestionJob, IngestionStatus, ModelVersion, ModelVersionRepository, NewAudioFeature,
    NewAudioFile, NewModelVersion, Result, StorageBackend, TrainingJob, TrainingJobRepository,
    TrainingStatus,
};

use crate::channel::ChannelConfig;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// AUDIO
// =============================================================================

#[derive(Default)]
struct AudioState {
    next_audio_id: i64,
    next_ingestion_id: i64,
    next_feature_id: i64,
    audio: BTreeMap<i64, AudioFile>,
    ingestions: Vec<IngestionJob>,
    features: Vec<AudioFeature>,
}

/// In-memory [`AudioRepository`].
#[derive(Default)]
pub struct MemoryAudioRepository {
    state: Mutex<AudioState>,
    failing_statuses: Mutex<HashSet<AudioStatus>>,
    fail_inserts: AtomicBool,
}

impl MemoryAudioRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `set_status(_, status, _)` return a database-style error.
    pub fn fail_status_updates(&self, status: AudioStatus) {
        lock(&self.failing_statuses).insert(status);
    }

    /// Make `insert_with_ingestion` fail.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of stored audio files.
    pub fn audio_count(&self) -> usize {
        lock(&self.state).audio.len()
    }

    /// Number of ingestion jobs across all audio files.
    pub fn ingestion_count(&self) -> usize {
        lock(&self.state).ingestions.len()
    }

    /// Number of feature rows across all audio files.
    pub fn feature_count(&self) -> usize {
        lock(&self.state).features.len()
    }
}

#[async_trait]
impl AudioRepository for MemoryAudioRepository {
    async fn insert_with_ingestion(&self, req: NewAudioFile) -> Result<(AudioFile, IngestionJob)> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Error::Internal("status store unavailable".into()));
        }
        let mut state = lock(&self.state);
        let now = Utc::now();

        state.next_audio_id += 1;
        let audio = AudioFile {
            id: state.next_audio_id,
            raw_path: req.raw_path,
            filename: req.filename,
            duration_seconds: None,
            sample_rate: None,
            status: AudioStatus::Uploaded,
            error_message: None,
            created_at: now,
        };

        state.next_ingestion_id += 1;
        let ingestion = IngestionJob {
            id: state.next_ingestion_id,
            audio_file_id: audio.id,
            subject: req.subject,
            status: IngestionStatus::Queued,
            created_at: now,
            updated_at: now,
        };

        state.audio.insert(audio.id, audio.clone());
        state.ingestions.push(ingestion.clone());
        Ok((audio, ingestion))
    }

    async fn get(&self, audio_id: i64) -> Result<Option<AudioFile>> {
        Ok(lock(&self.state).audio.get(&audio_id).cloned())
    }

    async fn set_status(
        &self,
        audio_id: i64,
        status: AudioStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if lock(&self.failing_statuses).contains(&status) {
            return Err(Error::Internal(format!(
                "status store rejected update to {status}"
            )));
        }
        let mut state = lock(&self.state);
        let audio = state
            .audio
            .get_mut(&audio_id)
            .ok_or_else(|| Error::NotFound(format!("audio file {audio_id}")))?;
        audio.status = status;
        audio.error_message = match status {
            AudioStatus::Failed => error.map(str::to_string),
            _ => None,
        };

        if let Some(job) = state
            .ingestions
            .iter_mut()
            .filter(|j| j.audio_file_id == audio_id)
            .max_by_key(|j| j.id)
        {
            job.status = status.into();
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_metadata(
        &self,
        audio_id: i64,
        duration_seconds: Option<f64>,
        sample_rate: Option<i32>,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        let audio = state
            .audio
            .get_mut(&audio_id)
            .ok_or_else(|| Error::NotFound(format!("audio file {audio_id}")))?;
        if duration_seconds.is_some() {
            audio.duration_seconds = duration_seconds;
        }
        if sample_rate.is_some() {
            audio.sample_rate = sample_rate;
        }
        Ok(())
    }

    async fn insert_feature(&self, feature: NewAudioFeature) -> Result<AudioFeature> {
        if feature.storage_path.is_empty() {
            return Err(Error::InvalidInput(
                "feature storage path must not be empty".to_string(),
            ));
        }
        let mut state = lock(&self.state);
        if !state.audio.contains_key(&feature.audio_file_id) {
            return Err(Error::NotFound(format!(
                "audio file {}",
                feature.audio_file_id
            )));
        }
        if let Some(existing) = state.features.iter_mut().find(|f| {
            f.audio_file_id == feature.audio_file_id
                && f.segment_index == feature.segment_index
                && f.feature_type == feature.feature_type
        }) {
            existing.storage_path = feature.storage_path;
            return Ok(existing.clone());
        }
        state.next_feature_id += 1;
        let row = AudioFeature {
            id: state.next_feature_id,
            audio_file_id: feature.audio_file_id,
            segment_index: feature.segment_index,
            storage_path: feature.storage_path,
            feature_type: feature.feature_type,
            created_at: Utc::now(),
        };
        state.features.push(row.clone());
        Ok(row)
    }

    async fn list_features(&self, audio_id: i64) -> Result<Vec<AudioFeature>> {
        let state = lock(&self.state);
        let mut features: Vec<AudioFeature> = state
            .features
            .iter()
            .filter(|f| f.audio_file_id == audio_id)
            .cloned()
            .collect();
        features.sort_by_key(|f| (f.segment_index, f.id));
        Ok(features)
    }

    async fn latest_ingestion(&self, audio_id: i64) -> Result<Option<IngestionJob>> {
        Ok(lock(&self.state)
            .ingestions
            .iter()
            .filter(|j| j.audio_file_id == audio_id)
            .max_by_key(|j| j.id)
            .cloned())
    }

    async fn requeue(&self, audio_id: i64, subject: &str) -> Result<IngestionJob> {
        let mut state = lock(&self.state);
        let audio = state
            .audio
            .get_mut(&audio_id)
            .ok_or_else(|| Error::NotFound(format!("audio file {audio_id}")))?;
        audio.status = AudioStatus::Uploaded;
        audio.error_message = None;

        state.next_ingestion_id += 1;
        let now = Utc::now();
        let ingestion = IngestionJob {
            id: state.next_ingestion_id,
            audio_file_id: audio_id,
            subject: subject.to_string(),
            status: IngestionStatus::Queued,
            created_at: now,
            updated_at: now,
        };
        state.ingestions.push(ingestion.clone());
        Ok(ingestion)
    }

    async fn set_ingestion_status(
        &self,
        ingestion_id: i64,
        status: IngestionStatus,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        let job = state
            .ingestions
            .iter_mut()
            .find(|j| j.id == ingestion_id)
            .ok_or_else(|| Error::NotFound(format!("ingestion job {ingestion_id}")))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn list_ingestions_by_status(
        &self,
        status: IngestionStatus,
        limit: i64,
    ) -> Result<Vec<IngestionJob>> {
        Ok(lock(&self.state)
            .ingestions
            .iter()
            .filter(|j| j.status == status)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

// =============================================================================
// TRAINING JOBS
// =============================================================================

/// In-memory [`TrainingJobRepository`].
#[derive(Default)]
pub struct MemoryTrainingJobRepository {
    jobs: Mutex<HashMap<Uuid, TrainingJob>>,
    failing_transitions: Mutex<HashMap<TrainingStatus, u32>>,
}

impl MemoryTrainingJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` transitions into `status` fail with a
    /// database-style error, leaving the job untouched.
    pub fn fail_transitions(&self, status: TrainingStatus, n: u32) {
        lock(&self.failing_transitions).insert(status, n);
    }

    fn transition(
        &self,
        job_id: Uuid,
        next: TrainingStatus,
        apply: impl FnOnce(&mut TrainingJob),
    ) -> Result<()> {
        if let Some(remaining) = lock(&self.failing_transitions).get_mut(&next) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Internal(format!(
                    "status store rejected transition of {job_id} to {next}"
                )));
            }
        }
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| Error::NotFound(format!("training job {job_id}")))?;
        if !job.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "training job {job_id} cannot move from {} to {next}",
                job.status
            )));
        }
        job.status = next;
        apply(job);
        Ok(())
    }
}

#[async_trait]
impl TrainingJobRepository for MemoryTrainingJobRepository {
    async fn create(&self, job: &TrainingJob) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        if jobs.contains_key(&job.id) {
            return Err(Error::Conflict(format!("training job {} exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<TrainingJob>> {
        Ok(lock(&self.jobs).get(&job_id).cloned())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<TrainingJob>> {
        let mut jobs: Vec<TrainingJob> = lock(&self.jobs).values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs.truncate(limit.max(0) as usize);
        Ok(jobs)
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<()> {
        self.transition(job_id, TrainingStatus::Running, |job| {
            job.started_at = Some(Utc::now());
        })
    }

    async fn mark_completed(&self, job_id: Uuid, model_version_id: Uuid) -> Result<()> {
        self.transition(job_id, TrainingStatus::Completed, |job| {
            job.finished_at = Some(Utc::now());
            job.model_version_id = Some(model_version_id);
            job.error = None;
        })
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.transition(job_id, TrainingStatus::Failed, |job| {
            job.finished_at = Some(Utc::now());
            job.error = Some(error.to_string());
        })
    }
}

// =============================================================================
// MODEL VERSIONS
// =============================================================================

/// In-memory [`ModelVersionRepository`].
#[derive(Default)]
pub struct MemoryModelVersionRepository {
    versions: Mutex<Vec<ModelVersion>>,
    conflicts_remaining: Mutex<u32>,
}

impl MemoryModelVersionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` registrations fail with `Conflict`, as if another
    /// writer had taken the version number first.
    pub fn inject_conflicts(&self, n: u32) {
        *lock(&self.conflicts_remaining) = n;
    }
}

#[async_trait]
impl ModelVersionRepository for MemoryModelVersionRepository {
    async fn register(&self, req: NewModelVersion) -> Result<ModelVersion> {
        {
            let mut remaining = lock(&self.conflicts_remaining);
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Conflict(format!(
                    "version of {} already exists",
                    req.name
                )));
            }
        }

        let mut versions = lock(&self.versions);
        let next = versions
            .iter()
            .filter(|v| v.name == req.name)
            .map(|v| v.version)
            .max()
            .unwrap_or(0)
            + 1;
        let version = ModelVersion {
            id: Uuid::now_v7(),
            training_job_id: req.training_job_id,
            name: req.name,
            version: next,
            metrics: req.metrics,
            hyperparameters: req.hyperparameters,
            artifact_path: req.artifact_path,
            is_active: false,
            created_at: Utc::now(),
        };
        versions.push(version.clone());
        Ok(version)
    }

    async fn get(&self, model_id: Uuid) -> Result<Option<ModelVersion>> {
        Ok(lock(&self.versions)
            .iter()
            .find(|v| v.id == model_id)
            .cloned())
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let mut list: Vec<ModelVersion> = lock(&self.versions)
            .iter()
            .filter(|v| v.name == name)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(list)
    }

    async fn get_active(&self, name: &str) -> Result<Option<ModelVersion>> {
        Ok(lock(&self.versions)
            .iter()
            .find(|v| v.name == name && v.is_active)
            .cloned())
    }

    async fn set_active(&self, model_id: Uuid) -> Result<ModelVersion> {
        let mut versions = lock(&self.versions);
        let name = versions
            .iter()
            .find(|v| v.id == model_id)
            .map(|v| v.name.clone())
            .ok_or_else(|| Error::NotFound(format!("model version {model_id}")))?;

        let mut activated = None;
        for v in versions.iter_mut().filter(|v| v.name == name) {
            v.is_active = v.id == model_id;
            if v.is_active {
                activated = Some(v.clone());
            }
        }
        activated.ok_or_else(|| Error::NotFound(format!("model version {model_id}")))
    }
}

// =============================================================================
// EVENT CHANNEL
// =============================================================================

/// Lifecycle state of a message in [`MemoryEventChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    InFlight,
    Acked,
    Dead,
}

#[derive(Debug, Clone)]
struct StoredMessage {
    subject: String,
    payload: JsonValue,
    state: MessageState,
    attempts: i32,
    claimed_at: Option<Instant>,
}

/// In-memory [`EventChannel`] with the same redelivery rules as
/// [`crate::PgEventChannel`]. Uses `tokio::time::Instant`, so paused-clock
/// tests can advance past the ack window.
pub struct MemoryEventChannel {
    config: ChannelConfig,
    messages: Mutex<BTreeMap<i64, StoredMessage>>,
    fail_publish: AtomicBool,
    notify: Arc<Notify>,
}

impl Default for MemoryEventChannel {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}

impl MemoryEventChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            messages: Mutex::new(BTreeMap::new()),
            fail_publish: AtomicBool::new(false),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Make `publish` fail until reset.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Payloads ever published on a subject, in sequence order.
    pub fn published(&self, subject: &str) -> Vec<JsonValue> {
        lock(&self.messages)
            .values()
            .filter(|m| m.subject == subject)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// State of one message.
    pub fn state_of(&self, seq: i64) -> Option<MessageState> {
        lock(&self.messages).get(&seq).map(|m| m.state)
    }

    /// Number of messages currently in `state`.
    pub fn count_in(&self, state: MessageState) -> usize {
        lock(&self.messages)
            .values()
            .filter(|m| m.state == state)
            .count()
    }
}

#[async_trait]
impl EventChannel for MemoryEventChannel {
    async fn publish(&self, subject: &str, payload: &JsonValue) -> Result<i64> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(Error::Channel(format!("publish to {subject} failed: broker unavailable")));
        }
        let seq = {
            let mut messages = lock(&self.messages);
            let seq = messages.keys().next_back().copied().unwrap_or(0) + 1;
            messages.insert(
                seq,
                StoredMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                    state: MessageState::Pending,
                    attempts: 0,
                    claimed_at: None,
                },
            );
            seq
        };
        self.notify.notify_waiters();
        Ok(seq)
    }

    async fn fetch(&self, subject: &str, max: usize) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let ack_wait = self.config.ack_wait;
        let max_deliver = self.config.max_deliver;
        let mut messages = lock(&self.messages);
        let mut out = Vec::new();

        for (seq, msg) in messages.iter_mut() {
            if msg.subject != subject {
                continue;
            }
            let expired = msg.state == MessageState::InFlight
                && msg
                    .claimed_at
                    .map(|t| now.duration_since(t) >= ack_wait)
                    .unwrap_or(true);
            if expired && msg.attempts >= max_deliver {
                msg.state = MessageState::Dead;
                continue;
            }
            if out.len() >= max {
                continue;
            }
            if msg.state == MessageState::Pending || expired {
                msg.state = MessageState::InFlight;
                msg.attempts += 1;
                msg.claimed_at = Some(now);
                out.push(Delivery {
                    seq: *seq,
                    subject: msg.subject.clone(),
                    payload: msg.payload.clone(),
                    attempt: msg.attempts,
                });
            }
        }
        Ok(out)
    }

    async fn ack(&self, seq: i64) -> Result<()> {
        if let Some(msg) = lock(&self.messages).get_mut(&seq) {
            if msg.state == MessageState::InFlight {
                msg.state = MessageState::Acked;
            }
        }
        Ok(())
    }

    async fn reject(&self, seq: i64, _reason: &str) -> Result<()> {
        if let Some(msg) = lock(&self.messages).get_mut(&seq) {
            if matches!(msg.state, MessageState::Pending | MessageState::InFlight) {
                msg.state = MessageState::Dead;
            }
        }
        Ok(())
    }

    fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

// =============================================================================
// STORAGE
// =============================================================================

/// In-memory [`StorageBackend`].
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `write` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.objects).keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn write(&self, path: &str, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage(format!("put {path}: storage unavailable")));
        }
        lock(&self.objects).insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        lock(&self.objects)
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("object {path}")))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        lock(&self.objects).remove(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(lock(&self.objects).contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_training_transitions_are_guarded() {
        let repo = MemoryTrainingJobRepository::new();
        let job = TrainingJob::new("local-audio/demo", "vad");
        repo.create(&job).await.unwrap();

        let err = repo.mark_completed(job.id, Uuid::nil()).await.unwrap_err();
        assert!(err.is_conflict());

        repo.mark_running(job.id).await.unwrap();
        repo.mark_failed(job.id, "trainer crashed").await.unwrap();

        assert!(repo.mark_running(job.id).await.unwrap_err().is_conflict());
        assert!(repo
            .mark_completed(job.id, Uuid::nil())
            .await
            .unwrap_err()
            .is_conflict());

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TrainingStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("trainer crashed"));
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_training_job_is_not_found() {
        let repo = MemoryTrainingJobRepository::new();
        assert!(repo.mark_running(Uuid::nil()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_set_status_mirrors_latest_ingestion() {
        let repo = MemoryAudioRepository::new();
        let (audio, ingestion) = repo
            .insert_with_ingestion(NewAudioFile {
                raw_path: "raw/a.wav".into(),
                filename: None,
                subject: "audio.ingest.raw".into(),
            })
            .await
            .unwrap();

        repo.set_status(audio.id, AudioStatus::Failed, Some("ffmpeg exploded"))
            .await
            .unwrap();
        let stored = repo.get(audio.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("ffmpeg exploded"));
        let latest = repo.latest_ingestion(audio.id).await.unwrap().unwrap();
        assert_eq!(latest.id, ingestion.id);
        assert_eq!(latest.status, IngestionStatus::Failed);

        repo.set_status(audio.id, AudioStatus::Processing, None)
            .await
            .unwrap();
        let stored = repo.get(audio.id).await.unwrap().unwrap();
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_channel_redelivers_after_ack_wait() {
        tokio::time::pause();
        let channel = MemoryEventChannel::new(
            ChannelConfig::default()
                .with_ack_wait(Duration::from_secs(10))
                .with_max_deliver(2),
        );
        let seq = channel.publish("s", &json!({"n": 1})).await.unwrap();

        let first = channel.fetch("s", 10).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].attempt, 1);
        assert!(channel.fetch("s", 10).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        let second = channel.fetch("s", 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].attempt, 2);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(channel.fetch("s", 10).await.unwrap().is_empty());
        assert_eq!(channel.state_of(seq), Some(MessageState::Dead));
    }

    #[tokio::test]
    async fn test_channel_ack_and_reject() {
        let channel = MemoryEventChannel::default();
        let a = channel.publish("s", &json!(1)).await.unwrap();
        let b = channel.publish("s", &json!(2)).await.unwrap();
        channel.publish("other", &json!(3)).await.unwrap();

        let got = channel.fetch("s", 10).await.unwrap();
        assert_eq!(got.iter().map(|d| d.seq).collect::<Vec<_>>(), vec![a, b]);

        channel.ack(a).await.unwrap();
        channel.reject(b, "malformed").await.unwrap();
        assert_eq!(channel.state_of(a), Some(MessageState::Acked));
        assert_eq!(channel.state_of(b), Some(MessageState::Dead));
        assert_eq!(channel.count_in(MessageState::Pending), 1);
    }
}
