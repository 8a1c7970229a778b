//! Ingestion service: register uploads and publish ingestion events.

use std::sync::Arc;

use tracing::{info, warn};

use audioml_core::defaults::INGEST_SUBJECT;
use audioml_core::{
    object_key_from_url, AudioDetail, AudioFile, AudioRepository, AudioStatus, Error,
    EventChannel, IngestEvent, IngestionJob, IngestionStatus, NewAudioFile, Result,
};

/// Registers uploaded audio and hands it to the preprocessing worker.
///
/// A publish failure after the rows are committed leaves the ingestion job
/// in `publish_failed`. [`IngestionService::republish_stalled`] and
/// [`IngestionService::resubmit`] recover such rows.
#[derive(Clone)]
pub struct IngestionService {
    audio: Arc<dyn AudioRepository>,
    channel: Arc<dyn EventChannel>,
    subject: String,
}

impl IngestionService {
    pub fn new(audio: Arc<dyn AudioRepository>, channel: Arc<dyn EventChannel>) -> Self {
        Self {
            audio,
            channel,
            subject: INGEST_SUBJECT.to_string(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Record an uploaded object and publish its ingestion event.
    ///
    /// `raw_path` is an object key or an `s3://bucket/key` URL.
    pub async fn enqueue(&self, raw_path: &str, filename: Option<String>) -> Result<AudioFile> {
        let key = object_key_from_url(raw_path.trim());
        if key.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no object key in {raw_path:?}"
            )));
        }

        let (audio, ingestion) = self
            .audio
            .insert_with_ingestion(NewAudioFile {
                raw_path: key.to_string(),
                filename: filename.clone(),
                subject: self.subject.clone(),
            })
            .await?;

        self.publish(&audio, &ingestion).await?;

        info!(
            subsystem = "jobs",
            component = "ingest",
            op = "enqueue",
            audio_id = audio.id,
            subject = %self.subject,
            "Audio queued for preprocessing"
        );
        Ok(audio)
    }

    /// Re-queue an audio file that failed or whose event never reached
    /// the channel.
    ///
    /// A failed file gets a fresh ingestion job so the failed attempt stays
    /// on record. A `publish_failed` job is republished in place since its
    /// event was never delivered. Any other state returns `Conflict`,
    /// including `uploaded` with a queued event still pending.
    pub async fn resubmit(&self, audio_id: i64) -> Result<IngestionJob> {
        let audio = self
            .audio
            .get(audio_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("audio file {audio_id}")))?;
        let latest = self.audio.latest_ingestion(audio_id).await?;

        let mut ingestion = match latest {
            Some(job) if job.status == IngestionStatus::PublishFailed => job,
            latest if audio.status == AudioStatus::Failed => {
                let subject = latest.map_or_else(|| self.subject.clone(), |job| job.subject);
                self.audio.requeue(audio_id, &subject).await?
            }
            _ => {
                return Err(Error::Conflict(format!(
                    "audio file {audio_id} is {} and cannot be resubmitted",
                    audio.status
                )));
            }
        };

        self.publish(&audio, &ingestion).await?;
        ingestion.status = IngestionStatus::Queued;

        info!(
            subsystem = "jobs",
            component = "ingest",
            op = "resubmit",
            audio_id,
            ingestion_id = ingestion.id,
            "Audio resubmitted for preprocessing"
        );
        Ok(ingestion)
    }

    /// Republish up to `limit` ingestion jobs stuck in `publish_failed`.
    /// Returns how many were republished.
    pub async fn republish_stalled(&self, limit: i64) -> Result<usize> {
        let stalled = self
            .audio
            .list_ingestions_by_status(IngestionStatus::PublishFailed, limit)
            .await?;
        let mut republished = 0;

        for ingestion in stalled {
            let Some(audio) = self.audio.get(ingestion.audio_file_id).await? else {
                continue;
            };
            if self.publish(&audio, &ingestion).await.is_err() {
                // Channel still down; the rest would fail the same way.
                break;
            }
            republished += 1;
        }

        if republished > 0 {
            info!(
                subsystem = "jobs",
                component = "ingest",
                op = "republish",
                result_count = republished,
                "Republished stalled ingestion events"
            );
        }
        Ok(republished)
    }

    /// An audio file with its latest ingestion job and its features.
    pub async fn get_audio(&self, audio_id: i64) -> Result<AudioDetail> {
        let audio = self
            .audio
            .get(audio_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("audio file {audio_id}")))?;
        let ingestion = self.audio.latest_ingestion(audio_id).await?;
        let features = self.audio.list_features(audio_id).await?;
        Ok(AudioDetail {
            audio,
            ingestion,
            features,
        })
    }

    /// Publish the event for `ingestion`, keeping its status in step.
    async fn publish(&self, audio: &AudioFile, ingestion: &IngestionJob) -> Result<()> {
        let event = IngestEvent {
            audio_id: audio.id,
            s3_path: audio.raw_path.clone(),
            filename: audio.filename.clone(),
        };
        let payload = serde_json::to_value(&event)?;

        match self.channel.publish(&ingestion.subject, &payload).await {
            Ok(_) => {
                if ingestion.status != IngestionStatus::Queued {
                    self.audio
                        .set_ingestion_status(ingestion.id, IngestionStatus::Queued)
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "ingest",
                    audio_id = audio.id,
                    subject = %ingestion.subject,
                    error = %e,
                    "Publish failed, marking ingestion job publish_failed"
                );
                if let Err(mark_err) = self
                    .audio
                    .set_ingestion_status(ingestion.id, IngestionStatus::PublishFailed)
                    .await
                {
                    warn!(
                        subsystem = "jobs",
                        component = "ingest",
                        audio_id = audio.id,
                        error = %mark_err,
                        "Could not mark ingestion job publish_failed"
                    );
                }
                Err(e)
            }
        }
    }
}
