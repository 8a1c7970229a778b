//! Fakes shared by the jobs integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use audioml_core::{Error, Result, TrainingJob, TrainingJobRepository};
use audioml_jobs::{AudioProbe, AudioToolchain, Trainer, TrainerOutcome, TrainerRequest};

/// Bytes every fake audio file starts with; `probe` rejects anything else.
pub const WAV_MAGIC: &[u8] = b"RIFF";

pub fn wav_bytes() -> Vec<u8> {
    let mut data = WAV_MAGIC.to_vec();
    data.extend_from_slice(b"....WAVEfmt fake-audio");
    data
}

/// Toolchain that copies files instead of running ffmpeg.
#[derive(Default)]
pub struct FakeToolchain {
    pub fail_normalize: AtomicBool,
    pub skip_feature_output: AtomicBool,
    pub normalize_calls: AtomicUsize,
}

#[async_trait]
impl AudioToolchain for FakeToolchain {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<()> {
        self.normalize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_normalize.load(Ordering::SeqCst) {
            return Err(Error::Tool(
                "ffmpeg failed (exit status: 1): Invalid data found when processing input"
                    .to_string(),
            ));
        }
        tokio::fs::copy(input, output).await?;
        Ok(())
    }

    async fn extract_features(
        &self,
        _input: &Path,
        output: &Path,
        segment_index: i32,
    ) -> Result<()> {
        if self.skip_feature_output.load(Ordering::SeqCst) {
            return Ok(());
        }
        tokio::fs::write(output, format!("NPY-mel-seg{segment_index}")).await?;
        Ok(())
    }

    async fn probe(&self, input: &Path) -> Result<AudioProbe> {
        let data = tokio::fs::read(input).await?;
        if !data.starts_with(WAV_MAGIC) {
            return Err(Error::Tool("no audio stream found".to_string()));
        }
        Ok(AudioProbe {
            duration_seconds: Some(1.5),
            sample_rate: Some(16_000),
        })
    }

    fn target_sample_rate(&self) -> u32 {
        16_000
    }
}

/// Trainer returning a canned outcome or error.
pub struct FakeTrainer {
    pub error: Mutex<Option<String>>,
    pub requests: Mutex<Vec<TrainerRequest>>,
}

impl FakeTrainer {
    pub fn succeeding() -> Self {
        Self {
            error: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            error: Mutex::new(Some(message.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Trainer for FakeTrainer {
    async fn train(&self, req: &TrainerRequest) -> Result<TrainerOutcome> {
        self.requests.lock().unwrap().push(req.clone());
        if let Some(message) = self.error.lock().unwrap().clone() {
            return Err(Error::Tool(message));
        }
        Ok(TrainerOutcome {
            metrics: [("accuracy".to_string(), 0.93)].into_iter().collect(),
            hyperparameters: [("epochs".to_string(), json!(3))].into_iter().collect(),
            artifact_path: req.output_dir.join("model.pt").display().to_string(),
        })
    }
}

/// Poll until the job is terminal.
pub async fn wait_for_terminal(repo: &dyn TrainingJobRepository, job_id: Uuid) -> TrainingJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = repo.get(job_id).await.unwrap().expect("job exists");
        if job.status.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
