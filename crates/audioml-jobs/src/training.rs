//! Training orchestrator.
//!
//! `start_job` validates the request, persists a queued job, and spawns a
//! detached task that owns the job from then on. The task runs its steps
//! strictly in sequence; independent jobs run in parallel with no admission
//! control. Failures are recorded on the job row and never surface to the
//! caller of `start_job`.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use audioml_core::defaults::{DATASET_NAMESPACE, MODEL_NAME_MAX_LEN};
use audioml_core::{
    Error, EventBus, PipelineEvent, Result, TrainingJob, TrainingJobRepository,
};

use crate::registry::ModelRegistry;
use crate::trainer::{Trainer, TrainerRequest};

/// Check that a dataset reference names a path inside the local dataset
/// namespace, e.g. `local-audio/demo`.
pub fn validate_dataset_source(source: &str) -> Result<()> {
    let rest = source.strip_prefix(DATASET_NAMESPACE).ok_or_else(|| {
        Error::InvalidInput(format!(
            "dataset must start with {DATASET_NAMESPACE}, got {source:?}"
        ))
    })?;
    if rest.trim().is_empty() {
        return Err(Error::InvalidInput("dataset name is empty".to_string()));
    }
    let relative = Path::new(rest)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !relative || rest.contains('\\') {
        return Err(Error::InvalidInput(format!(
            "dataset must be a relative path without '..': {source:?}"
        )));
    }
    Ok(())
}

/// Model and dataset names: non-empty, `[A-Za-z0-9_.-]`, bounded length.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(format!("{kind} name is empty")));
    }
    if name.len() > MODEL_NAME_MAX_LEN {
        return Err(Error::InvalidInput(format!(
            "{kind} name exceeds {MODEL_NAME_MAX_LEN} characters"
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidInput(format!("{kind} name {name:?} is reserved")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(Error::InvalidInput(format!(
            "{kind} name may only contain letters, digits, '_', '.', '-': {name:?}"
        )));
    }
    Ok(())
}

/// Starts training jobs and drives each one to a terminal state.
#[derive(Clone)]
pub struct TrainingOrchestrator {
    jobs: Arc<dyn TrainingJobRepository>,
    registry: ModelRegistry,
    trainer: Arc<dyn Trainer>,
    events: Arc<EventBus>,
    datasets_root: PathBuf,
    artifacts_dir: PathBuf,
}

impl TrainingOrchestrator {
    pub fn new(
        jobs: Arc<dyn TrainingJobRepository>,
        registry: ModelRegistry,
        trainer: Arc<dyn Trainer>,
        events: Arc<EventBus>,
        datasets_root: impl Into<PathBuf>,
        artifacts_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            registry,
            trainer,
            events,
            datasets_root: datasets_root.into(),
            artifacts_dir: artifacts_dir.into(),
        }
    }

    /// Validate, persist a queued job, and run it in the background.
    ///
    /// Returns as soon as the job row exists. The background task is not
    /// tied to the caller and keeps running if the caller goes away.
    pub async fn start_job(&self, dataset_source: &str, model_name: &str) -> Result<TrainingJob> {
        validate_dataset_source(dataset_source)?;
        validate_name("model", model_name)?;

        let job = TrainingJob::new(dataset_source, model_name);
        self.jobs.create(&job).await?;

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "start",
            job_id = %job.id,
            model = %job.model_name,
            dataset = %job.dataset_source,
            "Training job queued"
        );

        let this = self.clone();
        let queued = job.clone();
        tokio::spawn(async move {
            this.run_job(queued).await;
        });

        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<TrainingJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("training job {job_id}")))
    }

    pub async fn list_jobs(&self, limit: i64) -> Result<Vec<TrainingJob>> {
        self.jobs.list_recent(limit.max(1)).await
    }

    /// Drive one job from `queued` to a terminal state.
    async fn run_job(&self, job: TrainingJob) {
        let start = Instant::now();
        let job_id = job.id;

        if let Err(e) = self.jobs.mark_running(job_id).await {
            self.fail(job_id, format!("could not start training job: {e}"))
                .await;
            return;
        }
        self.events.emit(PipelineEvent::TrainingStarted {
            job_id,
            model: job.model_name.clone(),
        });

        let dataset_path = self.datasets_root.join(&job.dataset_source);
        match tokio::fs::try_exists(&dataset_path).await {
            Ok(true) => {}
            Ok(false) => {
                self.fail(job_id, format!("dataset not found: {}", dataset_path.display()))
                    .await;
                return;
            }
            Err(e) => {
                self.fail(
                    job_id,
                    format!("dataset not readable: {}: {e}", dataset_path.display()),
                )
                .await;
                return;
            }
        }

        let output_dir = self.artifacts_dir.join(job_id.to_string());
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            self.fail(
                job_id,
                format!("cannot create {}: {e}", output_dir.display()),
            )
            .await;
            return;
        }

        let request = TrainerRequest {
            job_id,
            dataset_path,
            model_name: job.model_name.clone(),
            output_dir,
        };
        let outcome = match self.trainer.train(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.fail(job_id, e.to_string()).await;
                return;
            }
        };

        let version = match self
            .registry
            .register_from_training(
                job_id,
                &job.model_name,
                outcome.metrics,
                outcome.hyperparameters,
                &outcome.artifact_path,
            )
            .await
        {
            Ok(version) => version,
            Err(e) => {
                self.fail(job_id, format!("model registration failed: {e}"))
                    .await;
                return;
            }
        };

        if let Err(first) = self.jobs.mark_completed(job_id, version.id).await {
            warn!(
                subsystem = "jobs",
                component = "orchestrator",
                job_id = %job_id,
                error = %first,
                "Could not mark training job completed, retrying once"
            );
            if let Err(e) = self.jobs.mark_completed(job_id, version.id).await {
                self.fail(
                    job_id,
                    format!(
                        "registered model version {} but could not mark job completed: {e}",
                        version.id
                    ),
                )
                .await;
                return;
            }
        }

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "complete",
            job_id = %job_id,
            model = %version.name,
            version = version.version,
            duration_ms = start.elapsed().as_millis() as u64,
            "Training job completed"
        );
        self.events.emit(PipelineEvent::TrainingCompleted {
            job_id,
            model: version.name,
            version: version.version,
        });
    }

    async fn fail(&self, job_id: Uuid, message: String) {
        warn!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "fail",
            job_id = %job_id,
            error = %message,
            "Training job failed"
        );
        if let Err(e) = self.jobs.mark_failed(job_id, &message).await {
            error!(
                subsystem = "jobs",
                component = "orchestrator",
                job_id = %job_id,
                error = %e,
                "Could not mark training job failed"
            );
            return;
        }
        self.events.emit(PipelineEvent::TrainingFailed {
            job_id,
            error: message,
        });
    }
}
