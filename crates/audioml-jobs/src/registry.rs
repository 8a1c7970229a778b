//! Model registry service.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use audioml_core::defaults::REGISTER_MAX_ATTEMPTS;
use audioml_core::{
    Error, EventBus, Hyperparameters, Metrics, ModelVersion, ModelVersionRepository,
    NewModelVersion, PipelineEvent, Result,
};

/// Versions named models and maintains the single active version per name.
#[derive(Clone)]
pub struct ModelRegistry {
    repo: Arc<dyn ModelVersionRepository>,
    events: Arc<EventBus>,
    max_attempts: u32,
}

impl ModelRegistry {
    pub fn new(repo: Arc<dyn ModelVersionRepository>, events: Arc<EventBus>) -> Self {
        Self {
            repo,
            events,
            max_attempts: REGISTER_MAX_ATTEMPTS,
        }
    }

    /// Override how often a colliding registration is retried.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Register the next version of `name`, inactive.
    ///
    /// A version-number collision (`Conflict`) is retried with a short
    /// backoff; the last conflict is returned once attempts run out.
    pub async fn register_from_training(
        &self,
        training_job_id: Uuid,
        name: &str,
        metrics: Metrics,
        hyperparameters: Hyperparameters,
        artifact_path: &str,
    ) -> Result<ModelVersion> {
        let req = NewModelVersion {
            training_job_id,
            name: name.to_string(),
            metrics,
            hyperparameters,
            artifact_path: artifact_path.to_string(),
        };

        let mut attempt = 1;
        loop {
            match self.repo.register(req.clone()).await {
                Ok(version) => {
                    info!(
                        subsystem = "jobs",
                        component = "registry",
                        op = "register",
                        model = %version.name,
                        version = version.version,
                        job_id = %training_job_id,
                        "Model version registered"
                    );
                    return Ok(version);
                }
                Err(e) if e.is_conflict() && attempt < self.max_attempts => {
                    warn!(
                        subsystem = "jobs",
                        component = "registry",
                        model = %name,
                        attempt,
                        error = %e,
                        "Version collision, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Make `model_id` the only active version of its name.
    pub async fn activate(&self, model_id: Uuid) -> Result<ModelVersion> {
        let version = self.repo.set_active(model_id).await?;
        info!(
            subsystem = "jobs",
            component = "registry",
            op = "activate",
            model = %version.name,
            version = version.version,
            "Model version activated"
        );
        self.events.emit(PipelineEvent::ModelActivated {
            model_id: version.id,
            model: version.name.clone(),
            version: version.version,
        });
        Ok(version)
    }

    /// All versions of `name`, highest first.
    pub async fn list_versions(&self, name: &str) -> Result<Vec<ModelVersion>> {
        self.repo.list_by_name(name).await
    }

    /// The active version of `name`; `None` is a normal result.
    pub async fn get_active(&self, name: &str) -> Result<Option<ModelVersion>> {
        self.repo.get_active(name).await
    }

    pub async fn get_model(&self, model_id: Uuid) -> Result<ModelVersion> {
        self.repo
            .get(model_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("model version {model_id}")))
    }
}
