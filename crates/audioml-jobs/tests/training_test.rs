//! Training orchestrator and model registry against in-memory stores.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use audioml_core::{
    Error, EventBus, PipelineEvent, TrainingJobRepository, TrainingStatus,
};
use audioml_db::{MemoryModelVersionRepository, MemoryTrainingJobRepository};
use audioml_jobs::{ModelRegistry, TrainingOrchestrator};

use common::{wait_for_terminal, FakeTrainer};

struct Harness {
    jobs: Arc<MemoryTrainingJobRepository>,
    models: Arc<MemoryModelVersionRepository>,
    registry: ModelRegistry,
    events: Arc<EventBus>,
    orchestrator: TrainingOrchestrator,
    datasets: TempDir,
    artifacts: TempDir,
}

impl Harness {
    fn new(trainer: FakeTrainer) -> Self {
        let jobs = Arc::new(MemoryTrainingJobRepository::new());
        let models = Arc::new(MemoryModelVersionRepository::new());
        let events = Arc::new(EventBus::new(64));
        let registry = ModelRegistry::new(models.clone(), events.clone());
        let datasets = TempDir::new().unwrap();
        let artifacts = TempDir::new().unwrap();
        let orchestrator = TrainingOrchestrator::new(
            jobs.clone(),
            registry.clone(),
            Arc::new(trainer),
            events.clone(),
            datasets.path(),
            artifacts.path(),
        );
        Self {
            jobs,
            models,
            registry,
            events,
            orchestrator,
            datasets,
            artifacts,
        }
    }

    fn create_dataset(&self, name: &str) {
        let dir = self.datasets.path().join("local-audio").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.wav"), common::wav_bytes()).unwrap();
    }

    async fn register(&self, name: &str) -> audioml_core::ModelVersion {
        self.registry
            .register_from_training(
                Uuid::now_v7(),
                name,
                BTreeMap::from([("accuracy".to_string(), 0.5)]),
                BTreeMap::new(),
                "/artifacts/model.pt",
            )
            .await
            .unwrap()
    }
}

// =============================================================================
// ORCHESTRATOR
// =============================================================================

#[tokio::test]
async fn test_missing_dataset_fails_job() {
    let h = Harness::new(FakeTrainer::succeeding());

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "speaker-id")
        .await
        .unwrap();
    assert_eq!(job.status, TrainingStatus::Queued);

    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;
    assert_eq!(done.status, TrainingStatus::Failed);
    assert!(done.error.unwrap().contains("dataset not found"));
    assert!(done.started_at.is_some());
    assert!(done.finished_at.is_some());
    assert!(done.model_version_id.is_none());
    assert!(h.registry.list_versions("speaker-id").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_successful_job_registers_inactive_version() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");
    let mut bus = h.events.subscribe();

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "speaker-id")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;

    assert_eq!(done.status, TrainingStatus::Completed);
    assert!(done.error.is_none());
    let version_id = done.model_version_id.expect("version recorded");

    let version = h.registry.get_model(version_id).await.unwrap();
    assert_eq!(version.name, "speaker-id");
    assert_eq!(version.version, 1);
    assert_eq!(version.training_job_id, job.id);
    assert!(!version.is_active);
    assert_eq!(version.metrics.get("accuracy"), Some(&0.93));
    assert!(version
        .artifact_path
        .starts_with(&h.artifacts.path().display().to_string()));
    assert!(h.artifacts.path().join(job.id.to_string()).is_dir());

    let types: Vec<_> = std::iter::from_fn(|| bus.try_recv().ok())
        .map(|e| e.event_type)
        .collect();
    assert_eq!(types, vec!["training.started", "training.completed"]);
}

#[tokio::test]
async fn test_second_job_gets_next_version() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");

    for expected in 1..=2 {
        let job = h
            .orchestrator
            .start_job("local-audio/demo", "vad")
            .await
            .unwrap();
        let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;
        let version = h
            .registry
            .get_model(done.model_version_id.unwrap())
            .await
            .unwrap();
        assert_eq!(version.version, expected);
    }
}

#[tokio::test]
async fn test_trainer_error_fails_job() {
    let h = Harness::new(FakeTrainer::failing("trainer exited with status 2: CUDA missing"));
    h.create_dataset("demo");

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "speaker-id")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;

    assert_eq!(done.status, TrainingStatus::Failed);
    assert!(done.error.unwrap().contains("CUDA missing"));
    assert!(h.registry.list_versions("speaker-id").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registration_retries_collisions() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");
    h.models.inject_conflicts(2);

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "vad")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;
    assert_eq!(done.status, TrainingStatus::Completed);
}

#[tokio::test]
async fn test_exhausted_registration_fails_job() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");
    h.models.inject_conflicts(3);

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "vad")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;

    assert_eq!(done.status, TrainingStatus::Failed);
    assert!(done.error.unwrap().starts_with("model registration failed"));
    assert!(done.model_version_id.is_none());
}

#[tokio::test]
async fn test_start_failure_fails_queued_job() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");
    h.jobs.fail_transitions(TrainingStatus::Running, 1);

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "vad")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;

    assert_eq!(done.status, TrainingStatus::Failed);
    assert!(done.error.unwrap().starts_with("could not start training job"));
    assert!(done.started_at.is_none());
    assert!(done.finished_at.is_some());
    assert!(h.registry.list_versions("vad").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_completion_write_is_retried_once() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");
    h.jobs.fail_transitions(TrainingStatus::Completed, 1);

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "vad")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;

    assert_eq!(done.status, TrainingStatus::Completed);
    let versions = h.registry.list_versions("vad").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(done.model_version_id, Some(versions[0].id));
}

#[tokio::test]
async fn test_completion_write_failure_fails_job_naming_version() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.create_dataset("demo");
    h.jobs.fail_transitions(TrainingStatus::Completed, 2);
    let mut bus = h.events.subscribe();

    let job = h
        .orchestrator
        .start_job("local-audio/demo", "vad")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;

    assert_eq!(done.status, TrainingStatus::Failed);
    let versions = h.registry.list_versions("vad").await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].training_job_id, job.id);
    assert!(done.error.unwrap().contains(&versions[0].id.to_string()));

    let types: Vec<_> = std::iter::from_fn(|| bus.try_recv().ok())
        .map(|e| e.event_type)
        .filter(|t| t.starts_with("training."))
        .collect();
    assert_eq!(types, vec!["training.started", "training.failed"]);
}

#[tokio::test]
async fn test_invalid_requests_create_no_job() {
    let h = Harness::new(FakeTrainer::succeeding());

    for (dataset, model) in [
        ("s3://bucket/demo", "vad"),
        ("local-audio/../secret", "vad"),
        ("local-audio/demo", ""),
        ("local-audio/demo", "bad name"),
    ] {
        let err = h.orchestrator.start_job(dataset, model).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{dataset} {model}");
    }
    assert!(h.orchestrator.list_jobs(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_job_is_immutable() {
    let h = Harness::new(FakeTrainer::succeeding());

    let job = h
        .orchestrator
        .start_job("local-audio/missing", "vad")
        .await
        .unwrap();
    let done = wait_for_terminal(h.jobs.as_ref(), job.id).await;
    assert_eq!(done.status, TrainingStatus::Failed);

    let err = h.jobs.mark_running(job.id).await.unwrap_err();
    assert!(err.is_conflict());
    let err = h.jobs.mark_completed(job.id, Uuid::now_v7()).await.unwrap_err();
    assert!(err.is_conflict());
    let err = h.jobs.mark_failed(job.id, "again").await.unwrap_err();
    assert!(err.is_conflict());

    let after = h.orchestrator.get_job(job.id).await.unwrap();
    assert_eq!(after.status, TrainingStatus::Failed);
    assert_eq!(after.error, done.error);
    assert_eq!(after.finished_at, done.finished_at);
}

#[tokio::test]
async fn test_get_unknown_job_is_not_found() {
    let h = Harness::new(FakeTrainer::succeeding());
    let err = h.orchestrator.get_job(Uuid::now_v7()).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_list_jobs_most_recent_first() {
    let h = Harness::new(FakeTrainer::succeeding());
    let mut ids = Vec::new();
    for _ in 0..3 {
        let job = h
            .orchestrator
            .start_job("local-audio/none", "vad")
            .await
            .unwrap();
        ids.push(job.id);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    for id in &ids {
        wait_for_terminal(h.jobs.as_ref(), *id).await;
    }

    let listed: Vec<_> = h
        .orchestrator
        .list_jobs(2)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(listed, vec![ids[2], ids[1]]);
}

// =============================================================================
// REGISTRY
// =============================================================================

#[tokio::test]
async fn test_versions_listed_highest_first() {
    let h = Harness::new(FakeTrainer::succeeding());
    for _ in 0..3 {
        h.register("vad").await;
    }
    h.register("other").await;

    let versions: Vec<_> = h
        .registry
        .list_versions("vad")
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![3, 2, 1]);
    assert!(h.registry.get_active("vad").await.unwrap().is_none());
    assert!(h.registry.list_versions("unknown").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_activation_keeps_single_active_version() {
    let h = Harness::new(FakeTrainer::succeeding());
    let _v1 = h.register("vad").await;
    let v2 = h.register("vad").await;
    let v3 = h.register("vad").await;
    let other = h.register("other").await;
    h.registry.activate(other.id).await.unwrap();
    let mut bus = h.events.subscribe();

    h.registry.activate(v2.id).await.unwrap();
    assert_eq!(h.registry.get_active("vad").await.unwrap().unwrap().id, v2.id);

    let activated = h.registry.activate(v3.id).await.unwrap();
    assert!(activated.is_active);
    assert_eq!(activated.version, 3);

    let active: Vec<_> = h
        .registry
        .list_versions("vad")
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.is_active)
        .map(|v| v.version)
        .collect();
    assert_eq!(active, vec![3]);

    // Other names are untouched.
    assert_eq!(
        h.registry.get_active("other").await.unwrap().unwrap().id,
        other.id
    );

    let last = std::iter::from_fn(|| bus.try_recv().ok()).last().unwrap();
    assert!(matches!(
        last.payload,
        PipelineEvent::ModelActivated { version: 3, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activations_leave_one_active_per_name() {
    let h = Harness::new(FakeTrainer::succeeding());
    let mut candidates = Vec::new();
    for _ in 0..4 {
        candidates.push(h.register("vad").await.id);
    }
    for _ in 0..3 {
        candidates.push(h.register("kws").await.id);
    }

    let mut tasks = Vec::new();
    for round in 0..4 {
        for (i, id) in candidates.iter().enumerate() {
            let registry = h.registry.clone();
            let id = *id;
            let delay = ((i + round) % 3) as u64;
            tasks.push(tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                registry.activate(id).await.unwrap()
            }));
        }
    }
    for task in tasks {
        assert!(task.await.unwrap().is_active);
    }

    for name in ["vad", "kws"] {
        let active: Vec<_> = h
            .registry
            .list_versions(name)
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.is_active)
            .collect();
        assert_eq!(active.len(), 1, "{name}");
        assert_eq!(
            h.registry.get_active(name).await.unwrap().unwrap().id,
            active[0].id
        );
    }
}

#[tokio::test]
async fn test_reactivating_active_version_is_idempotent() {
    let h = Harness::new(FakeTrainer::succeeding());
    let v1 = h.register("vad").await;
    h.registry.activate(v1.id).await.unwrap();
    h.registry.activate(v1.id).await.unwrap();

    let active: Vec<_> = h
        .registry
        .list_versions("vad")
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.is_active)
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_activate_unknown_model_is_not_found() {
    let h = Harness::new(FakeTrainer::succeeding());
    h.register("vad").await;

    let err = h.registry.activate(Uuid::now_v7()).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(h.registry.get_active("vad").await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_registrations_get_distinct_versions() {
    let h = Harness::new(FakeTrainer::succeeding());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = h.registry.clone();
        tasks.push(tokio::spawn(async move {
            registry
                .register_from_training(
                    Uuid::now_v7(),
                    "kws",
                    BTreeMap::new(),
                    BTreeMap::new(),
                    "/a",
                )
                .await
                .unwrap()
                .version
        }));
    }
    let mut versions = Vec::new();
    for task in tasks {
        versions.push(task.await.unwrap());
    }
    versions.sort();
    assert_eq!(versions, (1..=8).collect::<Vec<_>>());
}
