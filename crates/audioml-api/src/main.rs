//! audioml-api - HTTP API server and preprocessing worker for audioml

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{info, warn};

use audioml_api::{build_router, telemetry, AppConfig, AppState, StorageConfig};
use audioml_core::{EventBus, StorageBackend};
use audioml_db::{ChannelConfig, Database, FilesystemBackend, ObjectStoreBackend};
use audioml_jobs::{
    CommandTrainer, DatasetStore, FfmpegToolchain, IngestionService, ModelRegistry,
    PreprocessingPipeline, PreprocessingWorker, ToolConfig, TrainerConfig, TrainingOrchestrator,
    WorkerConfig,
};

/// Stalled publishes swept at startup.
const REPUBLISH_BATCH: i64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = telemetry::init_tracing();

    let config = AppConfig::from_env()?;
    let tool_config = ToolConfig::from_env();
    let trainer_config = TrainerConfig::from_env()?;
    let worker_config = WorkerConfig::from_env();

    info!("Connecting to database...");
    let db = Database::connect(&config.database_url, ChannelConfig::from_env()).await?;
    info!("Database connected");

    if config.run_migrations {
        info!("Running database migrations...");
        db.migrate().await?;
        info!("Database migrations complete");
    }

    let storage: Arc<dyn StorageBackend> = match &config.storage {
        StorageConfig::Filesystem(path) => {
            let backend = FilesystemBackend::new(path.clone());
            if let Err(e) = backend.validate().await {
                anyhow::bail!("file storage at {} is not usable: {e}", path.display());
            }
            info!(path = %path.display(), "Using filesystem object storage");
            Arc::new(backend)
        }
        StorageConfig::S3(s3) => {
            info!(bucket = %s3.bucket, endpoint = ?s3.endpoint, "Using S3 object storage");
            Arc::new(ObjectStoreBackend::s3(s3)?)
        }
    };

    let events = Arc::new(EventBus::default());
    let audio_repo = Arc::new(db.audio.clone());
    let channel = Arc::new(db.channel.clone());
    let toolchain = Arc::new(FfmpegToolchain::new(tool_config.clone()));

    let ingestion = IngestionService::new(audio_repo.clone(), channel.clone())
        .with_subject(worker_config.subject.clone());
    let registry = ModelRegistry::new(Arc::new(db.models.clone()), events.clone());
    let orchestrator = TrainingOrchestrator::new(
        Arc::new(db.training_jobs.clone()),
        registry.clone(),
        Arc::new(CommandTrainer::new(trainer_config.clone())),
        events.clone(),
        trainer_config.datasets_root.clone(),
        trainer_config.artifacts_dir.clone(),
    );
    let datasets = DatasetStore::new(trainer_config.datasets_root.clone(), toolchain.clone());

    let mut pipeline =
        PreprocessingPipeline::new(audio_repo, storage.clone(), toolchain, events.clone());
    if let Some(work_dir) = &tool_config.work_dir {
        pipeline = pipeline.with_work_root(work_dir.clone());
    }
    let worker = PreprocessingWorker::new(channel, pipeline, worker_config).start();

    spawn_event_logger(&events);

    match ingestion.republish_stalled(REPUBLISH_BATCH).await {
        Ok(0) => {}
        Ok(n) => info!(result_count = n, "Republished stalled ingestion events"),
        Err(e) => warn!(error = %e, "Could not sweep stalled ingestion events"),
    }

    let state = AppState {
        ingestion,
        orchestrator,
        registry,
        datasets,
        storage,
    };
    let app = build_router(state, config.max_upload_bytes);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, shutting down preprocessing worker");
    if let Err(e) = worker.shutdown().await {
        warn!(error = %e, "Preprocessing worker did not acknowledge shutdown");
    }
    Ok(())
}

/// Mirror pipeline and training events into the log.
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => info!(
                    event_type = envelope.event_type,
                    event_id = %envelope.event_id,
                    payload = ?envelope.payload,
                    "Pipeline event"
                ),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
