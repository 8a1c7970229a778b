//! # audioml-jobs
//!
//! Background work for audioml: the preprocessing worker that turns uploaded
//! audio into features, the training orchestrator that runs the external
//! trainer, and the model registry that versions its output.
//!
//! Every service takes its collaborators as `Arc<dyn Trait>` from
//! `audioml-core`, so tests run against the in-memory doubles in
//! `audioml_db::memory` and fake toolchains.

pub mod datasets;
pub mod ingest;
pub mod pipeline;
pub mod registry;
pub mod tools;
pub mod trainer;
pub mod training;
pub mod worker;

pub use datasets::{DatasetStore, DatasetUpload};
pub use ingest::IngestionService;
pub use pipeline::PreprocessingPipeline;
pub use registry::ModelRegistry;
pub use tools::{
    run_cmd_output, run_cmd_status, AudioProbe, AudioToolchain, FfmpegToolchain, ToolConfig,
};
pub use trainer::{
    parse_trainer_output, CommandTrainer, Trainer, TrainerConfig, TrainerOutcome,
    TrainerOutputMode, TrainerRequest,
};
pub use training::{validate_dataset_source, validate_name, TrainingOrchestrator};
pub use worker::{PreprocessingWorker, WorkerConfig, WorkerEvent, WorkerHandle};
