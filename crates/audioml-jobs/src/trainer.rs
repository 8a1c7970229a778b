//! Trainer subprocess contract.
//!
//! The trainer is invoked as
//! `{python} {script} --job-id ID --dataset PATH --model NAME --out DIR`.
//! In `structured` mode it must print a JSON object line with `metrics`,
//! `artifact_path`, and optionally `params`; the last such line on stdout
//! wins. In `placeholder` mode a zero exit is enough and fixed metrics are
//! recorded.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use audioml_core::defaults::{
    ARTIFACTS_DIR, DATASETS_ROOT, PYTHON_BIN, TRAINER_SCRIPT, TRAINER_TIMEOUT_SECS,
};
use audioml_core::{Error, Hyperparameters, Metrics, Result};

use crate::tools::run_cmd_output;

/// How trainer results are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainerOutputMode {
    /// Parse the JSON report on stdout. A missing or malformed report fails the job.
    #[default]
    Structured,
    /// Ignore stdout and record placeholder metrics.
    Placeholder,
}

impl fmt::Display for TrainerOutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerOutputMode::Structured => f.write_str("structured"),
            TrainerOutputMode::Placeholder => f.write_str("placeholder"),
        }
    }
}

impl FromStr for TrainerOutputMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" => Ok(TrainerOutputMode::Structured),
            "placeholder" => Ok(TrainerOutputMode::Placeholder),
            other => Err(Error::Config(format!(
                "TRAINER_OUTPUT_MODE must be structured or placeholder, got {other}"
            ))),
        }
    }
}

/// Trainer invocation and training filesystem layout.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    pub python_bin: String,
    pub script: PathBuf,
    /// Per-job output directories are created under this root.
    pub artifacts_dir: PathBuf,
    /// Dataset references resolve relative to this root.
    pub datasets_root: PathBuf,
    pub timeout: Duration,
    pub output_mode: TrainerOutputMode,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            python_bin: PYTHON_BIN.to_string(),
            script: PathBuf::from(TRAINER_SCRIPT),
            artifacts_dir: PathBuf::from(ARTIFACTS_DIR),
            datasets_root: PathBuf::from(DATASETS_ROOT),
            timeout: Duration::from_secs(TRAINER_TIMEOUT_SECS),
            output_mode: TrainerOutputMode::Structured,
        }
    }
}

impl TrainerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PYTHON_PATH` | `python` |
    /// | `TRAINER_SCRIPT` | `./trainer/trainer.py` |
    /// | `ARTIFACTS_DIR` | `artifacts` |
    /// | `DATASETS_ROOT` | `datasets` |
    /// | `TRAINER_TIMEOUT_SECS` | `7200` |
    /// | `TRAINER_OUTPUT_MODE` | `structured` |
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let output_mode = match std::env::var("TRAINER_OUTPUT_MODE") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.output_mode,
        };
        Ok(Self {
            python_bin: std::env::var("PYTHON_PATH").unwrap_or(defaults.python_bin),
            script: std::env::var("TRAINER_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or(defaults.script),
            artifacts_dir: std::env::var("ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.artifacts_dir),
            datasets_root: std::env::var("DATASETS_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.datasets_root),
            timeout: std::env::var("TRAINER_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            output_mode,
        })
    }
}

/// Inputs for one trainer run.
#[derive(Debug, Clone)]
pub struct TrainerRequest {
    pub job_id: Uuid,
    pub dataset_path: PathBuf,
    pub model_name: String,
    pub output_dir: PathBuf,
}

/// What a successful trainer run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerOutcome {
    pub metrics: Metrics,
    pub hyperparameters: Hyperparameters,
    pub artifact_path: String,
}

/// Runs model training for one job.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, req: &TrainerRequest) -> Result<TrainerOutcome>;
}

/// [`Trainer`] that spawns the configured script.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    config: TrainerConfig,
}

impl CommandTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    async fn train(&self, req: &TrainerRequest) -> Result<TrainerOutcome> {
        debug!(
            subsystem = "jobs",
            component = "trainer",
            job_id = %req.job_id,
            dataset = %req.dataset_path.display(),
            model = %req.model_name,
            mode = %self.config.output_mode,
            "Invoking trainer"
        );

        let stdout = run_cmd_output(
            Command::new(&self.config.python_bin)
                .arg(&self.config.script)
                .arg("--job-id")
                .arg(req.job_id.to_string())
                .arg("--dataset")
                .arg(&req.dataset_path)
                .arg("--model")
                .arg(&req.model_name)
                .arg("--out")
                .arg(&req.output_dir),
            self.config.timeout,
        )
        .await?;

        match self.config.output_mode {
            TrainerOutputMode::Structured => parse_trainer_output(&stdout),
            TrainerOutputMode::Placeholder => Ok(placeholder_outcome(req)),
        }
    }
}

#[derive(Deserialize)]
struct TrainerReport {
    metrics: Metrics,
    artifact_path: String,
    #[serde(default)]
    params: Hyperparameters,
}

/// Extract the trainer report from stdout: the last line that is a JSON
/// object. Progress lines before it are ignored.
pub fn parse_trainer_output(stdout: &str) -> Result<TrainerOutcome> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{') && l.ends_with('}'))
        .ok_or_else(|| Error::Tool("trainer printed no JSON report".to_string()))?;

    let report: TrainerReport = serde_json::from_str(line)
        .map_err(|e| Error::Tool(format!("malformed trainer report: {e}")))?;

    if report.artifact_path.trim().is_empty() {
        return Err(Error::Tool(
            "trainer report has an empty artifact_path".to_string(),
        ));
    }

    Ok(TrainerOutcome {
        metrics: report.metrics,
        hyperparameters: report.params,
        artifact_path: report.artifact_path,
    })
}

/// Fixed results recorded in placeholder mode.
pub fn placeholder_outcome(req: &TrainerRequest) -> TrainerOutcome {
    TrainerOutcome {
        metrics: [("accuracy".to_string(), 0.87)].into_iter().collect(),
        hyperparameters: [("epochs".to_string(), json!(10))].into_iter().collect(),
        artifact_path: req.output_dir.to_string_lossy().into_owned(),
    }
}
