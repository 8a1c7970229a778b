//! External audio tool invocation: ffmpeg, ffprobe, and the feature extractor.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use audioml_core::defaults::{FEATURE_SCRIPT, PYTHON_BIN, TARGET_SAMPLE_RATE, TOOL_TIMEOUT_SECS};
use audioml_core::{Error, Result};

/// Run a command to completion, failing on timeout or non-zero exit.
///
/// The child is killed when the timeout elapses. Stderr is carried in the
/// error text.
pub async fn run_cmd_status(cmd: &mut Command, timeout: Duration) -> Result<()> {
    run_cmd_output(cmd, timeout).await.map(|_| ())
}

/// Like [`run_cmd_status`] but returns stdout.
pub async fn run_cmd_output(cmd: &mut Command, timeout: Duration) -> Result<String> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let start = Instant::now();
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            Error::Tool(format!(
                "{program} timed out after {}s",
                timeout.as_secs()
            ))
        })?
        .map_err(|e| Error::Tool(format!("failed to execute {program}: {e}")))?;

    debug!(
        subsystem = "jobs",
        component = "tools",
        program = %program,
        exit = %output.status,
        duration_ms = start.elapsed().as_millis() as u64,
        "External command finished"
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Tool(format!(
            "{program} failed ({}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Binaries and limits for the audio tool chain.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub python_bin: String,
    pub feature_script: PathBuf,
    pub timeout: Duration,
    pub target_sample_rate: u32,
    /// Parent directory for per-item scratch dirs. `None` uses the system temp dir.
    pub work_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            python_bin: PYTHON_BIN.to_string(),
            feature_script: PathBuf::from(FEATURE_SCRIPT),
            timeout: Duration::from_secs(TOOL_TIMEOUT_SECS),
            target_sample_rate: TARGET_SAMPLE_RATE,
            work_dir: None,
        }
    }
}

impl ToolConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FFMPEG_BIN` | `ffmpeg` |
    /// | `FFPROBE_BIN` | `ffprobe` |
    /// | `PYTHON_PATH` | `python` |
    /// | `FEATURE_SCRIPT` | `scripts/extract_features.py` |
    /// | `TOOL_TIMEOUT_SECS` | `300` |
    /// | `TARGET_SAMPLE_RATE` | `16000` |
    /// | `WORK_DIR` | system temp |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_bin: std::env::var("FFMPEG_BIN").unwrap_or(defaults.ffmpeg_bin),
            ffprobe_bin: std::env::var("FFPROBE_BIN").unwrap_or(defaults.ffprobe_bin),
            python_bin: std::env::var("PYTHON_PATH").unwrap_or(defaults.python_bin),
            feature_script: std::env::var("FEATURE_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or(defaults.feature_script),
            timeout: std::env::var("TOOL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            target_sample_rate: std::env::var("TARGET_SAMPLE_RATE")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|r| *r > 0)
                .unwrap_or(defaults.target_sample_rate),
            work_dir: std::env::var("WORK_DIR").ok().map(PathBuf::from),
        }
    }
}

/// What ffprobe reported about an audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioProbe {
    pub duration_seconds: Option<f64>,
    pub sample_rate: Option<i32>,
}

/// The external processing steps of the preprocessing pipeline.
#[async_trait]
pub trait AudioToolchain: Send + Sync {
    /// Loudness-normalise, downmix to mono, and resample to the target rate.
    async fn normalize(&self, input: &Path, output: &Path) -> Result<()>;

    /// Extract features for one segment into a blob at `output`.
    async fn extract_features(&self, input: &Path, output: &Path, segment_index: i32)
        -> Result<()>;

    /// Probe duration and sample rate. Fails for files without an audio stream.
    async fn probe(&self, input: &Path) -> Result<AudioProbe>;

    /// Sample rate that `normalize` produces.
    fn target_sample_rate(&self) -> u32;
}

/// [`AudioToolchain`] backed by ffmpeg, ffprobe, and a Python extractor script.
#[derive(Debug, Clone)]
pub struct FfmpegToolchain {
    config: ToolConfig,
}

impl FfmpegToolchain {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }
}

#[async_trait]
impl AudioToolchain for FfmpegToolchain {
    async fn normalize(&self, input: &Path, output: &Path) -> Result<()> {
        run_cmd_status(
            Command::new(&self.config.ffmpeg_bin)
                .arg("-y")
                .arg("-i")
                .arg(input)
                .arg("-ac")
                .arg("1")
                .arg("-ar")
                .arg(self.config.target_sample_rate.to_string())
                .arg("-af")
                .arg("loudnorm")
                .arg(output),
            self.config.timeout,
        )
        .await
    }

    async fn extract_features(
        &self,
        input: &Path,
        output: &Path,
        segment_index: i32,
    ) -> Result<()> {
        run_cmd_status(
            Command::new(&self.config.python_bin)
                .arg(&self.config.feature_script)
                .arg("--input")
                .arg(input)
                .arg("--output")
                .arg(output)
                .arg("--segment")
                .arg(segment_index.to_string()),
            self.config.timeout,
        )
        .await
    }

    async fn probe(&self, input: &Path) -> Result<AudioProbe> {
        let stdout = run_cmd_output(
            Command::new(&self.config.ffprobe_bin)
                .args([
                    "-v",
                    "error",
                    "-show_entries",
                    "format=duration:stream=codec_type,sample_rate",
                    "-of",
                    "json",
                ])
                .arg(input),
            self.config.timeout,
        )
        .await?;
        parse_ffprobe_json(&stdout)
    }

    fn target_sample_rate(&self) -> u32 {
        self.config.target_sample_rate
    }
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    sample_rate: Option<String>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -of json` output. ffprobe reports numbers as strings.
pub fn parse_ffprobe_json(stdout: &str) -> Result<AudioProbe> {
    let parsed: FfprobeOutput = serde_json::from_str(stdout)
        .map_err(|e| Error::Tool(format!("unreadable ffprobe output: {e}")))?;

    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| Error::Tool("no audio stream found".to_string()))?;

    Ok(AudioProbe {
        duration_seconds: parsed
            .format
            .and_then(|f| f.duration)
            .and_then(|d| d.trim().parse::<f64>().ok()),
        sample_rate: audio
            .sample_rate
            .as_deref()
            .and_then(|r| r.trim().parse::<i32>().ok()),
    })
}
