//! Centralized default constants for audioml.
//!
//! Every crate reads shared defaults from here instead of defining its own
//! magic numbers. Environment-driven configs fall back to these values.

// =============================================================================
// INGESTION
// =============================================================================

/// Subject ingestion events are published under.
pub const INGEST_SUBJECT: &str = "audio.ingest.raw";

/// Target sample rate (Hz) for normalized audio.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Target channel count for normalized audio (mono downmix).
pub const TARGET_CHANNELS: u32 = 1;

/// Feature-type tag recorded for mel spectrogram features.
pub const FEATURE_TYPE_MEL: &str = "mel";

/// Segment index used for whole-file processing.
pub const WHOLE_FILE_SEGMENT: i32 = 0;

/// Default object-store bucket for raw audio and features.
pub const STORAGE_BUCKET: &str = "audio-raw";

/// Default filesystem storage root.
pub const FILE_STORAGE_PATH: &str = "/var/lib/audioml/objects";

/// Default feature extraction script.
pub const FEATURE_SCRIPT: &str = "scripts/extract_features.py";

/// Timeout for a single external audio tool invocation in seconds.
pub const TOOL_TIMEOUT_SECS: u64 = 300;

// =============================================================================
// WORKER
// =============================================================================

/// Default maximum concurrent ingestion events processed per worker.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Safety-net poll interval in milliseconds when no publish wake-up arrives.
pub const WORKER_POLL_INTERVAL_MS: u64 = 5_000;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// EVENT CHANNEL
// =============================================================================

/// Seconds a fetched message may stay unacknowledged before redelivery.
pub const CHANNEL_ACK_WAIT_SECS: u64 = 900;

/// Maximum delivery attempts before a message is dead-lettered.
pub const CHANNEL_MAX_DELIVER: i32 = 5;

// =============================================================================
// TRAINING
// =============================================================================

/// Only dataset sources under this namespace are accepted.
pub const DATASET_NAMESPACE: &str = "local-audio/";

/// Root directory that dataset sources resolve against.
pub const DATASETS_ROOT: &str = "datasets";

/// Root directory for trainer output (one subdirectory per job).
pub const ARTIFACTS_DIR: &str = "artifacts";

/// Default trainer script.
pub const TRAINER_SCRIPT: &str = "./trainer/trainer.py";

/// Default python interpreter.
pub const PYTHON_BIN: &str = "python";

/// Timeout for a trainer run in seconds (2 hours).
pub const TRAINER_TIMEOUT_SECS: u64 = 7_200;

/// Maximum model name length.
pub const MODEL_NAME_MAX_LEN: usize = 128;

/// Attempts at registering a version before a collision is surfaced.
pub const REGISTER_MAX_ATTEMPTS: u32 = 3;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8080;

/// Maximum upload body size in bytes (500 MB).
pub const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Default page size for list endpoints.
pub const PAGE_LIMIT: i64 = 50;
