//! Structured logging field name constants.
//!
//! All crates use these names so log aggregation can query by the same
//! fields across the API, the preprocessing worker, and the trainer.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, best-effort write skipped |
//! | INFO  | Lifecycle events, unit-of-work completions |
//! | DEBUG | Decision points, subprocess arguments |
//! | TRACE | Per-message polling detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "jobs", "channel", "storage"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "worker", "pipeline", "orchestrator", "registry"
pub const COMPONENT: &str = "component";

/// Logical operation name.
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Audio file id being processed.
pub const AUDIO_ID: &str = "audio_id";

/// Training job id.
pub const JOB_ID: &str = "job_id";

/// Model name.
pub const MODEL: &str = "model";

/// Model version number.
pub const VERSION: &str = "version";

/// Event channel subject.
pub const SUBJECT: &str = "subject";

/// Event channel sequence number.
pub const SEQ: &str = "seq";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of items claimed or returned.
pub const RESULT_COUNT: &str = "result_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
