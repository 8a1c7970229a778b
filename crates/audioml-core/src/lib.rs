//! # audioml-core
//!
//! Core types, traits, and abstractions for the audioml ingestion and
//! training services.
//!
//! This crate provides the entity model (audio files, features, training jobs,
//! model versions), the status state machines, the capability traits that the
//! storage layer implements, and the shared error type.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod paths;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, PipelineEvent};
pub use models::*;
pub use paths::{feature_storage_path, object_key_from_url, raw_storage_path};
pub use traits::*;
