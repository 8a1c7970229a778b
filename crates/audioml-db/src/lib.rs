//! # audioml-db
//!
//! PostgreSQL status store, durable event channel, and object storage for
//! audioml.
//!
//! This crate provides:
//! - Connection pool management
//! - Repositories for audio files, ingestion jobs, features, training jobs,
//!   and model versions
//! - A pull-based event channel with ack-wait redelivery and dead-lettering
//! - Filesystem and S3-compatible object storage backends
//! - In-memory doubles of all of the above for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use audioml_db::{ChannelConfig, Database};
//!
//! let db = Database::connect("postgres://localhost/audioml", ChannelConfig::from_env()).await?;
//! db.migrate().await?;
//! let versions = db.models.list_by_name("vad").await?;
//! ```

pub mod audio;
pub mod channel;
pub mod memory;
pub mod model_versions;
pub mod pool;
pub mod storage;
pub mod training_jobs;

// Always compiled so integration tests in tests/ can share the fixtures.
pub mod test_fixtures;

pub use audio::PgAudioRepository;
pub use channel::{ChannelConfig, PgEventChannel};
pub use memory::{
    MemoryAudioRepository, MemoryEventChannel, MemoryModelVersionRepository, MemoryStorage,
    MemoryTrainingJobRepository, MessageState,
};
pub use model_versions::PgModelVersionRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use storage::{FilesystemBackend, ObjectStoreBackend, S3Config};
pub use training_jobs::PgTrainingJobRepository;

pub use audioml_core::{
    AudioRepository, Error, EventChannel, ModelVersionRepository, Result, StorageBackend,
    TrainingJobRepository,
};

/// All PostgreSQL repositories sharing one pool.
#[derive(Clone)]
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Audio files, ingestion jobs, and features.
    pub audio: PgAudioRepository,
    /// Training jobs.
    pub training_jobs: PgTrainingJobRepository,
    /// Model registry.
    pub models: PgModelVersionRepository,
    /// Durable ingestion event channel.
    pub channel: PgEventChannel,
}

impl Database {
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>, channel_config: ChannelConfig) -> Self {
        Self {
            audio: PgAudioRepository::new(pool.clone()),
            training_jobs: PgTrainingJobRepository::new(pool.clone()),
            models: PgModelVersionRepository::new(pool.clone()),
            channel: PgEventChannel::new(pool.clone(), channel_config),
            pool,
        }
    }

    /// Connect with pool settings from the environment.
    pub async fn connect(url: &str, channel_config: ChannelConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, PoolConfig::from_env()).await?;
        Ok(Self::new(pool, channel_config))
    }

    pub async fn connect_with_config(
        url: &str,
        config: PoolConfig,
        channel_config: ChannelConfig,
    ) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool, channel_config))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
