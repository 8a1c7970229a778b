//! Versioned model registry storage.
//!
//! Version numbering and activation both serialize on a transaction-scoped
//! advisory lock keyed by the model name, so concurrent registrations of one
//! name queue behind each other while different names proceed in parallel.
//! `UNIQUE (name, version)` and the partial unique index on active rows back
//! the lock up at the schema level.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use audioml_core::{
    Error, Hyperparameters, Metrics, ModelVersion, ModelVersionRepository, NewModelVersion, Result,
};

const VERSION_COLUMNS: &str = "id, training_job_id, name, version, metrics, hyperparameters, \
                               artifact_path, is_active, created_at";

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL implementation of [`ModelVersionRepository`].
#[derive(Clone)]
pub struct PgModelVersionRepository {
    pool: Pool<Postgres>,
}

impl PgModelVersionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_version_row(row: PgRow) -> ModelVersion {
        let metrics: Json<Metrics> = row.get("metrics");
        let hyperparameters: Json<Hyperparameters> = row.get("hyperparameters");
        ModelVersion {
            id: row.get("id"),
            training_job_id: row.get("training_job_id"),
            name: row.get("name"),
            version: row.get("version"),
            metrics: metrics.0,
            hyperparameters: hyperparameters.0,
            artifact_path: row.get("artifact_path"),
            is_active: row.get("is_active"),
            created_at: row.get("created_at"),
        }
    }

    async fn lock_name(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(name)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    fn map_insert_error(e: sqlx::Error, name: &str, version: i32) -> Error {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return Error::Conflict(format!("version {version} of {name} already exists"));
            }
        }
        Error::Database(e)
    }
}

#[async_trait]
impl ModelVersionRepository for PgModelVersionRepository {
    async fn register(&self, req: NewModelVersion) -> Result<ModelVersion> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        Self::lock_name(&mut tx, &req.name).await?;

        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM model_versions WHERE name = $1",
        )
        .bind(&req.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "INSERT INTO model_versions
                 (id, training_job_id, name, version, metrics, hyperparameters, artifact_path, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, false)
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(Uuid::now_v7())
        .bind(req.training_job_id)
        .bind(&req.name)
        .bind(next)
        .bind(Json(&req.metrics))
        .bind(Json(&req.hyperparameters))
        .bind(&req.artifact_path)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Self::map_insert_error(e, &req.name, next))?;

        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "registry",
            op = "register",
            model = %req.name,
            version = next,
            "Model version inserted"
        );
        Ok(Self::parse_version_row(row))
    }

    async fn get(&self, model_id: Uuid) -> Result<Option<ModelVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions WHERE id = $1"
        ))
        .bind(model_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_version_row))
    }

    async fn list_by_name(&self, name: &str) -> Result<Vec<ModelVersion>> {
        let rows = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions
             WHERE name = $1
             ORDER BY version DESC"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_version_row).collect())
    }

    async fn get_active(&self, name: &str) -> Result<Option<ModelVersion>> {
        let row = sqlx::query(&format!(
            "SELECT {VERSION_COLUMNS} FROM model_versions
             WHERE name = $1 AND is_active"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_version_row))
    }

    async fn set_active(&self, model_id: Uuid) -> Result<ModelVersion> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let name: String = sqlx::query_scalar("SELECT name FROM model_versions WHERE id = $1")
            .bind(model_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Error::Database)?
            .ok_or_else(|| Error::NotFound(format!("model version {model_id}")))?;

        Self::lock_name(&mut tx, &name).await?;

        sqlx::query(
            "UPDATE model_versions SET is_active = false
             WHERE name = $1 AND is_active AND id <> $2",
        )
        .bind(&name)
        .bind(model_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let row = sqlx::query(&format!(
            "UPDATE model_versions SET is_active = true
             WHERE id = $1
             RETURNING {VERSION_COLUMNS}"
        ))
        .bind(model_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(Error::Database)?
        .ok_or_else(|| Error::NotFound(format!("model version {model_id}")))?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(Self::parse_version_row(row))
    }
}
