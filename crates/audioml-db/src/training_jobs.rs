//! Training job repository with guarded status transitions.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use audioml_core::{Error, Result, TrainingJob, TrainingJobRepository, TrainingStatus};

const JOB_COLUMNS: &str = "id, status, dataset_source, model_name, created_at, started_at, \
                           finished_at, error, model_version_id";

/// PostgreSQL implementation of [`TrainingJobRepository`].
#[derive(Clone)]
pub struct PgTrainingJobRepository {
    pool: Pool<Postgres>,
}

impl PgTrainingJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: PgRow) -> Result<TrainingJob> {
        Ok(TrainingJob {
            id: row.get("id"),
            status: row.get::<String, _>("status").parse()?,
            dataset_source: row.get("dataset_source"),
            model_name: row.get("model_name"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            error: row.get("error"),
            model_version_id: row.get("model_version_id"),
        })
    }

    fn predecessor_strings(next: TrainingStatus) -> Vec<String> {
        TrainingStatus::predecessors(next)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    /// Explain a guarded update that touched no row.
    async fn transition_error(&self, job_id: Uuid, next: TrainingStatus) -> Error {
        match self.get(job_id).await {
            Ok(Some(job)) => Error::Conflict(format!(
                "training job {job_id} cannot move from {} to {next}",
                job.status
            )),
            Ok(None) => Error::NotFound(format!("training job {job_id}")),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl TrainingJobRepository for PgTrainingJobRepository {
    async fn create(&self, job: &TrainingJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO training_jobs (id, status, dataset_source, model_name, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(&job.dataset_source)
        .bind(&job.model_name)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<TrainingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM training_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<TrainingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM training_jobs
             ORDER BY created_at DESC, id DESC
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<()> {
        let next = TrainingStatus::Running;
        let updated = sqlx::query(
            "UPDATE training_jobs SET status = $2, started_at = $3
             WHERE id = $1 AND status = ANY($4)",
        )
        .bind(job_id)
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(Self::predecessor_strings(next))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_error(job_id, next).await);
        }
        Ok(())
    }

    async fn mark_completed(&self, job_id: Uuid, model_version_id: Uuid) -> Result<()> {
        let next = TrainingStatus::Completed;
        let updated = sqlx::query(
            "UPDATE training_jobs
             SET status = $2, finished_at = $3, model_version_id = $4, error = NULL
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(job_id)
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(model_version_id)
        .bind(Self::predecessor_strings(next))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_error(job_id, next).await);
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        let next = TrainingStatus::Failed;
        let updated = sqlx::query(
            "UPDATE training_jobs SET status = $2, finished_at = $3, error = $4
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(job_id)
        .bind(next.as_str())
        .bind(Utc::now())
        .bind(error)
        .bind(Self::predecessor_strings(next))
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_error(job_id, next).await);
        }
        Ok(())
    }
}
