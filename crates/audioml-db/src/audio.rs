//! Audio file, ingestion job, and feature repository.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use audioml_core::{
    AudioFeature, AudioFile, AudioRepository, AudioStatus, Error, IngestionJob, IngestionStatus,
    NewAudioFeature, NewAudioFile, Result,
};

const AUDIO_COLUMNS: &str =
    "id, raw_path, filename, duration_seconds, sample_rate, status, error_message, created_at";
const INGESTION_COLUMNS: &str = "id, audio_file_id, subject, status, created_at, updated_at";
const FEATURE_COLUMNS: &str =
    "id, audio_file_id, segment_index, storage_path, feature_type, created_at";

/// PostgreSQL implementation of [`AudioRepository`].
#[derive(Clone)]
pub struct PgAudioRepository {
    pool: Pool<Postgres>,
}

impl PgAudioRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_audio_row(row: PgRow) -> Result<AudioFile> {
        Ok(AudioFile {
            id: row.get("id"),
            raw_path: row.get("raw_path"),
            filename: row.get("filename"),
            duration_seconds: row.get("duration_seconds"),
            sample_rate: row.get("sample_rate"),
            status: row.get::<String, _>("status").parse()?,
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
        })
    }

    fn parse_ingestion_row(row: PgRow) -> Result<IngestionJob> {
        Ok(IngestionJob {
            id: row.get("id"),
            audio_file_id: row.get("audio_file_id"),
            subject: row.get("subject"),
            status: row.get::<String, _>("status").parse()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_feature_row(row: PgRow) -> AudioFeature {
        AudioFeature {
            id: row.get("id"),
            audio_file_id: row.get("audio_file_id"),
            segment_index: row.get("segment_index"),
            storage_path: row.get("storage_path"),
            feature_type: row.get("feature_type"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl AudioRepository for PgAudioRepository {
    async fn insert_with_ingestion(&self, req: NewAudioFile) -> Result<(AudioFile, IngestionJob)> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let audio_row = sqlx::query(&format!(
            "INSERT INTO audio_files (raw_path, filename, status)
             VALUES ($1, $2, 'uploaded')
             RETURNING {AUDIO_COLUMNS}"
        ))
        .bind(&req.raw_path)
        .bind(&req.filename)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let audio = Self::parse_audio_row(audio_row)?;

        let ingestion_row = sqlx::query(&format!(
            "INSERT INTO ingestion_jobs (audio_file_id, subject, status)
             VALUES ($1, $2, 'queued')
             RETURNING {INGESTION_COLUMNS}"
        ))
        .bind(audio.id)
        .bind(&req.subject)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let ingestion = Self::parse_ingestion_row(ingestion_row)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok((audio, ingestion))
    }

    async fn get(&self, audio_id: i64) -> Result<Option<AudioFile>> {
        let row = sqlx::query(&format!(
            "SELECT {AUDIO_COLUMNS} FROM audio_files WHERE id = $1"
        ))
        .bind(audio_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_audio_row).transpose()
    }

    async fn set_status(
        &self,
        audio_id: i64,
        status: AudioStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let error = match status {
            AudioStatus::Failed => error,
            _ => None,
        };
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let updated = sqlx::query(
            "UPDATE audio_files SET status = $2, error_message = $3 WHERE id = $1",
        )
        .bind(audio_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("audio file {audio_id}")));
        }

        sqlx::query(
            "UPDATE ingestion_jobs SET status = $2, updated_at = now()
             WHERE id = (
                 SELECT id FROM ingestion_jobs
                 WHERE audio_file_id = $1
                 ORDER BY id DESC
                 LIMIT 1
             )",
        )
        .bind(audio_id)
        .bind(IngestionStatus::from(status).as_str())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn set_metadata(
        &self,
        audio_id: i64,
        duration_seconds: Option<f64>,
        sample_rate: Option<i32>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE audio_files
             SET duration_seconds = COALESCE($2, duration_seconds),
                 sample_rate = COALESCE($3, sample_rate)
             WHERE id = $1",
        )
        .bind(audio_id)
        .bind(duration_seconds)
        .bind(sample_rate)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("audio file {audio_id}")));
        }
        Ok(())
    }

    async fn insert_feature(&self, feature: NewAudioFeature) -> Result<AudioFeature> {
        if feature.storage_path.is_empty() {
            return Err(Error::InvalidInput(
                "feature storage path must not be empty".to_string(),
            ));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO audio_features (audio_file_id, segment_index, storage_path, feature_type)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (audio_file_id, segment_index, feature_type)
             DO UPDATE SET storage_path = EXCLUDED.storage_path
             RETURNING {FEATURE_COLUMNS}"
        ))
        .bind(feature.audio_file_id)
        .bind(feature.segment_index)
        .bind(&feature.storage_path)
        .bind(&feature.feature_type)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_feature_row(row))
    }

    async fn list_features(&self, audio_id: i64) -> Result<Vec<AudioFeature>> {
        let rows = sqlx::query(&format!(
            "SELECT {FEATURE_COLUMNS} FROM audio_features
             WHERE audio_file_id = $1
             ORDER BY segment_index, id"
        ))
        .bind(audio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_feature_row).collect())
    }

    async fn latest_ingestion(&self, audio_id: i64) -> Result<Option<IngestionJob>> {
        let row = sqlx::query(&format!(
            "SELECT {INGESTION_COLUMNS} FROM ingestion_jobs
             WHERE audio_file_id = $1
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(audio_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_ingestion_row).transpose()
    }

    async fn requeue(&self, audio_id: i64, subject: &str) -> Result<IngestionJob> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let updated = sqlx::query(
            "UPDATE audio_files SET status = 'uploaded', error_message = NULL WHERE id = $1",
        )
        .bind(audio_id)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;
        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("audio file {audio_id}")));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO ingestion_jobs (audio_file_id, subject, status)
             VALUES ($1, $2, 'queued')
             RETURNING {INGESTION_COLUMNS}"
        ))
        .bind(audio_id)
        .bind(subject)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let ingestion = Self::parse_ingestion_row(row)?;

        tx.commit().await.map_err(Error::Database)?;
        Ok(ingestion)
    }

    async fn set_ingestion_status(
        &self,
        ingestion_id: i64,
        status: IngestionStatus,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE ingestion_jobs SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(ingestion_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if updated.rows_affected() == 0 {
            return Err(Error::NotFound(format!("ingestion job {ingestion_id}")));
        }
        Ok(())
    }

    async fn list_ingestions_by_status(
        &self,
        status: IngestionStatus,
        limit: i64,
    ) -> Result<Vec<IngestionJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {INGESTION_COLUMNS} FROM ingestion_jobs
             WHERE status = $1
             ORDER BY id
             LIMIT $2"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_ingestion_row).collect()
    }
}
