//! Training job endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use audioml_core::defaults::PAGE_LIMIT;
use audioml_core::TrainingJob;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct StartTrainingRequest {
    /// Dataset reference, e.g. `local-audio/demo`.
    pub dataset: String,
    /// Model name to register the result under.
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<i64>,
}

/// Queue a training job and return it immediately (202). The outcome is
/// observed through `GET /training/{id}`.
pub async fn start_training(
    State(state): State<AppState>,
    Json(body): Json<StartTrainingRequest>,
) -> Result<(StatusCode, Json<TrainingJob>), ApiError> {
    let job = state
        .orchestrator
        .start_job(body.dataset.trim(), body.model.trim())
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<TrainingJob>, ApiError> {
    Ok(Json(state.orchestrator.get_job(job_id).await?))
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<TrainingJob>>, ApiError> {
    let limit = query.limit.unwrap_or(PAGE_LIMIT).clamp(1, 500);
    Ok(Json(state.orchestrator.list_jobs(limit).await?))
}
