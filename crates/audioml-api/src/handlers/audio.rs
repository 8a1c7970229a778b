//! Audio status and manual resubmission.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use audioml_core::{AudioDetail, IngestionJob};

use crate::{ApiError, AppState};

/// An audio file with its latest ingestion job and extracted features.
pub async fn get_audio(
    State(state): State<AppState>,
    Path(audio_id): Path<i64>,
) -> Result<Json<AudioDetail>, ApiError> {
    Ok(Json(state.ingestion.get_audio(audio_id).await?))
}

/// Re-queue a failed or stalled audio file. 409 while it is processing or
/// already has features.
pub async fn resubmit_audio(
    State(state): State<AppState>,
    Path(audio_id): Path<i64>,
) -> Result<(StatusCode, Json<IngestionJob>), ApiError> {
    let ingestion = state.ingestion.resubmit(audio_id).await?;
    Ok((StatusCode::ACCEPTED, Json(ingestion)))
}
