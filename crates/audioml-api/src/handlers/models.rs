//! Model registry endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use audioml_core::ModelVersion;

use crate::{ApiError, AppState};

/// Versions of a model, highest first. Unknown names yield an empty list.
pub async fn list_versions(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ModelVersion>>, ApiError> {
    Ok(Json(state.registry.list_versions(&name).await?))
}

/// The active version of a model; 404 when none is active.
pub async fn get_active(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ModelVersion>, ApiError> {
    state
        .registry
        .get_active(&name)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no active version of {name}")))
}

pub async fn activate(
    State(state): State<AppState>,
    Path(model_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.registry.activate(model_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
