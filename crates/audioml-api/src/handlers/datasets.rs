//! Training dataset upload.

use axum::extract::{Multipart, State};
use axum::Json;

use audioml_jobs::DatasetUpload;

use super::multipart_error;
use crate::{ApiError, AppState};

/// Store audio files for a named local dataset.
///
/// # Multipart Fields
/// - `dataset`: dataset name (required)
/// - `files` / `files[]`: one or more audio files
///
/// Files ffprobe cannot read are discarded; 400 when none remain.
pub async fn upload_dataset(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DatasetUpload>, ApiError> {
    let mut dataset: Option<String> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("dataset") => {
                let name = field.text().await.map_err(multipart_error)?;
                dataset = Some(name.trim().to_string());
            }
            Some("files") | Some("files[]") | Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                files.push((name, data.to_vec()));
            }
            _ => {}
        }
    }

    let dataset =
        dataset.ok_or_else(|| ApiError::BadRequest("Missing dataset field".to_string()))?;
    Ok(Json(state.datasets.save_files(&dataset, files).await?))
}
