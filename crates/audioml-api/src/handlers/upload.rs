//! Audio upload.
//!
//! Accepts either `multipart/form-data` with a `file` field, which is stored
//! under `raw/{uuid}{ext}` first, or a JSON body `{"s3_url": "..."}` naming
//! an object that already exists. Either way the audio is queued for
//! preprocessing and the call returns 202 before any processing happens.

use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use audioml_core::{raw_storage_path, Error};

use super::multipart_error;
use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub s3_url: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UploadResponse {
    pub status: String,
    pub audio_id: i64,
}

pub async fn upload_audio(
    State(state): State<AppState>,
    req: Request,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let audio = if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        let (raw_path, filename) = store_multipart_file(&state, multipart).await?;
        match state.ingestion.enqueue(&raw_path, filename).await {
            Ok(audio) => audio,
            Err(e) => {
                // A channel error leaves committed rows for republish, which
                // still need the object.
                if !matches!(e, Error::Channel(_)) {
                    discard_object(&state, &raw_path).await;
                }
                return Err(e.into());
            }
        }
    } else {
        let Json(body) = Json::<UploadRequest>::from_request(req, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        state.ingestion.enqueue(&body.s3_url, None).await?
    };

    info!(
        subsystem = "api",
        op = "upload",
        audio_id = audio.id,
        raw_path = %audio.raw_path,
        "Upload accepted"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            status: "queued".to_string(),
            audio_id: audio.id,
        }),
    ))
}

/// Write the `file` field to the object store. Returns its key and the
/// client-supplied file name.
async fn store_multipart_file(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(String, Option<String>), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("Uploaded file is empty".into()));
        }

        let key = raw_storage_path(&Uuid::new_v4(), filename.as_deref());
        state.storage.write(&key, &data).await?;
        return Ok((key, filename));
    }
    Err(ApiError::BadRequest(
        "Missing file in multipart form".to_string(),
    ))
}

/// Remove an uploaded object that no audio row refers to.
async fn discard_object(state: &AppState, key: &str) {
    if let Err(e) = state.storage.delete(key).await {
        warn!(
            subsystem = "api",
            op = "upload",
            key,
            error = %e,
            "Could not remove orphaned upload"
        );
    }
}
