//! HTTP handlers.

pub mod audio;
pub mod datasets;
pub mod models;
pub mod training;
pub mod upload;

use axum::extract::multipart::MultipartError;

use crate::ApiError;

pub async fn health() -> &'static str {
    "OK"
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Multipart error: {e}"))
}
