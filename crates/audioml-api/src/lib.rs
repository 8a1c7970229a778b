//! # audioml-api
//!
//! axum HTTP boundary for audioml. Handlers validate input, call into the
//! `audioml-jobs` services, and return immediately; preprocessing and
//! training run in the background and are observed by polling.

pub mod config;
pub mod error;
pub mod handlers;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use audioml_core::StorageBackend;
use audioml_jobs::{DatasetStore, IngestionService, ModelRegistry, TrainingOrchestrator};

pub use config::{AppConfig, StorageConfig};
pub use error::ApiError;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub ingestion: IngestionService,
    pub orchestrator: TrainingOrchestrator,
    pub registry: ModelRegistry,
    pub datasets: DatasetStore,
    /// Raw uploads are written here before they are queued.
    pub storage: Arc<dyn StorageBackend>,
}

/// Generates time-ordered UUIDv7 request ids.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// All routes with tracing, request ids, CORS, and the upload size limit.
pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/upload", post(handlers::upload::upload_audio))
        .route("/audio/:id", get(handlers::audio::get_audio))
        .route("/audio/:id/resubmit", post(handlers::audio::resubmit_audio))
        .route("/datasets/upload", post(handlers::datasets::upload_dataset))
        .route("/training", get(handlers::training::list_jobs))
        .route("/training/start", post(handlers::training::start_training))
        .route("/training/:id", get(handlers::training::get_job))
        .route(
            "/ml/models/:model/versions",
            get(handlers::models::list_versions),
        )
        .route("/ml/models/:model/active", get(handlers::models::get_active))
        .route(
            "/ml/models/:model/activate",
            post(handlers::models::activate),
        )
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
                .max_age(Duration::from_secs(3600)),
        )
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}
