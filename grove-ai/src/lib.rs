//! grove-ai library interface
//!
//! Exposes the router, state and pipelines for the binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::notify::NotificationHub;
use crate::pipeline::{CropSuggestionPipeline, DiseaseDetectionPipeline, PipelineDeps, TaskQueue};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Room registry for WebSocket notifications
    pub hub: Arc<NotificationHub>,
    /// Fire-and-forget runs, awaited on shutdown
    pub queue: TaskQueue,
    pub crop_suggestions: Arc<CropSuggestionPipeline>,
    pub disease_detections: Arc<DiseaseDetectionPipeline>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(deps: PipelineDeps) -> Self {
        Self {
            db: deps.db.clone(),
            hub: deps.hub.clone(),
            queue: TaskQueue::new(),
            crop_suggestions: Arc::new(CropSuggestionPipeline::new(deps.clone())),
            disease_detections: Arc::new(DiseaseDetectionPipeline::new(deps)),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::suggestion_routes())
        .merge(api::detection_routes())
        .merge(api::crop_routes())
        .merge(api::health_routes())
        .route("/ws", get(api::ws_handler))
        .layer(DefaultBodyLimit::max(api::MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
