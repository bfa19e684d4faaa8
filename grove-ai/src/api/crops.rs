//! Crop lookup
//!
//! GET /crops/:slug

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::db::crop_details;
use crate::db::crops::{self, Crop};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct CropResponse {
    #[serde(flatten)]
    pub crop: Crop,
    /// Present once enrichment succeeded
    pub details: Option<serde_json::Value>,
}

pub async fn get_crop(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> ApiResult<Json<CropResponse>> {
    let mut conn = state.db.acquire().await?;
    let crop = crops::load_by_slug(&mut conn, &slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Crop {}", slug)))?;
    let details = crop_details::load(&mut conn, crop.id).await?.map(|d| d.details);

    Ok(Json(CropResponse { crop, details }))
}

pub fn crop_routes() -> Router<AppState> {
    Router::new().route("/crops/:slug", get(get_crop))
}
