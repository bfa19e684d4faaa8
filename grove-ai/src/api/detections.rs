//! Disease detection endpoints
//!
//! POST /disease-detections, GET /disease-detections/history

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grove_common::events::{room_name, PipelineKind};
use serde::Serialize;

use super::{AcceptedResponse, UserId};
use crate::db::diseases::{self, Disease};
use crate::db::history::{self, DiseaseDetectionHistory};
use crate::error::ApiResult;
use crate::models::DetectionBody;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct DetectionHistoryItem {
    #[serde(flatten)]
    pub entry: DiseaseDetectionHistory,
    pub diseases: Vec<Disease>,
}

/// POST /disease-detections
///
/// The plant image travels base64-encoded in the JSON body.
pub async fn create_detection(
    State(state): State<AppState>,
    user: UserId,
    Json(body): Json<DetectionBody>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let request = body.validate(user.as_str())?;

    tracing::info!(
        user_id = %user.as_str(),
        mode = request.mode.as_str(),
        crop = %request.crop_name,
        image_bytes = request.image.bytes.len(),
        "Disease detection accepted"
    );

    let pipeline = state.disease_detections.clone();
    state.queue.submit("disease-detection", async move {
        pipeline.run(request).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            room: room_name(user.as_str(), PipelineKind::DiseaseDetection),
        }),
    ))
}

/// GET /disease-detections/history
pub async fn detection_history(
    State(state): State<AppState>,
    user: UserId,
) -> ApiResult<Json<Vec<DetectionHistoryItem>>> {
    let mut conn = state.db.acquire().await?;
    let entries = history::list_detections(&mut conn, user.as_str()).await?;

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let diseases = diseases::load_by_ids(&mut conn, &entry.disease_ids).await?;
        items.push(DetectionHistoryItem { entry, diseases });
    }

    Ok(Json(items))
}

pub fn detection_routes() -> Router<AppState> {
    Router::new()
        .route("/disease-detections", post(create_detection))
        .route("/disease-detections/history", get(detection_history))
}
