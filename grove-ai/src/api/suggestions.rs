//! Crop suggestion endpoints
//!
//! POST /crop-suggestions, GET /crop-suggestions/history

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use grove_common::events::{room_name, PipelineKind};
use serde::Serialize;

use super::{AcceptedResponse, UserId};
use crate::db::crops::{self, Crop};
use crate::db::history::{self, CropSuggestionHistory};
use crate::error::ApiResult;
use crate::models::SuggestionBody;
use crate::AppState;

/// One history entry with its crops resolved
#[derive(Debug, Serialize)]
pub struct SuggestionHistoryItem {
    #[serde(flatten)]
    pub entry: CropSuggestionHistory,
    pub crops: Vec<Crop>,
}

/// POST /crop-suggestions
///
/// Validates the request and queues a run. Returns 202 with the room the run
/// reports to; everything after this point arrives as notifications.
pub async fn create_suggestion(
    State(state): State<AppState>,
    user: UserId,
    Json(body): Json<SuggestionBody>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    let request = body.validate(user.as_str())?;

    tracing::info!(
        user_id = %user.as_str(),
        mode = request.mode().as_str(),
        has_image = request.image.is_some(),
        "Crop suggestion accepted"
    );

    let pipeline = state.crop_suggestions.clone();
    state.queue.submit("crop-suggestion", async move {
        pipeline.run(request).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            room: room_name(user.as_str(), PipelineKind::CropSuggestion),
        }),
    ))
}

/// GET /crop-suggestions/history
pub async fn suggestion_history(
    State(state): State<AppState>,
    user: UserId,
) -> ApiResult<Json<Vec<SuggestionHistoryItem>>> {
    let mut conn = state.db.acquire().await?;
    let entries = history::list_suggestions(&mut conn, user.as_str()).await?;

    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        let mut crops_for_entry = Vec::with_capacity(entry.crop_ids.len());
        for id in &entry.crop_ids {
            if let Some(crop) = crops::load_by_id(&mut conn, *id).await? {
                crops_for_entry.push(crop);
            }
        }
        items.push(SuggestionHistoryItem {
            entry,
            crops: crops_for_entry,
        });
    }

    Ok(Json(items))
}

pub fn suggestion_routes() -> Router<AppState> {
    Router::new()
        .route("/crop-suggestions", post(create_suggestion))
        .route("/crop-suggestions/history", get(suggestion_history))
}
