//! HTTP API handlers for grove-ai
//!
//! Submission endpoints validate synchronously and return 202; run progress and
//! results are only delivered over the WebSocket notification channel.

pub mod crops;
pub mod detections;
pub mod health;
pub mod identity;
pub mod suggestions;
pub mod ws;

pub use crops::crop_routes;
pub use detections::detection_routes;
pub use health::health_routes;
pub use identity::{UserId, USER_ID_HEADER};
pub use suggestions::suggestion_routes;
pub use ws::ws_handler;

use serde::Serialize;

/// Request bodies carry base64 images; leaves room for the encoding overhead
pub const MAX_BODY_BYTES: usize = crate::models::MAX_IMAGE_BYTES * 3 / 2 + 64 * 1024;

/// 202 response for queued runs
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    /// Room the run's notifications are emitted to
    pub room: String,
}
