//! Test Helper Utilities
//!
//! Shared utilities for testing grove-ai

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

// Not every test binary uses every helper
#[allow(unused_imports)]
pub use db_utils::{count_rows, create_test_db, crop_status};
#[allow(unused_imports)]
pub use fakes::{FakeGeneration, FakeImageHost, FakeWeather};

use base64::Engine;
use grove_common::config::PipelineConfig;
use grove_common::events::{room_name, NotificationEvent, PipelineKind, RunStatus};
use grove_ai::models::{ImageUpload, ManualAttributes, SuggestionInput, SuggestionRequest};
use grove_ai::notify::{NotificationHub, RoomMessage};
use grove_ai::pipeline::PipelineDeps;
use grove_ai::services::TempFileStore;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Enough of a JPEG header for content sniffing
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

pub fn jpeg_upload() -> ImageUpload {
    ImageUpload {
        bytes: JPEG.to_vec(),
        file_name: "leaf.jpg".to_string(),
    }
}

pub fn jpeg_base64() -> String {
    base64::engine::general_purpose::STANDARD.encode(JPEG)
}

/// Pipeline collaborators wired to fakes and a test database
pub struct TestHarness {
    pub deps: PipelineDeps,
    pub ai: Arc<FakeGeneration>,
    pub weather: Arc<FakeWeather>,
    pub image_host: Arc<FakeImageHost>,
    /// Keeps the uploads directory alive for the test's duration
    pub uploads: TempDir,
    /// Holds the database file for on-disk harnesses
    pub data_dir: Option<TempDir>,
}

impl TestHarness {
    pub async fn new(ai: FakeGeneration) -> Self {
        Self::with_config(ai, PipelineConfig::default()).await
    }

    pub async fn with_config(ai: FakeGeneration, config: PipelineConfig) -> Self {
        Self::build(ai, config, create_test_db().await, None)
    }

    /// Harness over a file-backed pool opened the way the service opens it, so
    /// runs use several connections at once
    pub async fn on_disk(ai: FakeGeneration, config: PipelineConfig) -> Self {
        let data_dir = TempDir::new().expect("Failed to create data dir");
        let db = grove_ai::db::init_database_pool(&data_dir.path().join("grove.db"))
            .await
            .expect("Failed to open file-backed database");
        Self::build(ai, config, db, Some(data_dir))
    }

    fn build(
        ai: FakeGeneration,
        config: PipelineConfig,
        db: SqlitePool,
        data_dir: Option<TempDir>,
    ) -> Self {
        let uploads = TempDir::new().expect("Failed to create uploads dir");
        let ai = Arc::new(ai);
        let weather = Arc::new(FakeWeather::default());
        let image_host = Arc::new(FakeImageHost::default());

        let deps = PipelineDeps {
            db,
            hub: Arc::new(NotificationHub::new(256)),
            ai: ai.clone(),
            weather: weather.clone(),
            image_host: Some(image_host.clone()),
            temp_files: TempFileStore::new(uploads.path().to_path_buf()),
            config,
        };

        Self {
            deps,
            ai,
            weather,
            image_host,
            uploads,
            data_dir,
        }
    }

    /// Join the user's room for `kind` as a fresh connection
    pub async fn listen(&self, user_id: &str, kind: PipelineKind) -> broadcast::Receiver<RoomMessage> {
        self.deps
            .hub
            .join(Uuid::new_v4(), &room_name(user_id, kind))
            .await
            .expect("fresh connection joins")
    }

    /// Files left in the uploads directory
    pub fn leftover_uploads(&self) -> usize {
        std::fs::read_dir(self.uploads.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn manual_request(user_id: &str) -> SuggestionRequest {
    SuggestionRequest {
        user_id: user_id.to_string(),
        input: SuggestionInput::Manual(ManualAttributes {
            soil_type: Some("loamy".to_string()),
            season: Some("summer".to_string()),
            ..Default::default()
        }),
        image: None,
    }
}

/// Everything already delivered to a receiver
pub fn drain(rx: &mut broadcast::Receiver<RoomMessage>) -> Vec<NotificationEvent> {
    let mut events = Vec::new();
    while let Ok(message) = rx.try_recv() {
        events.push(message.event);
    }
    events
}

pub fn terminal_events(events: &[NotificationEvent]) -> Vec<&NotificationEvent> {
    events.iter().filter(|e| e.is_terminal()).collect()
}

pub fn result_payload(events: &[NotificationEvent]) -> serde_json::Map<String, serde_json::Value> {
    events
        .iter()
        .find_map(|e| match e {
            NotificationEvent::Result { payload, .. } => Some(payload.clone()),
            _ => None,
        })
        .expect("run emitted a result")
}

pub fn error_message(events: &[NotificationEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            NotificationEvent::Error { error, .. } => Some(error.clone()),
            _ => None,
        })
        .expect("run emitted an error")
}

/// (status, percentage) of every progress event, in order
pub fn progress_steps(events: &[NotificationEvent]) -> Vec<(RunStatus, u8)> {
    events
        .iter()
        .filter_map(|e| match e {
            NotificationEvent::Progress { status, progress, .. } => Some((*status, *progress)),
            _ => None,
        })
        .collect()
}
