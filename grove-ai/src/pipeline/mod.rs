//! Generation pipelines
//!
//! Both pipelines (crop suggestion, disease detection) share the same shape:
//!
//! ```text
//! initiated → analyzing → generatingData → savingToDB → completed
//!      └───────────┴────────────┴──────────────┴──────→ failed
//! ```
//!
//! A run reports through a [`ProgressReporter`], which is consumed by the terminal
//! emission so a run cannot produce both a `result` and an `error`, or neither.
//! Side effects created before persistence (temp files, hosted images) register
//! [`Compensations`] that are undone in reverse order when the run fails.

pub mod crop_suggestion;
pub mod disease_detection;
pub mod prompts;

pub use crop_suggestion::CropSuggestionPipeline;
pub use disease_detection::DiseaseDetectionPipeline;

use futures::future::BoxFuture;
use grove_common::config::PipelineConfig;
use grove_common::events::{room_name, NotificationEvent, PipelineKind, RunStatus};
use sqlx::SqlitePool;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::models::ImageUpload;
use crate::notify::NotificationHub;
use crate::services::{
    ExtractError, GenerationError, GenerationProvider, HostedImage, ImageHost, ImageHostError,
    ImageInput, TempFile, TempFileStore, WeatherError, WeatherProvider,
};

/// Collaborators shared by every run
///
/// Built once at startup and handed to each pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub db: SqlitePool,
    pub hub: Arc<NotificationHub>,
    pub ai: Arc<dyn GenerationProvider>,
    pub weather: Arc<dyn WeatherProvider>,
    /// `None` when no image host is configured; images are then only used inline
    pub image_host: Option<Arc<dyn ImageHost>>,
    pub temp_files: TempFileStore,
    pub config: PipelineConfig,
}

// ============================================================================
// Errors
// ============================================================================

/// Category of a run failure, which decides the message the user sees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Location,
    Image,
    Generation,
    Persistence,
    Internal,
}

impl FailureKind {
    pub fn user_message(&self) -> &'static str {
        match self {
            FailureKind::Location => "Could not find weather data for the provided location.",
            FailureKind::Image => "The uploaded image could not be processed.",
            FailureKind::Generation => {
                "The AI service could not complete this request. Please try again."
            }
            FailureKind::Persistence => "Could not save the results. Please try again.",
            FailureKind::Internal => "Something went wrong. Please try again.",
        }
    }
}

/// Failure of one run
///
/// `detail` is logged; only the kind's user message leaves the process.
#[derive(Debug, Error)]
#[error("{kind:?} failure: {detail}")]
pub struct PipelineError {
    pub kind: FailureKind,
    pub detail: String,
}

impl PipelineError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn generation(context: &str, err: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::Generation, format!("{}: {}", context, err))
    }

    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }
}

impl From<grove_common::Error> for PipelineError {
    fn from(err: grove_common::Error) -> Self {
        Self::new(FailureKind::Persistence, err.to_string())
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::new(FailureKind::Persistence, err.to_string())
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        Self::new(FailureKind::Generation, err.to_string())
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        Self::new(FailureKind::Generation, err.to_string())
    }
}

impl From<WeatherError> for PipelineError {
    fn from(err: WeatherError) -> Self {
        Self::new(FailureKind::Location, err.to_string())
    }
}

impl From<ImageHostError> for PipelineError {
    fn from(err: ImageHostError) -> Self {
        Self::new(FailureKind::Image, err.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

// ============================================================================
// Progress reporting
// ============================================================================

/// Emits one run's events to its room
///
/// Statuses only move forward and percentages never decrease. `complete` and
/// `fail` take `self`, so exactly one terminal event can be sent per reporter.
pub struct ProgressReporter {
    hub: Arc<NotificationHub>,
    room: String,
    run_id: Uuid,
    status: RunStatus,
    progress: u8,
}

impl ProgressReporter {
    pub fn new(hub: Arc<NotificationHub>, user_id: &str, kind: PipelineKind, run_id: Uuid) -> Self {
        Self {
            hub,
            room: room_name(user_id, kind),
            run_id,
            status: RunStatus::Initiated,
            progress: 0,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Report a non-terminal stage
    ///
    /// Illegal transitions are ignored. A percentage below the last one reported is
    /// raised to it.
    pub async fn stage(&mut self, status: RunStatus, progress: u8, message: impl Into<String>) {
        if status.is_terminal() || !self.status.can_transition_to(status) {
            tracing::warn!(
                run_id = %self.run_id,
                from = ?self.status,
                to = ?status,
                "Ignoring illegal stage transition"
            );
            return;
        }

        self.status = status;
        self.progress = progress.clamp(self.progress, 99);
        let message = message.into();

        tracing::debug!(
            run_id = %self.run_id,
            status = ?status,
            progress = self.progress,
            message = %message,
            "Run progress"
        );

        self.hub
            .emit(&self.room, NotificationEvent::progress(status, self.progress, message))
            .await;
    }

    /// Final `completed` progress followed by the `result` event
    pub async fn complete(self, payload: serde_json::Map<String, serde_json::Value>) {
        self.hub
            .emit(
                &self.room,
                NotificationEvent::progress(RunStatus::Completed, 100, "Completed"),
            )
            .await;
        self.hub
            .emit(
                &self.room,
                NotificationEvent::Result {
                    payload,
                    timestamp: chrono::Utc::now(),
                },
            )
            .await;

        tracing::info!(run_id = %self.run_id, room = %self.room, "Run completed");
    }

    /// Single `error` event carrying the user-facing message
    pub async fn fail(self, error: &PipelineError) {
        tracing::error!(
            run_id = %self.run_id,
            room = %self.room,
            stage = ?self.status,
            kind = ?error.kind,
            detail = %error.detail,
            "Run failed"
        );

        self.hub
            .emit(&self.room, NotificationEvent::error(error.user_message()))
            .await;
    }
}

// ============================================================================
// Compensations
// ============================================================================

type CompensationFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

/// Undo actions for side effects created during a run
///
/// Run in reverse registration order. Each action is independent: a failure is
/// logged and the remaining actions still run.
#[derive(Default)]
pub struct Compensations {
    actions: Vec<(String, CompensationFn)>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F, Fut>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        self.actions
            .push((label.into(), Box::new(move || Box::pin(action()))));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action, newest first; returns how many failed
    pub async fn run(mut self) -> usize {
        let mut failed = 0;
        while let Some((label, action)) = self.actions.pop() {
            match action().await {
                Ok(()) => tracing::debug!(compensation = %label, "Compensation applied"),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(compensation = %label, error = %e, "Compensation failed");
                }
            }
        }
        failed
    }

    /// Forget all actions (the run succeeded)
    pub fn disarm(mut self) {
        self.actions.clear();
    }
}

// ============================================================================
// Request images
// ============================================================================

/// Request image after it was stored locally (and hosted, when configured)
pub struct StagedImage {
    pub temp: TempFile,
    pub hosted: Option<HostedImage>,
    pub input: ImageInput,
}

/// Store the image locally, then upload it to the image host
///
/// Each side effect registers its compensation as soon as it exists.
pub(crate) async fn stage_image(
    deps: &PipelineDeps,
    upload: &ImageUpload,
    folder: &str,
    run_id: Uuid,
    compensations: &mut Compensations,
) -> PipelineResult<StagedImage> {
    let temp = deps
        .temp_files
        .store(&upload.bytes, &upload.file_name)
        .await
        .map_err(|e| PipelineError::new(FailureKind::Image, format!("temp file: {}", e)))?;

    {
        let store = deps.temp_files.clone();
        let temp = temp.clone();
        compensations.push("delete temp file", move || async move {
            store.delete(&temp).await.map(|_| ()).map_err(|e| e.to_string())
        });
    }

    let hosted = match &deps.image_host {
        Some(host) => {
            let hosted = host
                .upload(&temp.path, &run_id.to_string(), folder)
                .await?;

            let host = host.clone();
            let id = hosted.id.clone();
            compensations.push("delete hosted image", move || async move {
                host.delete(&id).await.map_err(|e| e.to_string())
            });
            Some(hosted)
        }
        None => {
            tracing::debug!(%run_id, "No image host configured, image used inline only");
            None
        }
    };

    Ok(StagedImage {
        input: ImageInput {
            bytes: upload.bytes.clone(),
            mime_type: temp.mime_type.clone(),
        },
        temp,
        hosted,
    })
}

/// Remove the local copy once the run no longer needs it
pub(crate) async fn discard_temp_file(deps: &PipelineDeps, image: Option<&StagedImage>) {
    if let Some(image) = image {
        if let Err(e) = deps.temp_files.delete(&image.temp).await {
            tracing::warn!(path = %image.temp.path.display(), error = %e, "Failed to delete temp file");
        }
    }
}

// ============================================================================
// Task queue
// ============================================================================

/// Fire-and-forget execution of pipeline runs
///
/// Submitting returns immediately; the caller gets nothing back. On shutdown the
/// queue is closed and in-flight runs are awaited.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tracker: TaskTracker,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit<F>(&self, name: &'static str, run: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, in_flight = self.tracker.len() + 1, "Submitting run");
        self.tracker.spawn(run);
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop accepting work and wait for in-flight runs
    pub async fn shutdown(&self) {
        self.tracker.close();
        tracing::info!(in_flight = self.tracker.len(), "Waiting for in-flight runs");
        self.tracker.wait().await;
    }
}
