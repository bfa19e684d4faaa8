//! Notification event types
//!
//! Events are addressed to a room (`user:<id>:<kind>`) and serialized as
//! `{"event": "<name>", "data": {...}}` for WebSocket transmission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generation pipeline a room belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    CropSuggestion,
    DiseaseDetection,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 2] = [PipelineKind::CropSuggestion, PipelineKind::DiseaseDetection];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::CropSuggestion => "crop-suggestion",
            PipelineKind::DiseaseDetection => "disease-detection",
        }
    }
}

impl std::fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room name for a user's pipeline: `user:<id>:<kind>`
pub fn room_name(user_id: &str, kind: PipelineKind) -> String {
    format!("user:{}:{}", user_id, kind.as_str())
}

/// Orchestration run status
///
/// Runs only move forward: `initiated → analyzing → generatingData → savingToDB →
/// completed`, with `failed` reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Initiated,
    Analyzing,
    GeneratingData,
    #[serde(rename = "savingToDB")]
    SavingToDb,
    Completed,
    Failed,
}

impl RunStatus {
    fn rank(&self) -> u8 {
        match self {
            RunStatus::Initiated => 0,
            RunStatus::Analyzing => 1,
            RunStatus::GeneratingData => 2,
            RunStatus::SavingToDb => 3,
            RunStatus::Completed => 4,
            RunStatus::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Whether `next` is a legal successor of `self`
    ///
    /// Re-entering the current non-terminal status is allowed so a stage can
    /// report several progress steps.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RunStatus::Failed => true,
            RunStatus::Initiated => *self == RunStatus::Initiated,
            _ => next.rank() >= self.rank(),
        }
    }
}

/// Enrichment status of a knowledge record's detail document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailStatus {
    Pending,
    Success,
    Failed,
}

impl DetailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailStatus::Pending => "pending",
            DetailStatus::Success => "success",
            DetailStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DetailStatus::Pending),
            "success" => Some(DetailStatus::Success),
            "failed" => Some(DetailStatus::Failed),
            _ => None,
        }
    }
}

/// Event delivered to a notification room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum NotificationEvent {
    /// Stage progress for one orchestration run
    Progress {
        status: RunStatus,
        /// 0-100, non-decreasing within a run
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Successful run; domain fields are flattened into the payload
    Result {
        #[serde(flatten)]
        payload: serde_json::Map<String, serde_json::Value>,
        timestamp: DateTime<Utc>,
    },

    /// Failed run; the message is safe to show to the user
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Per-crop enrichment outcome (crop suggestion pipeline)
    CropDetails {
        crop_id: Uuid,
        status: DetailStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn progress(status: RunStatus, progress: u8, message: impl Into<String>) -> Self {
        NotificationEvent::Progress {
            status,
            progress,
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        NotificationEvent::Error {
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// Event name as sent on the wire
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::Progress { .. } => "progress",
            NotificationEvent::Result { .. } => "result",
            NotificationEvent::Error { .. } => "error",
            NotificationEvent::CropDetails { .. } => "crop-details",
        }
    }

    /// `result` and `error` end a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationEvent::Result { .. } | NotificationEvent::Error { .. })
    }
}

/// Room membership request sent by a client over its connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCommand {
    pub action: RoomAction,
    pub kind: PipelineKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomAction {
    Join,
    Leave,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name_format() {
        assert_eq!(room_name("42", PipelineKind::CropSuggestion), "user:42:crop-suggestion");
        assert_eq!(room_name("42", PipelineKind::DiseaseDetection), "user:42:disease-detection");
    }

    #[test]
    fn test_status_forward_only() {
        assert!(RunStatus::Initiated.can_transition_to(RunStatus::Analyzing));
        assert!(RunStatus::Analyzing.can_transition_to(RunStatus::Analyzing));
        assert!(RunStatus::GeneratingData.can_transition_to(RunStatus::SavingToDb));
        assert!(!RunStatus::SavingToDb.can_transition_to(RunStatus::Analyzing));
        assert!(!RunStatus::Analyzing.can_transition_to(RunStatus::Initiated));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        assert!(RunStatus::Initiated.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::SavingToDb.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_progress_wire_format() {
        let event = NotificationEvent::progress(RunStatus::SavingToDb, 85, "Saving");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "progress");
        assert_eq!(json["data"]["status"], "savingToDB");
        assert_eq!(json["data"]["progress"], 85);
        assert_eq!(json["data"]["message"], "Saving");
        assert!(json["data"]["timestamp"].is_string());
    }

    #[test]
    fn test_result_payload_is_flattened() {
        let mut payload = serde_json::Map::new();
        payload.insert("historyId".to_string(), serde_json::json!("abc"));
        let event = NotificationEvent::Result {
            payload,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "result");
        assert_eq!(json["data"]["historyId"], "abc");
        assert!(json["data"]["timestamp"].is_string());
    }

    #[test]
    fn test_crop_details_field_names() {
        let event = NotificationEvent::CropDetails {
            crop_id: Uuid::nil(),
            status: DetailStatus::Failed,
            details: None,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "crop-details");
        assert_eq!(json["data"]["status"], "failed");
        assert!(json["data"].get("cropId").is_some());
        assert!(json["data"].get("details").is_none());
    }

    #[test]
    fn test_client_command_parse() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"action":"leave","kind":"disease-detection"}"#).unwrap();
        assert_eq!(cmd.action, RoomAction::Leave);
        assert_eq!(cmd.kind, PipelineKind::DiseaseDetection);
    }
}
