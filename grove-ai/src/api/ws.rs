//! WebSocket notification endpoint
//!
//! GET /ws upgrades the connection and admits it to both of the caller's rooms.
//! The client may then send `{"action":"join"|"leave","kind":"<pipeline>"}` to
//! change membership of its own rooms. Every event is sent as
//! `{"room": "...", "event": "...", "data": {...}}`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use grove_common::events::{room_name, ClientCommand, PipelineKind, RoomAction};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::identity::{UserId, USER_ID_HEADER};
use crate::error::ApiResult;
use crate::notify::{ConnectionId, NotificationHub, RoomMessage};
use crate::AppState;

/// Frames buffered per connection before room forwarders wait on the socket
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Option<String>,
}

/// GET /ws
///
/// Identity comes from `x-user-id`, or the `user_id` query parameter for browser
/// clients that cannot set headers on an upgrade request.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(params.user_id)
        .unwrap_or_default();
    let user = UserId::parse(&raw)?;

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, user)))
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>, user: UserId) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let mut session = Session::new(hub, user, outbound);
    tracing::info!(connection = %session.connection, user_id = %session.user.as_str(), "WebSocket connected");

    for kind in PipelineKind::ALL {
        session.join(kind).await;
    }

    let writer = tokio::spawn(async move {
        while let Some(text) = outbound_rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(connection = %session.connection, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    session.close().await;
    writer.abort();
}

/// Membership of one connection plus the tasks forwarding its rooms
struct Session {
    hub: Arc<NotificationHub>,
    connection: ConnectionId,
    user: UserId,
    outbound: mpsc::Sender<String>,
    forwarders: HashMap<String, JoinHandle<()>>,
}

impl Session {
    fn new(hub: Arc<NotificationHub>, user: UserId, outbound: mpsc::Sender<String>) -> Self {
        Self {
            hub,
            connection: Uuid::new_v4(),
            user,
            outbound,
            forwarders: HashMap::new(),
        }
    }

    async fn join(&mut self, kind: PipelineKind) {
        let room = room_name(self.user.as_str(), kind);
        if let Some(rx) = self.hub.join(self.connection, &room).await {
            let task = tokio::spawn(forward(rx, self.outbound.clone()));
            self.forwarders.insert(room, task);
        }
    }

    async fn leave(&mut self, kind: PipelineKind) {
        let room = room_name(self.user.as_str(), kind);
        self.hub.leave(self.connection, &room).await;
        if let Some(task) = self.forwarders.remove(&room) {
            task.abort();
        }
    }

    async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientCommand>(text) {
            Ok(ClientCommand { action: RoomAction::Join, kind }) => self.join(kind).await,
            Ok(ClientCommand { action: RoomAction::Leave, kind }) => self.leave(kind).await,
            Err(e) => {
                tracing::debug!(connection = %self.connection, error = %e, "Ignoring unrecognized client message");
            }
        }
    }

    async fn close(self) {
        for task in self.forwarders.values() {
            task.abort();
        }
        self.hub.disconnect(self.connection).await;
        tracing::info!(connection = %self.connection, user_id = %self.user.as_str(), "WebSocket disconnected");
    }
}

async fn forward(mut rx: broadcast::Receiver<RoomMessage>, outbound: mpsc::Sender<String>) {
    loop {
        match rx.recv().await {
            Ok(message) => {
                let Some(text) = frame(&message) else {
                    continue;
                };
                if outbound.send(text).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Slow WebSocket client, events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Wire frame: the serialized event with its room added
pub fn frame(message: &RoomMessage) -> Option<String> {
    let mut value = match serde_json::to_value(&message.event) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(room = %message.room, error = %e, "Failed to serialize event");
            return None;
        }
    };
    if let Value::Object(map) = &mut value {
        map.insert("room".to_string(), Value::String(message.room.clone()));
    }
    serde_json::to_string(&value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_common::events::{NotificationEvent, RunStatus};
    use std::time::Duration;

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        serde_json::from_str(&text).unwrap()
    }

    fn open_session(hub: &Arc<NotificationHub>, user: &str) -> (Session, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        (Session::new(hub.clone(), UserId(user.to_string()), tx), rx)
    }

    #[test]
    fn test_frame_carries_room_event_and_data() {
        let message = RoomMessage {
            room: "user:u1:crop-suggestion".to_string(),
            event: NotificationEvent::progress(RunStatus::Analyzing, 10, "Analyzing"),
        };
        let value: Value = serde_json::from_str(&frame(&message).unwrap()).unwrap();
        assert_eq!(value["room"], "user:u1:crop-suggestion");
        assert_eq!(value["event"], "progress");
        assert_eq!(value["data"]["progress"], 10);
    }

    #[tokio::test]
    async fn test_session_forwards_only_joined_rooms() {
        let hub = Arc::new(NotificationHub::new(16));
        let (mut session, mut rx) = open_session(&hub, "u1");
        session.join(PipelineKind::CropSuggestion).await;

        let crop_room = room_name("u1", PipelineKind::CropSuggestion);
        let disease_room = room_name("u1", PipelineKind::DiseaseDetection);
        assert_eq!(hub.emit(&disease_room, NotificationEvent::error("x")).await, 0);
        assert_eq!(
            hub.emit(&crop_room, NotificationEvent::progress(RunStatus::Initiated, 0, "start")).await,
            1
        );

        let value = next_frame(&mut rx).await;
        assert_eq!(value["room"], crop_room);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_command_stops_delivery() {
        let hub = Arc::new(NotificationHub::new(16));
        let (mut session, _rx) = open_session(&hub, "u1");
        session.join(PipelineKind::DiseaseDetection).await;

        session
            .handle_text(r#"{"action":"leave","kind":"disease-detection"}"#)
            .await;
        // Leaving twice is harmless
        session
            .handle_text(r#"{"action":"leave","kind":"disease-detection"}"#)
            .await;

        let room = room_name("u1", PipelineKind::DiseaseDetection);
        assert_eq!(hub.member_count(&room).await, 0);
        assert!(session.forwarders.is_empty());
    }

    #[tokio::test]
    async fn test_close_removes_membership() {
        let hub = Arc::new(NotificationHub::new(16));
        let (mut session, _rx) = open_session(&hub, "u1");
        for kind in PipelineKind::ALL {
            session.join(kind).await;
        }
        session.handle_text("not json").await;
        assert_eq!(hub.room_count().await, 2);

        session.close().await;
        assert_eq!(hub.room_count().await, 0);
    }
}
