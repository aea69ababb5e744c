//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a live-walk WebSocket connection.
//! Each connection owns one `WalkRecorder`; the client's location fixes are fed into it
//! through a channel-backed location adapter.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, LiveWalkSession},
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use pawtrack_core::{RecordingError, WalkOwner};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type WsSender = SplitSink<WebSocket, Message>;

/// The handler for upgrading HTTP requests to live-walk WebSocket connections.
pub async fn live_walk_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn send(sender: &mut WsSender, message: &ServerMessage) -> Result<(), axum::Error> {
    let json = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New live-walk connection for user: {}", user_id);
    let (mut sender, mut receiver) = socket.split();

    // --- 1. Resolve whose walks this connection records ---
    let member = match app_state.families.membership(user_id).await {
        Ok(Some(member)) => member,
        Ok(None) => {
            let message = ServerMessage::Error {
                message: "Join or create a family before recording walks.".to_string(),
            };
            let _ = send(&mut sender, &message).await;
            return;
        }
        Err(e) => {
            error!("Failed to load membership for {}: {:?}", user_id, e);
            let message = ServerMessage::Error {
                message: "Failed to load family data.".to_string(),
            };
            let _ = send(&mut sender, &message).await;
            return;
        }
    };
    let session = LiveWalkSession::new(
        &app_state,
        WalkOwner {
            user_id,
            family_id: member.family_id,
        },
    );

    // --- 2. Main Message Loop ---
    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) =
                    handle_text_message(text.as_str(), &app_state, &session, &mut sender).await
                {
                    warn!("Failed to reply on live-walk socket: {}", e);
                    break;
                }
            }
            Some(Ok(Message::Close(_))) => {
                info!("Client sent close message.");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("Live-walk socket error: {}", e);
                break;
            }
            None => {
                info!("Client disconnected.");
                break;
            }
        }
    }

    // --- 3. Cleanup ---
    // A walk still in progress is kept, not discarded.
    session.location.close().await;
    match session.recorder.stop_recording().await {
        Ok(Some(walk)) => info!(walk_id = %walk.id, "Saved in-progress walk on disconnect"),
        Ok(None) => {}
        Err(e) => error!("Failed to save in-progress walk on disconnect: {}", e),
    }
    info!("Live-walk connection closed.");
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    session: &LiveWalkSession,
    sender: &mut WsSender,
) -> Result<(), axum::Error> {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("Unrecognized live-walk message: {}", e);
            let message = ServerMessage::Error {
                message: format!("Unrecognized message: {}", e),
            };
            return send(sender, &message).await;
        }
    };

    match client_msg {
        ClientMessage::Start => {
            let user_id = session.recorder.owner().user_id;
            let reply = match app_state.families.access_for(user_id).await {
                Ok(access) if access.read_only => ServerMessage::Error {
                    message: "Recording is unavailable in read-only mode.".to_string(),
                },
                Ok(_) => match session.recorder.start_recording().await {
                    Ok(_) => ServerMessage::RecordingStarted,
                    Err(e) => ServerMessage::Error {
                        message: e.to_string(),
                    },
                },
                Err(e) => {
                    error!("Failed to evaluate access for {}: {:?}", user_id, e);
                    ServerMessage::Error {
                        message: "Failed to check subscription status.".to_string(),
                    }
                }
            };
            send(sender, &reply).await
        }
        ClientMessage::Point { .. } => {
            let Some(point) = client_msg.as_point() else {
                return Ok(());
            };
            if !session.location.push(point).await {
                let message = ServerMessage::Error {
                    message: "No walk is being recorded.".to_string(),
                };
                return send(sender, &message).await;
            }
            // Totals as of the last point the recorder has ingested.
            match session.recorder.snapshot().await {
                Some(snapshot) => send(sender, &ServerMessage::from(snapshot)).await,
                None => Ok(()),
            }
        }
        ClientMessage::Stop => match session.recorder.stop_recording().await {
            Ok(Some(walk)) => send(sender, &ServerMessage::from(&walk)).await,
            Ok(None) => Ok(()),
            Err(RecordingError::Persist { walk, source }) => {
                error!(walk_id = %walk.id, "Failed to save walk: {}", source);
                let message = ServerMessage::Error {
                    message: "The walk could not be saved.".to_string(),
                };
                send(sender, &message).await
            }
            Err(e) => {
                let message = ServerMessage::Error {
                    message: e.to_string(),
                };
                send(sender, &message).await
            }
        },
    }
}
