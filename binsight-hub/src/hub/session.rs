//! Per-connection WebSocket session
//!
//! Every connection on `GET /hub` gets an id, an unbounded outbound queue
//! drained by a writer task, and a reader loop that matches inbound
//! `HubCommand` frames exhaustively. Command failures are answered with a
//! `CommandRejected` frame on the same connection and never broadcast.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use binsight_common::events::{HubCommand, HubEvent};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ingest;
use crate::overrides::{self, OverrideRequest};
use crate::state::AppState;

/// Upgrade handler for `GET /hub`
pub async fn hub_endpoint(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_session(socket, state))
}

async fn run_session(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Hub events and control frames (pongs) both go out through the writer
    // task so the reader never blocks on a slow socket.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<HubEvent>();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Message>();

    let conn_id = state.hub.register(event_tx).await;
    info!(connection_id = %conn_id, "Hub connection opened");

    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!("Failed to serialize hub event: {e}");
                            continue;
                        }
                    },
                    None => break,
                },
                frame = frame_rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            if ws_tx.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let idle_timeout = Duration::from_secs(state.config.idle_timeout_seconds.max(1));

    // Any inbound frame counts as liveness, pings included.
    loop {
        let frame = match tokio::time::timeout(idle_timeout, ws_rx.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %conn_id, "WebSocket read error: {e}");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!(connection_id = %conn_id, "Idle timeout, dropping connection");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<HubCommand>(&text) {
                Ok(command) => handle_command(&state, conn_id, command).await,
                Err(e) => {
                    reject(&state, conn_id, "unknown", format!("unparseable command: {e}")).await;
                }
            },
            Message::Ping(data) => {
                let _ = frame_tx.send(Message::Pong(data));
            }
            Message::Pong(_) => {}
            Message::Binary(_) => {
                reject(&state, conn_id, "unknown", "binary frames are not accepted".into()).await;
            }
            Message::Close(_) => break,
        }
    }

    // Unregister drops the event sender, which lets the writer drain and exit.
    state.hub.unregister(conn_id).await;
    writer.abort();
    info!(connection_id = %conn_id, "Hub connection closed");
}

async fn handle_command(state: &AppState, conn_id: Uuid, command: HubCommand) {
    let name = command.name();
    debug!(connection_id = %conn_id, command = name, "Hub command received");

    match command {
        HubCommand::JoinGroup { group } => {
            state.hub.join(conn_id, &group).await;
        }
        HubCommand::LeaveGroup { group } => {
            state.hub.leave(conn_id, &group).await;
        }
        HubCommand::SendClassificationResult { payload } => {
            match ingest::ingest_payload(state, &payload).await {
                Ok(record) => {
                    state
                        .hub
                        .send_to(
                            conn_id,
                            &HubEvent::IngestAccepted {
                                classification_id: record.id,
                                detection_id: record.detection_id,
                                timestamp: Utc::now(),
                            },
                        )
                        .await;
                }
                Err(e) => reject(state, conn_id, name, e.to_string()).await,
            }
        }
        HubCommand::ApplyManualOverride {
            classification_id,
            new_classification,
            new_disposal_location,
            reason,
            user_id,
        } => {
            let request = OverrideRequest {
                new_classification,
                new_disposal_location,
                reason,
                user_id: Some(user_id),
            };
            match overrides::apply_override(state, classification_id, request).await {
                Ok(true) => {}
                Ok(false) => {
                    reject(
                        state,
                        conn_id,
                        name,
                        format!("classification {classification_id} not found"),
                    )
                    .await;
                }
                Err(e) => reject(state, conn_id, name, e.to_string()).await,
            }
        }
        HubCommand::NotifyItemDetection {
            detection_id,
            source,
        } => {
            state
                .hub
                .publish_routed(&HubEvent::ItemDetected {
                    detection_id,
                    source: source.unwrap_or_else(|| "unknown".to_string()),
                    timestamp: Utc::now(),
                })
                .await;
        }
        HubCommand::NotifyItemRemoved { detection_id } => {
            state
                .hub
                .publish_routed(&HubEvent::ItemRemoved {
                    detection_id,
                    timestamp: Utc::now(),
                })
                .await;
        }
        HubCommand::ReportProcessingStatus {
            detection_id,
            stage,
            detail,
        } => {
            state
                .hub
                .publish_routed(&HubEvent::ProcessingStatus {
                    detection_id,
                    stage,
                    detail,
                    timestamp: Utc::now(),
                })
                .await;
        }
        HubCommand::SendHeartbeat { source, status } => {
            state
                .hub
                .publish_routed(&HubEvent::Heartbeat {
                    source,
                    status: status.unwrap_or_else(|| "alive".to_string()),
                    timestamp: Utc::now(),
                })
                .await;
        }
        HubCommand::PublishLog {
            source,
            level,
            message,
        } => {
            state
                .hub
                .publish_routed(&HubEvent::LogLine {
                    source,
                    level,
                    message,
                    timestamp: Utc::now(),
                })
                .await;
        }
        HubCommand::RequestSystemStatus => {
            let status = state.system_status().await;
            state.hub.send_to(conn_id, &status).await;
        }
    }
}

async fn reject(state: &AppState, conn_id: Uuid, command: &str, error: String) {
    warn!(connection_id = %conn_id, command, "Hub command rejected: {error}");
    state
        .hub
        .send_to(
            conn_id,
            &HubEvent::CommandRejected {
                command: command.to_string(),
                error,
                timestamp: Utc::now(),
            },
        )
        .await;
}
