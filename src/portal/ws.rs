use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::api::SharedState;
use super::auth::CurrentAdmin;
use super::db::DbHandle;
use super::models::{AdminUser, Notification};
use super::notifications::{CenterSnapshot, NotificationCenter, NotificationSubscription};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

/// Server → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    Snapshot(CenterSnapshot),
    NotificationReceived {
        notification: Notification,
        unread_count: u64,
    },
    NotificationRead {
        id: String,
        unread_count: u64,
    },
    AllRead {
        updated: usize,
    },
    Error {
        message: String,
    },
}

/// Client → server frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    MarkRead { id: String },
    MarkAllRead,
}

pub async fn notifications_ws(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    CurrentAdmin(admin): CurrentAdmin,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, admin))
}

async fn handle_socket(socket: WebSocket, state: SharedState, admin: AdminUser) {
    let (mut sender, receiver) = socket.split();

    // Subscribe before loading so inserts racing the load are not lost.
    let subscription = state.feed.subscribe(&admin.id);
    let center = match NotificationCenter::load(&state.db, &admin.id, state.recent_limit).await {
        Ok(center) => center,
        Err(e) => {
            warn!(admin_id = %admin.id, error = %e, "Failed to load notification center");
            let _ = send(
                &mut sender,
                &WsMessage::Error {
                    message: "Failed to load notifications".to_string(),
                },
            )
            .await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!(admin_id = %admin.id, "Notification center connected");
    run_socket_loop(sender, receiver, subscription, center, state.db.clone()).await;
    info!(admin_id = %admin.id, "Notification center disconnected");
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &WsMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "Failed to serialize WsMessage");
            Ok(())
        }
    }
}

/// Apply one client frame to the center and build the reply.
async fn handle_client_message(
    center: &mut NotificationCenter,
    db: &DbHandle,
    text: &str,
) -> WsMessage {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return WsMessage::Error {
                message: format!("Invalid message: {}", e),
            };
        }
    };
    match msg {
        ClientMessage::MarkRead { id } => match center.mark_read(db, &id).await {
            Ok(_) => WsMessage::NotificationRead {
                id,
                unread_count: center.unread_count(),
            },
            Err(e) => WsMessage::Error {
                message: e.to_string(),
            },
        },
        ClientMessage::MarkAllRead => match center.mark_all_read(db).await {
            Ok(updated) => WsMessage::AllRead { updated },
            Err(e) => WsMessage::Error {
                message: e.to_string(),
            },
        },
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Sends the initial snapshot, then combines subscription forwarding,
/// client commands, and periodic ping/pong health checking into a single
/// select loop. If no Pong is received within [`PONG_TIMEOUT`] after a
/// Ping is sent, the connection is considered dead and the loop exits.
/// Returning drops the subscription.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: NotificationSubscription,
    mut center: NotificationCenter,
    db: DbHandle,
) {
    if send(&mut sender, &WsMessage::Snapshot(center.snapshot()))
        .await
        .is_err()
    {
        return;
    }

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!(recipient_id = subscription.recipient_id(), "Pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            pushed = subscription.next() => {
                let Some(notification) = pushed else { break };
                // Rows already present from the initial load are skipped.
                if center.notifications().iter().any(|n| n.id == notification.id) {
                    continue;
                }
                center.on_inserted(notification.clone());
                let msg = WsMessage::NotificationReceived {
                    notification,
                    unread_count: center.unread_count(),
                };
                if send(&mut sender, &msg).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_message(&mut center, &db, text.as_str()).await;
                        if send(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::db::PortalDb;
    use crate::portal::db::test_support::admin;
    use crate::portal::models::{NewNotification, NotificationType};
    use crate::portal::notifications::DEFAULT_RECENT_LIMIT;

    #[test]
    fn test_server_frames_are_tagged() {
        let msg = WsMessage::AllRead { updated: 3 };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"AllRead\""));
        assert!(json.contains("\"data\":{\"updated\":3}"));
    }

    #[test]
    fn test_client_frames_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"MarkRead","data":{"id":"n1"}}"#).unwrap();
        assert!(matches!(msg, ClientMessage::MarkRead { id } if id == "n1"));
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"MarkAllRead"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::MarkAllRead));
    }

    #[tokio::test]
    async fn test_client_commands_update_center() {
        let db = PortalDb::new_in_memory().unwrap();
        let dana = admin(&db, "Dana Reyes", "dana@city.gov");
        let n = db
            .insert_notification(&NewNotification {
                recipient_id: dana.id.clone(),
                notification_type: NotificationType::Assignment,
                title: "t".into(),
                message: "m".into(),
                issue_id: None,
            })
            .unwrap();
        let db = DbHandle::new(db);
        let mut center = NotificationCenter::load(&db, &dana.id, DEFAULT_RECENT_LIMIT)
            .await
            .unwrap();

        let frame = format!(r#"{{"type":"MarkRead","data":{{"id":"{}"}}}}"#, n.id);
        match handle_client_message(&mut center, &db, &frame).await {
            WsMessage::NotificationRead { unread_count, .. } => assert_eq!(unread_count, 0),
            other => panic!("Expected NotificationRead, got {other:?}"),
        }
        match handle_client_message(&mut center, &db, r#"{"type":"MarkAllRead"}"#).await {
            WsMessage::AllRead { updated } => assert_eq!(updated, 0),
            other => panic!("Expected AllRead, got {other:?}"),
        }
        match handle_client_message(&mut center, &db, "not json").await {
            WsMessage::Error { .. } => {}
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    #[test]
    fn test_keepalive_constants() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
    }
}
