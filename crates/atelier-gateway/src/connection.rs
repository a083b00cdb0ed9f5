use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use atelier_db::Database;
use atelier_db::queries::message_from_row;
use atelier_types::conversation::conversation_id;
use atelier_types::events::{ClientCommand, ServerEvent};
use atelier_types::models::Role;

use crate::dispatcher::Dispatcher;
use crate::presence::{ConnectionHandle, PresenceStore};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Identity resolved from the handshake token at the HTTP upgrade layer.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
}

/// Run one authenticated gateway connection until the socket closes.
///
/// The JWT was already verified and resolved to a live user row during the
/// upgrade, so the session starts with Ready and goes straight into the
/// event loop.
pub async fn handle_connection(
    socket: WebSocket,
    dispatcher: Dispatcher,
    presence: Arc<dyn PresenceStore>,
    db: Arc<Database>,
    user: SessionUser,
) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} ({}) connected to gateway", user.name, user.id);

    let ready = ServerEvent::Ready {
        user_id: user.id,
        name: user.name.clone(),
        role: user.role,
    };
    let Ok(text) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    // Join the user's own room and register as the latest presence entry.
    let (conn_id, handle, mut room_rx) = dispatcher.join_room(user.id).await;
    presence.register(user.id, handle.clone());

    // Best-effort online mirror on the user record.
    {
        let db = db.clone();
        let user_id = user.id.to_string();
        if let Err(e) = spawn_blocking(move || db.set_presence(&user_id, true, None))
            .await
            .unwrap_or_else(|e| Err(anyhow::Error::msg(e.to_string())))
        {
            warn!("Failed to mark {} online: {}", user.id, e);
        }
    }

    dispatcher.broadcast(ServerEvent::UserStatus {
        user_id: user.id,
        is_online: true,
    });

    let mut broadcast_rx = dispatcher.subscribe();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward global broadcasts + room events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = room_rx.recv() => {
                    let Some(event) = result else { break };
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client. Commands are handled one at a time,
    // which is what keeps per-conversation persist/broadcast order equal to
    // receipt order.
    let recv_dispatcher = dispatcher.clone();
    let recv_presence = presence.clone();
    let recv_db = db.clone();
    let recv_user = user.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &recv_dispatcher,
                            recv_presence.as_ref(),
                            &recv_db,
                            &recv_user,
                            &recv_handle,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            recv_user.name,
                            recv_user.id,
                            e,
                            &text[..text.len().min(200)]
                        );
                        let _ = recv_handle.send(ServerEvent::MessageError {
                            message: "Unrecognized command payload".into(),
                        });
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Teardown: only the user's last connection flips presence and the
    // online mirror, so closing an old tab never knocks a newer one offline.
    let last_connection = dispatcher.leave_room(user.id, conn_id).await;
    if last_connection {
        presence.unregister(user.id);

        let db = db.clone();
        let user_id = user.id.to_string();
        let last_seen = Utc::now().to_rfc3339();
        if let Err(e) = spawn_blocking(move || db.set_presence(&user_id, false, Some(last_seen.as_str())))
            .await
            .unwrap_or_else(|e| Err(anyhow::Error::msg(e.to_string())))
        {
            warn!("Failed to mark {} offline: {}", user.id, e);
        }

        dispatcher.broadcast(ServerEvent::UserStatus {
            user_id: user.id,
            is_online: false,
        });
    }

    info!("{} ({}) disconnected from gateway", user.name, user.id);
}

async fn handle_command(
    dispatcher: &Dispatcher,
    presence: &dyn PresenceStore,
    db: &Arc<Database>,
    user: &SessionUser,
    reply: &ConnectionHandle,
    cmd: ClientCommand,
) {
    match cmd {
        ClientCommand::MessageSend {
            receiver_id,
            content,
        } => {
            let content = content.trim().to_string();
            if content.is_empty() {
                let _ = reply.send(ServerEvent::MessageError {
                    message: "Message content is empty".into(),
                });
                return;
            }

            let conversation = conversation_id(user.id, receiver_id);

            // Durability precedes delivery: nothing is broadcast unless the
            // row is on disk.
            let row = {
                let db = db.clone();
                let id = Uuid::new_v4().to_string();
                let conversation = conversation.clone();
                let sender_id = user.id.to_string();
                let receiver = receiver_id.to_string();
                let content = content.clone();
                spawn_blocking(move || {
                    db.insert_message(&id, &conversation, &sender_id, &receiver, &content)
                })
                .await
                .unwrap_or_else(|e| Err(anyhow::Error::msg(e.to_string())))
            };

            let message = match row {
                Ok(row) => message_from_row(row),
                Err(e) => {
                    warn!("Failed to persist message from {}: {}", user.id, e);
                    let _ = reply.send(ServerEvent::MessageError {
                        message: "Failed to send message".into(),
                    });
                    return;
                }
            };

            dispatcher
                .send_to_room(user.id, ServerEvent::MessageNew(message.clone()))
                .await;
            dispatcher
                .send_to_room(receiver_id, ServerEvent::MessageNew(message))
                .await;

            // Badge hint for the receiver's latest connection, only when a
            // presence entry exists. Best effort.
            if let Some(hint) = presence.handle(receiver_id) {
                let _ = hint.send(ServerEvent::MessageNotification {
                    from: user.name.clone(),
                    conversation_id: conversation,
                });
            }
        }

        ClientCommand::TypingStart { receiver_id } => {
            dispatcher
                .send_to_room(
                    receiver_id,
                    ServerEvent::TypingStatus {
                        user_id: user.id,
                        user_name: user.name.clone(),
                        is_typing: true,
                    },
                )
                .await;
        }

        ClientCommand::TypingStop { receiver_id } => {
            dispatcher
                .send_to_room(
                    receiver_id,
                    ServerEvent::TypingStatus {
                        user_id: user.id,
                        user_name: user.name.clone(),
                        is_typing: false,
                    },
                )
                .await;
        }

        ClientCommand::MessagesRead { conversation_id } => {
            let outcome = {
                let db = db.clone();
                let conversation = conversation_id.clone();
                let receiver = user.id.to_string();
                let read_at = Utc::now().to_rfc3339();
                spawn_blocking(move || {
                    db.mark_conversation_read(&conversation, &receiver, &read_at)?;
                    db.conversation_participants(&conversation)
                })
                .await
                .unwrap_or_else(|e| Err(anyhow::Error::msg(e.to_string())))
            };

            match outcome {
                // Zero-message conversation: benign no-op, nobody notified.
                Ok(None) => {}
                Ok(Some((sender_id, receiver_id))) => {
                    let me = user.id.to_string();
                    let other = if sender_id == me { receiver_id } else { sender_id };
                    match other.parse::<Uuid>() {
                        Ok(other) => {
                            dispatcher
                                .send_to_room(
                                    other,
                                    ServerEvent::MessagesRead { conversation_id },
                                )
                                .await;
                        }
                        Err(e) => warn!("Corrupt participant id '{}': {}", other, e),
                    }
                }
                Err(e) => {
                    warn!("Failed to mark {} read for {}: {}", conversation_id, user.id, e);
                    let _ = reply.send(ServerEvent::MessageError {
                        message: "Failed to mark messages read".into(),
                    });
                }
            }
        }
    }
}
