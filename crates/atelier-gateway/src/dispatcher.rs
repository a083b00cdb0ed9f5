use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use atelier_types::events::ServerEvent;

use crate::presence::ConnectionHandle;

/// Routes events to rooms and broadcasts global ones.
///
/// A room is named after a user id and holds every live connection for that
/// user (multiple tabs or devices). Delivery to a room reaches them all;
/// an empty room is a silent no-op, which is exactly the offline-receiver
/// degradation the chat relies on.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Global events (user:status) — every connected client receives them.
    broadcast_tx: broadcast::Sender<ServerEvent>,

    /// user_id -> (conn_id -> outbound handle)
    rooms: RwLock<HashMap<Uuid, HashMap<Uuid, ConnectionHandle>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. Fire-and-forget.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Add a connection to the user's room. Returns the connection id, its
    /// outbound handle, and the receiving end the send task drains.
    pub async fn join_room(
        &self,
        user_id: Uuid,
    ) -> (Uuid, ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .rooms
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx.clone());
        (conn_id, tx, rx)
    }

    /// Remove one connection from the user's room. Returns true when the
    /// room is now empty, i.e. the user's last connection is gone.
    pub async fn leave_room(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut rooms = self.inner.rooms.write().await;
        match rooms.get_mut(&user_id) {
            Some(room) => {
                room.remove(&conn_id);
                if room.is_empty() {
                    rooms.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Deliver an event to every connection in the user's room.
    /// Fire-and-forget; an empty or missing room delivers to nobody.
    pub async fn send_to_room(&self, user_id: Uuid, event: ServerEvent) {
        let rooms = self.inner.rooms.read().await;
        if let Some(room) = rooms.get(&user_id) {
            for handle in room.values() {
                let _ = handle.send(event.clone());
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_room_delivery_reaches_all_connections() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (_c1, _tx1, mut rx1) = dispatcher.join_room(user).await;
        let (_c2, _tx2, mut rx2) = dispatcher.join_room(user).await;

        dispatcher
            .send_to_room(
                user,
                ServerEvent::MessagesRead {
                    conversation_id: "a_b".into(),
                },
            )
            .await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_empty_room_send_is_silent() {
        let dispatcher = Dispatcher::new();
        // No one joined; must not error or panic.
        dispatcher
            .send_to_room(
                Uuid::new_v4(),
                ServerEvent::MessagesRead {
                    conversation_id: "a_b".into(),
                },
            )
            .await;
    }

    #[tokio::test]
    async fn test_leave_room_reports_last_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (c1, _tx1, _rx1) = dispatcher.join_room(user).await;
        let (c2, _tx2, _rx2) = dispatcher.join_room(user).await;

        assert!(!dispatcher.leave_room(user, c1).await);
        assert!(dispatcher.leave_room(user, c2).await);
        // Leaving an unknown room is a no-op.
        assert!(!dispatcher.leave_room(user, c2).await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        dispatcher.broadcast(ServerEvent::UserStatus {
            user_id: Uuid::new_v4(),
            is_online: true,
        });
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::UserStatus { is_online: true, .. }
        ));
    }
}
