use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use uuid::Uuid;

use atelier_types::events::ServerEvent;

/// Outbound handle of a live connection: events pushed here are written to
/// that connection's socket by its send task.
pub type ConnectionHandle = mpsc::UnboundedSender<ServerEvent>;

/// Answers "does this user have an active connection right now".
///
/// The store is advisory: it only gates the optional new-message
/// notification hint. Room delivery and `users.is_online` are the durable
/// signals, so losing every entry on restart is acceptable. Swapping in an
/// external store for multi-process deployments only means providing
/// another impl; call sites hold `Arc<dyn PresenceStore>`.
pub trait PresenceStore: Send + Sync {
    /// Overwrites any prior entry for the user — last registration wins.
    fn register(&self, user_id: Uuid, handle: ConnectionHandle);

    /// Unconditional removal; unknown ids are a no-op.
    fn unregister(&self, user_id: Uuid);

    fn is_present(&self, user_id: Uuid) -> bool;

    /// The last-registered handle for the user, if any.
    fn handle(&self, user_id: Uuid) -> Option<ConnectionHandle>;
}

/// Process-local presence map for single-process deployments.
#[derive(Default)]
pub struct InMemoryPresence {
    entries: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceStore for InMemoryPresence {
    fn register(&self, user_id: Uuid, handle: ConnectionHandle) {
        self.entries
            .write()
            .expect("presence lock poisoned")
            .insert(user_id, handle);
    }

    fn unregister(&self, user_id: Uuid) {
        self.entries
            .write()
            .expect("presence lock poisoned")
            .remove(&user_id);
    }

    fn is_present(&self, user_id: Uuid) -> bool {
        self.entries
            .read()
            .expect("presence lock poisoned")
            .contains_key(&user_id)
    }

    fn handle(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.entries
            .read()
            .expect("presence lock poisoned")
            .get(&user_id)
            .cloned()
    }
}
