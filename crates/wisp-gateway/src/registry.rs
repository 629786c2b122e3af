use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use wisp_types::events::GatewayEvent;

/// Process-wide presence: user id -> live connection handle.
///
/// At most one entry exists per user at any instant. A reconnect replaces the
/// previous entry (last writer wins); the superseded sender is simply dropped,
/// which ends the old connection's forwarding channel. Entries are ephemeral —
/// nothing here survives a restart, clients rebuild it by reconnecting.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Broadcast channel for events every connected client should see
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// user_id -> (conn_id, targeted sender for that user's socket)
    entries: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                broadcast_tx,
                entries: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the all-clients broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Best-effort broadcast to every connected client.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a live connection for a user. Returns (conn_id, receiver);
    /// the receiver is the push channel the connection loop drains.
    /// Any prior entry for the user is replaced in the same write.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.entries.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Remove a user's entry, but only if `conn_id` still owns it. A stale
    /// disconnect racing a fresh reconnect must not evict the new entry.
    /// Returns whether an entry was actually removed.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut entries = self.inner.entries.write().await;
        if let Some((stored_conn_id, _)) = entries.get(&user_id) {
            if *stored_conn_id == conn_id {
                entries.remove(&user_id);
                return true;
            }
        }
        false
    }

    /// Pure read: the push handle for a user, if they are connected.
    pub async fn lookup(&self, user_id: Uuid) -> Option<mpsc::UnboundedSender<GatewayEvent>> {
        self.inner
            .entries
            .read()
            .await
            .get(&user_id)
            .map(|(_, tx)| tx.clone())
    }

    /// Ids of everyone currently registered, for the presence broadcast.
    pub async fn snapshot_ids(&self) -> Vec<Uuid> {
        self.inner.entries.read().await.keys().copied().collect()
    }

    /// Push the current online-ids snapshot to all connected clients.
    /// Best-effort; a client mid-connect may miss one round and catch the next.
    pub async fn broadcast_online_snapshot(&self) {
        let user_ids = self.snapshot_ids().await;
        self.broadcast(GatewayEvent::OnlineUsers { user_ids });
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
