use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events sent from server to client over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the connection is registered for pushes
    Ready { user_id: Uuid },

    /// A message addressed to this client was persisted
    NewMessage { message: Message },

    /// Full snapshot of currently-online user ids, re-broadcast to every
    /// client on each connect/disconnect
    OnlineUsers { user_ids: Vec<Uuid> },
}
