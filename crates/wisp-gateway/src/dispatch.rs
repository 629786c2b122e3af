use tracing::debug;

use wisp_types::events::GatewayEvent;
use wisp_types::models::Message;

use crate::registry::PresenceRegistry;

/// Terminal outcome of a realtime delivery attempt. Both variants are final:
/// there is no retry and no re-push on reconnect. A pending message reaches
/// the receiver through their next history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    DeliveredRealtime,
    PendingPull,
}

/// Attempt realtime delivery of an already-persisted message.
///
/// Must only be called after the store has recorded the message. The push is
/// fire-and-forget: a transport failure is indistinguishable from the receiver
/// being offline, and neither is ever surfaced to the sender — their request
/// already succeeded when persistence did.
pub async fn dispatch_message(registry: &PresenceRegistry, message: &Message) -> DispatchOutcome {
    let Some(handle) = registry.lookup(message.receiver_id).await else {
        debug!(
            "Receiver {} offline, message {} pending pull",
            message.receiver_id, message.id
        );
        return DispatchOutcome::PendingPull;
    };

    let event = GatewayEvent::NewMessage {
        message: message.clone(),
    };
    match handle.send(event) {
        Ok(()) => {
            debug!("Pushed message {} to {}", message.id, message.receiver_id);
            DispatchOutcome::DeliveredRealtime
        }
        Err(_) => {
            // Connection wound down between lookup and send; equivalent to
            // the receiver being offline.
            debug!(
                "Push channel for {} closed, message {} pending pull",
                message.receiver_id, message.id
            );
            DispatchOutcome::PendingPull
        }
    }
}
