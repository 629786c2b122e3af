use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use wisp_types::events::GatewayEvent;

use crate::registry::PresenceRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle one realtime connection for an already-resolved user id.
///
/// Registers presence, announces the updated online snapshot to everyone,
/// then forwards broadcasts and targeted pushes until the socket closes.
pub async fn handle_connection(socket: WebSocket, registry: PresenceRegistry, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to gateway", user_id);

    let (conn_id, mut user_rx) = registry.register(user_id).await;

    // Subscribe before announcing so our own snapshot is not missed
    let mut broadcast_rx = registry.subscribe();
    registry.broadcast_online_snapshot().await;

    let ready = GatewayEvent::Ready { user_id };
    let ready_json = serde_json::to_string(&ready).unwrap();
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        if registry.unregister(user_id, conn_id).await {
            registry.broadcast_online_snapshot().await;
        }
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted pushes -> client, with heartbeat
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
                    if forward(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        // Sender dropped: a newer connection replaced this one
                        None => break,
                    };
                    if forward(&mut sender, &event).await.is_err() {
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

    // Clients send nothing meaningful over the socket (messages go over REST);
    // we only track Pongs and the close frame.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
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

    if registry.unregister(user_id, conn_id).await {
        registry.broadcast_online_snapshot().await;
    }
    info!("{} disconnected from gateway", user_id);
}

async fn forward(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap();
    sender.send(Message::Text(text.into())).await
}
