use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, error};
use uuid::Uuid;

use wisp_gateway::dispatch::{DispatchOutcome, dispatch_message};
use wisp_types::api::{
    AckResponse, ConversationResponse, SendMessageRequest, SendMessageResponse, SidebarResponse,
};
use wisp_types::models::Message;

use crate::auth::AppState;
use crate::convert;
use crate::error::ApiError;
use crate::middleware::CurrentUser;

/// Sidebar: everyone except the caller, plus unseen counts per peer.
/// Peers with nothing unseen are absent from the map, not present with zero.
pub async fn sidebar(
    State(state): State<AppState>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let my_id = me.id.to_string();
    let (rows, counts) = tokio::task::spawn_blocking({
        let state = state.clone();
        move || {
            let rows = state.db.list_users_except(&my_id)?;
            let counts = state.db.unseen_counts(&my_id)?;
            Ok::<_, anyhow::Error>((rows, counts))
        }
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?;

    let mut unseen = HashMap::new();
    for (sender_id, count) in counts {
        if let Ok(id) = sender_id.parse::<Uuid>() {
            unseen.insert(id, count);
        }
    }

    Ok(Json(SidebarResponse {
        success: true,
        users: rows.into_iter().map(convert::public_user).collect(),
        unseen,
    }))
}

/// Full conversation with one peer, creation order. Side effect: everything
/// the peer sent the caller is flipped to seen, so fetching the history is
/// also the read receipt.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let my_id = me.id.to_string();
    let peer = peer_id.to_string();

    let rows = tokio::task::spawn_blocking({
        let state = state.clone();
        move || {
            let rows = state.db.messages_between(&my_id, &peer)?;
            state.db.mark_seen_from(&peer, &my_id)?;
            Ok::<_, anyhow::Error>(rows)
        }
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?;

    Ok(Json(ConversationResponse {
        success: true,
        messages: rows.into_iter().map(convert::message).collect(),
    }))
}

/// Flip a single message to seen by id. Only the receiver can do this; for
/// anyone else the message might as well not exist.
pub async fn mark_message_seen(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    let found = tokio::task::spawn_blocking({
        let state = state.clone();
        let my_id = me.id.to_string();
        move || state.db.mark_seen_by_id(&message_id.to_string(), &my_id)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?;

    if !found {
        return Err(ApiError::NotFound("Message not found".into()));
    }
    Ok(Json(AckResponse { success: true }))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(receiver_id): Path<Uuid>,
    Extension(CurrentUser(me)): Extension<CurrentUser>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (message, _outcome) = persist_and_dispatch(&state, me.id, receiver_id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            message,
        }),
    ))
}

/// The send path: validate, persist, then attempt realtime delivery.
///
/// The dispatch outcome never affects the result — once the row is written the
/// send has succeeded, and an offline receiver (or a dead push channel) just
/// means the message waits for their next history fetch.
pub(crate) async fn persist_and_dispatch(
    state: &AppState,
    sender_id: Uuid,
    receiver_id: Uuid,
    req: SendMessageRequest,
) -> Result<(Message, DispatchOutcome), ApiError> {
    let text = req.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
    let has_image = req.image.as_deref().is_some_and(|i| !i.is_empty());

    match (text.is_some(), has_image) {
        (false, false) => {
            return Err(ApiError::Validation("Message needs text or an image".into()));
        }
        (true, true) => {
            return Err(ApiError::Validation("Message carries either text or an image, not both".into()));
        }
        _ => {}
    }

    let receiver_exists = tokio::task::spawn_blocking({
        let state = state.clone();
        let rid = receiver_id.to_string();
        move || state.db.get_user_by_id(&rid)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?
    .map_err(ApiError::Internal)?
    .is_some();
    if !receiver_exists {
        return Err(ApiError::NotFound("Receiver not found".into()));
    }

    let image_url = match req.image.as_deref().filter(|i| !i.is_empty()) {
        Some(data_uri) => Some(
            state
                .images
                .store_data_uri(data_uri)
                .await
                .map_err(ApiError::Upstream)?,
        ),
        None => None,
    };

    let message = Message {
        id: Uuid::new_v4(),
        sender_id,
        receiver_id,
        text: text.map(str::to_string),
        image_url,
        seen: false,
        created_at: Utc::now(),
    };

    tokio::task::spawn_blocking({
        let state = state.clone();
        let m = message.clone();
        move || {
            state.db.insert_message(
                &m.id.to_string(),
                &m.sender_id.to_string(),
                &m.receiver_id.to_string(),
                m.text.as_deref(),
                m.image_url.as_deref(),
                &m.created_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            )
        }
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(e.into())
    })?
    .map_err(ApiError::Internal)?;

    // Persistence succeeded; delivery is fire-and-forget from here.
    let outcome = dispatch_message(&state.registry, &message).await;
    debug!("Message {} dispatch outcome: {:?}", message.id, outcome);

    Ok((message, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AppStateInner;
    use std::sync::Arc;
    use wisp_gateway::registry::PresenceRegistry;
    use wisp_types::events::GatewayEvent;

    async fn test_state() -> (AppState, Uuid, Uuid) {
        let db = wisp_db::Database::open_in_memory().unwrap();
        let media_dir = std::env::temp_dir().join(format!("wisp-api-test-{}", Uuid::new_v4()));
        let images = wisp_media::ImageStore::new(media_dir, "http://localhost/media".into())
            .await
            .unwrap();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        db.create_user(&a.to_string(), "a@example.com", "Alice", "hi", "$hash").unwrap();
        db.create_user(&b.to_string(), "b@example.com", "Bea", "hey", "$hash").unwrap();

        let state = Arc::new(AppStateInner {
            db,
            jwt_secret: "test-secret".into(),
            registry: PresenceRegistry::new(),
            images,
        });
        (state, a, b)
    }

    fn text_req(text: &str) -> SendMessageRequest {
        SendMessageRequest {
            text: Some(text.into()),
            image: None,
        }
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_persistence() {
        let (state, a, b) = test_state().await;

        let req = SendMessageRequest { text: Some("   ".into()), image: None };
        let err = persist_and_dispatch(&state, a, b, req).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // nothing was written
        let rows = state.db.messages_between(&a.to_string(), &b.to_string()).unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn text_and_image_together_are_rejected() {
        let (state, a, b) = test_state().await;
        let req = SendMessageRequest {
            text: Some("hi".into()),
            image: Some("data:image/png;base64,aGk=".into()),
        };
        let err = persist_and_dispatch(&state, a, b, req).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_receiver_is_not_found() {
        let (state, a, _b) = test_state().await;
        let err = persist_and_dispatch(&state, a, Uuid::new_v4(), text_req("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn online_receiver_gets_realtime_push() {
        let (state, a, b) = test_state().await;
        let (_conn, mut rx) = state.registry.register(b).await;

        let (sent, outcome) = persist_and_dispatch(&state, a, b, text_req("hi")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::DeliveredRealtime);

        match rx.recv().await.unwrap() {
            GatewayEvent::NewMessage { message } => {
                assert_eq!(message.id, sent.id);
                assert_eq!(message.text.as_deref(), Some("hi"));
                assert!(!message.seen);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn offline_receiver_finds_message_on_next_fetch() {
        let (state, a, b) = test_state().await;

        // B sends while A has no connection
        let (sent, outcome) = persist_and_dispatch(&state, b, a, text_req("hello")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::PendingPull);

        // A's sidebar shows one unseen from B, nothing for anyone else
        assert_eq!(
            state.db.unseen_counts(&a.to_string()).unwrap(),
            vec![(b.to_string(), 1)]
        );

        // A fetches the conversation: message is there, then flipped to seen
        let rows = state.db.messages_between(&a.to_string(), &b.to_string()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, sent.id.to_string());
        assert!(!rows[0].seen);

        state.db.mark_seen_from(&b.to_string(), &a.to_string()).unwrap();
        assert_eq!(state.db.count_unseen(&b.to_string(), &a.to_string()).unwrap(), 0);
    }

    #[tokio::test]
    async fn image_message_stores_payload_and_keeps_url() {
        let (state, a, b) = test_state().await;
        let req = SendMessageRequest {
            text: None,
            image: Some("data:image/png;base64,aGVsbG8=".into()),
        };

        let (sent, _) = persist_and_dispatch(&state, a, b, req).await.unwrap();
        assert!(sent.text.is_none());
        let url = sent.image_url.unwrap();
        assert!(url.starts_with("http://localhost/media/"));

        let rows = state.db.messages_between(&a.to_string(), &b.to_string()).unwrap();
        assert_eq!(rows[0].image_url.as_deref(), Some(url.as_str()));
    }
}
