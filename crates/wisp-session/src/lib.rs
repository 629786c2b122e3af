//! Client-side conversation state: which peer is open, the visible
//! transcript, per-peer unseen counts and the online set.
//!
//! The session never invents transcript entries. A sent message appears only
//! after the server confirms persistence, and a pushed message is merged in
//! place only when it belongs to the open conversation — pushes from other
//! peers surface as unseen-count bumps.

use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use tracing::debug;
use uuid::Uuid;

use wisp_types::events::GatewayEvent;
use wisp_types::models::{Message, PublicUser};

/// What the client needs from the server. `fetch_history` carries the server
/// side effect of flipping the peer's messages to seen.
pub trait ChatBackend {
    fn fetch_history(&mut self, peer_id: Uuid) -> impl Future<Output = Result<Vec<Message>>>;

    fn send_message(
        &mut self,
        receiver_id: Uuid,
        text: Option<String>,
        image: Option<String>,
    ) -> impl Future<Output = Result<Message>>;

    fn fetch_sidebar(&mut self) -> impl Future<Output = Result<SidebarSnapshot>>;
}

/// Peers plus unseen counts as the server reports them. Peers with zero
/// unseen messages are absent from the map.
#[derive(Debug, Clone, Default)]
pub struct SidebarSnapshot {
    pub users: Vec<PublicUser>,
    pub unseen: HashMap<Uuid, u64>,
}

pub struct ChatSession<B: ChatBackend> {
    backend: B,
    me: Uuid,
    selected: Option<Uuid>,
    transcript: Vec<Message>,
    peers: Vec<PublicUser>,
    unseen: HashMap<Uuid, u64>,
    online: HashSet<Uuid>,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B, me: Uuid) -> Self {
        Self {
            backend,
            me,
            selected: None,
            transcript: Vec::new(),
            peers: Vec::new(),
            unseen: HashMap::new(),
            online: HashSet::new(),
        }
    }

    /// Open a conversation: fetch the full history (the server marks the
    /// peer's messages seen as part of this) and reset the transcript.
    pub async fn select_peer(&mut self, peer_id: Uuid) -> Result<&[Message]> {
        let history = self.backend.fetch_history(peer_id).await?;
        self.selected = Some(peer_id);
        self.transcript = history;
        // the fetch was the read receipt; the badge goes away with it
        self.unseen.remove(&peer_id);
        Ok(&self.transcript)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
        self.transcript.clear();
    }

    /// Merge a realtime event into the session.
    ///
    /// A push for the open conversation appends in place — no re-fetch. A push
    /// from any other peer only bumps that peer's unseen count.
    pub fn handle_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::NewMessage { message } => {
                if message.receiver_id != self.me {
                    debug!("Ignoring push not addressed to us: {}", message.id);
                    return;
                }
                if self.selected == Some(message.sender_id) {
                    self.transcript.push(message);
                } else {
                    *self.unseen.entry(message.sender_id).or_insert(0) += 1;
                }
            }
            GatewayEvent::OnlineUsers { user_ids } => {
                self.online = user_ids.into_iter().collect();
            }
            GatewayEvent::Ready { .. } => {}
        }
    }

    /// Send text to the selected peer. The transcript is extended only after
    /// the server confirms persistence; a failed send changes nothing.
    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<&Message> {
        let peer = self.require_selected()?;
        let message = self
            .backend
            .send_message(peer, Some(text.into()), None)
            .await?;
        self.transcript.push(message);
        Ok(self.transcript.last().expect("just pushed"))
    }

    /// Send an image to the selected peer. The send does not begin until the
    /// encoding future resolves to the payload; an encoding failure aborts
    /// before anything reaches the backend.
    pub async fn send_image<E>(&mut self, encode: E) -> Result<&Message>
    where
        E: Future<Output = Result<String>>,
    {
        let peer = self.require_selected()?;
        let payload = encode.await?;
        let message = self.backend.send_message(peer, None, Some(payload)).await?;
        self.transcript.push(message);
        Ok(self.transcript.last().expect("just pushed"))
    }

    /// Refresh peers and unseen counts from the server.
    pub async fn refresh_sidebar(&mut self) -> Result<()> {
        let snapshot = self.backend.fetch_sidebar().await?;
        self.peers = snapshot.users;
        self.unseen = snapshot.unseen;
        Ok(())
    }

    fn require_selected(&self) -> Result<Uuid> {
        match self.selected {
            Some(peer) => Ok(peer),
            None => bail!("No conversation selected"),
        }
    }

    pub fn selected_peer(&self) -> Option<Uuid> {
        self.selected
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn peers(&self) -> &[PublicUser] {
        &self.peers
    }

    pub fn unseen_count(&self, peer_id: Uuid) -> u64 {
        self.unseen.get(&peer_id).copied().unwrap_or(0)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// Canned backend that records every call.
    #[derive(Default)]
    struct MockBackend {
        history: Vec<Message>,
        history_fetches: usize,
        sent: Vec<(Uuid, Option<String>, Option<String>)>,
        fail_sends: bool,
    }

    impl ChatBackend for MockBackend {
        async fn fetch_history(&mut self, _peer_id: Uuid) -> Result<Vec<Message>> {
            self.history_fetches += 1;
            Ok(self.history.clone())
        }

        async fn send_message(
            &mut self,
            receiver_id: Uuid,
            text: Option<String>,
            image: Option<String>,
        ) -> Result<Message> {
            if self.fail_sends {
                bail!("store unavailable");
            }
            self.sent.push((receiver_id, text.clone(), image.clone()));
            Ok(msg(Uuid::new_v4(), receiver_id, text, image))
        }

        async fn fetch_sidebar(&mut self) -> Result<SidebarSnapshot> {
            Ok(SidebarSnapshot::default())
        }
    }

    fn msg(
        sender_id: Uuid,
        receiver_id: Uuid,
        text: Option<String>,
        image_url: Option<String>,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id,
            receiver_id,
            text,
            image_url,
            seen: false,
            created_at: Utc::now(),
        }
    }

    fn text_from(sender: Uuid, receiver: Uuid, text: &str) -> Message {
        msg(sender, receiver, Some(text.into()), None)
    }

    #[tokio::test]
    async fn push_for_open_conversation_appends_without_refetch() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let backend = MockBackend {
            history: vec![text_from(peer, me, "earlier")],
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, me);

        session.select_peer(peer).await.unwrap();
        assert_eq!(session.transcript().len(), 1);

        session.handle_event(GatewayEvent::NewMessage {
            message: text_from(peer, me, "hi"),
        });

        let texts: Vec<_> = session
            .transcript()
            .iter()
            .map(|m| m.text.as_deref().unwrap())
            .collect();
        assert_eq!(texts, ["earlier", "hi"]);
        // merged in place — exactly the one fetch from select_peer
        assert_eq!(session.backend.history_fetches, 1);
        // the open peer never shows a badge
        assert_eq!(session.unseen_count(peer), 0);
    }

    #[tokio::test]
    async fn push_from_other_peer_only_bumps_unseen() {
        let me = Uuid::new_v4();
        let open_peer = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);
        session.select_peer(open_peer).await.unwrap();

        session.handle_event(GatewayEvent::NewMessage {
            message: text_from(other, me, "psst"),
        });
        session.handle_event(GatewayEvent::NewMessage {
            message: text_from(other, me, "hey"),
        });

        assert!(session.transcript().is_empty());
        assert_eq!(session.unseen_count(other), 2);
    }

    #[tokio::test]
    async fn selecting_a_peer_clears_their_unseen_badge() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);

        session.handle_event(GatewayEvent::NewMessage {
            message: text_from(peer, me, "waiting"),
        });
        assert_eq!(session.unseen_count(peer), 1);

        session.select_peer(peer).await.unwrap();
        assert_eq!(session.unseen_count(peer), 0);
    }

    #[tokio::test]
    async fn sent_text_appears_only_after_confirmation() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);
        session.select_peer(peer).await.unwrap();

        session.send_text("hello").await.unwrap();
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.backend.sent.len(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_transcript_untouched() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let backend = MockBackend {
            fail_sends: true,
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, me);
        session.select_peer(peer).await.unwrap();

        assert!(session.send_text("lost").await.is_err());
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn send_without_selection_is_an_error() {
        let me = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);
        assert!(session.send_text("into the void").await.is_err());
    }

    #[tokio::test]
    async fn image_send_waits_for_encoding() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);
        session.select_peer(peer).await.unwrap();

        session
            .send_image(async { Ok("data:image/png;base64,aGk=".to_string()) })
            .await
            .unwrap();

        let (to, text, image) = &session.backend.sent[0];
        assert_eq!(*to, peer);
        assert!(text.is_none());
        assert_eq!(image.as_deref(), Some("data:image/png;base64,aGk="));
    }

    #[tokio::test]
    async fn failed_encoding_never_reaches_the_backend() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);
        session.select_peer(peer).await.unwrap();

        let result = session
            .send_image(async { bail!("unreadable file") })
            .await;
        assert!(result.is_err());
        assert!(session.backend.sent.is_empty());
        assert!(session.transcript().is_empty());
    }

    #[tokio::test]
    async fn online_set_follows_snapshots() {
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();
        let mut session = ChatSession::new(MockBackend::default(), me);

        session.handle_event(GatewayEvent::OnlineUsers {
            user_ids: vec![me, peer],
        });
        assert!(session.is_online(peer));

        session.handle_event(GatewayEvent::OnlineUsers { user_ids: vec![me] });
        assert!(!session.is_online(peer));
    }
}
