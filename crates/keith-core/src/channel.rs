use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use keith_schema::{Language, Participant, RoomEvent};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("participant not connected: {0}")]
    NotConnected(String),
    #[error("identity already in room: {0}")]
    IdentityTaken(String),
    #[error("room closed")]
    Closed,
}

/// Agent-side view of a realtime room: deliver payloads to one participant
/// and publish room-level metadata.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn send_to(&self, identity: &str, payload: Vec<u8>) -> Result<(), ChannelError>;
    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), ChannelError>;
}

struct Member {
    sid: String,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
}

struct RoomInner {
    name: String,
    events: mpsc::UnboundedSender<RoomEvent>,
    members: RwLock<HashMap<String, Member>>,
    metadata: RwLock<HashMap<String, String>>,
}

/// In-process room with reliable, ordered delivery. Participants join with
/// [`LocalRoom::join`]; the agent side consumes the [`RoomEvent`] stream
/// returned by [`LocalRoom::new`] and answers through [`RealtimeChannel`].
#[derive(Clone)]
pub struct LocalRoom {
    inner: Arc<RoomInner>,
}

impl LocalRoom {
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let room = Self {
            inner: Arc::new(RoomInner {
                name: name.into(),
                events,
                members: RwLock::new(HashMap::new()),
                metadata: RwLock::new(HashMap::new()),
            }),
        };
        (room, rx)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn join(
        &self,
        identity: impl Into<String>,
        language_hint: Option<Language>,
    ) -> Result<ParticipantConnection, ChannelError> {
        let identity = identity.into();
        let sid = format!("PA_{}", Uuid::new_v4().simple());
        let (outbox, inbox) = mpsc::unbounded_channel();
        {
            let mut members = self
                .inner
                .members
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if members.contains_key(&identity) {
                return Err(ChannelError::IdentityTaken(identity));
            }
            members.insert(
                identity.clone(),
                Member {
                    sid: sid.clone(),
                    outbox,
                },
            );
        }

        let participant = Participant { sid, identity };
        self.inner
            .events
            .send(RoomEvent::ParticipantConnected {
                participant: participant.clone(),
                language_hint,
            })
            .map_err(|_| ChannelError::Closed)?;
        tracing::debug!(room = %self.inner.name, identity = %participant.identity, "participant joined");

        Ok(ParticipantConnection {
            participant,
            room: self.clone(),
            inbox,
            language_hint,
            left: false,
        })
    }

    pub fn metadata(&self, key: &str) -> Option<String> {
        self.inner
            .metadata
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn participant_count(&self) -> usize {
        self.inner
            .members
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn leave(&self, participant: &Participant) {
        let removed = {
            let mut members = self
                .inner
                .members
                .write()
                .unwrap_or_else(|e| e.into_inner());
            match members.get(&participant.identity) {
                Some(member) if member.sid == participant.sid => {
                    members.remove(&participant.identity);
                    true
                }
                _ => false,
            }
        };
        if removed {
            let _ = self.inner.events.send(RoomEvent::ParticipantDisconnected {
                participant: participant.clone(),
            });
            tracing::debug!(room = %self.inner.name, identity = %participant.identity, "participant left");
        }
    }
}

#[async_trait]
impl RealtimeChannel for LocalRoom {
    async fn send_to(&self, identity: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        let members = self
            .inner
            .members
            .read()
            .unwrap_or_else(|e| e.into_inner());
        let member = members
            .get(identity)
            .ok_or_else(|| ChannelError::NotConnected(identity.to_string()))?;
        member
            .outbox
            .send(payload)
            .map_err(|_| ChannelError::NotConnected(identity.to_string()))
    }

    async fn set_metadata(&self, key: &str, value: &str) -> Result<(), ChannelError> {
        self.inner
            .metadata
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Caller side of a [`LocalRoom`] membership. Dropping it leaves the room.
pub struct ParticipantConnection {
    participant: Participant,
    room: LocalRoom,
    inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    language_hint: Option<Language>,
    left: bool,
}

impl ParticipantConnection {
    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// Hint attached to every turn sent with [`Self::send_text`].
    pub fn set_language_hint(&mut self, hint: Option<Language>) {
        self.language_hint = hint;
    }

    pub fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.send_bytes(text.as_bytes().to_vec(), self.language_hint)
    }

    pub fn send_bytes(
        &self,
        payload: Vec<u8>,
        language_hint: Option<Language>,
    ) -> Result<(), ChannelError> {
        if self.left {
            return Err(ChannelError::NotConnected(self.participant.identity.clone()));
        }
        self.room
            .inner
            .events
            .send(RoomEvent::DataReceived {
                participant: self.participant.clone(),
                payload,
                language_hint,
                at: Utc::now(),
            })
            .map_err(|_| ChannelError::Closed)
    }

    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.inbox.recv().await
    }

    pub async fn recv_text(&mut self) -> Option<String> {
        self.recv()
            .await
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn leave(mut self) {
        self.leave_room();
    }

    fn leave_room(&mut self) {
        if !self.left {
            self.left = true;
            self.room.leave(&self.participant);
        }
    }
}

impl Drop for ParticipantConnection {
    fn drop(&mut self) {
        self.leave_room();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_send_and_receive() {
        let (room, mut events) = LocalRoom::new("health-help-01");
        let mut caller = room.join("caller-1", Some(Language::Es)).unwrap();

        match events.recv().await.unwrap() {
            RoomEvent::ParticipantConnected {
                participant,
                language_hint,
            } => {
                assert_eq!(participant.identity, "caller-1");
                assert_eq!(language_hint, Some(Language::Es));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        caller.send_text("hola").unwrap();
        match events.recv().await.unwrap() {
            RoomEvent::DataReceived { payload, language_hint, .. } => {
                assert_eq!(payload, b"hola");
                assert_eq!(language_hint, Some(Language::Es));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        room.send_to("caller-1", b"hello back".to_vec()).await.unwrap();
        assert_eq!(caller.recv_text().await.unwrap(), "hello back");
    }

    #[tokio::test]
    async fn delivery_preserves_order() {
        let (room, _events) = LocalRoom::new("r");
        let mut caller = room.join("caller-1", None).unwrap();
        for i in 0..10 {
            room.send_to("caller-1", format!("{i}").into_bytes())
                .await
                .unwrap();
        }
        for i in 0..10 {
            assert_eq!(caller.recv_text().await.unwrap(), i.to_string());
        }
    }

    #[tokio::test]
    async fn send_to_unknown_participant_fails() {
        let (room, _events) = LocalRoom::new("r");
        let err = room.send_to("ghost", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConnected(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn duplicate_identity_is_rejected() {
        let (room, _events) = LocalRoom::new("r");
        let _first = room.join("caller-1", None).unwrap();
        assert!(matches!(
            room.join("caller-1", None),
            Err(ChannelError::IdentityTaken(_))
        ));
    }

    #[tokio::test]
    async fn dropping_connection_emits_disconnect() {
        let (room, mut events) = LocalRoom::new("r");
        let caller = room.join("caller-1", None).unwrap();
        let _ = events.recv().await;
        drop(caller);

        assert!(matches!(
            events.recv().await.unwrap(),
            RoomEvent::ParticipantDisconnected { .. }
        ));
        assert_eq!(room.participant_count(), 0);
    }

    #[tokio::test]
    async fn metadata_round_trips() {
        let (room, _events) = LocalRoom::new("r");
        room.set_metadata("language", "es").await.unwrap();
        assert_eq!(room.metadata("language").as_deref(), Some("es"));
        assert!(room.metadata("missing").is_none());
    }

    #[test]
    fn channel_error_display() {
        assert_eq!(
            ChannelError::NotConnected("caller-1".into()).to_string(),
            "participant not connected: caller-1"
        );
        assert_eq!(ChannelError::Closed.to_string(), "room closed");
    }
}
