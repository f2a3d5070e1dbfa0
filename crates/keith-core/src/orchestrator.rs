use std::collections::HashMap;

use keith_schema::{Language, Participant, RoomEvent, SessionId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{spawn_session, SessionContext, SessionHandle, SessionInput};

/// Routes room events to per-session tasks and owns the session map.
pub struct Orchestrator {
    ctx: SessionContext,
    agent_identity: String,
    default_language: Language,
    sessions: HashMap<SessionId, SessionHandle>,
}

impl Orchestrator {
    pub fn new(
        ctx: SessionContext,
        agent_identity: impl Into<String>,
        default_language: Language,
    ) -> Self {
        Self {
            ctx,
            agent_identity: agent_identity.into(),
            default_language,
            sessions: HashMap::new(),
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<RoomEvent>,
        cancel: CancellationToken,
    ) {
        tracing::info!(agent = %self.agent_identity, "orchestrator started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }
        self.shutdown().await;
        tracing::info!("orchestrator stopped");
    }

    pub async fn dispatch(&mut self, event: RoomEvent) {
        if event.participant().identity == self.agent_identity {
            return;
        }
        match event {
            RoomEvent::ParticipantConnected {
                participant,
                language_hint,
            } => {
                self.deliver(participant, language_hint, SessionInput::Connected)
                    .await;
            }
            RoomEvent::DataReceived {
                participant,
                payload,
                language_hint,
                at,
            } => {
                let text = String::from_utf8_lossy(&payload).into_owned();
                let input = SessionInput::Turn {
                    text,
                    language_hint,
                    at,
                };
                self.deliver(participant, language_hint, input).await;
            }
            RoomEvent::ParticipantDisconnected { participant } => {
                let id = SessionId::from_participant(&participant);
                if let Some(handle) = self.sessions.remove(&id) {
                    handle.close().await;
                }
            }
        }
    }

    async fn deliver(
        &mut self,
        participant: Participant,
        language_hint: Option<Language>,
        input: SessionInput,
    ) {
        let id = SessionId::from_participant(&participant);
        if self.sessions.get(&id).is_some_and(SessionHandle::is_finished) {
            self.sessions.remove(&id);
        }
        let handle = self.sessions.entry(id.clone()).or_insert_with(|| {
            spawn_session(
                participant,
                language_hint.unwrap_or(self.default_language),
                self.ctx.clone(),
            )
        });
        if !handle.send(input).await {
            tracing::warn!(session_id = %id, "session mailbox closed, dropping turn");
            self.sessions.remove(&id);
        }
    }

    pub async fn shutdown(&mut self) {
        for (_, handle) in self.sessions.drain() {
            handle.close().await;
        }
    }
}
