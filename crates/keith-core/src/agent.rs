//! One tokio task per session. Turns are read from the session mailbox in
//! arrival order; retrieval runs on a side task and reports back into the
//! same mailbox, where [`Conversation::on_retrieval`] fences it by epoch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use keith_bus::BusPublisher;
use keith_schema::{BusMessage, Language, OutboundTurn, Participant, Resource, SessionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::channel::RealtimeChannel;
use crate::conversation::{Conversation, ReferralRequest, RetrievalRequest};
use crate::persona::{Persona, PersonaRegistry};
use crate::retrieval::Retriever;
use crate::router::SessionRouter;

const LANGUAGE_METADATA_PREFIX: &str = "language";

/// Room metadata key carrying one session's active persona language.
/// Several callers can share a room, so each session writes its own key.
pub fn language_metadata_key(session: &SessionId) -> String {
    format!("{LANGUAGE_METADATA_PREFIX}:{session}")
}

const MAILBOX_CAPACITY: usize = 64;

#[derive(Debug)]
pub enum SessionInput {
    Connected,
    Turn {
        text: String,
        language_hint: Option<Language>,
        at: DateTime<Utc>,
    },
    RetrievalDone {
        epoch: u64,
        matches: Vec<Resource>,
    },
    Close,
}

/// Everything a session needs from the outside world.
#[derive(Clone)]
pub struct SessionContext {
    pub personas: Arc<PersonaRegistry>,
    pub retriever: Retriever,
    pub channel: Arc<dyn RealtimeChannel>,
    pub bus: BusPublisher,
    pub magic_link_base_url: String,
    pub greet_on_connect: bool,
}

pub struct SessionHandle {
    tx: mpsc::Sender<SessionInput>,
    join: JoinHandle<()>,
}

impl SessionHandle {
    pub async fn send(&self, input: SessionInput) -> bool {
        self.tx.send(input).await.is_ok()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Asks the session to stop and waits for it.
    pub async fn close(self) {
        let _ = self.tx.send(SessionInput::Close).await;
        drop(self.tx);
        let _ = self.join.await;
    }
}

pub fn spawn_session(
    participant: Participant,
    language: Language,
    ctx: SessionContext,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let session = Session {
        id: SessionId::from_participant(&participant),
        participant,
        router: SessionRouter::new(language),
        conversation: Conversation::new(),
        retrieval: None,
        mailbox: tx.downgrade(),
        ctx,
    };
    let join = tokio::spawn(session.run(rx));
    SessionHandle { tx, join }
}

struct Session {
    id: SessionId,
    participant: Participant,
    router: SessionRouter,
    conversation: Conversation,
    retrieval: Option<JoinHandle<()>>,
    mailbox: mpsc::WeakSender<SessionInput>,
    ctx: SessionContext,
}

impl Session {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionInput>) {
        tracing::info!(
            session_id = %self.id,
            participant = %self.participant.identity,
            language = %self.router.current(),
            "session opened"
        );
        self.publish(BusMessage::SessionOpened {
            session_id: self.id.clone(),
            participant_identity: self.participant.identity.clone(),
        })
        .await;

        while let Some(input) = rx.recv().await {
            match input {
                SessionInput::Connected => self.on_connected().await,
                SessionInput::Turn {
                    text,
                    language_hint,
                    at,
                } => self.on_turn(text, language_hint, at).await,
                SessionInput::RetrievalDone { epoch, matches } => {
                    self.on_retrieval(epoch, matches).await
                }
                SessionInput::Close => break,
            }
        }

        self.abort_retrieval();
        tracing::info!(session_id = %self.id, "session closed");
        self.publish(BusMessage::SessionClosed {
            session_id: self.id.clone(),
        })
        .await;
    }

    fn persona(&self) -> &Persona {
        self.ctx.personas.get(self.router.current())
    }

    async fn on_connected(&mut self) {
        if self.ctx.greet_on_connect {
            let greeting = self.persona().phrases.greeting;
            self.emit(greeting.to_string()).await;
        }
    }

    async fn on_turn(&mut self, text: String, hint: Option<Language>, at: DateTime<Utc>) {
        tracing::debug!(session_id = %self.id, stage = self.conversation.stage().as_str(), text = %text, "turn received");
        self.publish(BusMessage::TurnReceived {
            session_id: self.id.clone(),
            text: text.clone(),
            at,
        })
        .await;

        let detected = self.router.detect_language(&text, hint);
        if let Some(handoff) = self.router.switch_persona(detected) {
            let persona_id = self.persona().id;
            tracing::info!(
                session_id = %self.id,
                from = %handoff.from,
                to = %handoff.to,
                persona = persona_id,
                "persona hand-off"
            );
            if let Err(e) = self
                .ctx
                .channel
                .set_metadata(&language_metadata_key(&self.id), handoff.to.as_str())
                .await
            {
                tracing::warn!(session_id = %self.id, error = %e, "failed to publish hand-off metadata");
            }
            self.publish(BusMessage::PersonaHandoff {
                session_id: self.id.clone(),
                from: handoff.from,
                to: handoff.to,
                persona_id: persona_id.to_string(),
            })
            .await;
        }

        let phrases = self.persona().phrases.clone();
        let outcome = self.conversation.on_turn(&text, &phrases);
        if outcome.reset {
            self.abort_retrieval();
        }
        if let Some(referral) = outcome.referral {
            self.issue_referral(referral).await;
        }
        for reply in outcome.replies {
            self.emit(reply).await;
        }
        if let Some(request) = outcome.retrieval {
            self.start_retrieval(request);
        }
    }

    async fn on_retrieval(&mut self, epoch: u64, matches: Vec<Resource>) {
        let phrases = self.persona().phrases.clone();
        match self.conversation.on_retrieval(epoch, &matches, &phrases) {
            Some(offer) => {
                self.retrieval = None;
                self.emit(offer).await;
            }
            None => {
                tracing::debug!(
                    session_id = %self.id,
                    epoch,
                    current = self.conversation.epoch(),
                    "stale retrieval result dropped"
                );
            }
        }
    }

    fn start_retrieval(&mut self, request: RetrievalRequest) {
        self.abort_retrieval();
        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        let retriever = self.ctx.retriever.clone();
        self.retrieval = Some(tokio::spawn(async move {
            let matches = retriever.find_matches(&request.needs).await;
            let _ = mailbox
                .send(SessionInput::RetrievalDone {
                    epoch: request.epoch,
                    matches,
                })
                .await;
        }));
    }

    fn abort_retrieval(&mut self) {
        if let Some(handle) = self.retrieval.take() {
            handle.abort();
        }
    }

    async fn issue_referral(&self, referral: ReferralRequest) {
        let link = format!(
            "{}/{}",
            self.ctx.magic_link_base_url.trim_end_matches('/'),
            Uuid::new_v4()
        );
        tracing::info!(
            session_id = %self.id,
            participant = %self.participant.identity,
            needs = %referral.needs_summary,
            resource = referral.resource_name.as_deref().unwrap_or("general case worker"),
            link = %link,
            "referral link issued"
        );
        self.publish(BusMessage::ReferralLinkIssued {
            session_id: self.id.clone(),
            participant_identity: self.participant.identity.clone(),
            needs_summary: referral.needs_summary,
            resource_name: referral.resource_name,
            link,
        })
        .await;
    }

    async fn emit(&self, text: String) {
        let result = self
            .ctx
            .channel
            .send_to(&self.participant.identity, text.as_bytes().to_vec())
            .await;
        match result {
            Ok(()) => {
                self.publish(BusMessage::TurnEmitted {
                    turn: OutboundTurn {
                        session_id: self.id.clone(),
                        participant_identity: self.participant.identity.clone(),
                        language: self.router.current(),
                        text,
                        at: Utc::now(),
                    },
                })
                .await;
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.id,
                    stage = self.conversation.stage().as_str(),
                    error = %e,
                    "failed to send turn"
                );
            }
        }
    }

    async fn publish(&self, msg: BusMessage) {
        let _ = self.ctx.bus.publish(msg).await;
    }
}

