pub mod resource;
pub mod task;

pub use resource::*;
pub use task::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Locales the agent can converse in.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    Es,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::En, Language::Es];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Es => "es",
        }
    }

    /// Recognizes `en`/`es` and region-tagged forms such as `es-MX` or `EN_us`.
    pub fn from_tag(raw: &str) -> Option<Self> {
        let primary = raw
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "en" => Some(Self::En),
            "es" => Some(Self::Es),
            _ => None,
        }
    }

    /// Like [`Language::from_tag`] but never fails: unknown tags resolve to English.
    pub fn parse(raw: &str) -> Self {
        Self::from_tag(raw).unwrap_or_default()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connected member of a realtime room. `sid` is unique per connection,
/// `identity` is the caller-chosen name.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub sid: String,
    pub identity: String,
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Sessions live exactly as long as one realtime connection.
    pub fn from_participant(participant: &Participant) -> Self {
        Self(participant.sid.clone())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Events delivered by the realtime room to the agent side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RoomEvent {
    ParticipantConnected {
        participant: Participant,
        #[serde(default)]
        language_hint: Option<Language>,
    },
    DataReceived {
        participant: Participant,
        payload: Vec<u8>,
        /// Language detected by the transport for this turn, if it offers one.
        #[serde(default)]
        language_hint: Option<Language>,
        at: DateTime<Utc>,
    },
    ParticipantDisconnected {
        participant: Participant,
    },
}

impl RoomEvent {
    pub fn participant(&self) -> &Participant {
        match self {
            Self::ParticipantConnected { participant, .. }
            | Self::DataReceived { participant, .. }
            | Self::ParticipantDisconnected { participant } => participant,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundTurn {
    pub session_id: SessionId,
    pub participant_identity: String,
    pub language: Language,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BusMessage {
    SessionOpened {
        session_id: SessionId,
        participant_identity: String,
    },
    SessionClosed {
        session_id: SessionId,
    },
    TurnReceived {
        session_id: SessionId,
        text: String,
        at: DateTime<Utc>,
    },
    TurnEmitted {
        turn: OutboundTurn,
    },
    PersonaHandoff {
        session_id: SessionId,
        from: Language,
        to: Language,
        persona_id: String,
    },
    ReferralLinkIssued {
        session_id: SessionId,
        participant_identity: String,
        needs_summary: String,
        resource_name: Option<String>,
        link: String,
    },
    TaskSubmitted {
        task_id: String,
        assigned_agent: String,
    },
    TaskClaimed {
        task_id: String,
        worker: String,
    },
    TaskCompleted {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant() -> Participant {
        Participant {
            sid: "PA_1".into(),
            identity: "caller-1".into(),
        }
    }

    #[test]
    fn language_from_tag_accepts_region_forms() {
        assert_eq!(Language::from_tag("en"), Some(Language::En));
        assert_eq!(Language::from_tag("es-MX"), Some(Language::Es));
        assert_eq!(Language::from_tag("EN_us"), Some(Language::En));
        assert_eq!(Language::from_tag(" es "), Some(Language::Es));
        assert_eq!(Language::from_tag("fr"), None);
        assert_eq!(Language::from_tag(""), None);
    }

    #[test]
    fn language_parse_falls_back_to_english() {
        assert_eq!(Language::parse("de-DE"), Language::En);
        assert_eq!(Language::parse(""), Language::En);
        assert_eq!(Language::parse("es"), Language::Es);
    }

    #[test]
    fn session_id_follows_connection_sid() {
        let id = SessionId::from_participant(&participant());
        assert_eq!(id.0, "PA_1");
        assert_eq!(id.to_string(), "PA_1");
    }

    #[test]
    fn room_event_tagged_serde() {
        let event = RoomEvent::DataReceived {
            participant: participant(),
            payload: b"hello".to_vec(),
            language_hint: Some(Language::Es),
            at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"data_received""#));
        let de: RoomEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(de.participant().identity, "caller-1");
        match de {
            RoomEvent::DataReceived {
                payload,
                language_hint,
                ..
            } => {
                assert_eq!(payload, b"hello");
                assert_eq!(language_hint, Some(Language::Es));
            }
            _ => panic!("Expected DataReceived"),
        }
    }

    #[test]
    fn room_event_language_hint_defaults_to_none() {
        let json = r#"{"type":"participant_connected","participant":{"sid":"s","identity":"i"}}"#;
        let de: RoomEvent = serde_json::from_str(json).unwrap();
        match de {
            RoomEvent::ParticipantConnected { language_hint, .. } => {
                assert!(language_hint.is_none())
            }
            _ => panic!("Expected ParticipantConnected"),
        }
    }

    #[test]
    fn bus_message_handoff_serde() {
        let msg = BusMessage::PersonaHandoff {
            session_id: SessionId("PA_1".into()),
            from: Language::En,
            to: Language::Es,
            persona_id: "keith-es-01".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let de: BusMessage = serde_json::from_str(&json).unwrap();
        match de {
            BusMessage::PersonaHandoff { from, to, .. } => {
                assert_eq!(from, Language::En);
                assert_eq!(to, Language::Es);
            }
            _ => panic!("Expected PersonaHandoff"),
        }
    }
}
