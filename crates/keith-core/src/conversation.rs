//! The intake flow: DISCOVERY → SUGGESTION → AGREEMENT → MAGIC_LINK → DISCOVERY.
//!
//! [`Conversation`] is plain data with no I/O. The session task feeds it
//! turns and retrieval completions and carries out the returned effects.

use keith_schema::Resource;
use serde::{Deserialize, Serialize};

use crate::persona::Phrasebook;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    #[default]
    Discovery,
    Suggestion,
    Agreement,
    MagicLink,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "DISCOVERY",
            Self::Suggestion => "SUGGESTION",
            Self::Agreement => "AGREEMENT",
            Self::MagicLink => "MAGIC_LINK",
        }
    }
}

/// Retrieval to run out-of-band; its completion must carry `epoch` back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalRequest {
    pub epoch: u64,
    pub needs: String,
}

/// A caller accepted an offer; a tracked referral link must be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralRequest {
    pub needs_summary: String,
    pub resource_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnOutcome {
    pub replies: Vec<String>,
    pub retrieval: Option<RetrievalRequest>,
    pub referral: Option<ReferralRequest>,
    /// Outstanding retrieval work is obsolete.
    pub reset: bool,
}

impl TurnOutcome {
    fn reply(text: impl Into<String>) -> Self {
        Self {
            replies: vec![text.into()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    stage: Stage,
    needs_summary: String,
    epoch: u64,
    offered: Option<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn needs_summary(&self) -> &str {
        &self.needs_summary
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn on_turn(&mut self, utterance: &str, phrases: &Phrasebook) -> TurnOutcome {
        if phrases.is_reset(utterance) {
            self.stage = Stage::Discovery;
            self.epoch += 1;
            return TurnOutcome {
                reset: true,
                ..TurnOutcome::reply(phrases.reset_prompt)
            };
        }

        match self.stage {
            Stage::Discovery => {
                self.needs_summary = utterance.to_string();
                self.offered = None;
                self.epoch += 1;
                self.stage = Stage::Suggestion;
                TurnOutcome {
                    retrieval: Some(RetrievalRequest {
                        epoch: self.epoch,
                        needs: self.needs_summary.clone(),
                    }),
                    ..TurnOutcome::reply(phrases.acknowledgment(utterance))
                }
            }
            Stage::Suggestion => TurnOutcome::reply(phrases.still_checking),
            Stage::Agreement => {
                if phrases.is_affirmative(utterance) {
                    self.stage = Stage::MagicLink;
                    TurnOutcome {
                        referral: Some(ReferralRequest {
                            needs_summary: self.needs_summary.clone(),
                            resource_name: self.offered.clone(),
                        }),
                        ..TurnOutcome::reply(phrases.confirmation)
                    }
                } else {
                    self.stage = Stage::Discovery;
                    TurnOutcome::reply(phrases.reprompt)
                }
            }
            Stage::MagicLink => {
                self.stage = Stage::Discovery;
                TurnOutcome::reply(phrases.closing)
            }
        }
    }

    /// Applies a retrieval completion. Returns the offer to emit, or `None`
    /// when the completion belongs to an older pass and is discarded.
    pub fn on_retrieval(
        &mut self,
        epoch: u64,
        matches: &[Resource],
        phrases: &Phrasebook,
    ) -> Option<String> {
        if epoch != self.epoch || self.stage != Stage::Suggestion {
            return None;
        }
        self.stage = Stage::Agreement;
        match matches.first() {
            Some(top) => {
                self.offered = Some(top.name.clone());
                Some(phrases.offer(&top.name, top.category_or_default()))
            }
            None => {
                self.offered = None;
                Some(phrases.fallback_offer.to_string())
            }
        }
    }
}
