use keith_schema::Language;

/// Result of a persona switch that actually changed the active language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handoff {
    pub from: Language,
    pub to: Language,
}

/// Per-session language routing. Owned by the session task, so a switch is
/// always applied before the next turn is read.
#[derive(Debug, Clone)]
pub struct SessionRouter {
    current: Language,
}

impl SessionRouter {
    pub fn new(initial: Language) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> Language {
        self.current
    }

    /// The channel's per-turn language signal wins; without one the session
    /// keeps its current language. Text content is not inspected.
    pub fn detect_language(&self, _utterance: &str, hint: Option<Language>) -> Language {
        hint.unwrap_or(self.current)
    }

    /// Returns `None` when `target` is already active.
    pub fn switch_persona(&mut self, target: Language) -> Option<Handoff> {
        if target == self.current {
            return None;
        }
        let handoff = Handoff {
            from: self.current,
            to: target,
        };
        self.current = target;
        Some(handoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_uses_hint_or_current() {
        let router = SessionRouter::new(Language::En);
        assert_eq!(router.detect_language("hola", None), Language::En);
        assert_eq!(router.detect_language("hola", Some(Language::Es)), Language::Es);
    }

    #[test]
    fn switch_is_idempotent() {
        let mut router = SessionRouter::new(Language::En);
        assert_eq!(router.switch_persona(Language::En), None);

        let handoff = router.switch_persona(Language::Es).unwrap();
        assert_eq!(handoff.from, Language::En);
        assert_eq!(handoff.to, Language::Es);
        assert_eq!(router.current(), Language::Es);

        assert_eq!(router.switch_persona(Language::Es), None);
    }
}
