use keith_schema::Language;

/// Fixed utterances a persona speaks, plus the cue words it listens for.
///
/// Templates use `{need}`, `{name}` and `{category}` placeholders.
#[derive(Debug, Clone)]
pub struct Phrasebook {
    pub greeting: &'static str,
    pub reset_prompt: &'static str,
    pub acknowledgment: &'static str,
    pub still_checking: &'static str,
    pub offer: &'static str,
    pub fallback_offer: &'static str,
    pub confirmation: &'static str,
    pub reprompt: &'static str,
    pub closing: &'static str,
    /// Extra affirmatives, matched as whole words.
    pub affirmative_words: &'static [&'static str],
    /// Extra reset phrases, matched as substrings.
    pub reset_phrases: &'static [&'static str],
}

/// Affirmative cues every persona honors; "ok" also covers "okay".
const AFFIRMATIVE_SUBSTRINGS: [&str; 3] = ["yes", "sure", "ok"];
const RESET_SUBSTRINGS: [&str; 2] = ["reset", "start over"];

impl Phrasebook {
    pub fn acknowledgment(&self, need: &str) -> String {
        self.acknowledgment.replace("{need}", need)
    }

    pub fn offer(&self, name: &str, category: &str) -> String {
        self.offer
            .replace("{name}", name)
            .replace("{category}", category)
    }

    pub fn is_affirmative(&self, utterance: &str) -> bool {
        let lower = utterance.to_lowercase();
        if AFFIRMATIVE_SUBSTRINGS.iter().any(|cue| lower.contains(cue)) {
            return true;
        }
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| self.affirmative_words.contains(&word))
    }

    pub fn is_reset(&self, utterance: &str) -> bool {
        let lower = utterance.to_lowercase();
        RESET_SUBSTRINGS
            .iter()
            .chain(self.reset_phrases.iter())
            .any(|cue| lower.contains(cue))
    }
}

#[derive(Debug, Clone)]
pub struct Persona {
    pub id: &'static str,
    pub display_name: &'static str,
    pub language: Language,
    pub language_code: &'static str,
    pub system_script: &'static str,
    pub phrases: Phrasebook,
}

const ENGLISH_SCRIPT: &str = "You are KEITH (Kindness Efficiency Intelligent Triage Helper).
TONE: Calm, unhurried, empathetic.
GOAL: Resource referral.
IDENTITY: \"I am a helpful neighbor.\"
If Spanish is detected, transfer to 'keith-es-01'.";

const SPANISH_SCRIPT: &str = "Eres KEITH (Asistente de Triaje Inteligente).
TONO: Calmado, empático, paciente.
META: Referencia de recursos humanitarios.
IDENTIDAD: \"Soy un vecino servicial.\"
Si detectas Inglés, transfiere a 'keith-en-01'.";

fn english() -> Persona {
    Persona {
        id: "keith-en-01",
        display_name: "Keith (English)",
        language: Language::En,
        language_code: "en-US",
        system_script: ENGLISH_SCRIPT,
        phrases: Phrasebook {
            greeting: "Hello! I'm KEITH. How can I help you move onward today?",
            reset_prompt: "Okay, let's start over. What kind of support are you looking for today?",
            acknowledgment: "I hear that you're looking for help with \"{need}\". I'm checking our resources...",
            still_checking: "One moment, I'm just looking that up.",
            offer: "I found a great resource: {name}. They help with {category}. Would you like to connect with them?",
            fallback_offer: "I couldn't find a perfect match, but I can connect you with a general case worker. Would that help?",
            confirmation: "Great. I'm generating a secure Magic Link for you now. You'll receive it via SMS shortly, which will let you track this referral.",
            reprompt: "I understand. Is there something else you're looking for?",
            closing: "I've sent that text. Is there anything else I can help with?",
            affirmative_words: &[],
            reset_phrases: &[],
        },
    }
}

fn spanish() -> Persona {
    Persona {
        id: "keith-es-01",
        display_name: "Keith (Español)",
        language: Language::Es,
        language_code: "es-MX",
        system_script: SPANISH_SCRIPT,
        phrases: Phrasebook {
            greeting: "¡Hola! Soy KEITH. ¿Cómo puedo ayudarte a seguir adelante hoy?",
            reset_prompt: "Está bien, empecemos de nuevo. ¿Qué tipo de apoyo estás buscando hoy?",
            acknowledgment: "Entiendo que buscas ayuda con \"{need}\". Estoy revisando nuestros recursos...",
            still_checking: "Un momento, lo estoy buscando.",
            offer: "Encontré un gran recurso: {name}. Ayudan con {category}. ¿Te gustaría conectarte con ellos?",
            fallback_offer: "No encontré una coincidencia perfecta, pero puedo conectarte con un trabajador social. ¿Te ayudaría?",
            confirmation: "Perfecto. Estoy generando un Magic Link seguro para ti. Lo recibirás por SMS en breve y te permitirá dar seguimiento a esta referencia.",
            reprompt: "Entiendo. ¿Hay algo más que estés buscando?",
            closing: "Ya envié ese mensaje. ¿Hay algo más en lo que pueda ayudarte?",
            affirmative_words: &["sí", "si", "claro", "vale", "bueno", "dale"],
            reset_phrases: &["empezar de nuevo", "reiniciar"],
        },
    }
}

/// Static catalog of personas, exactly one per supported language.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    english: Persona,
    spanish: Persona,
}

impl PersonaRegistry {
    pub fn builtin() -> Self {
        Self {
            english: english(),
            spanish: spanish(),
        }
    }

    /// Total over [`Language`].
    pub fn get(&self, language: Language) -> &Persona {
        match language {
            Language::En => &self.english,
            Language::Es => &self.spanish,
        }
    }
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_total_and_defaults_to_english() {
        let registry = PersonaRegistry::builtin();
        assert_eq!(registry.get(Language::En).id, "keith-en-01");
        assert_eq!(registry.get(Language::Es).id, "keith-es-01");
        assert_eq!(registry.get(Language::parse("es-MX")).language_code, "es-MX");
        assert_eq!(registry.get(Language::parse("fr")).id, "keith-en-01");
        assert_eq!(registry.get(Language::parse("")).id, "keith-en-01");
    }

    #[test]
    fn one_persona_per_language() {
        let registry = PersonaRegistry::builtin();
        let ids: Vec<_> = Language::ALL.iter().map(|l| registry.get(*l).id).collect();
        assert_eq!(ids, vec!["keith-en-01", "keith-es-01"]);
        assert_eq!(registry.get(Language::Es).display_name, "Keith (Español)");
    }

    #[test]
    fn english_templates_fill_placeholders() {
        let phrases = PersonaRegistry::builtin().get(Language::En).phrases.clone();
        assert_eq!(
            phrases.acknowledgment("food"),
            "I hear that you're looking for help with \"food\". I'm checking our resources..."
        );
        assert_eq!(
            phrases.offer("Harbor Pantry", "food"),
            "I found a great resource: Harbor Pantry. They help with food. Would you like to connect with them?"
        );
    }

    #[test]
    fn affirmative_cues_are_case_insensitive_substrings() {
        let phrases = PersonaRegistry::builtin().get(Language::En).phrases.clone();
        for yes in ["yes", "Yes", "YES", "sure thing", "ok", "Okay then"] {
            assert!(phrases.is_affirmative(yes), "{yes}");
        }
        for no in ["no", "not really", ""] {
            assert!(!phrases.is_affirmative(no), "{no}");
        }
    }

    #[test]
    fn spanish_affirmatives_match_whole_words_only() {
        let phrases = PersonaRegistry::builtin().get(Language::Es).phrases.clone();
        assert!(phrases.is_affirmative("Sí, por favor"));
        assert!(phrases.is_affirmative("claro"));
        assert!(phrases.is_affirmative("yes"));
        assert!(!phrases.is_affirmative("necesito otra cosa"));
    }

    #[test]
    fn reset_cues() {
        let en = PersonaRegistry::builtin().get(Language::En).phrases.clone();
        let es = PersonaRegistry::builtin().get(Language::Es).phrases.clone();
        assert!(en.is_reset("please RESET"));
        assert!(en.is_reset("can we start over?"));
        assert!(!en.is_reset("starting"));
        assert!(es.is_reset("quiero empezar de nuevo"));
        assert!(es.is_reset("reset"));
    }
}
