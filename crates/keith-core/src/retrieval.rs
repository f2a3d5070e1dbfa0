use std::sync::Arc;

use keith_schema::Resource;
use keith_store::{ResourceQuery, ResourceStore};

/// Words skipped when picking the search term. The first group is the
/// classic filler list; the rest covers greetings, pronouns and the Spanish
/// equivalents so both personas' callers reach a content word.
pub const STOP_WORDS: &[&str] = &[
    "i", "need", "want", "looking", "for", "help", "with", "a", "the", "in", "to", "is", "are",
    "hi", "hello", "hey", "me", "my", "and", "please", "can", "you", "am", "an", "of", "on",
    "some", "hola", "necesito", "ayuda", "con", "para", "de", "la", "el", "un", "una", "yo",
    "mi",
];

/// Lowercases, splits on whitespace, trims punctuation from each token and
/// returns the first token that is not a stop word. Falls back to the whole
/// utterance when nothing survives.
pub fn extract_search_term(utterance: &str) -> String {
    let lower = utterance.to_lowercase();
    lower
        .split_whitespace()
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .find(|token| !token.is_empty() && !STOP_WORDS.contains(token))
        .map(str::to_string)
        .unwrap_or_else(|| utterance.trim().to_string())
}

/// Naive single-keyword lookup against the resource catalog.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn ResourceStore>,
    category: Option<String>,
}

impl Retriever {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Zero or one resource. Store failures read as no match.
    pub async fn find_matches(&self, utterance: &str) -> Vec<Resource> {
        let term = extract_search_term(utterance);
        if term.trim().is_empty() {
            return Vec::new();
        }
        tracing::debug!(term = %term, "retrieval search term");

        let mut query = ResourceQuery::description_contains(term);
        if let Some(category) = &self.category {
            query = query.in_category(category.clone());
        }
        match self.store.search(&query).await {
            Ok(mut found) => {
                found.truncate(1);
                found
            }
            Err(e) => {
                tracing::warn!(error = %e, "resource search failed");
                Vec::new()
            }
        }
    }
}
