//! Text-generation boundary

use crate::conversation::ConversationEntry;
use crate::persona::{Emotion, Persona};
use async_trait::async_trait;
use std::sync::Arc;

/// Longest reply, in characters, before truncation
pub const MAX_REPLY_CHARS: usize = 100;

/// History entries passed to the generator
pub const HISTORY_WINDOW: usize = 3;

/// Everything a generator needs to produce one line
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Who is speaking
    pub persona: Arc<Persona>,
    /// The persona's current mood
    pub emotion: Emotion,
    /// How the persona regards the others, as `(name, relation)`
    pub relations: Vec<(String, String)>,
    /// Game the monitored user is playing, if any
    pub activity: Option<String>,
    /// Recent conversation, oldest first
    pub history: Vec<ConversationEntry>,
}

/// Produces short in-character replies
///
/// Implementations recover from their own failures (typically with one of
/// the persona's preset phrases) instead of returning an error.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a reply
    async fn generate(&self, request: GenerationRequest) -> String;
}

/// Cap `text` at [`MAX_REPLY_CHARS`] characters, appending `...` when cut
pub fn limit_reply(text: &str) -> String {
    truncate_chars(text.trim(), MAX_REPLY_CHARS)
}

/// Cut `text` to `max` characters plus `...` if it is longer
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
