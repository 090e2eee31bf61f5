//! Persona-styled text posts

use async_trait::async_trait;
use chorus_core::{ChannelId, ChorusError, Persona, Result, TextChannel};
use serenity::builder::{CreateEmbed, CreateEmbedAuthor, CreateMessage};
use serenity::http::Http;
use serenity::model::id::ChannelId as SerenityChannelId;
use std::sync::Arc;
use tracing::debug;

/// Posts remarks as embeds authored by the persona
pub struct DiscordTextChannel {
    http: Arc<Http>,
}

impl DiscordTextChannel {
    /// Post through the bot authenticated by `http`
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

/// Embed carrying `text` under the persona's name and colour
pub fn persona_embed(persona: &Persona, text: &str) -> CreateEmbed {
    CreateEmbed::new()
        .author(CreateEmbedAuthor::new(&persona.name))
        .description(text)
        .colour(persona.color_value())
}

#[async_trait]
impl TextChannel for DiscordTextChannel {
    async fn post(&self, channel: ChannelId, persona: &Persona, text: &str) -> Result<()> {
        if channel == 0 {
            return Err(ChorusError::transport("Channel id 0 is not valid"));
        }
        let message = CreateMessage::new().embed(persona_embed(persona, text));
        SerenityChannelId::new(channel)
            .send_message(self.http.as_ref(), message)
            .await
            .map_err(|e| ChorusError::transport(format!("Failed to post message: {}", e)))?;
        debug!(channel_id = channel, persona = %persona.id, "Posted embed");
        Ok(())
    }
}
