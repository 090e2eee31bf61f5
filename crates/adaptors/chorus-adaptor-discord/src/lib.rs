//! Discord adaptor for Chorus
//!
//! One serenity client and one songbird instance per agent. Provides the
//! platform halves of the core traits:
//!
//! - [`DiscordTransport`] / [`DiscordConnection`] for voice
//! - [`DiscordStatusSource`] for the monitored user's presence
//! - [`DiscordTextChannel`] for persona-styled posts
//!
//! and [`start_agent_bot`], which wires an [`chorus_core::Agent`] to the
//! gateway (persona assignment on ready, replies to mentions).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bot;
pub mod status;
pub mod text;
pub mod voice;

pub use bot::{gateway_intents, start_agent_bot, strip_mention, BotHandle};
pub use status::DiscordStatusSource;
pub use text::DiscordTextChannel;
pub use voice::{DiscordConnection, DiscordTransport};
