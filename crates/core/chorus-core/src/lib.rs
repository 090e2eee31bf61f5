//! Chorus Core
//!
//! Platform-independent runtime for a group of voice-companion agents that
//! follow one user around a chat server. It includes:
//!
//! - Presence monitoring with join/leave/activity edge detection
//! - A fixed pool of agents, each with a persona and one voice slot
//! - A per-agent audio dispatch queue (one clip at a time, FIFO)
//! - Cooldown-gated ambient remarks and autonomous joins
//! - Traits for the pluggable pieces: voice transport, text channel,
//!   speech synthesis and reply generation
//!
//! # Example
//!
//! ```no_run
//! use chorus_core::*;
//!
//! fn main() -> Result<()> {
//!     load_env()?;
//!     let config = ChorusConfig::from_env()?;
//!     let personas = PersonaBook::load(&config.personas_path)?;
//!     println!("{} personas for {} agents", personas.personas().len(), config.bot_count);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod agent;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod generation;
pub mod persona;
pub mod pool;
pub mod presence;
pub mod scheduling;
pub mod synthesis;
pub mod testing;
pub mod transport;

pub use agent::{Agent, AgentServices};
pub use config::{
    get_env_bool, get_env_float, get_env_id, get_env_int, get_env_or, get_required_env, load_env,
    parse_bot_tokens, ChorusConfig, DEFAULT_PERSONAS_PATH,
};
pub use conversation::{ConversationEntry, ConversationLog};
pub use dispatch::{AudioDispatchQueue, AudioJob, DISPATCH_TICK};
pub use error::{ChorusError, Result};
pub use generation::{
    limit_reply, truncate_chars, GenerationRequest, TextGenerator, HISTORY_WINDOW, MAX_REPLY_CHARS,
};
pub use persona::{Emotion, Persona, PersonaBook, PersonaDeck, DEFAULT_RELATION};
pub use pool::AgentPool;
pub use presence::{
    PresenceMonitor, PresenceSnapshot, PresenceState, PresenceTransitions, SharedPresence,
    StatusSource,
};
pub use scheduling::{SchedulingPolicy, SchedulingSettings};
pub use synthesis::{AudioResource, SpeechSynthesizer};
pub use transport::{
    ChannelId, PlaybackCompletion, PlaybackOutcome, PlaybackSignal, TextChannel, VoiceConnection,
    VoiceTransport,
};
