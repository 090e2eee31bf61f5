//! VOICEVOX speech synthesis for Chorus
//!
//! [`SpeechSynthesisService`] implements [`chorus_core::SpeechSynthesizer`]
//! on top of a VOICEVOX engine: per `(voice, text)` caching, a bounded
//! worker pool, and degradation after repeated failures.
//!
//! ```no_run
//! use chorus_provider_voicevox::{SpeechSynthesisService, VoiceVoxConfig};
//!
//! # fn main() -> chorus_core::Result<()> {
//! let config = VoiceVoxConfig::from_env()?;
//! let service = SpeechSynthesisService::from_config(&config)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod service;

pub use cache::SynthesisCache;
pub use config::{VoiceVoxConfig, DEFAULT_ENGINE_URL};
pub use engine::{tune_query, SynthesisEngine, VoiceVoxEngine};
pub use error::SynthesisError;
pub use service::{
    SpeechSynthesisService, CACHE_SWEEP_INTERVAL, DEGRADED_TEXT_CHARS, FAILURE_THRESHOLD,
    UNREACHABLE_AFTER,
};
