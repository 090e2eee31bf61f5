//! Gemini text generation for Chorus
//!
//! [`GeminiClient`] implements [`chorus_core::TextGenerator`]. Replies are
//! capped at 100 characters; any API or parse failure is answered with one
//! of the persona's preset phrases.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod prompt;

pub use client::{parse_response, GeminiClient};
pub use config::{GeminiConfig, DEFAULT_API_BASE, DEFAULT_MODEL};
pub use prompt::build_prompt;
