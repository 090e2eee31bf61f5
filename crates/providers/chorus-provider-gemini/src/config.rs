//! Gemini settings from the environment

use chorus_core::{get_env_or, get_required_env, Result};
use std::fmt;
use std::time::Duration;

/// Default model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Public Generative Language API endpoint
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";

/// Gemini client settings
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key
    pub api_key: String,
    /// Model name
    pub model: String,
    /// API base URL, without a trailing slash
    pub api_base: String,
    /// Request deadline
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Settings for `api_key` with defaults elsewhere
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Read `GEMINI_API_KEY` (required) and `GEMINI_MODEL`
    pub fn from_env() -> Result<Self> {
        let api_key = get_required_env("GEMINI_API_KEY")?;
        let model = get_env_or("GEMINI_MODEL", DEFAULT_MODEL).trim().to_string();
        let mut config = Self::new(api_key.trim());
        if !model.is_empty() {
            config.model = model;
        }
        Ok(config)
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}
