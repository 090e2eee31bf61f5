//! Error types for Chorus core

use thiserror::Error;

/// Main error type for Chorus operations
#[derive(Debug, Error)]
pub enum ChorusError {
    /// Missing or invalid configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Voice transport or synthesis engine unreachable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Text generation failure
    #[error("Generation error: {0}")]
    Generation(String),

    /// Missing or corrupt audio resource during playback
    #[error("Playback error: {0}")]
    Playback(String),

    /// Persona file could not be loaded or is inconsistent
    #[error("Persona error: {0}")]
    Persona(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result type using ChorusError
pub type Result<T> = std::result::Result<T, ChorusError>;

impl ChorusError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        ChorusError::Config(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        ChorusError::Transport(msg.into())
    }

    /// Create a generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        ChorusError::Generation(msg.into())
    }

    /// Create a playback error
    pub fn playback(msg: impl Into<String>) -> Self {
        ChorusError::Playback(msg.into())
    }

    /// Create a persona error
    pub fn persona(msg: impl Into<String>) -> Self {
        ChorusError::Persona(msg.into())
    }
}
