//! Synthesis engine errors

use chorus_core::ChorusError;
use thiserror::Error;

/// Failures talking to the engine or persisting its output
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Connection-level failure
    #[error("HTTP error during {stage}: {source}")]
    Http {
        /// `audio_query`, `synthesis` or `version`
        stage: &'static str,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded its deadline
    #[error("{stage} timed out")]
    Timeout {
        /// Request that timed out
        stage: &'static str,
    },

    /// Engine answered with a non-success status
    #[error("{stage} returned HTTP {status}")]
    Status {
        /// Request that failed
        stage: &'static str,
        /// Status code
        status: u16,
    },

    /// Writing the audio file failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Query object was not valid JSON
    #[error("Malformed engine response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Worker task panicked or the pool was closed
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl SynthesisError {
    /// Classify a client error raised during `stage`
    pub fn http(stage: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { stage }
        } else {
            Self::Http { stage, source }
        }
    }

    /// Create a worker pool error
    pub fn worker_pool(msg: impl Into<String>) -> Self {
        Self::WorkerPool(msg.into())
    }
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, SynthesisError>;

impl From<SynthesisError> for ChorusError {
    fn from(e: SynthesisError) -> Self {
        ChorusError::transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converts_to_transport_error() {
        let err: ChorusError = SynthesisError::Status {
            stage: "synthesis",
            status: 503,
        }
        .into();
        assert!(matches!(err, ChorusError::Transport(_)));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_timeout_display() {
        let err = SynthesisError::Timeout {
            stage: "audio_query",
        };
        assert_eq!(err.to_string(), "audio_query timed out");
    }
}
