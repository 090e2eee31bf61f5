//! Chat-platform boundary
//!
//! The core never talks to a chat platform directly. Voice connections, text
//! posting and playback completion all go through these traits so the
//! scheduling logic can be driven by in-memory fakes in tests.

use crate::persona::Persona;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Platform channel identifier
pub type ChannelId = u64;

/// How a single playback ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The track played to the end
    Finished,
    /// The track failed or was dropped
    Failed(String),
}

/// Future-like handle resolved when a track stops playing
#[derive(Debug)]
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<PlaybackOutcome>,
}

/// Sending half of a [`PlaybackCompletion`]
///
/// Only the first call to [`PlaybackSignal::finish`] has an effect, so the
/// same signal can be wired to several track events.
#[derive(Debug, Clone)]
pub struct PlaybackSignal {
    tx: Arc<Mutex<Option<oneshot::Sender<PlaybackOutcome>>>>,
}

impl PlaybackCompletion {
    /// Create a linked signal/completion pair
    pub fn pair() -> (PlaybackSignal, Self) {
        let (tx, rx) = oneshot::channel();
        (
            PlaybackSignal {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            Self { rx },
        )
    }

    /// A completion that is already resolved
    pub fn resolved(outcome: PlaybackOutcome) -> Self {
        let (signal, completion) = Self::pair();
        signal.finish(outcome);
        completion
    }

    /// Wait for playback to end
    ///
    /// A signal dropped without firing counts as a failure.
    pub async fn wait(self) -> PlaybackOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| PlaybackOutcome::Failed("playback signal dropped".to_string()))
    }
}

impl PlaybackSignal {
    /// Resolve the paired completion; later calls are ignored
    pub fn finish(&self, outcome: PlaybackOutcome) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }

    /// Whether the signal has already fired
    pub fn is_finished(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Opens voice connections for one agent identity
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    /// Connect to a voice channel
    async fn connect(&self, channel: ChannelId) -> Result<Arc<dyn VoiceConnection>>;
}

/// A live voice connection
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    /// Channel this connection was opened on
    fn channel(&self) -> ChannelId;

    /// Whether the connection is still usable
    fn is_connected(&self) -> bool;

    /// Start playing an audio file; the completion resolves when it stops
    async fn play(&self, resource: &Path) -> Result<PlaybackCompletion>;

    /// Leave the channel
    async fn disconnect(&self) -> Result<()>;
}

/// Posts remarks to a text channel on behalf of a persona
#[async_trait]
pub trait TextChannel: Send + Sync {
    /// Post `text` to `channel`, styled for `persona`
    async fn post(&self, channel: ChannelId, persona: &Persona, text: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completion_resolves_once() {
        let (signal, completion) = PlaybackCompletion::pair();
        let second = signal.clone();
        signal.finish(PlaybackOutcome::Finished);
        second.finish(PlaybackOutcome::Failed("late".to_string()));

        assert!(second.is_finished());
        assert_eq!(completion.wait().await, PlaybackOutcome::Finished);
    }

    #[tokio::test]
    async fn test_dropped_signal_is_failure() {
        let (signal, completion) = PlaybackCompletion::pair();
        drop(signal);
        assert!(matches!(completion.wait().await, PlaybackOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_resolved_completion() {
        let completion = PlaybackCompletion::resolved(PlaybackOutcome::Finished);
        assert_eq!(completion.wait().await, PlaybackOutcome::Finished);
    }
}
