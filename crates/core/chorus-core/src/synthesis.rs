//! Speech-synthesis boundary

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// Handle to a synthesized audio file on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AudioResource {
    path: PathBuf,
}

impl AudioResource {
    /// Wrap an existing file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the audio file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file still exists
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Delete the backing file; a file that is already gone is not an error
    pub fn release(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Turns text into playable audio
///
/// Returns `None` when no audio could be produced; callers skip the
/// utterance rather than fail.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with the given speaker voice
    async fn synthesize(&self, text: &str, voice_id: u32) -> Option<AudioResource>;
}
