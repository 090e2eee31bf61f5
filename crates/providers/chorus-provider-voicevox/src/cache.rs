//! `(voice, text)` → rendered file

use chorus_core::AudioResource;
use std::collections::HashMap;

/// Rendered audio keyed by speaker and text
///
/// Entries whose file has been deleted (played and released, or cleaned up
/// externally) are dropped lazily on lookup and in bulk by [`sweep`].
///
/// [`sweep`]: SynthesisCache::sweep
#[derive(Debug, Default)]
pub struct SynthesisCache {
    entries: HashMap<(u32, String), AudioResource>,
}

impl SynthesisCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached resource, if its file still exists
    pub fn get(&mut self, voice_id: u32, text: &str) -> Option<AudioResource> {
        let key = (voice_id, text.to_string());
        match self.entries.get(&key) {
            Some(resource) if resource.exists() => Some(resource.clone()),
            Some(_) => {
                self.entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Remember a rendered resource
    pub fn insert(&mut self, voice_id: u32, text: &str, resource: AudioResource) {
        self.entries.insert((voice_id, text.to_string()), resource);
    }

    /// Drop entries whose file is gone. Returns how many were removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, resource| resource.exists());
        before - self.entries.len()
    }

    /// Number of entries, dangling or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_evicts_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"RIFF").unwrap();

        let mut cache = SynthesisCache::new();
        cache.insert(1, "やあ", AudioResource::new(&path));
        assert_eq!(cache.get(1, "やあ"), Some(AudioResource::new(&path)));
        assert_eq!(cache.get(2, "やあ"), None);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(cache.get(1, "やあ"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_counts_dangling() {
        let dir = tempfile::tempdir().unwrap();
        let kept = dir.path().join("kept.wav");
        std::fs::write(&kept, b"RIFF").unwrap();

        let mut cache = SynthesisCache::new();
        cache.insert(1, "kept", AudioResource::new(&kept));
        cache.insert(1, "gone", AudioResource::new(dir.path().join("gone.wav")));
        cache.insert(2, "gone", AudioResource::new(dir.path().join("gone2.wav")));

        assert_eq!(cache.sweep(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep(), 0);
    }
}
