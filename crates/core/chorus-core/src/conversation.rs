//! Bounded in-memory conversation log

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Entries kept before the oldest are discarded
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// One recorded utterance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Display name of whoever spoke
    pub speaker: String,
    /// What was said
    pub text: String,
    /// When it was recorded
    pub timestamp: DateTime<Utc>,
}

/// Shared log of recent utterances across all agents
#[derive(Debug)]
pub struct ConversationLog {
    entries: Mutex<VecDeque<ConversationEntry>>,
    capacity: usize,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ConversationLog {
    /// Create a log holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Append an utterance, evicting the oldest if full
    pub fn record(&self, speaker: impl Into<String>, text: impl Into<String>) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(ConversationEntry {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: Utc::now(),
        });
    }

    /// The last `n` entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<ConversationEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(n);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_bounded() {
        let log = ConversationLog::default();
        for i in 0..25 {
            log.record("a", format!("line {}", i));
        }
        assert_eq!(log.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(log.recent(1)[0].text, "line 24");
        assert_eq!(log.recent(100)[0].text, "line 5");
    }

    #[test]
    fn test_recent_is_oldest_first() {
        let log = ConversationLog::with_capacity(5);
        log.record("a", "one");
        log.record("b", "two");
        log.record("c", "three");

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].speaker, "b");
        assert_eq!(recent[1].speaker, "c");
    }
}
