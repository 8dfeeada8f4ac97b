//! Failure counting and suppression of misbehaving peers.

use std::time::Duration;

use dashmap::DashMap;

use crate::ecc::id_prefix_match;

/// How long blacklist entries live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlacklistDuration {
    /// Failure counting is off entirely.
    Disabled,
    /// Entries expire after the given duration.
    Timed(Duration),
    /// Entries last for the process lifetime.
    Permanent,
}

/// Failure counts per peer id. A peer whose count exceeds the retry
/// budget is suppressed by the admission gate until its entry expires.
pub struct Blacklist {
    entries: DashMap<String, u32>,
    max_retries: u32,
    duration: BlacklistDuration,
}

impl Blacklist {
    /// Create a blacklist with the given retry budget and entry lifetime.
    pub fn new(max_retries: u32, duration: BlacklistDuration) -> Self {
        Self {
            entries: DashMap::new(),
            max_retries,
            duration,
        }
    }

    /// Entry lifetime policy.
    pub fn duration(&self) -> BlacklistDuration {
        self.duration
    }

    /// Record failures for a peer. `inc` of `None` saturates the counter,
    /// blacklisting immediately. Returns true when this call pushed the
    /// peer over the threshold.
    pub fn add_failure(&self, id: &str, inc: Option<u32>) -> bool {
        if self.duration == BlacklistDuration::Disabled {
            return false;
        }
        let mut entry = self.entries.entry(id.to_string()).or_insert(0);
        let before = *entry;
        *entry = match inc {
            Some(inc) => before.saturating_add(inc),
            None => u32::MAX,
        };
        before <= self.max_retries && *entry > self.max_retries
    }

    /// Whether a peer id is currently suppressed. Ids are compared
    /// prefix-symmetrically so a ShortID sighting matches a FullID entry.
    pub fn is_blacklisted(&self, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| *e.value() > self.max_retries && id_prefix_match(e.key(), id))
    }

    /// Drop a peer's entry, typically after it authenticated successfully.
    pub fn remove(&self, id: &str) {
        self.entries.remove(id);
        // A FullID may have been recorded under its ShortID sighting too.
        self.entries.retain(|k, _| !id_prefix_match(k, id));
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
