//! Daemon-wide hash-collision accounting
//!
//! Per-session tables only see their own buckets, but two different sessions
//! may subscribe subjects that share a hash. The fabric keeps one live-entry
//! count per hash across every session so any session can ask whether its
//! subject hash is contended daemon-wide.
//!
//! Purely advisory: a collision changes match-count reporting, never
//! routing.

use std::collections::HashMap;

/// Live subscription count per subject or pattern hash, across all sessions
#[derive(Debug, Default)]
pub struct CollisionDb {
    counts: HashMap<u32, u32>,
}

impl CollisionDb {
    /// Empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more live entry for a hash
    ///
    /// Returns true when the hash was already occupied.
    pub fn insert(&mut self, hash: u32) -> bool {
        let count = self.counts.entry(hash).or_insert(0);
        *count += 1;
        *count > 1
    }

    /// Record one entry gone for a hash
    ///
    /// Returns true when live entries remain under the hash.
    pub fn remove(&mut self, hash: u32) -> bool {
        match self.counts.get_mut(&hash) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.counts.remove(&hash);
                false
            }
            None => false,
        }
    }

    /// True when two or more live entries share the hash
    pub fn check(&self, hash: u32) -> bool {
        self.counts.get(&hash).is_some_and(|&c| c > 1)
    }

    /// Number of occupied hashes
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when no entries are recorded
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
