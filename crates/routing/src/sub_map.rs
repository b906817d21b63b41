//! Exact subscription table
//!
//! One table lives per session. Entries are keyed by the 32-bit subject hash
//! and bucketed in owned `Vec`s; the full subject text is compared on every
//! lookup, so hash collisions are reported but never misroute.
//!
//! Each entry carries a reference count (one subject may be subscribed
//! several times by the same session) and a wrapping message counter bumped
//! on every delivered match.

use std::collections::HashMap;

use rvbus_protocol::subject_hash;

/// One live exact subscription
#[derive(Debug, Clone)]
pub struct SubEntry {
    /// Subject text
    pub subject: String,
    /// Bucket key, `subject_hash(subject)`
    pub hash: u32,
    /// Live subscribe count
    pub refcnt: u32,
    /// Messages matched, wrapping
    pub msg_cnt: u32,
}

/// Outcome of [`SubMap::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubPut {
    /// First subscription for this subject
    Created {
        /// Another live entry shares the bucket
        collision: bool,
    },
    /// Subject already subscribed, reference count bumped
    Exists {
        /// New reference count
        refcnt: u32,
        collision: bool,
    },
}

/// Outcome of [`SubMap::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubRemove {
    /// Last reference dropped, entry gone
    Removed {
        /// Live entries remain in the bucket
        collision: bool,
    },
    /// References remain, entry kept
    StillReferenced {
        /// Remaining reference count
        refcnt: u32,
    },
    /// Subject was never subscribed
    NotFound,
}

/// Exact subscription table for one session
#[derive(Debug, Default)]
pub struct SubMap {
    buckets: HashMap<u32, Vec<SubEntry>>,
    count: usize,
}

impl SubMap {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a subject, creating or refcounting its entry
    pub fn put(&mut self, subject: &str) -> SubPut {
        let hash = subject_hash(subject.as_bytes());
        let bucket = self.buckets.entry(hash).or_default();

        if let Some(entry) = bucket.iter_mut().find(|e| e.subject == subject) {
            entry.refcnt += 1;
            let refcnt = entry.refcnt;
            return SubPut::Exists {
                refcnt,
                collision: bucket.len() > 1,
            };
        }

        bucket.push(SubEntry {
            subject: subject.to_string(),
            hash,
            refcnt: 1,
            msg_cnt: 0,
        });
        self.count += 1;
        SubPut::Created {
            collision: bucket.len() > 1,
        }
    }

    /// Look up a subject: `(found, bucket collision)`
    pub fn find(&self, subject: &str) -> (bool, bool) {
        let hash = subject_hash(subject.as_bytes());
        match self.buckets.get(&hash) {
            Some(bucket) => (
                bucket.iter().any(|e| e.subject == subject),
                bucket.len() > 1,
            ),
            None => (false, false),
        }
    }

    /// Bump the match counter of a subject, wrapping on overflow
    ///
    /// A no-op when the subject is not subscribed.
    pub fn increment_match_count(&mut self, subject: &str) {
        let hash = subject_hash(subject.as_bytes());
        if let Some(bucket) = self.buckets.get_mut(&hash) {
            if let Some(entry) = bucket.iter_mut().find(|e| e.subject == subject) {
                entry.msg_cnt = entry.msg_cnt.wrapping_add(1);
            }
        }
    }

    /// Drop one reference to a subject, removing the entry at zero
    pub fn remove(&mut self, subject: &str) -> SubRemove {
        let hash = subject_hash(subject.as_bytes());
        let Some(bucket) = self.buckets.get_mut(&hash) else {
            return SubRemove::NotFound;
        };
        let Some(pos) = bucket.iter().position(|e| e.subject == subject) else {
            return SubRemove::NotFound;
        };

        if bucket[pos].refcnt > 1 {
            bucket[pos].refcnt -= 1;
            let refcnt = bucket[pos].refcnt;
            return SubRemove::StillReferenced { refcnt };
        }

        bucket.swap_remove(pos);
        self.count -= 1;
        let collision = !bucket.is_empty();
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        SubRemove::Removed { collision }
    }

    /// Number of distinct subscribed subjects
    #[inline]
    pub fn sub_count(&self) -> usize {
        self.count
    }

    /// True when no subjects are subscribed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate all live entries in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &SubEntry> {
        self.buckets.values().flatten()
    }

    /// Drain every entry out of the table
    ///
    /// Used at session teardown to unwind fabric-side bookkeeping.
    pub fn drain(&mut self) -> Vec<SubEntry> {
        self.count = 0;
        self.buckets.drain().flat_map(|(_, b)| b).collect()
    }
}
