//! Wildcard subscription table
//!
//! Patterns are grouped by their literal leading prefix: `A.*.C` and `A.*.D`
//! both live under the prefix `A.`, keyed by the prefix hash. Matching a
//! concrete subject walks its candidate prefixes (empty, `A.`, `A.B.`, ...)
//! and tests the compiled patterns found at each.
//!
//! Broad patterns, those with no literal prefix such as `>` or `*.STATUS`,
//! never match restricted (`_RV.`, `_INBOX.`) subjects.

use std::collections::HashMap;

use rvbus_protocol::{is_restricted_subject, subject_hash, PatternMatcher, Result};

/// A compiled pattern with its reference and match counters
#[derive(Debug)]
struct WildNode {
    matcher: PatternMatcher,
    refcnt: u32,
    msg_cnt: u32,
}

/// All patterns sharing one literal prefix
#[derive(Debug)]
struct PatternRoute {
    prefix: String,
    nodes: Vec<WildNode>,
}

/// Outcome of [`PatternMap::put`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternPut {
    /// First subscription for this pattern
    Created {
        /// Another live pattern shares the prefix bucket
        collision: bool,
    },
    /// Pattern already subscribed, reference count bumped
    Exists { refcnt: u32, collision: bool },
}

/// Outcome of [`PatternMap::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternRemove {
    /// Last reference dropped, pattern gone
    Removed,
    /// References remain, pattern kept
    StillReferenced { refcnt: u32 },
    /// Pattern was never subscribed
    NotFound,
}

/// Wildcard subscription table for one session
#[derive(Debug, Default)]
pub struct PatternMap {
    buckets: HashMap<u32, Vec<PatternRoute>>,
    count: usize,
}

impl PatternMap {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a wildcard pattern, compiling it on first sight
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::BadPattern` when the pattern fails to
    /// compile; the table is unchanged.
    pub fn put(&mut self, pattern: &str) -> Result<PatternPut> {
        let matcher = PatternMatcher::compile(pattern)?;
        let hash = subject_hash(matcher.prefix().as_bytes());
        let bucket = self.buckets.entry(hash).or_default();

        // Collision: any other live pattern in the bucket, same route or not
        let other_nodes = |bucket: &Vec<PatternRoute>| {
            bucket.iter().map(|r| r.nodes.len()).sum::<usize>() > 1
        };

        if let Some(route) = bucket.iter_mut().find(|r| r.prefix == matcher.prefix()) {
            if let Some(node) = route.nodes.iter_mut().find(|n| n.matcher.pattern() == pattern) {
                node.refcnt += 1;
                let refcnt = node.refcnt;
                return Ok(PatternPut::Exists {
                    refcnt,
                    collision: other_nodes(bucket),
                });
            }
            route.nodes.push(WildNode {
                matcher,
                refcnt: 1,
                msg_cnt: 0,
            });
        } else {
            let prefix = matcher.prefix().to_string();
            bucket.push(PatternRoute {
                prefix,
                nodes: vec![WildNode {
                    matcher,
                    refcnt: 1,
                    msg_cnt: 0,
                }],
            });
        }
        self.count += 1;
        Ok(PatternPut::Created {
            collision: other_nodes(bucket),
        })
    }

    /// True when the exact pattern is subscribed
    pub fn contains(&self, pattern: &str) -> bool {
        self.buckets.values().flatten().any(|route| {
            route.nodes.iter().any(|n| n.matcher.pattern() == pattern)
        })
    }

    /// Match a concrete subject against every subscribed pattern
    ///
    /// Walks the subject's candidate literal prefixes, tests the patterns
    /// bucketed under each, bumps the match counter of every hit and returns
    /// the number of distinct patterns matched.
    pub fn match_subject(&mut self, subject: &str) -> usize {
        let restricted = is_restricted_subject(subject);
        let mut matched = 0;

        let mut try_prefix = |map: &mut HashMap<u32, Vec<PatternRoute>>, prefix: &str| {
            let hash = subject_hash(prefix.as_bytes());
            let Some(bucket) = map.get_mut(&hash) else {
                return 0;
            };
            let Some(route) = bucket.iter_mut().find(|r| r.prefix == prefix) else {
                return 0;
            };
            let mut hits = 0;
            for node in &mut route.nodes {
                if restricted && node.matcher.is_broad() {
                    continue;
                }
                if node.matcher.matches(subject) {
                    node.msg_cnt = node.msg_cnt.wrapping_add(1);
                    hits += 1;
                }
            }
            hits
        };

        matched += try_prefix(&mut self.buckets, "");

        // Progressive literal prefixes: "A.", "A.B.", ... up to the last dot
        let bytes = subject.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'.' {
                matched += try_prefix(&mut self.buckets, &subject[..=i]);
            }
        }
        matched
    }

    /// Drop one reference to a pattern, removing it at zero
    pub fn remove(&mut self, pattern: &str) -> PatternRemove {
        let Ok(matcher) = PatternMatcher::compile(pattern) else {
            return PatternRemove::NotFound;
        };
        let hash = subject_hash(matcher.prefix().as_bytes());
        let Some(bucket) = self.buckets.get_mut(&hash) else {
            return PatternRemove::NotFound;
        };
        let Some(rpos) = bucket.iter().position(|r| r.prefix == matcher.prefix()) else {
            return PatternRemove::NotFound;
        };
        let route = &mut bucket[rpos];
        let Some(npos) = route
            .nodes
            .iter()
            .position(|n| n.matcher.pattern() == pattern)
        else {
            return PatternRemove::NotFound;
        };

        if route.nodes[npos].refcnt > 1 {
            route.nodes[npos].refcnt -= 1;
            let refcnt = route.nodes[npos].refcnt;
            return PatternRemove::StillReferenced { refcnt };
        }

        route.nodes.swap_remove(npos);
        if route.nodes.is_empty() {
            bucket.swap_remove(rpos);
        }
        if bucket.is_empty() {
            self.buckets.remove(&hash);
        }
        self.count -= 1;
        PatternRemove::Removed
    }

    /// Number of distinct subscribed patterns
    #[inline]
    pub fn pattern_count(&self) -> usize {
        self.count
    }

    /// True when no patterns are subscribed
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate the pattern texts of all live subscriptions
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.buckets
            .values()
            .flatten()
            .flat_map(|r| r.nodes.iter().map(|n| n.matcher.pattern()))
    }

    /// Drain every pattern out of the table
    pub fn drain(&mut self) -> Vec<String> {
        self.count = 0;
        self.buckets
            .drain()
            .flat_map(|(_, b)| b)
            .flat_map(|r| r.nodes.into_iter().map(|n| n.matcher.pattern().to_string()))
            .collect()
    }
}
