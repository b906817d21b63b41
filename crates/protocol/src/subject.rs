//! Subject grammar
//!
//! A subject is a dot-separated ASCII token sequence: `FOO.BAR.BAZ`. Two
//! wildcard segments exist in subscription patterns: `*` matches exactly one
//! segment, `>` matches one or more trailing segments and is only legal as
//! the final segment.
//!
//! Subjects under `_RV.` are administrative and subjects under `_INBOX.` are
//! point-to-point reply addresses; both are excluded from broad top-level
//! `>` forwarding so control-plane traffic never leaks into catch-all
//! subscriptions.

use regex::Regex;

use crate::{ProtocolError, Result};

/// Prefix of point-to-point reply subjects
pub const INBOX_PREFIX: &str = "_INBOX.";

/// Prefix of administrative subjects
pub const RESTRICTED_PREFIX: &str = "_RV.";

/// Maximum encoded subject length in bytes (wire limit)
pub const MAX_SUBJECT_LEN: usize = 1024;

/// Count the `.`-delimited segments of a subject: `A.B.C.D` has 4
#[inline]
pub fn segment_count(subject: &str) -> u16 {
    let dots = subject.as_bytes().iter().filter(|&&b| b == b'.').count();
    (dots + 1) as u16
}

/// True iff the subject is a reply-only inbox address (`_INBOX.` + more)
#[inline]
pub fn is_inbox_subject(subject: &str) -> bool {
    subject.len() > INBOX_PREFIX.len() && subject.starts_with(INBOX_PREFIX)
}

/// True iff the subject is administrative (`_RV.` + more) or an inbox
///
/// Restricted subjects get no listen-start advisory and are never matched by
/// a top-level `>` subscription.
#[inline]
pub fn is_restricted_subject(subject: &str) -> bool {
    (subject.len() > RESTRICTED_PREFIX.len() && subject.starts_with(RESTRICTED_PREFIX))
        || is_inbox_subject(subject)
}

/// True iff any segment is exactly `*`, or the final segment is exactly `>`
pub fn is_wildcard(subject: &str) -> bool {
    let mut segments = subject.split('.').peekable();
    while let Some(seg) = segments.next() {
        if seg == "*" {
            return true;
        }
        if seg == ">" && segments.peek().is_none() {
            return true;
        }
    }
    false
}

/// 32-bit FNV-1a over the subject bytes
///
/// Used to key the subscription hash buckets and for collision accounting.
/// Collisions are expected and handled; the hash is never trusted alone.
#[inline]
pub fn subject_hash(subject: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for &b in subject {
        h ^= u32::from(b);
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// A compiled wildcard pattern: literal prefix plus a segment-aware matcher
///
/// `A.*.C` and `A.*.D` share the prefix `A.`; the prefix keys the outer
/// entry of the wildcard subscription table while the compiled regex decides
/// actual matches.
///
/// # Example
///
/// ```
/// use rvbus_protocol::PatternMatcher;
///
/// let m = PatternMatcher::compile("A.*.C").unwrap();
/// assert_eq!(m.prefix(), "A.");
/// assert!(m.matches("A.B.C"));
/// assert!(!m.matches("A.B.B.C"));
/// ```
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    prefix: String,
    re: Regex,
}

impl PatternMatcher {
    /// Compile a wire wildcard pattern into a prefix and a regex matcher
    ///
    /// `*` becomes a single-segment class excluding `.`; a trailing `>`
    /// becomes suffix-anything.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::BadPattern` on an empty segment, a `>`
    /// anywhere but the final segment, or a pattern with no wildcard at all.
    pub fn compile(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(ProtocolError::bad_pattern(pattern, "empty pattern"));
        }
        if pattern.len() > MAX_SUBJECT_LEN {
            return Err(ProtocolError::bad_pattern(pattern, "pattern too long"));
        }

        let segments: Vec<&str> = pattern.split('.').collect();
        let last = segments.len() - 1;

        let mut re = String::with_capacity(pattern.len() + 8);
        re.push('^');
        let mut literal_lead = 0usize;
        let mut in_literal_prefix = true;

        for (i, seg) in segments.iter().enumerate() {
            if seg.is_empty() {
                return Err(ProtocolError::bad_pattern(pattern, "empty segment"));
            }
            if i > 0 {
                re.push_str("\\.");
            }
            match *seg {
                "*" => {
                    in_literal_prefix = false;
                    re.push_str("[^.]+");
                }
                ">" => {
                    if i != last {
                        return Err(ProtocolError::bad_pattern(
                            pattern,
                            "`>` only legal as the final segment",
                        ));
                    }
                    in_literal_prefix = false;
                    // "A.>" compiles to ^A\..+$ so "A" alone never matches
                    re.push_str(".+");
                }
                lit => {
                    re.push_str(&regex::escape(lit));
                    if in_literal_prefix {
                        literal_lead = i + 1;
                    }
                }
            }
        }
        re.push('$');

        if literal_lead == segments.len() {
            return Err(ProtocolError::bad_pattern(pattern, "no wildcard segment"));
        }

        // Prefix keeps its trailing dot: "A.*.C" and "A.>" both key on "A."
        let prefix = if literal_lead == 0 {
            String::new()
        } else {
            let mut p = segments[..literal_lead].join(".");
            p.push('.');
            p
        };

        let re = Regex::new(&re)
            .map_err(|_| ProtocolError::bad_pattern(pattern, "pattern failed to compile"))?;

        Ok(Self {
            pattern: pattern.to_string(),
            prefix,
            re,
        })
    }

    /// The original pattern text
    #[inline]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The literal leading prefix, trailing dot included (may be empty)
    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// True iff the pattern's literal prefix is empty (a top-level wildcard)
    ///
    /// Top-level wildcards never receive restricted subjects.
    #[inline]
    pub fn is_broad(&self) -> bool {
        self.prefix.is_empty()
    }

    /// Test a concrete subject against the compiled pattern
    #[inline]
    pub fn matches(&self, subject: &str) -> bool {
        self.re.is_match(subject)
    }
}

/// Optional `_<service>.` prefix prepended to subjects on the fabric side
///
/// Deployments that key daemons by a numeric service (e.g. a multicast port)
/// namespace fabric subjects as `_7500.FOO.BAR` while the wire carries the
/// bare `FOO.BAR`. Stripping the same prefix length recovers the original
/// suffix exactly.
#[derive(Debug, Clone, Default)]
pub struct ServicePrefix {
    pre: String,
}

impl ServicePrefix {
    /// Build a prefix from a service name, or an empty no-op prefix
    pub fn new(service: Option<&str>) -> Self {
        let pre = match service {
            None | Some("") => String::new(),
            Some(svc) => {
                let svc = svc.strip_suffix('.').unwrap_or(svc);
                if svc.starts_with('_') {
                    format!("{svc}.")
                } else {
                    format!("_{svc}.")
                }
            }
        };
        Self { pre }
    }

    /// True when no prefix is configured
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty()
    }

    /// Length of the prefix in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.pre.len()
    }

    /// The prefix text, trailing dot included
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.pre
    }

    /// Build `_<service>.<suffix>`
    pub fn concat(&self, suffix: &str) -> String {
        let mut s = String::with_capacity(self.pre.len() + suffix.len());
        s.push_str(&self.pre);
        s.push_str(suffix);
        s
    }

    /// Strip the prefix, recovering the original suffix
    ///
    /// Returns `None` when the subject does not carry this prefix.
    pub fn strip<'a>(&self, subject: &'a str) -> Option<&'a str> {
        if self.pre.is_empty() {
            Some(subject)
        } else {
            subject.strip_prefix(self.pre.as_str())
        }
    }
}
