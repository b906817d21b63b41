//! Tests for the exact subscription table
//!
//! Tests cover refcounting, match counters, removal and hash-collision
//! reporting. `COLL.OVNQX` and `COLL.QBORB` are a real 32-bit hash collision
//! pair (both hash to 0x53a63b01).

use rvbus_protocol::subject_hash;

use crate::{SubMap, SubPut, SubRemove};

const COLL_A: &str = "COLL.OVNQX";
const COLL_B: &str = "COLL.QBORB";

// =============================================================================
// Put / find
// =============================================================================

#[test]
fn test_colliding_pair_actually_collides() {
    assert_eq!(
        subject_hash(COLL_A.as_bytes()),
        subject_hash(COLL_B.as_bytes())
    );
    assert_ne!(COLL_A, COLL_B);
}

#[test]
fn test_first_put_creates() {
    let mut map = SubMap::new();
    assert_eq!(map.put("FOO.BAR"), SubPut::Created { collision: false });
    assert_eq!(map.sub_count(), 1);
    assert_eq!(map.find("FOO.BAR"), (true, false));
}

#[test]
fn test_second_put_refcounts() {
    let mut map = SubMap::new();
    map.put("FOO.BAR");
    assert_eq!(
        map.put("FOO.BAR"),
        SubPut::Exists {
            refcnt: 2,
            collision: false
        }
    );
    // Still one distinct subject
    assert_eq!(map.sub_count(), 1);
}

#[test]
fn test_find_missing() {
    let map = SubMap::new();
    assert_eq!(map.find("NOPE"), (false, false));
}

#[test]
fn test_distinct_subjects_are_independent() {
    let mut map = SubMap::new();
    map.put("A.B");
    map.put("A.C");
    assert_eq!(map.sub_count(), 2);
    assert_eq!(map.find("A.B"), (true, false));
    assert_eq!(map.find("A.C"), (true, false));
}

// =============================================================================
// Collision reporting
// =============================================================================

#[test]
fn test_collision_reported_on_shared_bucket() {
    let mut map = SubMap::new();
    assert_eq!(map.put(COLL_A), SubPut::Created { collision: false });
    assert_eq!(map.put(COLL_B), SubPut::Created { collision: true });

    // Both lookups see the contended bucket, both still resolve correctly
    assert_eq!(map.find(COLL_A), (true, true));
    assert_eq!(map.find(COLL_B), (true, true));
    assert_eq!(map.sub_count(), 2);
}

#[test]
fn test_collision_clears_when_peer_removed() {
    let mut map = SubMap::new();
    map.put(COLL_A);
    map.put(COLL_B);
    assert_eq!(map.remove(COLL_B), SubRemove::Removed { collision: true });
    assert_eq!(map.find(COLL_A), (true, false));
}

#[test]
fn test_colliding_entries_count_independently() {
    let mut map = SubMap::new();
    map.put(COLL_A);
    map.put(COLL_B);
    map.increment_match_count(COLL_A);
    map.increment_match_count(COLL_A);
    map.increment_match_count(COLL_B);

    let a = map.iter().find(|e| e.subject == COLL_A).unwrap();
    let b = map.iter().find(|e| e.subject == COLL_B).unwrap();
    assert_eq!(a.msg_cnt, 2);
    assert_eq!(b.msg_cnt, 1);
}

// =============================================================================
// Match counters
// =============================================================================

#[test]
fn test_match_count_increments() {
    let mut map = SubMap::new();
    map.put("FOO");
    for _ in 0..3 {
        map.increment_match_count("FOO");
    }
    let entry = map.iter().next().unwrap();
    assert_eq!(entry.msg_cnt, 3);
}

#[test]
fn test_match_count_missing_subject_is_noop() {
    let mut map = SubMap::new();
    map.increment_match_count("GHOST");
    assert!(map.is_empty());
}

// =============================================================================
// Removal
// =============================================================================

#[test]
fn test_remove_respects_refcount() {
    let mut map = SubMap::new();
    map.put("FOO.BAR");
    map.put("FOO.BAR");
    assert_eq!(
        map.remove("FOO.BAR"),
        SubRemove::StillReferenced { refcnt: 1 }
    );
    assert_eq!(map.find("FOO.BAR"), (true, false));
    assert_eq!(
        map.remove("FOO.BAR"),
        SubRemove::Removed { collision: false }
    );
    assert_eq!(map.find("FOO.BAR"), (false, false));
    assert!(map.is_empty());
}

#[test]
fn test_remove_missing() {
    let mut map = SubMap::new();
    assert_eq!(map.remove("GHOST"), SubRemove::NotFound);
}

#[test]
fn test_drain_empties_table() {
    let mut map = SubMap::new();
    map.put("A");
    map.put("B");
    map.put("B");
    let drained = map.drain();
    assert_eq!(drained.len(), 2);
    assert!(map.is_empty());
    assert_eq!(map.find("A"), (false, false));

    let b = drained.iter().find(|e| e.subject == "B").unwrap();
    assert_eq!(b.refcnt, 2);
}
