//! rvbus Routing - Subscription tables and the in-process fabric
//!
//! This crate owns who-hears-what:
//! - `sub_map` - The exact subscription table: hash-bucketed, refcounted
//!   entries with per-subject match counters
//! - `pattern_map` - The wildcard subscription table: compiled patterns
//!   grouped by their literal prefix
//! - `collision` - Daemon-wide hash-collision accounting across connections
//! - `fabric` - The routing fabric connecting sessions inside one daemon:
//!   publish fan-out, subscription bookkeeping, backpressure signaling
//!
//! # Design
//!
//! Tables are owned `Vec`-bucketed maps indexed by a 32-bit subject hash.
//! A hash bucket holding two or more live entries is a collision; collisions
//! are advisory only and never affect correctness, since every bucket entry
//! still compares the full subject or pattern.

mod collision;
mod fabric;
mod pattern_map;
mod sub_map;

pub use collision::CollisionDb;
pub use fabric::{BusFabric, ConnId, Fabric, FlowControl, Publish, SubEvent};
pub use pattern_map::{PatternMap, PatternPut, PatternRemove};
pub use sub_map::{SubEntry, SubMap, SubPut, SubRemove};

#[cfg(test)]
mod fabric_test;
#[cfg(test)]
mod sub_map_test;
