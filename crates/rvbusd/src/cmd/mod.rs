//! Command implementations

pub mod listen;
pub mod send;
pub mod serve;
