//! Concurrency and garbage-collection core for a persistent copy-on-write
//! B-tree storage engine.
//!
//! A map's entire published state lives in one immutable [`root::RootSnapshot`]
//! held by a [`root::RootCell`]. Readers take a single lock-free atomic load;
//! writers replace the snapshot wholesale via compare-and-swap, retrying on
//! contention. Pages displaced by an update are recorded in removal ledgers
//! threaded onto the snapshot and reclaimed later, once no live version can
//! still reach them.

#![warn(missing_docs)]

pub mod root;
pub mod tree;
pub mod types;
