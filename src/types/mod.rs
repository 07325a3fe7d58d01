//! Shared identifiers, error types, and the position-token contract.

use thiserror::Error;

pub mod position;

pub use position::PagePosition;

/// Version number assigned to published map states.
///
/// Versions advance monotonically per map; the version chain answers "what
/// did the map look like at version V" for snapshot-isolation readers.
pub type Version = i64;

/// Identifier of the storage chunk a persisted page lives in.
///
/// Chunk ids double as a version epoch: a page whose chunk id is at or below
/// the reclamation threshold is old enough to free.
pub type ChunkId = u32;

/// Errors surfaced by the root-management core.
///
/// Contention is never an error: a lost compare-and-swap is reported as "no
/// new snapshot" and the caller retries against a fresh one.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A locked-snapshot transition was attempted by a thread that does not
    /// hold the update lock.
    #[error("update lock contract violated: {0}")]
    LockContract(&'static str),
    /// A caller-supplied argument would corrupt the version chain.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// A position token read back from storage is malformed.
    #[error("corruption: {0}")]
    Corruption(&'static str),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CoreError>;
