//! Contracts consumed from the page and chunk layers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::types::{PagePosition, Version};

/// Reference-counted handle to a tree node owned by the page layer.
pub type PageRef = Arc<dyn Page>;

/// Bookkeeping surface a tree node exposes to the root-management core.
///
/// Pages are opaque here: the core never inspects keys or values, only what
/// is needed to decide reachability and reclamation. A page reachable from
/// any published snapshot is never mutated, with one exception: the
/// removed flag, which transitions at most once.
pub trait Page: Send + Sync {
    /// Number of entries stored in the subtree rooted at this page.
    fn total_count(&self) -> u64;

    /// Whether this node is a leaf.
    fn is_leaf(&self) -> bool;

    /// Persisted location, or [`PagePosition::UNSAVED`] while the page has
    /// never been written out. Becomes stable once saved.
    fn position(&self) -> PagePosition;

    /// Estimated in-memory footprint in bytes.
    fn memory_footprint(&self) -> u32;

    /// Claims the page's removal. The first caller wins; `false` means
    /// another thread already claimed it and the caller must fall back to
    /// position-based accounting.
    fn try_mark_removed(&self) -> bool;

    /// Whether the page has been written out to a chunk.
    fn is_saved(&self) -> bool {
        self.position().is_saved()
    }
}

/// Store-level probe for the flush race guarded in
/// [`PathFrame::shrink_to_removal_entry`](crate::tree::PathFrame::shrink_to_removal_entry).
///
/// Consulted only by a debug assertion: a removal computation may legally
/// observe more reclaimable pages on its second pass only while a flush
/// covering that version is running.
pub trait StoreProbe: Send + Sync {
    /// Returns `true` while a flush covering `version` is in progress.
    fn is_flush_in_progress_for(&self, version: Version) -> bool;
}

/// Shared tally of not-yet-flushed page memory held by one map.
///
/// The store reads the tally to decide when to force a flush. Path-record
/// operations discharge the footprint of never-persisted pages as those
/// pages are removed with the paths that reference them.
#[derive(Debug, Default)]
pub struct UnsavedMemory(AtomicI64);

impl UnsavedMemory {
    /// Creates a tally with an initial byte count.
    pub fn new(initial: i64) -> Self {
        Self(AtomicI64::new(initial))
    }

    /// Adds freshly allocated unsaved bytes.
    pub fn charge(&self, bytes: u32) {
        self.0.fetch_add(i64::from(bytes), Ordering::Relaxed);
    }

    /// Subtracts bytes whose pages will never be flushed.
    pub fn discharge(&self, bytes: i64) {
        self.0.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Current tally. Transiently negative under concurrent updates.
    pub fn value(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}
