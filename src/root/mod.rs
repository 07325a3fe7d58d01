//! Published root state: snapshots, the per-map atomic cell, and removal
//! draining.
//!
//! [`RootCell`] is the single coordination point for one map. Readers load
//! the current [`RootSnapshot`] with one lock-free atomic load; every write
//! transition builds a new snapshot and installs it by compare-and-swap
//! against the snapshot it was derived from. A lost swap is not an error:
//! the caller re-reads and retries, folding the failed attempt into the
//! snapshot's attempt counter.

pub mod removal;
pub mod snapshot;

pub use removal::{RemovalEntry, RemovalNode};
pub use snapshot::{RootSnapshot, RootStats};

use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use tracing::{trace, warn};

use crate::tree::page::PageRef;
use crate::types::{CoreError, PagePosition, Result, Version};

/// Atomic slot publishing the current root snapshot of one map.
pub struct RootCell {
    current: ArcSwap<RootSnapshot>,
}

impl RootCell {
    /// Creates a cell publishing a seed snapshot for `root` at `version`.
    pub fn new(root: PageRef, version: Version) -> Self {
        Self {
            current: ArcSwap::from_pointee(RootSnapshot::new(root, version)),
        }
    }

    /// Current snapshot, borrowed through a lease.
    ///
    /// The hot read path: one atomic load, no locks, no allocation. Prefer
    /// [`load_full`](Self::load_full) when the snapshot must be held across
    /// a retry loop or stored.
    #[inline]
    pub fn load(&self) -> Guard<Arc<RootSnapshot>> {
        self.current.load()
    }

    /// Current snapshot as an owned reference.
    #[inline]
    pub fn load_full(&self) -> Arc<RootSnapshot> {
        self.current.load_full()
    }

    fn compare_and_swap(
        &self,
        expected: &Arc<RootSnapshot>,
        next: RootSnapshot,
    ) -> Option<Arc<RootSnapshot>> {
        let next = Arc::new(next);
        let prior = self.current.compare_and_swap(expected, Arc::clone(&next));
        if Arc::ptr_eq(&*prior, expected) {
            Some(next)
        } else {
            trace!(version = expected.version(), "root.publish.contention");
            None
        }
    }

    /// Replaces the root page in one atomic step.
    ///
    /// Legal only while the update lock is free; a held lock or a lost swap
    /// yields `None` and the caller retries against a freshly loaded
    /// snapshot, with its failure folded into `attempt_delta`. A supplied
    /// removal entry is pushed onto the new snapshot's pending chain.
    pub fn publish_new_root(
        &self,
        expected: &Arc<RootSnapshot>,
        new_root: PageRef,
        attempt_delta: u64,
        removal: Option<RemovalEntry>,
    ) -> Option<Arc<RootSnapshot>> {
        if expected.is_locked() {
            return None;
        }
        self.compare_and_swap(
            expected,
            RootSnapshot::with_root(expected, new_root, attempt_delta, removal),
        )
    }

    /// Acquires the exclusive update lock, reentrantly for the holding
    /// thread.
    ///
    /// A snapshot locked by another thread never produces a candidate; a
    /// lost swap yields `None` for retry as usual.
    pub fn try_acquire_update_lock(
        &self,
        expected: &Arc<RootSnapshot>,
        attempt_delta: u64,
    ) -> Option<Arc<RootSnapshot>> {
        if expected.is_locked() && !expected.locked_by_current_thread() {
            return None;
        }
        self.compare_and_swap(expected, RootSnapshot::locked(expected, attempt_delta))
    }

    /// Publishes an intermediate or final root while the update lock is
    /// held, releasing one hold when `release` is set.
    ///
    /// The lock already serializes writers, so the new snapshot is installed
    /// with a plain store; no other thread can have advanced the cell.
    /// Calling without the lock is a contract breach: fatal in debug
    /// builds, a [`CoreError::LockContract`] in release builds.
    pub fn publish_locked_update(
        &self,
        expected: &Arc<RootSnapshot>,
        new_root: PageRef,
        append_counter: u8,
        release: bool,
        removal: Option<RemovalEntry>,
    ) -> Result<Arc<RootSnapshot>> {
        if !expected.locked_by_current_thread() {
            debug_assert!(false, "locked update without holding the update lock");
            warn!(version = expected.version(), "root.publish.lock_violation");
            return Err(CoreError::LockContract(
                "locked update without holding the update lock",
            ));
        }
        debug_assert!(
            Arc::ptr_eq(&*self.current.load(), expected),
            "locked update against a superseded snapshot"
        );
        let next = Arc::new(RootSnapshot::with_locked_update(
            expected,
            new_root,
            append_counter,
            release,
            removal,
        ));
        self.current.store(Arc::clone(&next));
        Ok(next)
    }

    /// Commits a version boundary: clears lock state, starts a fresh
    /// removal chain, and links the new snapshot to the earliest ancestor
    /// still sharing this root and append state.
    ///
    /// `Ok(None)` means the swap was lost and the caller retries. Version
    /// numbers must advance; regressing the counter would corrupt the
    /// chain and is rejected outright.
    pub fn commit_version_boundary(
        &self,
        expected: &Arc<RootSnapshot>,
        new_version: Version,
        attempt_delta: u64,
    ) -> Result<Option<Arc<RootSnapshot>>> {
        if expected.is_locked() && !expected.locked_by_current_thread() {
            debug_assert!(false, "version boundary across a lock held elsewhere");
            warn!(version = expected.version(), "root.publish.lock_violation");
            return Err(CoreError::LockContract(
                "version boundary across a lock held elsewhere",
            ));
        }
        if new_version <= expected.version() {
            return Err(CoreError::Invalid("version numbers must advance"));
        }
        let mut ancestor = Arc::clone(expected);
        while let Some(prev) = ancestor.previous() {
            if Arc::ptr_eq(prev.root(), expected.root())
                && prev.append_counter() == expected.append_counter()
            {
                ancestor = prev;
            } else {
                break;
            }
        }
        Ok(self.compare_and_swap(
            expected,
            RootSnapshot::with_version(&ancestor, new_version, attempt_delta),
        ))
    }

    /// Cuts the published snapshot's version chain below `oldest_needed`.
    pub fn prune_versions_older_than(&self, oldest_needed: Version) {
        self.load().prune_versions_older_than(oldest_needed);
    }

    /// Detaches and enumerates the published snapshot's pending removals.
    pub fn drain_removals(&self) -> Vec<PagePosition> {
        self.load().drain_removals()
    }

    /// Replaces the most recent pending removal entry, if any.
    pub fn update_removal_data(&self, entry: RemovalEntry) {
        self.load().update_removal_data(entry);
    }

    /// Diagnostics for the published snapshot.
    pub fn stats(&self) -> RootStats {
        self.load().stats()
    }
}
