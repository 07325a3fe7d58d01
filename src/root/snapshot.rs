//! Immutable, versioned snapshots of a map's published state.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use arc_swap::ArcSwapOption;
use tracing::debug;

use crate::root::removal::{RemovalEntry, RemovalNode};
use crate::tree::page::PageRef;
use crate::types::{PagePosition, Version};

/// The whole state of a map at one moment: root page, version, update
/// counters, lock indicator, append-buffer occupancy, and the chains of
/// history and pending removals.
///
/// A snapshot is a value: every transition constructs a new one and
/// publishes it through the owning [`RootCell`](crate::root::RootCell), so a
/// reader that captured a reference sees a fully consistent view with no
/// partial updates. Only two fields ever change after construction, both
/// with atomic-swap semantics: `previous`, which pruning may null (and only
/// null), and the removal-chain head, which draining detaches.
pub struct RootSnapshot {
    root: PageRef,
    version: Version,
    update_counter: u64,
    update_attempt_counter: u64,
    hold_count: u8,
    lock_owner: Option<ThreadId>,
    append_counter: u8,
    previous: ArcSwapOption<RootSnapshot>,
    removal_head: ArcSwapOption<RemovalNode>,
}

impl RootSnapshot {
    /// Seed snapshot for a fresh map root; also used for read-only views.
    pub fn new(root: PageRef, version: Version) -> Self {
        Self {
            root,
            version,
            update_counter: 1,
            update_attempt_counter: 1,
            hold_count: 0,
            lock_owner: None,
            append_counter: 0,
            previous: ArcSwapOption::empty(),
            removal_head: ArcSwapOption::empty(),
        }
    }

    /// Unlocked root replacement.
    pub(crate) fn with_root(
        prev: &RootSnapshot,
        root: PageRef,
        attempt_delta: u64,
        removal: Option<RemovalEntry>,
    ) -> Self {
        debug_assert_eq!(prev.hold_count, 0, "root replacement under a held lock");
        Self {
            root,
            version: prev.version,
            update_counter: prev.update_counter + 1,
            update_attempt_counter: prev.update_attempt_counter + attempt_delta,
            hold_count: 0,
            lock_owner: None,
            append_counter: prev.append_counter,
            previous: ArcSwapOption::new(prev.previous.load_full()),
            removal_head: ArcSwapOption::new(prev.chain_with(removal)),
        }
    }

    /// Lock acquisition, reentrant for the owning thread.
    pub(crate) fn locked(prev: &RootSnapshot, attempt_delta: u64) -> Self {
        let caller = thread::current().id();
        debug_assert!(
            prev.hold_count == 0 || prev.lock_owner == Some(caller),
            "lock acquisition from a non-owning thread"
        );
        Self {
            root: Arc::clone(&prev.root),
            version: prev.version,
            update_counter: prev.update_counter + 1,
            update_attempt_counter: prev.update_attempt_counter + attempt_delta,
            hold_count: prev.hold_count + 1,
            lock_owner: Some(caller),
            append_counter: prev.append_counter,
            previous: ArcSwapOption::new(prev.previous.load_full()),
            removal_head: ArcSwapOption::new(prev.removal_head.load_full()),
        }
    }

    /// Mid-update publication while the lock is held, and final release.
    pub(crate) fn with_locked_update(
        prev: &RootSnapshot,
        root: PageRef,
        append_counter: u8,
        release: bool,
        removal: Option<RemovalEntry>,
    ) -> Self {
        debug_assert!(
            prev.hold_count > 0 && prev.lock_owner == Some(thread::current().id()),
            "locked update without holding the update lock"
        );
        let hold_count = prev.hold_count - u8::from(release);
        Self {
            root,
            version: prev.version,
            update_counter: prev.update_counter,
            update_attempt_counter: prev.update_attempt_counter,
            hold_count,
            lock_owner: if hold_count == 0 { None } else { prev.lock_owner },
            append_counter,
            previous: ArcSwapOption::new(prev.previous.load_full()),
            removal_head: ArcSwapOption::new(prev.chain_with(removal)),
        }
    }

    /// Version-boundary commit, linked to the earliest ancestor that shares
    /// this root and append state.
    pub(crate) fn with_version(
        ancestor: &Arc<RootSnapshot>,
        version: Version,
        attempt_delta: u64,
    ) -> Self {
        debug_assert_eq!(
            ancestor.append_counter, 0,
            "version boundary with a dirty append buffer"
        );
        Self {
            root: Arc::clone(&ancestor.root),
            version,
            update_counter: ancestor.update_counter + 1,
            update_attempt_counter: ancestor.update_attempt_counter + attempt_delta,
            hold_count: 0,
            lock_owner: None,
            append_counter: 0,
            previous: ArcSwapOption::new(Some(Arc::clone(ancestor))),
            removal_head: ArcSwapOption::empty(),
        }
    }

    fn chain_with(&self, removal: Option<RemovalEntry>) -> Option<Arc<RemovalNode>> {
        let head = self.removal_head.load_full();
        match removal {
            Some(entry) => Some(RemovalNode::new(entry, head)),
            None => head,
        }
    }

    /// Current root page.
    pub fn root(&self) -> &PageRef {
        &self.root
    }

    /// Version this snapshot was written under.
    pub fn version(&self) -> Version {
        self.version
    }

    /// The version this snapshot's data actually belongs to: when root and
    /// append state are unchanged from the previous snapshot, the last root
    /// of version X is also the first root of X+1 and reports X.
    pub fn effective_version(&self) -> Version {
        match self.previous.load_full() {
            Some(prev)
                if Arc::ptr_eq(&prev.root, &self.root)
                    && prev.append_counter == self.append_counter =>
            {
                prev.version
            }
            _ => self.version,
        }
    }

    /// Successful root swaps folded into this snapshot's lineage.
    pub fn update_counter(&self) -> u64 {
        self.update_counter
    }

    /// Attempted root swaps, successful or not; the spread against
    /// [`update_counter`](Self::update_counter) is a contention signal.
    pub fn update_attempt_counter(&self) -> u64 {
        self.update_attempt_counter
    }

    /// Buffered appended entries not yet merged into the root.
    pub fn append_counter(&self) -> u8 {
        self.append_counter
    }

    /// Total entries: the root's count plus the append buffer.
    pub fn total_count(&self) -> u64 {
        self.root.total_count() + u64::from(self.append_counter)
    }

    /// Whether the exclusive update lock is held.
    pub fn is_locked(&self) -> bool {
        self.hold_count != 0
    }

    /// Reentrant hold depth of the update lock.
    pub fn hold_count(&self) -> u8 {
        self.hold_count
    }

    /// Whether the calling thread holds the update lock.
    pub fn locked_by_current_thread(&self) -> bool {
        self.is_locked() && self.lock_owner == Some(thread::current().id())
    }

    /// Previous snapshot in the version chain, if not yet pruned.
    pub fn previous(&self) -> Option<Arc<RootSnapshot>> {
        self.previous.load_full()
    }

    /// Whether removal entries are queued for the next drain.
    pub fn has_pending_removals(&self) -> bool {
        self.removal_head.load().is_some()
    }

    /// Cuts the version chain below `oldest_needed`.
    ///
    /// Walks `previous` from this snapshot; the first node whose version is
    /// below the threshold loses its tail, making everything older
    /// unreachable in one step. The node itself stays linked: retaining the
    /// whole history of a version requires the last root of the version
    /// before it. Nulling is the only mutation; a reader already holding a
    /// pruned-away snapshot keeps it alive through its own reference.
    pub fn prune_versions_older_than(&self, oldest_needed: Version) {
        let mut pruned = 0usize;
        if self.version < oldest_needed && self.cut_tail() {
            pruned += 1;
        }
        let mut node = self.previous.load_full();
        while let Some(snapshot) = node {
            if snapshot.version < oldest_needed && snapshot.cut_tail() {
                pruned += 1;
            }
            node = snapshot.previous.load_full();
        }
        if pruned > 0 {
            debug!(oldest_needed, pruned, "root.chain.prune");
        }
    }

    fn cut_tail(&self) -> bool {
        let tail = self.previous.swap(None);
        debug_assert!(
            tail.as_ref().map_or(true, |t| t.append_counter == 0),
            "pruned snapshot left a dirty append buffer behind"
        );
        tail.is_some()
    }

    /// Detaches and visits the pending-removal chain, returning every
    /// persisted position it captured.
    ///
    /// The head is exchanged for empty first, so entries appended
    /// concurrently land on a fresh chain and are deferred to the next
    /// drain rather than lost. Draining twice without intervening appends
    /// yields entries once, then nothing.
    pub fn drain_removals(&self) -> Vec<PagePosition> {
        let mut positions = Vec::new();
        let mut nodes = 0usize;
        let mut node = self.removal_head.swap(None);
        while let Some(current) = node {
            if let Some(entry) = current.take_data() {
                entry.for_each_position(|pos| positions.push(pos));
            }
            nodes += 1;
            node = current.next().cloned();
        }
        if nodes > 0 {
            debug!(nodes, positions = positions.len(), "root.removal.drain");
        }
        positions
    }

    /// Replaces the data of the most recent pending removal entry, if any.
    ///
    /// Used by callers that committed a removal lazily and later settled on
    /// a cheaper flat representation.
    pub fn update_removal_data(&self, entry: RemovalEntry) {
        if let Some(node) = self.removal_head.load_full() {
            node.replace_data(entry);
        }
    }

    /// Point-in-time diagnostics for this snapshot and its chain.
    pub fn stats(&self) -> RootStats {
        let mut chain_length = 0usize;
        let mut node = self.previous.load_full();
        while let Some(snapshot) = node {
            chain_length += 1;
            node = snapshot.previous.load_full();
        }
        RootStats {
            version: self.version,
            effective_version: self.effective_version(),
            total_count: self.total_count(),
            update_counter: self.update_counter,
            update_attempt_counter: self.update_attempt_counter,
            locked: self.is_locked(),
            append_counter: self.append_counter,
            pending_removals: self.has_pending_removals(),
            chain_length,
        }
    }
}

impl fmt::Debug for RootSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSnapshot")
            .field("version", &self.version)
            .field("update_counter", &self.update_counter)
            .field("update_attempt_counter", &self.update_attempt_counter)
            .field("hold_count", &self.hold_count)
            .field("append_counter", &self.append_counter)
            .field("pending_removals", &self.has_pending_removals())
            .finish_non_exhaustive()
    }
}

/// Observability snapshot of a map's root state.
#[derive(Clone, Debug)]
pub struct RootStats {
    /// Version of the published snapshot.
    pub version: Version,
    /// Version the snapshot's data actually belongs to.
    pub effective_version: Version,
    /// Total entries including the append buffer.
    pub total_count: u64,
    /// Successful root swaps.
    pub update_counter: u64,
    /// Attempted root swaps.
    pub update_attempt_counter: u64,
    /// Whether the update lock is held.
    pub locked: bool,
    /// Append-buffer occupancy.
    pub append_counter: u8,
    /// Whether removal entries await the next drain.
    pub pending_removals: bool,
    /// Reachable predecessors in the version chain.
    pub chain_length: usize,
}
