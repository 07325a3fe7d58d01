//! Removal ledgers: records of pages made obsolete by one update.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::tree::path::PathFrame;
use crate::types::PagePosition;

/// Pages one update made unreachable, queued for later reclamation.
///
/// The representation is a closed set of two: the flat position array the
/// shrink computation normally produces, and the path record it falls back
/// to when a concurrent flush invalidated the computation mid-way.
pub enum RemovalEntry {
    /// Flat ordered positions, leaf to root; each visited exactly once.
    Positions(Box<[PagePosition]>),
    /// Lazy fallback: the path is re-walked at visit time, so the decision
    /// of what is reclaimable is made against then-current page state.
    Path(Box<PathFrame>),
}

impl RemovalEntry {
    /// Yields every persisted position the entry captures, exactly once.
    pub fn for_each_position(&self, mut visit: impl FnMut(PagePosition)) {
        match self {
            RemovalEntry::Positions(positions) => {
                for &pos in positions.iter() {
                    visit(pos);
                }
            }
            RemovalEntry::Path(path) => path.for_each_reachable(|pos| {
                if pos.is_saved() {
                    visit(pos);
                }
            }),
        }
    }

    /// Number of positions a visit would yield.
    pub fn len(&self) -> usize {
        match self {
            RemovalEntry::Positions(positions) => positions.len(),
            RemovalEntry::Path(_) => {
                let mut count = 0;
                self.for_each_position(|_| count += 1);
                count
            }
        }
    }

    /// Whether a visit would yield nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Node of the pending-removal chain hung off a root snapshot.
///
/// Nodes form a LIFO list: each update that records removals pushes a fresh
/// head. The data slot is the one racy field; a drain takes entries out
/// wholesale, and a late in-place replacement targets whatever entry is
/// still pending.
pub struct RemovalNode {
    data: Mutex<Option<RemovalEntry>>,
    next: Option<Arc<RemovalNode>>,
}

impl RemovalNode {
    pub(crate) fn new(entry: RemovalEntry, next: Option<Arc<RemovalNode>>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(Some(entry)),
            next,
        })
    }

    /// Takes the entry out, leaving the node empty for later visitors.
    pub fn take_data(&self) -> Option<RemovalEntry> {
        self.data.lock().take()
    }

    /// Replaces whatever entry the node currently holds.
    pub fn replace_data(&self, entry: RemovalEntry) {
        *self.data.lock() = Some(entry);
    }

    /// Next (older) node in the chain.
    pub fn next(&self) -> Option<&Arc<RemovalNode>> {
        self.next.as_ref()
    }
}
