//! In-memory page double shared by the crate's unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::tree::page::Page;
use crate::types::{ChunkId, PagePosition};

pub(crate) struct TestPage {
    count: u64,
    leaf: bool,
    footprint: u32,
    position: AtomicU64,
    removed: AtomicBool,
}

impl TestPage {
    pub(crate) fn unsaved(count: u64, leaf: bool, footprint: u32) -> Arc<Self> {
        Arc::new(Self {
            count,
            leaf,
            footprint,
            position: AtomicU64::new(0),
            removed: AtomicBool::new(false),
        })
    }

    pub(crate) fn saved(chunk: ChunkId, count: u64, leaf: bool, footprint: u32) -> Arc<Self> {
        let page = Self::unsaved(count, leaf, footprint);
        page.save_at(chunk);
        page
    }

    pub(crate) fn save_at(&self, chunk: ChunkId) {
        self.position
            .store(PagePosition::new(chunk, 0, 1, self.leaf).raw(), Ordering::SeqCst);
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl Page for TestPage {
    fn total_count(&self) -> u64 {
        self.count
    }

    fn is_leaf(&self) -> bool {
        self.leaf
    }

    fn position(&self) -> PagePosition {
        PagePosition::from_raw(self.position.load(Ordering::SeqCst))
            .expect("test pages only store well-formed tokens")
    }

    fn memory_footprint(&self) -> u32 {
        self.footprint
    }

    fn try_mark_removed(&self) -> bool {
        self.removed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
