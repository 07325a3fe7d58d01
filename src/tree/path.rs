//! Root-to-leaf path records.
//!
//! A [`PathFrame`] chain is built while descending the tree for a single
//! operation and consumed by that same operation: it drives cursor
//! iteration, unsaved-memory accounting, and the discovery of pages that an
//! update made unreachable. Frames run strictly leaf to root; after
//! construction the chain is only ever pruned or degraded, never reordered
//! or extended.

use std::iter;

use smallvec::SmallVec;
use tracing::trace;

use crate::root::removal::RemovalEntry;
use crate::tree::page::{PageRef, StoreProbe, UnsavedMemory};
use crate::types::{PagePosition, Version};

/// What a frame currently holds for its level.
#[derive(Clone)]
pub enum FrameSlot {
    /// Full handle to the page visited at this level.
    Live(PageRef),
    /// Compact recoverable encoding kept after the page's removal was
    /// committed; the handle is dropped so the page can be freed.
    Degraded(PagePosition),
}

/// One level of a root-to-leaf descent.
pub struct PathFrame {
    /// Page visited at this level, possibly degraded to its position.
    pub slot: FrameSlot,
    /// Index used to choose the child at this level; at the leaf frame the
    /// search index, negative when the target key is absent.
    pub index: i32,
    /// Next frame toward the root, `None` at the root frame.
    pub parent: Option<Box<PathFrame>>,
}

impl PathFrame {
    /// Appends one level to a path under construction, returning the new
    /// leafward head.
    pub fn push(parent: Option<Box<PathFrame>>, page: PageRef, index: i32) -> Box<PathFrame> {
        Box::new(PathFrame {
            slot: FrameSlot::Live(page),
            index,
            parent,
        })
    }

    /// Builds a path record from a root-to-leaf descent.
    ///
    /// Pages arrive in the order they were visited; the returned head is the
    /// leaf frame. `None` for an empty descent.
    pub fn descend<I>(descent: I) -> Option<Box<PathFrame>>
    where
        I: IntoIterator<Item = (PageRef, i32)>,
    {
        let mut head = None;
        for (page, index) in descent {
            head = Some(PathFrame::push(head, page, index));
        }
        head
    }

    /// Frames from this one up to the root.
    pub fn frames(&self) -> impl Iterator<Item = &PathFrame> {
        let mut next = Some(self);
        iter::from_fn(move || {
            let frame = next?;
            next = frame.parent.as_deref();
            Some(frame)
        })
    }

    /// Number of frames from here to the root, i.e. tree depth at descent.
    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    /// Position token for this frame's page as of now.
    pub fn position(&self) -> PagePosition {
        match &self.slot {
            FrameSlot::Live(page) => page.position(),
            FrameSlot::Degraded(pos) => *pos,
        }
    }

    /// The live page handle, unless the frame has degraded.
    pub fn page(&self) -> Option<&PageRef> {
        match &self.slot {
            FrameSlot::Live(page) => Some(page),
            FrameSlot::Degraded(_) => None,
        }
    }

    /// Visits every reachable frame leaf to root, yielding each frame's
    /// position token exactly once.
    ///
    /// A live frame is visited when its page still holds entries or is an
    /// internal node; internal nodes are visited even when empty because the
    /// visit drives persisted-position bookkeeping for compaction. Degraded
    /// frames synthesize their token from the stored encoding. Only an
    /// explicitly empty leaf is skipped.
    pub fn for_each_reachable(&self, mut visit: impl FnMut(PagePosition)) {
        for frame in self.frames() {
            match &frame.slot {
                FrameSlot::Live(page) => {
                    if page.total_count() > 0 || !page.is_leaf() {
                        visit(page.position());
                    }
                }
                FrameSlot::Degraded(pos) => visit(*pos),
            }
        }
    }

    /// Shrinks the path into a removal-ledger entry.
    ///
    /// First pass: a frame saved with chunk id at or below `safe_version` is
    /// removable; an unsaved frame still holding entries is claimed via
    /// [`Page::try_mark_removed`](crate::tree::Page::try_mark_removed) and
    /// its footprint leaves the `unsaved` tally; if another thread beat us
    /// to the claim and the page has meanwhile been persisted low enough,
    /// it counts as removable instead. Second pass: collect the removable
    /// positions, leaf to root. If the second pass finds more than the first
    /// counted, a concurrent flush moved the goalposts; the path itself is
    /// returned as a lazy entry so the decision is recomputed at visit time.
    ///
    /// Returns `None` when nothing is removable.
    pub fn shrink_to_removal_entry(
        self: Box<Self>,
        unsaved: &UnsavedMemory,
        safe_version: Version,
        probe: &dyn StoreProbe,
    ) -> Option<RemovalEntry> {
        let mut removable = 0usize;
        let mut reclaimed = 0i64;
        for frame in self.frames() {
            let pos = frame.position();
            if pos.is_saved() && i64::from(pos.chunk_id()) <= safe_version {
                removable += 1;
            } else if let FrameSlot::Live(page) = &frame.slot {
                if page.total_count() > 0 {
                    if page.try_mark_removed() {
                        reclaimed += i64::from(page.memory_footprint());
                    } else {
                        let pos = page.position();
                        if i64::from(pos.chunk_id()) <= safe_version {
                            debug_assert!(
                                pos.is_saved(),
                                "removal already claimed for a never-saved page"
                            );
                            if pos.is_saved() {
                                removable += 1;
                            }
                        }
                    }
                }
            }
        }
        unsaved.discharge(reclaimed);
        if removable == 0 {
            return None;
        }

        let mut positions: SmallVec<[PagePosition; 8]> = SmallVec::with_capacity(removable);
        let mut raced = false;
        for frame in self.frames() {
            let pos = frame.position();
            if pos.is_saved() && i64::from(pos.chunk_id()) <= safe_version {
                if positions.len() == removable {
                    raced = true;
                    break;
                }
                positions.push(pos);
            }
        }
        if raced {
            debug_assert!(
                probe.is_flush_in_progress_for(safe_version),
                "removable set grew without a flush in progress"
            );
            trace!(safe_version, "path.removal.race");
            return Some(RemovalEntry::Path(self));
        }
        Some(RemovalEntry::Positions(
            positions.into_vec().into_boxed_slice(),
        ))
    }

    /// Drops leafward frames whose pages were never persisted, then excises
    /// any unsaved interior frames from the remaining chain.
    ///
    /// The footprint of every dropped page leaves the `unsaved` tally: those
    /// pages are discarded with the path and will never be flushed. Returns
    /// the new head (the first persisted frame) or `None` when the whole
    /// path was unsaved.
    pub fn strip_unsaved(
        self: Box<Self>,
        unsaved: &UnsavedMemory,
    ) -> Option<Box<PathFrame>> {
        let mut head = Some(self);
        while let Some(mut frame) = head {
            match &frame.slot {
                FrameSlot::Live(page) if !page.is_saved() => {
                    unsaved.discharge(i64::from(page.memory_footprint()));
                    head = frame.parent;
                }
                _ => {
                    frame.excise_unsaved_ancestors(unsaved);
                    return Some(frame);
                }
            }
        }
        None
    }

    fn excise_unsaved_ancestors(&mut self, unsaved: &UnsavedMemory) {
        let mut link = &mut self.parent;
        loop {
            // Unlink unsaved frames at this position before stepping over it.
            while link
                .as_ref()
                .is_some_and(|frame| matches!(&frame.slot, FrameSlot::Live(page) if !page.is_saved()))
            {
                let frame = link.take().expect("presence checked above");
                if let FrameSlot::Live(page) = &frame.slot {
                    unsaved.discharge(i64::from(page.memory_footprint()));
                }
                *link = frame.parent;
            }
            link = match link {
                Some(frame) => &mut frame.parent,
                None => break,
            };
        }
    }

    /// Degrades every frame saved with chunk id at or below `safe_version`
    /// to its position-only form, dropping the page handle so the page can
    /// be freed. The footprint of frames still unsaved leaves the `unsaved`
    /// tally; callers run this pass once the path's removal is committed, at
    /// which point unsaved pages on it are dead.
    pub fn degrade_saved(&mut self, safe_version: Version, unsaved: &UnsavedMemory) {
        let mut cursor = Some(self);
        while let Some(frame) = cursor {
            let degraded = match &frame.slot {
                FrameSlot::Live(page) => {
                    let pos = page.position();
                    if pos.is_saved() && i64::from(pos.chunk_id()) <= safe_version {
                        Some(pos)
                    } else {
                        if !pos.is_saved() {
                            unsaved.discharge(i64::from(page.memory_footprint()));
                        }
                        None
                    }
                }
                FrameSlot::Degraded(_) => None,
            };
            if let Some(pos) = degraded {
                frame.slot = FrameSlot::Degraded(pos);
            }
            cursor = frame.parent.as_deref_mut();
        }
    }

    /// Enumerates removed positions: every frame persisted with chunk id at
    /// or below `safe_version` is emitted leaf to root; the footprint of
    /// unsaved frames leaves the `unsaved` tally. `None` when nothing
    /// qualifies.
    pub fn collect_removed(
        &self,
        safe_version: Version,
        unsaved: &UnsavedMemory,
    ) -> Option<RemovalEntry> {
        let mut positions: SmallVec<[PagePosition; 8]> = SmallVec::new();
        let mut dropped = 0i64;
        for frame in self.frames() {
            let pos = frame.position();
            if pos.is_saved() && i64::from(pos.chunk_id()) <= safe_version {
                positions.push(pos);
            } else if let FrameSlot::Live(page) = &frame.slot {
                dropped += i64::from(page.memory_footprint());
            }
        }
        unsaved.discharge(dropped);
        if positions.is_empty() {
            return None;
        }
        Some(RemovalEntry::Positions(
            positions.into_vec().into_boxed_slice(),
        ))
    }
}
