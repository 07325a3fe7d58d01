//! Packed position tokens for persisted pages.
//!
//! A [`PagePosition`] is the 64-bit contract this core shares with the chunk
//! layer: enough to locate a written-out page (chunk, offset, length class)
//! and to decide reclamation eligibility from the chunk id alone. The
//! all-zero token is reserved for "never written out".

use std::fmt;

use crate::types::{ChunkId, CoreError, Result};

const KIND_BITS: u32 = 1;
const LENGTH_CLASS_BITS: u32 = 5;
const OFFSET_BITS: u32 = 32;

const LENGTH_CLASS_SHIFT: u32 = KIND_BITS;
const OFFSET_SHIFT: u32 = KIND_BITS + LENGTH_CLASS_BITS;
const CHUNK_SHIFT: u32 = OFFSET_SHIFT + OFFSET_BITS;

const LENGTH_CLASS_MASK: u64 = (1 << LENGTH_CLASS_BITS) - 1;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Largest chunk identifier representable in a token (26 bits).
pub const MAX_CHUNK_ID: ChunkId = ((1u64 << (64 - CHUNK_SHIFT)) - 1) as ChunkId;

/// Packed location of a persisted page.
///
/// Layout, low bit first: node kind (1 = leaf), length class (5 bits),
/// offset within chunk (32 bits), chunk identifier (26 bits). Chunk ids
/// start at 1, so a raw value of zero can never name a stored page and
/// serves as the "not saved" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PagePosition(u64);

impl PagePosition {
    /// Token for a page that has never been written out.
    pub const UNSAVED: Self = Self(0);

    /// Packs a position token.
    pub fn new(chunk: ChunkId, offset: u32, length_class: u8, leaf: bool) -> Self {
        debug_assert!(chunk != 0, "chunk ids start at 1");
        debug_assert!(chunk <= MAX_CHUNK_ID, "chunk id out of range");
        debug_assert!(u64::from(length_class) <= LENGTH_CLASS_MASK);
        Self(
            (u64::from(chunk) << CHUNK_SHIFT)
                | (u64::from(offset) << OFFSET_SHIFT)
                | (u64::from(length_class) << LENGTH_CLASS_SHIFT)
                | u64::from(leaf),
        )
    }

    /// Reconstructs a token read back from storage.
    ///
    /// Zero is accepted as the unsaved sentinel; any other value must carry
    /// a chunk id, which the chunk layer never emits as zero.
    pub fn from_raw(raw: u64) -> Result<Self> {
        let token = Self(raw);
        if raw != 0 && token.chunk_id() == 0 {
            return Err(CoreError::Corruption("position token missing chunk id"));
        }
        Ok(token)
    }

    /// Raw packed representation.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether the token names a stored page.
    pub const fn is_saved(self) -> bool {
        self.0 != 0
    }

    /// Chunk the page was written into. Zero for the unsaved sentinel.
    pub const fn chunk_id(self) -> ChunkId {
        (self.0 >> CHUNK_SHIFT) as ChunkId
    }

    /// Byte offset of the page within its chunk.
    pub const fn offset(self) -> u32 {
        ((self.0 >> OFFSET_SHIFT) & OFFSET_MASK) as u32
    }

    /// Coarse length bucket assigned by the chunk layer.
    pub const fn length_class(self) -> u8 {
        ((self.0 >> LENGTH_CLASS_SHIFT) & LENGTH_CLASS_MASK) as u8
    }

    /// Whether the stored page is a leaf.
    pub const fn is_leaf(self) -> bool {
        self.0 & 1 == 1
    }
}

impl fmt::Debug for PagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_saved() {
            return f.write_str("PagePosition(unsaved)");
        }
        f.debug_struct("PagePosition")
            .field("chunk", &self.chunk_id())
            .field("offset", &self.offset())
            .field("length_class", &self.length_class())
            .field("leaf", &self.is_leaf())
            .finish()
    }
}
