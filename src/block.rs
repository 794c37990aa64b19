//! Block layout and the header/footer tag codec.
//!
//! A block is addressed by [`BlockRef`], an opaque newtype wrapping the
//! byte address of its header word inside a [`MemSim`] backing store. The
//! allocator core never dereferences a raw pointer directly; every header,
//! footer, and free-list pointer read or write goes through the
//! [`MemSim`] trait, which is the sole place that touches the underlying
//! bytes.
//!
//! Header/footer word layout: bits 63..4 size, bit 2 PREV_MIN, bit 1
//! PREV_ALLOC, bit 0 ALLOC. See `SPEC_FULL.md` section 3 for the full
//! rationale.

use crate::memsim::MemSim;

/// Word size in bytes: the width of a header/footer and of one free-list
/// pointer slot.
pub(crate) const WSIZE: usize = 8;
/// Double-word size in bytes: the heap's alignment and block-size granularity.
pub(crate) const DSIZE: usize = 16;
/// Smallest possible block: one header word plus one payload word.
pub(crate) const MIN_BLOCK: usize = 16;
/// Default heap extension granularity.
pub(crate) const CHUNK: usize = 4096;

const ALLOC_MASK: u64 = 0x1;
const PREV_ALLOC_MASK: u64 = 0x2;
const PREV_MIN_MASK: u64 = 0x4;
const SIZE_MASK: u64 = !0xF;

/// A reference to a block's header, as a byte address inside a [`MemSim`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct BlockRef(pub usize);

/// Packs a block's size and three tag bits into a header/footer word.
pub(crate) fn pack(size: usize, alloc: bool, prev_alloc: bool, prev_min: bool) -> u64 {
  let mut word = size as u64;
  if alloc {
    word |= ALLOC_MASK;
  }
  if prev_alloc {
    word |= PREV_ALLOC_MASK;
  }
  if prev_min {
    word |= PREV_MIN_MASK;
  }
  word
}

pub(crate) fn extract_size(word: u64) -> usize {
  (word & SIZE_MASK) as usize
}

pub(crate) fn extract_alloc(word: u64) -> bool {
  word & ALLOC_MASK != 0
}

pub(crate) fn extract_prev_alloc(word: u64) -> bool {
  word & PREV_ALLOC_MASK != 0
}

pub(crate) fn extract_prev_min(word: u64) -> bool {
  word & PREV_MIN_MASK != 0
}

/// Address of the byte immediately following a block's header: the first
/// byte of its payload.
pub(crate) fn payload_of(block: BlockRef) -> usize {
  block.0 + WSIZE
}

/// Given a payload address (as returned to callers of `malloc`), finds the
/// owning block's header.
pub(crate) fn header_of(payload_addr: usize) -> BlockRef {
  BlockRef(payload_addr - WSIZE)
}

/// Address of a free block's footer word.
///
/// Only meaningful for free blocks with `size > MIN_BLOCK`; callers must
/// not read/write a footer for an allocated block or a minimum-size free
/// block (those elide the footer entirely).
fn footer_addr(block: BlockRef, size: usize) -> usize {
  block.0 + size - WSIZE
}

/// The next physical block, found by walking forward by this block's size.
pub(crate) fn find_next(block: BlockRef, sim: &impl MemSim) -> BlockRef {
  let size = extract_size(sim.read_u64(block.0));
  BlockRef(block.0 + size)
}

/// The previous physical block.
///
/// Precondition: `get_prev_alloc(header(block))` is false — only a free
/// predecessor is navigable backward, either via the PREV_MIN shortcut (a
/// minimum-size free predecessor has no footer) or by reading the footer
/// word immediately preceding this block's header.
pub(crate) fn find_prev(block: BlockRef, sim: &impl MemSim) -> BlockRef {
  let header = sim.read_u64(block.0);
  if extract_prev_min(header) {
    BlockRef(block.0 - MIN_BLOCK)
  } else {
    let footer = sim.read_u64(block.0 - WSIZE);
    let size = extract_size(footer);
    BlockRef(block.0 - size)
  }
}

/// Writes a block's header (and footer, for a free block larger than
/// `MIN_BLOCK`), preserving the block's own PREV_ALLOC/PREV_MIN bits, then
/// propagates the new ALLOC/size into the next physical block's PREV_ALLOC
/// and PREV_MIN bits.
///
/// This is the only function that installs a block's metadata in the
/// ordinary case; every mutation of an existing block (split, coalesce,
/// malloc, free) routes through it so the propagate-forward step can never
/// be forgotten. It requires that the next physical block already holds a
/// valid header — callers that create a brand-new block at the high end
/// of the heap (`extend_heap`) must not rely on this function to seed the
/// new epilogue; see [`write_new_free_block`] and [`write_epilogue`].
pub(crate) fn write_block(sim: &mut impl MemSim, block: BlockRef, size: usize, alloc: bool) {
  let cur = sim.read_u64(block.0);
  let own_prev_alloc = extract_prev_alloc(cur);
  let own_prev_min = extract_prev_min(cur);

  let word = pack(size, alloc, own_prev_alloc, own_prev_min);
  sim.write_u64(block.0, word);
  if !alloc && size > MIN_BLOCK {
    sim.write_u64(footer_addr(block, size), word);
  }

  let next = BlockRef(block.0 + size);
  let next_word = sim.read_u64(next.0);
  let next_size = extract_size(next_word);
  let next_alloc = extract_alloc(next_word);
  let new_next_word = pack(next_size, next_alloc, alloc, size == MIN_BLOCK);
  sim.write_u64(next.0, new_next_word);
}

/// Writes a brand-new free block's header/footer without touching the
/// block that follows it (which, during `extend_heap`, does not yet hold
/// a valid header). The block's own PREV_ALLOC/PREV_MIN bits are taken
/// from whatever word already occupies this address — legitimate here
/// because `extend_heap` places the new block exactly where the old
/// epilogue sentinel stood, and the old epilogue's PREV_ALLOC/PREV_MIN
/// correctly described the heap's previous last block.
pub(crate) fn write_new_free_block(sim: &mut impl MemSim, block: BlockRef, size: usize) {
  let cur = sim.read_u64(block.0);
  let prev_alloc = extract_prev_alloc(cur);
  let prev_min = extract_prev_min(cur);
  let word = pack(size, false, prev_alloc, prev_min);
  sim.write_u64(block.0, word);
  if size > MIN_BLOCK {
    sim.write_u64(footer_addr(block, size), word);
  }
}

/// Writes an epilogue sentinel (size 0, ALLOC=1) at `block`, carrying the
/// given PREV_ALLOC/PREV_MIN tags explicitly rather than reading them from
/// memory — the address an epilogue is (re)written to during heap
/// extension holds uninitialized bytes, not a valid header, so the carry
/// values must come from the caller (the free block `extend_heap` just
/// created).
pub(crate) fn write_epilogue(sim: &mut impl MemSim, block: BlockRef, prev_alloc: bool, prev_min: bool) {
  sim.write_u64(block.0, pack(0, true, prev_alloc, prev_min));
}
