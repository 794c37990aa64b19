//! The segregated free-list index: 15 class heads, LIFO insert, O(1)
//! unlink for classes 1..14 and O(n) unlink for class 0.
//!
//! Class 0 (the `MIN_BLOCK` bucket) is singly linked — a 16-byte block has
//! room for exactly one 8-byte pointer in its payload, so there is no
//! `prev` slot and back-removal walks the list. Every other class is
//! doubly linked with `prev` at payload offset 0 and `next` at payload
//! offset `WSIZE`.

use crate::block::{self, BlockRef, WSIZE};
use crate::memsim::MemSim;

/// Number of size classes in the segregated index.
pub(crate) const NUM_CLASSES: usize = 15;

/// Exact-size buckets for classes 0..7: {16, 32, 48, 64, 80, 96, 112, 128}.
const EXACT_CLASSES: usize = 8;
const EXACT_MAX_SIZE: usize = 128;

/// Maps a block size to its free-list class.
///
/// Classes 0..7 are exact-size buckets for sizes up to 128 bytes
/// (`size / 16 - 1`). Classes 8..14 are power-of-two bands for larger
/// sizes: `8 + floor(log2(size / 32))`, saturating at the last class.
pub(crate) fn class_of(size: usize) -> usize {
  if size <= EXACT_MAX_SIZE {
    (size / block::DSIZE) - 1
  } else {
    let k = size / 32;
    let log2 = usize::BITS as usize - 1 - k.leading_zeros() as usize;
    (EXACT_CLASSES + log2).min(NUM_CLASSES - 1)
  }
}

fn prev_slot(block: BlockRef) -> usize {
  block::payload_of(block)
}

fn next_slot(block: BlockRef, class: usize) -> usize {
  if class == 0 {
    block::payload_of(block)
  } else {
    block::payload_of(block) + WSIZE
  }
}

fn read_link(sim: &impl MemSim, addr: usize) -> Option<usize> {
  let v = sim.read_u64(addr);
  if v == 0 { None } else { Some(v as usize) }
}

fn write_link(sim: &mut impl MemSim, addr: usize, value: Option<usize>) {
  sim.write_u64(addr, value.unwrap_or(0) as u64);
}

fn read_next(sim: &impl MemSim, block: BlockRef, class: usize) -> Option<usize> {
  read_link(sim, next_slot(block, class))
}

fn write_next(sim: &mut impl MemSim, block: BlockRef, class: usize, value: Option<usize>) {
  write_link(sim, next_slot(block, class), value);
}

fn read_prev(sim: &impl MemSim, block: BlockRef) -> Option<usize> {
  read_link(sim, prev_slot(block))
}

/// Exposes a doubly-linked-class node's recorded `prev` pointer to the
/// debug checker, which needs to verify it against the list's actual
/// traversal order rather than trust it blindly.
pub(crate) fn read_prev_for_checker(sim: &impl MemSim, block: BlockRef) -> Option<usize> {
  read_prev(sim, block)
}

fn write_prev(sim: &mut impl MemSim, block: BlockRef, value: Option<usize>) {
  write_link(sim, prev_slot(block), value);
}

pub(crate) type Heads = [Option<usize>; NUM_CLASSES];

pub(crate) fn new_heads() -> Heads {
  [None; NUM_CLASSES]
}

/// Walks `class`'s free list starting at its head, in LIFO (most recently
/// freed first) order.
pub(crate) fn iter(heads: &Heads, sim: &impl MemSim, class: usize) -> impl Iterator<Item = BlockRef> + '_ {
  let mut cur = heads[class];
  std::iter::from_fn(move || {
    let addr = cur?;
    let block = BlockRef(addr);
    cur = read_next(sim, block, class);
    Some(block)
  })
}

/// LIFO-inserts `block` (size `size`) at the head of its size class.
pub(crate) fn add_node(heads: &mut Heads, sim: &mut impl MemSim, block: BlockRef, size: usize) {
  let class = class_of(size);
  let old_head = heads[class];

  if class == 0 {
    write_next(sim, block, class, old_head);
  } else {
    write_prev(sim, block, None);
    write_next(sim, block, class, old_head);
    if let Some(head_addr) = old_head {
      write_prev(sim, BlockRef(head_addr), Some(block.0));
    }
  }
  heads[class] = Some(block.0);
}

/// Unlinks `block` (size `size`) from its size class, restoring its
/// neighbors' links and clearing `block`'s own pointers.
pub(crate) fn delete_node(heads: &mut Heads, sim: &mut impl MemSim, block: BlockRef, size: usize) {
  let class = class_of(size);

  if class == 0 {
    if heads[class] == Some(block.0) {
      heads[class] = read_next(sim, block, class);
    } else {
      let mut cur = heads[class];
      while let Some(addr) = cur {
        let node = BlockRef(addr);
        let next = read_next(sim, node, class);
        if next == Some(block.0) {
          let block_next = read_next(sim, block, class);
          write_next(sim, node, class, block_next);
          break;
        }
        cur = next;
      }
    }
    write_next(sim, block, class, None);
  } else {
    let prev = read_prev(sim, block);
    let next = read_next(sim, block, class);

    match prev {
      Some(p) => write_next(sim, BlockRef(p), class, next),
      None => heads[class] = next,
    }
    if let Some(n) = next {
      write_prev(sim, BlockRef(n), prev);
    }

    write_prev(sim, block, None);
    write_next(sim, block, class, None);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn class_of_exact_buckets() {
    assert_eq!(class_of(16), 0);
    assert_eq!(class_of(32), 1);
    assert_eq!(class_of(48), 2);
    assert_eq!(class_of(64), 3);
    assert_eq!(class_of(80), 4);
    assert_eq!(class_of(96), 5);
    assert_eq!(class_of(112), 6);
    assert_eq!(class_of(128), 7);
  }

  #[test]
  fn class_of_power_of_two_bands() {
    assert!(class_of(160) >= 8);
    assert!(class_of(160) <= 14);
    assert_eq!(class_of(usize::MAX / 2), 14, "must saturate at the last class");
  }

  #[test]
  fn class_of_is_monotonic_nondecreasing_for_class0_inputs() {
    // valid block sizes are multiples of 16; exact buckets should be
    // strictly increasing as size grows within the exact-bucket range.
    let sizes = [16, 32, 48, 64, 80, 96, 112, 128];
    for w in sizes.windows(2) {
      assert!(class_of(w[0]) < class_of(w[1]));
    }
  }
}
