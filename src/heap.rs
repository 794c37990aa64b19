//! Public entry points: `init`, `malloc`, `free`, `realloc`, `calloc`, plus
//! the allocation policy (`find_fit`, `split_block`) and the coalescer
//! that back them.
//!
//! `Heap<M>` owns all of the allocator's mutable state (the seg-list head
//! array and the heap-start address) as ordinary struct fields rather
//! than module-level statics — callers construct one `Heap` per backing
//! store instead of relying on a single implicit global allocator
//! instance.

use log::{trace, warn};

use crate::block::{self, BlockRef, CHUNK, DSIZE, MIN_BLOCK, WSIZE};
use crate::checker;
use crate::error::AllocError;
use crate::memsim::MemSim;
use crate::seglist::{self, Heads};

/// How many strictly-smaller fits `find_fit`'s better-fit search will track
/// per size class before giving up refinement within that class.
const BETTER_FIT_ATTEMPTS: usize = 5;

/// The segregated-fit allocator core.
///
/// Not `Sync`: this core is single-threaded and synchronous by design,
/// so no internal locking is provided. Wrap a `Heap` in a `Mutex` (as
/// [`crate::global::GlobalHeap`] does) if it must be shared across
/// threads.
pub struct Heap<M: MemSim> {
  sim: M,
  heads: Heads,
  /// Address of the first real block (just past the prologue), once
  /// `init` has run.
  heap_start: Option<usize>,
}

impl<M: MemSim> Heap<M> {
  /// Constructs an allocator over `sim`. The heap is not usable until
  /// [`Heap::init`] runs (which `malloc`/`calloc` do lazily on first use).
  pub fn new(sim: M) -> Self {
    Self {
      sim,
      heads: seglist::new_heads(),
      heap_start: None,
    }
  }

  /// True once `init` has successfully run.
  pub fn is_initialized(&self) -> bool {
    self.heap_start.is_some()
  }

  /// Writes the prologue and epilogue sentinels, clears the seg-list
  /// array, and extends the heap by one `CHUNK`. Idempotent: calling it
  /// again on an already-initialized heap is a no-op that returns `true`.
  pub fn init(&mut self) -> bool {
    if self.heap_start.is_some() {
      return true;
    }
    self.try_init().is_ok()
  }

  fn try_init(&mut self) -> Result<(), AllocError> {
    let base = self.sim.extend(2 * WSIZE).ok_or(AllocError::OutOfMemory)?;

    // Prologue: a zero-sized allocated sentinel with no real predecessor.
    self.sim.write_u64(base, block::pack(0, true, true, false));

    let epilogue_addr = base + WSIZE;
    self.sim.write_u64(epilogue_addr, block::pack(0, true, true, false));

    self.heads = seglist::new_heads();
    self.heap_start = Some(epilogue_addr);

    self.extend_heap(CHUNK).ok_or(AllocError::OutOfMemory)?;
    Ok(())
  }

  /// Grows the heap by at least `size` bytes (rounded up to `DSIZE`),
  /// installs a new free block there, coalesces it with the previous
  /// physical block if that one was free, and returns the resulting
  /// block. Returns `None` on backing-store exhaustion, leaving the heap
  /// untouched.
  fn extend_heap(&mut self, size: usize) -> Option<BlockRef> {
    let size = round_up(size, DSIZE);
    let old_hi = match self.sim.extend(size) {
      Some(addr) => addr,
      None => {
        warn!("heap exhausted: extend({size}) failed");
        return None;
      }
    };

    let block = BlockRef(old_hi - WSIZE);
    block::write_new_free_block(&mut self.sim, block, size);

    let next = BlockRef(block.0 + size);
    block::write_epilogue(&mut self.sim, next, false, size == MIN_BLOCK);

    trace!("extend_heap: new free block at {:#x}, size {size}", block.0);
    Some(self.coalesce_block(block))
  }

  /// Merges a freshly-freed block (marked FREE, not yet in any list)
  /// with any free physical neighbors, adds the surviving block to its
  /// free list, and returns it.
  fn coalesce_block(&mut self, block: BlockRef) -> BlockRef {
    let header = self.sim.read_u64(block.0);
    let size = block::extract_size(header);

    let prev_free = if !block::extract_prev_alloc(header) {
      Some(block::find_prev(block, &self.sim))
    } else {
      None
    };
    let next = block::find_next(block, &self.sim);
    let next_free = if !block::extract_alloc(self.sim.read_u64(next.0)) {
      Some(next)
    } else {
      None
    };

    let result = match (prev_free, next_free) {
      (None, None) => {
        trace!("coalesce: case 1 (no free neighbors) at {:#x}", block.0);
        block
      }
      (None, Some(n)) => {
        trace!("coalesce: case 2 (merge next) at {:#x}", block.0);
        let n_size = block::extract_size(self.sim.read_u64(n.0));
        seglist::delete_node(&mut self.heads, &mut self.sim, n, n_size);
        block::write_block(&mut self.sim, block, size + n_size, false);
        block
      }
      (Some(p), None) => {
        trace!("coalesce: case 3 (merge prev) at {:#x}", block.0);
        let p_size = block::extract_size(self.sim.read_u64(p.0));
        seglist::delete_node(&mut self.heads, &mut self.sim, p, p_size);
        block::write_block(&mut self.sim, p, p_size + size, false);
        p
      }
      (Some(p), Some(n)) => {
        trace!("coalesce: case 4 (merge both) at {:#x}", block.0);
        let p_size = block::extract_size(self.sim.read_u64(p.0));
        let n_size = block::extract_size(self.sim.read_u64(n.0));
        seglist::delete_node(&mut self.heads, &mut self.sim, p, p_size);
        seglist::delete_node(&mut self.heads, &mut self.sim, n, n_size);
        block::write_block(&mut self.sim, p, p_size + size + n_size, false);
        p
      }
    };

    let result_size = block::extract_size(self.sim.read_u64(result.0));
    seglist::add_node(&mut self.heads, &mut self.sim, result, result_size);
    result
  }

  /// Searches the segregated index for a free block of at least `asize`
  /// bytes. Classes 0..4 use strict first-fit across classes
  /// `class_of(asize)..=4`; classes 5..14 use a bounded better-fit search
  /// across `class_of(asize)..NUM_CLASSES`, returning an exact match
  /// immediately and otherwise the smallest fit found within at most
  /// `BETTER_FIT_ATTEMPTS` improvements per class.
  fn find_fit(&self, asize: usize) -> Option<BlockRef> {
    let start = seglist::class_of(asize);

    if start <= 4 {
      for class in start..=4 {
        for block in seglist::iter(&self.heads, &self.sim, class) {
          let size = block::extract_size(self.sim.read_u64(block.0));
          if size >= asize {
            return Some(block);
          }
        }
      }
      return None;
    }

    let mut best: Option<(BlockRef, usize)> = None;
    for class in start..seglist::NUM_CLASSES {
      let mut attempts = 0;
      for block in seglist::iter(&self.heads, &self.sim, class) {
        let size = block::extract_size(self.sim.read_u64(block.0));
        if size < asize {
          continue;
        }
        if size == asize {
          return Some(block);
        }
        let is_improvement = match best {
          Some((_, best_size)) => size < best_size,
          None => true,
        };
        if is_improvement {
          best = Some((block, size));
        }
        attempts += 1;
        if attempts >= BETTER_FIT_ATTEMPTS {
          break;
        }
      }
    }
    best.map(|(block, _)| block)
  }

  /// Splits an allocated block if its tail is large enough to form a
  /// free block of its own; otherwise the internal fragmentation is
  /// absorbed into the allocation.
  fn split_block(&mut self, block: BlockRef, asize: usize) {
    let size = block::extract_size(self.sim.read_u64(block.0));
    if size - asize < MIN_BLOCK {
      return;
    }

    let tail = BlockRef(block.0 + asize);
    let tail_size = size - asize;

    // Write the tail first: its propagate-forward step reaches the
    // block's real, already-valid successor. Then shrink `block`,
    // whose propagate-forward corrects the tail's PREV_ALLOC/PREV_MIN.
    block::write_block(&mut self.sim, tail, tail_size, false);
    seglist::add_node(&mut self.heads, &mut self.sim, tail, tail_size);
    block::write_block(&mut self.sim, block, asize, true);
  }

  /// Allocates `size` bytes, returning a 16-byte-aligned payload address,
  /// or `None` if `size == 0` or the heap could not be extended.
  pub fn malloc(&mut self, size: usize) -> Option<usize> {
    if !self.is_initialized() && !self.init() {
      return None;
    }
    if size == 0 {
      return None;
    }

    let asize = round_up(size + WSIZE, DSIZE).max(MIN_BLOCK);

    let block = match self.find_fit(asize) {
      Some(block) => block,
      None => self.extend_heap(asize.max(CHUNK))?,
    };

    let block_size = block::extract_size(self.sim.read_u64(block.0));
    block::write_block(&mut self.sim, block, block_size, true);
    seglist::delete_node(&mut self.heads, &mut self.sim, block, block_size);

    self.split_block(block, asize);

    Some(block::payload_of(block))
  }

  /// Frees a payload address previously returned by `malloc`/`realloc`/
  /// `calloc`. A no-op on `None`.
  pub fn free(&mut self, ptr: Option<usize>) {
    let Some(payload_addr) = ptr else {
      return;
    };
    let block = block::header_of(payload_addr);
    let size = block::extract_size(self.sim.read_u64(block.0));

    block::write_block(&mut self.sim, block, size, false);
    self.coalesce_block(block);
  }

  /// `ptr = None` behaves like `malloc(size)`. `size == 0` behaves like
  /// `free(ptr)` and returns `None`. Otherwise allocates a new block,
  /// copies `min(old payload size, size)` bytes, frees the old block,
  /// and returns the new payload address (or `None`, leaving the old
  /// block untouched, if the new allocation failed).
  pub fn realloc(&mut self, ptr: Option<usize>, size: usize) -> Option<usize> {
    if size == 0 {
      self.free(ptr);
      return None;
    }
    let Some(payload_addr) = ptr else {
      return self.malloc(size);
    };

    let new_payload = self.malloc(size)?;

    let old_block = block::header_of(payload_addr);
    let old_block_size = block::extract_size(self.sim.read_u64(old_block.0));
    let old_payload_size = old_block_size - WSIZE;
    let copy_len = old_payload_size.min(size);

    let mut buf = vec![0u8; copy_len];
    self.sim.read_bytes(payload_addr, &mut buf);
    self.sim.write_bytes(new_payload, &buf);

    self.free(Some(payload_addr));
    Some(new_payload)
  }

  /// Allocates space for `n` elements of `elem_size` bytes each,
  /// zero-initialized. Returns `None` on overflow, `n == 0`, or
  /// allocation failure.
  pub fn calloc(&mut self, n: usize, elem_size: usize) -> Option<usize> {
    if n == 0 {
      return None;
    }
    let total = n.checked_mul(elem_size)?;
    let ptr = self.malloc(total)?;
    self.sim.memset(ptr, 0, total);
    Some(ptr)
  }

  /// Runs the internal consistency checker. Intended for debug-mode
  /// entry hooks; has no effect on allocator behavior.
  pub fn check_heap(&self) -> bool {
    checker::check_heap(self)
  }

  pub(crate) fn sim(&self) -> &M {
    &self.sim
  }

  /// Mutable access to the backing store, for tests that need to poke
  /// a deliberately invalid byte pattern in to exercise the checker.
  #[cfg(test)]
  pub(crate) fn sim_mut(&mut self) -> &mut M {
    &mut self.sim
  }

  pub(crate) fn heads(&self) -> &Heads {
    &self.heads
  }

  pub(crate) fn heap_start(&self) -> Option<usize> {
    self.heap_start
  }
}

/// Rounds `size` up to the next multiple of `n` (a power of two).
fn round_up(size: usize, n: usize) -> usize {
  crate::align_to!(size, n)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::memsim::VecMemSim;

  fn new_heap() -> Heap<VecMemSim> {
    Heap::new(VecMemSim::new(0x1_0000))
  }

  #[test]
  fn round_up_matches_spec_rounding() {
    assert_eq!(round_up(1, 16), 16);
    assert_eq!(round_up(16, 16), 16);
    assert_eq!(round_up(17, 16), 32);
  }

  #[test]
  fn init_is_idempotent() {
    let mut heap = new_heap();
    assert!(heap.init());
    assert!(heap.init());
    assert!(heap.check_heap());
  }

  #[test]
  fn malloc_zero_returns_none() {
    let mut heap = new_heap();
    assert!(heap.malloc(0).is_none());
  }

  #[test]
  fn malloc_returns_aligned_in_bounds_pointer() {
    let mut heap = new_heap();
    let p = heap.malloc(100).unwrap();
    assert_eq!(p % DSIZE, 0);
    assert!(p >= heap.sim().heap_lo() && p < heap.sim().heap_hi());
    assert!(heap.check_heap());
  }

  #[test]
  fn live_allocations_do_not_overlap() {
    let mut heap = new_heap();
    let a = heap.malloc(64).unwrap();
    let b = heap.malloc(64).unwrap();
    let c = heap.malloc(64).unwrap();

    let mut addrs = [a, b, c];
    addrs.sort_unstable();
    assert!(addrs[0] + 64 <= addrs[1]);
    assert!(addrs[1] + 64 <= addrs[2]);
    assert!(heap.check_heap());
  }

  #[test]
  fn free_null_is_noop() {
    let mut heap = new_heap();
    heap.free(None);
    assert!(heap.check_heap());
  }

  #[test]
  fn realloc_null_behaves_like_malloc() {
    let mut heap = new_heap();
    let p = heap.realloc(None, 64);
    assert!(p.is_some());
    assert!(heap.check_heap());
  }

  #[test]
  fn realloc_zero_frees_and_returns_none() {
    let mut heap = new_heap();
    let p = heap.malloc(64).unwrap();
    assert!(heap.realloc(Some(p), 0).is_none());
    assert!(heap.check_heap());
  }

  #[test]
  fn realloc_preserves_data() {
    let mut heap = new_heap();
    let p = heap.malloc(100).unwrap();
    let mut original = [0u8; 100];
    for (i, b) in original.iter_mut().enumerate() {
      *b = (i % 256) as u8;
    }
    heap.sim.write_bytes(p, &original);

    let q = heap.realloc(Some(p), 200).unwrap();
    let mut copied = [0u8; 100];
    heap.sim().read_bytes(q, &mut copied);
    assert_eq!(copied, original);
    assert!(heap.check_heap());
  }

  #[test]
  fn calloc_zeroes_memory_and_checks_overflow() {
    let mut heap = new_heap();
    assert!(heap.calloc(usize::MAX, 2).is_none());

    let p = heap.calloc(8, 16).unwrap();
    let mut buf = [0xFFu8; 128];
    heap.sim().read_bytes(p, &mut buf);
    assert_eq!(buf, [0u8; 128]);
    assert!(heap.check_heap());
  }

  #[test]
  fn calloc_zero_elements_returns_none() {
    let mut heap = new_heap();
    assert!(heap.calloc(0, 16).is_none());
  }

  #[test]
  fn minimum_allocation_rounds_to_min_block() {
    let mut heap = new_heap();
    let p = heap.malloc(1).unwrap();
    let block = block::header_of(p);
    let size = block::extract_size(heap.sim().read_u64(block.0));
    assert_eq!(size, MIN_BLOCK);
    assert!(heap.check_heap());
  }

  #[test]
  fn freeing_a_min_block_lists_it_on_class_zero() {
    let mut heap = new_heap();
    let p = heap.malloc(1).unwrap();
    let block = block::header_of(p);
    heap.free(Some(p));

    assert_eq!(heap.heads[0], Some(block.0));
    let next = block::find_next(block, heap.sim());
    let next_word = heap.sim().read_u64(next.0);
    assert!(block::extract_prev_min(next_word));
    assert!(heap.check_heap());
  }

  #[test]
  fn split_then_coalesce_merges_back_to_one_free_region() {
    let mut heap = new_heap();
    let a = heap.malloc(64).unwrap();
    let b = heap.malloc(64).unwrap();
    let c = heap.malloc(64).unwrap();

    heap.free(Some(b));
    let b_block = block::header_of(b);
    let b_word = heap.sim().read_u64(b_block.0);
    assert!(!block::extract_alloc(b_word));
    assert!(block::extract_size(b_word) >= 64 + WSIZE);
    assert!(heap.check_heap());

    heap.free(Some(a));
    let a_block = block::header_of(a);
    let a_word = heap.sim().read_u64(a_block.0);
    assert!(!block::extract_alloc(a_word), "a should have merged with the freed b region");
    assert!(heap.check_heap());

    heap.free(Some(c));
    assert!(heap.check_heap());

    // walk from a's block to the epilogue: it must now be a single
    // free region with nothing allocated in between.
    let mut cur = a_block;
    let mut free_blocks = 0;
    loop {
      let word = heap.sim().read_u64(cur.0);
      let size = block::extract_size(word);
      if size == 0 {
        break;
      }
      assert!(!block::extract_alloc(word), "expected a fully merged free region");
      free_blocks += 1;
      cur = block::find_next(cur, heap.sim());
    }
    assert_eq!(free_blocks, 1);
  }

  #[test]
  fn find_fit_prefers_exact_match_over_larger_candidates() {
    let mut heap = new_heap();
    let a = heap.malloc(88).unwrap(); // asize 96 -> class 5 (better-fit search)
    let keep = heap.malloc(32).unwrap(); // separator: keeps a and b from coalescing
    let b = heap.malloc(400).unwrap(); // asize 416 -> a higher power-of-two band

    heap.free(Some(a));
    heap.free(Some(b));

    let reused = heap.malloc(88).unwrap();
    assert_eq!(reused, a, "an exact-size candidate must win over a larger one");
    assert!(heap.check_heap());
    let _ = keep;
  }

  #[test]
  fn heap_exhaustion_leaves_prior_allocations_intact() {
    let mut heap = Heap::new(VecMemSim::with_cap(0, 16 * 1024));
    let mut live = Vec::new();
    loop {
      match heap.malloc(256) {
        Some(p) => live.push(p),
        None => break,
      }
    }
    assert!(!live.is_empty());
    assert!(heap.check_heap());
    // touch every live block to ensure nothing was corrupted by the
    // failing allocation attempt.
    for &p in &live {
      heap.sim.write_bytes(p, &[0x5A; 8]);
    }
  }
}
