//! The debug-mode consistency checker.
//!
//! Two passes: a list-level pass that walks every size class and checks
//! each node's placement and linkage, and a heap-level pass that walks the
//! physical block chain from the prologue to the epilogue checking the
//! remaining invariants (sentinel shape, header/footer agreement, no two
//! adjacent free blocks, PREV_ALLOC/PREV_MIN correctness, payload bounds).
//!
//! Not wired into `malloc`/`free` themselves — call `Heap::check_heap`
//! from a test or a debug build's assertions; it is an opt-in diagnostic,
//! not part of the hot allocation/free path.

use log::error;

use crate::block::{self, BlockRef, MIN_BLOCK, WSIZE};
use crate::heap::Heap;
use crate::memsim::MemSim;
use crate::seglist::{self, NUM_CLASSES};

/// Runs every invariant check against `heap`. Returns `false` (after
/// logging the specific violation via `log::error!`) on the first
/// failure found; `true` if the heap is fully consistent.
pub(crate) fn check_heap<M: MemSim>(heap: &Heap<M>) -> bool {
  let Some(heap_start) = heap.heap_start() else {
    // Never initialized: vacuously consistent.
    return true;
  };

  check_lists(heap) && check_heap_walk(heap, heap_start)
}

fn check_lists<M: MemSim>(heap: &Heap<M>) -> bool {
  let sim = heap.sim();
  let heads = heap.heads();

  for class in 0..NUM_CLASSES {
    if !list_is_acyclic(heads, sim, class) {
      error!("checker: free list {class} contains a cycle");
      return false;
    }
    if !back_pointers_agree(heads, sim, class) {
      error!("checker: free list {class} has an inconsistent prev/next back-pointer");
      return false;
    }

    for block in seglist::iter(heads, sim, class) {
      let word = sim.read_u64(block.0);
      if block::extract_alloc(word) {
        error!("checker: allocated block {:#x} found in free list {class}", block.0);
        return false;
      }
      let size = block::extract_size(word);
      if seglist::class_of(size) != class {
        error!(
          "checker: block {:#x} of size {size} lives in class {class}, expected {}",
          block.0,
          seglist::class_of(size)
        );
        return false;
      }
      if size > MIN_BLOCK {
        let footer = sim.read_u64(block.0 + size - WSIZE);
        if footer != word {
          error!("checker: header/footer mismatch for free block {:#x}", block.0);
          return false;
        }
      }
      if block.0 < heap.heap_start().unwrap() {
        error!("checker: free block {:#x} lies before the heap start", block.0);
        return false;
      }
    }
  }
  true
}

/// Tortoise-and-hare cycle detection over a size class's `next` chain.
fn list_is_acyclic<M: MemSim>(heads: &seglist::Heads, sim: &M, class: usize) -> bool {
  let mut slow = seglist::iter(heads, sim, class);
  let mut fast = seglist::iter(heads, sim, class);

  loop {
    let Some(s) = slow.next() else { return true };
    let Some(_) = fast.next() else { return true };
    let Some(f) = fast.next() else { return true };
    if s == f {
      return false;
    }
  }
}

/// For doubly-linked classes (1..14), every node's `next.prev` must point
/// back to the node itself (class 0 has no `prev` slot to check).
fn back_pointers_agree<M: MemSim>(heads: &seglist::Heads, sim: &M, class: usize) -> bool {
  if class == 0 {
    return true;
  }
  let mut prev: Option<block::BlockRef> = None;
  for block in seglist::iter(heads, sim, class) {
    let recorded_prev = seglist::read_prev_for_checker(sim, block);
    if recorded_prev != prev.map(|b| b.0) {
      return false;
    }
    prev = Some(block);
  }
  true
}

fn check_heap_walk<M: MemSim>(heap: &Heap<M>, heap_start: usize) -> bool {
  let sim = heap.sim();

  let prologue_word = sim.read_u64(heap_start - WSIZE);
  if block::extract_size(prologue_word) != 0 || !block::extract_alloc(prologue_word) {
    error!("checker: prologue sentinel is malformed");
    return false;
  }

  let mut block = BlockRef(heap_start);
  let mut prev_was_free = false;

  loop {
    let word = sim.read_u64(block.0);
    let size = block::extract_size(word);
    let alloc = block::extract_alloc(word);

    if size == 0 {
      if !alloc {
        error!("checker: epilogue at {:#x} is not marked allocated", block.0);
        return false;
      }
      break;
    }

    if size < MIN_BLOCK || size % block::DSIZE != 0 {
      error!("checker: block {:#x} has invalid size {size}", block.0);
      return false;
    }

    let payload_end = block.0 + size;
    if payload_end > sim.heap_hi() {
      error!("checker: block {:#x} payload runs past the heap's high watermark", block.0);
      return false;
    }

    if !alloc {
      if prev_was_free {
        error!("checker: two adjacent free blocks at/around {:#x}", block.0);
        return false;
      }
      if size > MIN_BLOCK {
        let footer = sim.read_u64(block.0 + size - WSIZE);
        if footer != word {
          error!("checker: header/footer mismatch for free block {:#x}", block.0);
          return false;
        }
      }
    }

    let expected_prev_min = size == MIN_BLOCK;
    let next = BlockRef(block.0 + size);
    let next_word = sim.read_u64(next.0);
    if block::extract_prev_alloc(next_word) != alloc {
      error!("checker: PREV_ALLOC mismatch at successor of {:#x}", block.0);
      return false;
    }
    if block::extract_prev_min(next_word) != expected_prev_min {
      error!("checker: PREV_MIN mismatch at successor of {:#x}", block.0);
      return false;
    }

    prev_was_free = !alloc;
    block = next;
  }

  true
}

#[cfg(test)]
mod tests {
  use crate::heap::Heap;
  use crate::memsim::VecMemSim;

  #[test]
  fn passes_on_a_freshly_initialized_heap() {
    let mut heap = Heap::new(VecMemSim::new(0));
    assert!(heap.init());
    assert!(heap.check_heap());
  }

  #[test]
  fn passes_after_ordinary_allocation_traffic() {
    let mut heap = Heap::new(VecMemSim::new(0));
    let a = heap.malloc(48).unwrap();
    let b = heap.malloc(48).unwrap();
    heap.free(Some(a));
    let _ = b;
    assert!(heap.check_heap());
  }

  #[test]
  fn flags_a_corrupted_epilogue() {
    use crate::memsim::MemSim;

    let mut heap = Heap::new(VecMemSim::new(0));
    heap.init();
    assert!(heap.check_heap());

    // Directly corrupt the epilogue sentinel: clear its ALLOC bit,
    // which should never happen through the public API.
    let hi = heap.sim().heap_hi();
    let epilogue_addr = hi - crate::block::WSIZE;
    let word = heap.sim().read_u64(epilogue_addr);
    heap.sim_mut().write_u64(epilogue_addr, word & !0x1);

    assert!(!heap.check_heap(), "checker must reject a non-allocated epilogue");
  }

  #[test]
  fn flags_a_cycle_in_a_free_list() {
    use crate::block;
    use crate::memsim::MemSim;

    let mut heap = Heap::new(VecMemSim::new(0));
    // a and b share an exact-size class (64 bytes); keep1/keep2 sit
    // between them physically so freeing a and b does not coalesce
    // them into a single block.
    let a = heap.malloc(64).unwrap();
    let _keep1 = heap.malloc(64).unwrap();
    let b = heap.malloc(64).unwrap();
    let _keep2 = heap.malloc(64).unwrap();
    heap.free(Some(a));
    heap.free(Some(b));
    assert!(heap.check_heap());

    // List order after two LIFO inserts: head = b, b.next = a,
    // a.next = None. Rewrite a's `next` back to b to form a cycle.
    let a_block = block::header_of(a);
    let b_block = block::header_of(b);
    let a_next_slot = block::payload_of(a_block) + block::WSIZE;
    heap.sim_mut().write_u64(a_next_slot, b_block.0 as u64);

    assert!(!heap.check_heap(), "checker must reject a cyclic free list");
  }

  #[test]
  fn flags_a_bad_back_pointer() {
    use crate::block;
    use crate::memsim::MemSim;

    let mut heap = Heap::new(VecMemSim::new(0));
    let a = heap.malloc(64).unwrap();
    let _keep1 = heap.malloc(64).unwrap();
    let b = heap.malloc(64).unwrap();
    let _keep2 = heap.malloc(64).unwrap();
    heap.free(Some(a));
    heap.free(Some(b));
    assert!(heap.check_heap());

    // a is not the list head, so its recorded `prev` must equal b's
    // address. Corrupt it to point somewhere else.
    let a_block = block::header_of(a);
    let a_prev_slot = block::payload_of(a_block);
    heap.sim_mut().write_u64(a_prev_slot, 0xDEAD_0000);

    assert!(!heap.check_heap(), "checker must reject a bad back-pointer");
  }
}
