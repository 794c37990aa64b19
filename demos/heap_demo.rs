//! Interactive walkthrough of `Heap`'s allocation/free/coalesce behavior,
//! backed by the real process break via `SbrkMemSim`.
//!
//! Run with `cargo run --example heap_demo` (unix only) to see a sequence
//! of allocations, a free that triggers coalescing, and a consistency
//! check printed at each step.

#[cfg(unix)]
fn main() {
  env_logger::init();

  use seg_allocator::{Heap, SbrkMemSim};

  let mut heap = Heap::new(SbrkMemSim::new());
  heap.init();
  println!("heap initialized");
  assert!(heap.check_heap());

  let a = heap.malloc(64).expect("malloc(64) failed");
  println!("a = malloc(64)  -> {a:#x}");

  let b = heap.malloc(128).expect("malloc(128) failed");
  println!("b = malloc(128) -> {b:#x}");

  let c = heap.malloc(32).expect("malloc(32) failed");
  println!("c = malloc(32)  -> {c:#x}");

  assert!(heap.check_heap());
  println!("heap consistent after three allocations");

  heap.free(Some(b));
  println!("free(b)");
  assert!(heap.check_heap());

  let d = heap.malloc(100).expect("malloc(100) failed");
  println!("d = malloc(100) -> {d:#x} (should reuse b's freed space)");
  assert!(heap.check_heap());

  let e = heap.realloc(Some(a), 256).expect("realloc(a, 256) failed");
  println!("e = realloc(a, 256) -> {e:#x}");
  assert!(heap.check_heap());

  heap.free(Some(c));
  heap.free(Some(d));
  heap.free(Some(e));
  println!("freed everything");
  assert!(heap.check_heap());

  println!("done");
}

#[cfg(not(unix))]
fn main() {
  eprintln!("heap_demo requires a unix target (SbrkMemSim uses libc::sbrk)");
}
