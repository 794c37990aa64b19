//! A `std::alloc::GlobalAlloc` adapter wrapping [`Heap`] behind a mutex,
//! so the segregated-fit core can back the process allocator in a binary
//! that wants to dogfood it (see `demos/heap_demo.rs`).
//!
//! This module is ambient scaffolding, not part of the allocator core
//! itself — the core is deliberately synchronous and single-threaded, and
//! this is the thinnest possible bridge from that model to `GlobalAlloc`'s
//! callback contract. It is built on
//! [`SbrkMemSim`], never [`crate::memsim::VecMemSim`]: a `VecMemSim`
//! payload address is an index into a private `Vec<u8>`, not real process
//! memory, so it cannot back a real `GlobalAlloc` — only `sbrk`-backed
//! addresses are safe to hand back to arbitrary callers as raw pointers.

use std::alloc::{GlobalAlloc, Layout};
use std::sync::Mutex;

use crate::heap::Heap;
use crate::memsim::SbrkMemSim;

/// A process-wide allocator backed by a [`Heap<SbrkMemSim>`] behind a
/// [`Mutex`]. Only one `GlobalHeap` (or other `sbrk` consumer) may be
/// active in a process at a time, since the OS program break is shared,
/// global state.
pub struct GlobalHeap {
  inner: Mutex<Option<Heap<SbrkMemSim>>>,
}

impl GlobalHeap {
  /// Constructs a `GlobalHeap`. The inner heap is built lazily on first
  /// allocation, since `Mutex::new` must be usable in a `const` context
  /// for `#[global_allocator]` statics.
  pub const fn new() -> Self {
    Self {
      inner: Mutex::new(None),
    }
  }
}

impl Default for GlobalHeap {
  fn default() -> Self {
    Self::new()
  }
}

unsafe impl GlobalAlloc for GlobalHeap {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    let heap = guard.get_or_insert_with(|| Heap::new(SbrkMemSim::new()));
    match heap.malloc(layout.size()) {
      Some(addr) => addr as *mut u8,
      None => std::ptr::null_mut(),
    }
  }

  unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
    let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    if let Some(heap) = guard.as_mut() {
      heap.free(Some(ptr as usize));
    }
  }

  unsafe fn realloc(&self, ptr: *mut u8, _layout: Layout, new_size: usize) -> *mut u8 {
    let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
    let heap = guard.get_or_insert_with(|| Heap::new(SbrkMemSim::new()));
    match heap.realloc(Some(ptr as usize), new_size) {
      Some(addr) => addr as *mut u8,
      None => std::ptr::null_mut(),
    }
  }
}
