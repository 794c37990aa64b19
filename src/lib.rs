//! # seg-allocator - A Segregated Free-List Memory Allocator
//!
//! This crate provides the core of a single-threaded, boundary-tag,
//! segregated-fit allocator over a single contiguous, monotonically
//! growing heap region.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────┬──────┬──────┬──────┬─────────────┬──────┬──────┬──────────┐
//!   │ prologue │ blk  │ blk  │ blk  │     ...     │ blk  │ blk  │ epilogue │
//!   └──────────┴──────┴──────┴──────┴─────────────┴──────┴──────┴──────────┘
//!   ▲                                                                      ▲
//!   heap_lo()                                                      heap_hi()
//!
//!   Each block:
//!   ┌────────┬──────────────────────────────────────┬─────────┐
//!   │ header │              payload                 │ footer? │
//!   │ 8 byte │                                       │ 8 byte  │
//!   └────────┴──────────────────────────────────────┴─────────┘
//!   size (60 bits) | PREV_MIN | PREV_ALLOC | ALLOC
//! ```
//!
//! The footer is present only on free blocks larger than the minimum
//! block size; an allocated block or a minimum-size free block elides it,
//! recoverable instead from the successor block's PREV_MIN tag bit.
//!
//! ## Crate Structure
//!
//! ```text
//!   seg_allocator
//!   ├── align    - Alignment macros (align!, align_to!)
//!   ├── block    - Block layout, header/footer codec (internal)
//!   ├── seglist  - Segregated free-list index (internal)
//!   ├── memsim   - The backing-store contract (MemSim, VecMemSim, SbrkMemSim)
//!   ├── heap     - Heap<M>: init/malloc/free/realloc/calloc, the allocation
//!   │              policy, and the immediate coalescer
//!   ├── checker  - Debug-mode consistency checker
//!   └── global   - A std::alloc::GlobalAlloc adapter (unix only)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use seg_allocator::{Heap, VecMemSim};
//!
//! let mut heap = Heap::new(VecMemSim::new(0x1000));
//! let ptr = heap.malloc(64).expect("allocation failed");
//! heap.free(Some(ptr));
//! ```
//!
//! ## Allocation policy
//!
//! Requests that map to one of the eight exact-size classes (16 through
//! 128 bytes) are served by strict first-fit, searched only within that
//! class and the ones immediately above it up to the exact/power-of-two
//! boundary. Larger requests get a bounded better-fit search across the
//! power-of-two bands: an exact match returns immediately, otherwise the
//! search tracks up to a handful of candidates per class before moving on,
//! trading a little search time for a tighter fit than plain first-fit.
//!
//! ## Safety
//!
//! The allocator core itself contains no `unsafe` code: every byte access
//! is routed through the [`MemSim`] trait, whose implementations
//! ([`VecMemSim`], [`SbrkMemSim`]) are the only places raw memory is
//! touched. [`GlobalHeap`] is the one place a caller hands this crate a
//! real, dereferenceable pointer, and it is built on `SbrkMemSim`
//! specifically because a `VecMemSim` payload address is not real memory.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: `Heap` carries no internal synchronization;
//!   [`GlobalHeap`] adds a mutex for multi-threaded use.
//! - **No return to the OS**: freed memory is recycled within the heap,
//!   never released back to the backing store.
//! - **No realloc-in-place**: `realloc` always allocates fresh and copies,
//!   even when the existing block could be grown or shrunk in place.

pub mod align;
mod block;
mod checker;
mod error;
#[cfg(unix)]
mod global;
mod heap;
mod memsim;
mod seglist;

pub use error::AllocError;
#[cfg(unix)]
pub use global::GlobalHeap;
pub use heap::Heap;
pub use memsim::MemSim;
#[cfg(unix)]
pub use memsim::SbrkMemSim;
pub use memsim::VecMemSim;
