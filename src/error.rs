//! Internal error type used between the heap core and the memory
//! simulator. Never surfaced to callers of the public `malloc`/`free`/
//! `realloc`/`calloc` surface, which always return a plain null on
//! failure; this exists for internal helpers and `log::warn!` call sites.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
  /// The backing `MemSim` refused to grow the heap further.
  OutOfMemory,
}

impl fmt::Display for AllocError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AllocError::OutOfMemory => write!(f, "heap exhausted: backing store refused to extend"),
    }
  }
}

impl std::error::Error for AllocError {}
