//! The memory-simulator contract the allocator core consumes: a thin
//! interface over a `sbrk`-style heap backend (`extend`, `heap_lo`,
//! `heap_hi`, plus raw word/byte access). [`VecMemSim`] backs it with a
//! growable buffer that can be capped and reset between test cases —
//! something a real `sbrk` cannot do, since the process's program break
//! is global, shared process-wide state. [`SbrkMemSim`] backs it with
//! the real OS program break instead, for callers that do want a real
//! OS-backed heap.

use std::convert::TryInto;

/// The thin interface the allocator core requires of its backing heap
/// region: an extend-only growth operation, extent queries, and raw word
/// and byte access.
pub trait MemSim {
  /// Grows the heap by `n` bytes (`n` must be a positive multiple of
  /// `DSIZE`). Returns the old `heap_hi()` — the address of the first
  /// newly available byte — or `None` on exhaustion. Must never mutate
  /// existing bytes on failure.
  fn extend(&mut self, n: usize) -> Option<usize>;

  /// The lowest valid heap address (the prologue's address, once
  /// initialized).
  fn heap_lo(&self) -> usize;

  /// One past the highest valid heap address.
  fn heap_hi(&self) -> usize;

  fn read_u64(&self, addr: usize) -> u64;
  fn write_u64(&mut self, addr: usize, value: u64);

  fn read_bytes(&self, addr: usize, out: &mut [u8]);
  fn write_bytes(&mut self, addr: usize, data: &[u8]);

  /// Sets `len` bytes starting at `addr` to `byte` (used by `calloc`'s
  /// zero-fill and by tests that poison memory).
  fn memset(&mut self, addr: usize, byte: u8, len: usize);
}

/// A [`MemSim`] backed by a `Vec<u8>`, optionally capped to a maximum size
/// so heap-exhaustion behavior can be exercised deterministically.
pub struct VecMemSim {
  buf: Vec<u8>,
  base: usize,
  cap: Option<usize>,
}

impl VecMemSim {
  /// Creates an uncapped simulator whose addresses start at `base`.
  ///
  /// `base` is purely cosmetic — it lets addresses in logs and debugger
  /// output look like real pointers rather than small offsets — and is
  /// not required to be page-aligned.
  pub fn new(base: usize) -> Self {
    Self {
      buf: Vec::new(),
      base,
      cap: None,
    }
  }

  /// Creates a simulator capped at `cap` total bytes; `extend` fails once
  /// the cap would be exceeded.
  pub fn with_cap(base: usize, cap: usize) -> Self {
    Self {
      buf: Vec::new(),
      base,
      cap: Some(cap),
    }
  }

  fn index(&self, addr: usize) -> usize {
    addr - self.base
  }
}

impl MemSim for VecMemSim {
  fn extend(&mut self, n: usize) -> Option<usize> {
    if let Some(cap) = self.cap {
      if self.buf.len().checked_add(n)? > cap {
        return None;
      }
    }
    let old_hi = self.base + self.buf.len();
    self.buf.resize(self.buf.len() + n, 0);
    Some(old_hi)
  }

  fn heap_lo(&self) -> usize {
    self.base
  }

  fn heap_hi(&self) -> usize {
    self.base + self.buf.len()
  }

  fn read_u64(&self, addr: usize) -> u64 {
    let i = self.index(addr);
    u64::from_ne_bytes(self.buf[i..i + 8].try_into().unwrap())
  }

  fn write_u64(&mut self, addr: usize, value: u64) {
    let i = self.index(addr);
    self.buf[i..i + 8].copy_from_slice(&value.to_ne_bytes());
  }

  fn read_bytes(&self, addr: usize, out: &mut [u8]) {
    let i = self.index(addr);
    out.copy_from_slice(&self.buf[i..i + out.len()]);
  }

  fn write_bytes(&mut self, addr: usize, data: &[u8]) {
    let i = self.index(addr);
    self.buf[i..i + data.len()].copy_from_slice(data);
  }

  fn memset(&mut self, addr: usize, byte: u8, len: usize) {
    let i = self.index(addr);
    self.buf[i..i + len].fill(byte);
  }
}

/// A [`MemSim`] backed by the real process break via `libc::sbrk`. Unlike
/// [`VecMemSim`] this cannot be capped or reset, and only one instance
/// should ever be live in a process — it is provided for realistic,
/// non-test use (see `demos/heap_demo.rs`), not for the test suite.
#[cfg(unix)]
pub struct SbrkMemSim {
  base: Option<usize>,
}

#[cfg(unix)]
impl SbrkMemSim {
  pub fn new() -> Self {
    Self { base: None }
  }
}

#[cfg(unix)]
impl Default for SbrkMemSim {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(unix)]
impl MemSim for SbrkMemSim {
  fn extend(&mut self, n: usize) -> Option<usize> {
    let old = unsafe { libc::sbrk(n as libc::intptr_t) };
    if old == usize::MAX as *mut libc::c_void {
      return None;
    }
    let old = old as usize;
    if self.base.is_none() {
      self.base = Some(old);
    }
    Some(old)
  }

  fn heap_lo(&self) -> usize {
    self.base.unwrap_or(0)
  }

  fn heap_hi(&self) -> usize {
    unsafe { libc::sbrk(0) as usize }
  }

  fn read_u64(&self, addr: usize) -> u64 {
    unsafe { (addr as *const u64).read_unaligned() }
  }

  fn write_u64(&mut self, addr: usize, value: u64) {
    unsafe { (addr as *mut u64).write_unaligned(value) }
  }

  fn read_bytes(&self, addr: usize, out: &mut [u8]) {
    unsafe { std::ptr::copy_nonoverlapping(addr as *const u8, out.as_mut_ptr(), out.len()) }
  }

  fn write_bytes(&mut self, addr: usize, data: &[u8]) {
    unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), addr as *mut u8, data.len()) }
  }

  fn memset(&mut self, addr: usize, byte: u8, len: usize) {
    unsafe { std::ptr::write_bytes(addr as *mut u8, byte, len) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extend_grows_and_reports_old_high_watermark() {
    let mut sim = VecMemSim::new(0x1000);
    assert_eq!(sim.heap_hi(), 0x1000);

    let old_hi = sim.extend(32).unwrap();
    assert_eq!(old_hi, 0x1000);
    assert_eq!(sim.heap_hi(), 0x1020);

    let old_hi2 = sim.extend(16).unwrap();
    assert_eq!(old_hi2, 0x1020);
  }

  #[test]
  fn capped_extend_fails_without_mutating() {
    let mut sim = VecMemSim::with_cap(0, 32);
    assert!(sim.extend(32).is_some());
    assert_eq!(sim.heap_hi(), 32);
    assert!(sim.extend(16).is_none());
    assert_eq!(sim.heap_hi(), 32, "failed extend must not grow the heap");
  }

  #[test]
  fn word_and_byte_access_round_trip() {
    let mut sim = VecMemSim::new(0);
    sim.extend(64).unwrap();
    sim.write_u64(8, 0xDEAD_BEEF_CAFE_BABE);
    assert_eq!(sim.read_u64(8), 0xDEAD_BEEF_CAFE_BABE);

    sim.write_bytes(16, &[1, 2, 3, 4]);
    let mut out = [0u8; 4];
    sim.read_bytes(16, &mut out);
    assert_eq!(out, [1, 2, 3, 4]);

    sim.memset(32, 0xAB, 8);
    let mut out2 = [0u8; 8];
    sim.read_bytes(32, &mut out2);
    assert_eq!(out2, [0xAB; 8]);
  }
}
