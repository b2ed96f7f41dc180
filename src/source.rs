//! The memory-growth primitive behind the heap.
//!
//! A [`MemorySource`] hands out bytes contiguous with everything it granted
//! before, or refuses. It never relocates or takes back what it granted.

use crate::error::{HeapError, Result};

/// Default cap for [`VecSource`], the same 20 MiB a malloc-lab `memlib` uses.
pub const DEFAULT_LIMIT: usize = 20 * (1 << 20);

pub trait MemorySource {
  /// Extends the region by `bytes` and returns the offset of the first new
  /// byte, which is always the previous length.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize>;

  /// Bytes granted so far.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn bytes(&self) -> &[u8];

  fn bytes_mut(&mut self) -> &mut [u8];
}

/// An in-process arena backed by a `Vec<u8>`, optionally capped.
///
/// Growing may move the vector, which is fine because the heap only ever
/// refers to offsets.
#[derive(Debug, Clone)]
pub struct VecSource {
  bytes: Vec<u8>,
  limit: usize,
}

impl VecSource {
  pub fn new() -> Self {
    Self::with_limit(DEFAULT_LIMIT)
  }

  pub fn with_limit(limit: usize) -> Self {
    Self {
      bytes: Vec::new(),
      limit,
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Default for VecSource {
  fn default() -> Self {
    Self::new()
  }
}

impl MemorySource for VecSource {
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let old_len = self.bytes.len();
    let out_of_memory = HeapError::OutOfMemory {
      requested: bytes,
      limit: self.limit,
    };

    let new_len = match old_len.checked_add(bytes) {
      Some(new_len) if new_len <= self.limit => new_len,
      _ => return Err(out_of_memory),
    };

    if self.bytes.try_reserve_exact(bytes).is_err() {
      return Err(out_of_memory);
    }
    self.bytes.resize(new_len, 0);

    Ok(old_len)
  }

  fn len(&self) -> usize {
    self.bytes.len()
  }

  fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.bytes
  }
}

#[cfg(unix)]
pub use sbrk::SbrkSource;

#[cfg(unix)]
mod sbrk {
  use std::{io, slice};

  use libc::{c_void, intptr_t, sbrk};

  use super::MemorySource;
  use crate::{
    align_to,
    block::DSIZE,
    error::{HeapError, Result},
  };

  fn failed(ret: *mut c_void) -> bool {
    ret == usize::MAX as *mut c_void
  }

  /// Grows the process data segment with `sbrk(2)`.
  ///
  /// The region starts at the program break observed (and aligned to a
  /// double word) when the source is created. If anything else moves the
  /// break in between, the next grant is refused with
  /// [`HeapError::NonContiguous`].
  ///
  /// Memory obtained here is never returned to the OS before exit.
  #[derive(Debug)]
  pub struct SbrkSource {
    start: *mut u8,
    len: usize,
  }

  impl SbrkSource {
    pub fn new() -> Result<Self> {
      unsafe {
        let brk = sbrk(0);
        if failed(brk) {
          return Err(HeapError::Sbrk {
            requested: 0,
            source: io::Error::last_os_error(),
          });
        }

        let addr = brk as usize;
        let pad = align_to!(addr, DSIZE) - addr;

        if pad > 0 && failed(sbrk(pad as intptr_t)) {
          return Err(HeapError::Sbrk {
            requested: pad,
            source: io::Error::last_os_error(),
          });
        }

        Ok(Self {
          start: (addr + pad) as *mut u8,
          len: 0,
        })
      }
    }

    /// Address of the first byte of the region.
    pub fn start(&self) -> *const u8 {
      self.start
    }
  }

  impl MemorySource for SbrkSource {
    fn grow(
      &mut self,
      bytes: usize,
    ) -> Result<usize> {
      let increment = intptr_t::try_from(bytes).map_err(|_| HeapError::Overflow { requested: bytes })?;
      let expected = self.start as usize + self.len;

      unsafe {
        let granted = sbrk(increment);

        if failed(granted) {
          let source = io::Error::last_os_error();
          log::warn!("sbrk({bytes}) failed: {source}");
          return Err(HeapError::Sbrk {
            requested: bytes,
            source,
          });
        }

        // The stray grant is left in place: giving it back could shrink
        // whatever moved the break in between.
        if granted as usize != expected {
          return Err(HeapError::NonContiguous {
            expected,
            actual: granted as usize,
          });
        }
      }

      let old_len = self.len;
      self.len += bytes;
      Ok(old_len)
    }

    fn len(&self) -> usize {
      self.len
    }

    fn bytes(&self) -> &[u8] {
      if self.len == 0 {
        return &[];
      }
      // SAFETY: `start..start + len` was granted by sbrk to this source alone.
      unsafe { slice::from_raw_parts(self.start, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
      if self.len == 0 {
        return &mut [];
      }
      // SAFETY: as above, and `&mut self` makes the borrow unique.
      unsafe { slice::from_raw_parts_mut(self.start, self.len) }
    }
  }
}
