//! Integration tests for the tagalloc allocator

use std::collections::HashSet;

use tagalloc::{
  Allocator, AllocatorConfig, BlockPtr, CHUNK_SIZE, FitPolicy, HeapError, IndexKind, VecSource,
  block::{DSIZE, MIN_BLOCK_SIZE},
};

fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

fn configs() -> impl Iterator<Item = AllocatorConfig> {
  IndexKind::ALL
    .into_iter()
    .flat_map(|index| FitPolicy::ALL.into_iter().map(move |fit| AllocatorConfig::new(index, fit)))
}

fn allocate(
  allocator: &mut Allocator,
  size: usize,
) -> BlockPtr {
  allocator.allocate(size).unwrap().unwrap()
}

#[test]
fn test_alignment_and_block_size() {
  init_logger();

  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();

    for size in [1, 7, 8, 9, 15, 16, 17, 100, 255, 1000, 4095, 4096, 10_000] {
      let ptr = allocate(&mut allocator, size);
      let block = allocator.block(ptr);

      assert_eq!(ptr.offset() % DSIZE, 0, "{config:?} size {size}");
      assert!(block.allocated);
      assert!(block.size >= size + DSIZE, "{config:?} size {size}");
      assert!(block.size >= MIN_BLOCK_SIZE);
      assert_eq!(block.size % DSIZE, 0);
      assert!(allocator.payload(ptr).len() >= size);
    }

    allocator.check().unwrap();
  }
}

#[test]
fn test_one_byte_gets_minimum_block() {
  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();
    let ptr = allocate(&mut allocator, 1);

    let block = allocator.block(ptr);
    assert_eq!(block.size, 2 * DSIZE, "{config:?}");
    assert!(block.allocated, "{config:?}");
  }
}

#[test]
fn test_freed_block_is_reused() {
  init_logger();

  for index in IndexKind::ALL {
    for fit in [FitPolicy::FirstFit, FitPolicy::NextFit] {
      let mut allocator = Allocator::with_config(AllocatorConfig::new(index, fit)).unwrap();
      let heap_size = allocator.heap_size();

      let p = allocate(&mut allocator, 100);
      allocator.free(p);
      let q = allocate(&mut allocator, 100);

      assert_eq!(p, q, "{index:?} {fit:?}");
      assert_eq!(allocator.heap_size(), heap_size, "{index:?} {fit:?}");
    }
  }
}

#[test]
fn test_next_fit_resumes_after_last_placement() {
  init_logger();

  for index in IndexKind::ALL {
    for fit in [FitPolicy::FirstFit, FitPolicy::NextFit] {
      let mut allocator = Allocator::with_config(AllocatorConfig::new(index, fit)).unwrap();

      let a = allocate(&mut allocator, 32);
      let b = allocate(&mut allocator, 32);
      allocator.free(a);
      let c = allocate(&mut allocator, 16);

      match fit {
        FitPolicy::FirstFit => assert_eq!(c, a, "{index:?}"),
        _ => {
          // Carved from the block left over behind `b`, not the hole at `a`.
          assert_ne!(c, a, "{index:?}");
          assert_eq!(c.offset(), b.offset() + allocator.block(b).size, "{index:?}");
        }
      }
      allocator.check().unwrap();
    }
  }
}

#[test]
fn test_next_fit_wraps_to_earlier_hole() {
  for index in IndexKind::ALL {
    let config = AllocatorConfig::new(index, FitPolicy::NextFit).with_chunk_size(256);
    let mut allocator = Allocator::with_config(config).unwrap();

    let a = allocate(&mut allocator, 64);
    let _b = allocate(&mut allocator, 64);
    let _c = allocate(&mut allocator, 96);
    // The chunk is now full; only the hole at `a` can take the next request.
    assert_eq!(allocator.free_blocks().count(), 0, "{index:?}");
    allocator.free(a);

    let heap_size = allocator.heap_size();
    assert_eq!(allocate(&mut allocator, 64), a, "{index:?}");
    assert_eq!(allocator.heap_size(), heap_size, "{index:?}");
    allocator.check().unwrap();
  }
}

#[test]
fn test_adjacent_frees_merge() {
  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();

    let p1 = allocate(&mut allocator, 32);
    let p2 = allocate(&mut allocator, 32);
    allocator.free(p1);
    allocator.free(p2);

    let free: Vec<_> = allocator.free_blocks().collect();
    assert_eq!(free.len(), 1, "{config:?}");
    assert!(allocator.block(free[0]).size >= 64 + 2 * DSIZE, "{config:?}");
    allocator.check().unwrap();
  }
}

#[test]
fn test_best_fit_picks_smallest_sufficient_block() {
  for index in IndexKind::ALL {
    let mut allocator = Allocator::with_config(AllocatorConfig::new(index, FitPolicy::BestFit)).unwrap();

    let small = allocate(&mut allocator, 40);
    let _fence = allocate(&mut allocator, 8);
    let large = allocate(&mut allocator, 88);
    let _fence = allocate(&mut allocator, 8);

    assert_eq!(allocator.block(small).size, 48);
    assert_eq!(allocator.block(large).size, 96);

    allocator.free(large);
    allocator.free(small);

    assert_eq!(allocate(&mut allocator, 40), small, "{index:?}");
    allocator.check().unwrap();
  }
}

#[test]
fn test_worst_fit_picks_largest_block() {
  for index in IndexKind::ALL {
    let mut allocator = Allocator::with_config(AllocatorConfig::new(index, FitPolicy::WorstFit)).unwrap();

    let small = allocate(&mut allocator, 40);
    let _fence = allocate(&mut allocator, 8);
    allocator.free(small);

    // The tail of the first chunk dwarfs the 48-byte hole.
    let ptr = allocate(&mut allocator, 16);
    assert_ne!(ptr, small, "{index:?}");
    assert!(!allocator.block(small).allocated);
    allocator.check().unwrap();
  }
}

#[test]
fn test_growth_uses_request_when_larger_than_chunk() {
  init_logger();

  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();

    let first = allocate(&mut allocator, 1000);
    let tail = allocator.free_blocks().next().unwrap();
    assert_eq!(tail.offset(), first.offset() + 1008);

    let before = allocator.heap_size();
    let big = allocate(&mut allocator, 5000);

    // Grown by exactly the adjusted request, merged with the free tail.
    assert_eq!(allocator.heap_size() - before, 5008, "{config:?}");
    assert_eq!(big, tail, "{config:?}");
    assert_eq!(allocator.free_blocks().count(), 1, "{config:?}");
    allocator.check().unwrap();
  }
}

#[test]
fn test_growth_merges_with_trailing_free_block() {
  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();

    let everything = allocate(&mut allocator, CHUNK_SIZE - DSIZE);
    assert_eq!(allocator.free_blocks().count(), 0, "{config:?}");
    allocator.free(everything);

    // Nothing fits, so the heap grows; the new space joins the free chunk.
    let big = allocate(&mut allocator, CHUNK_SIZE + 100);
    assert_eq!(big, everything, "{config:?}");

    let stats = allocator.check().unwrap();
    assert!(stats.free_blocks <= 1, "{config:?}");
  }
}

#[test]
fn test_heap_accounting() {
  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();

    let mut live = Vec::new();
    for i in 0..64 {
      live.push(allocate(&mut allocator, 8 + (i * 37) % 700));
    }
    for ptr in live.iter().step_by(3) {
      allocator.free(*ptr);
    }

    let total: usize = allocator.blocks().map(|block| block.size).sum();
    // Padding word, prologue and epilogue.
    assert_eq!(total + 16, allocator.heap_size(), "{config:?}");

    let free_by_walk: HashSet<_> = allocator
      .blocks()
      .filter(|block| !block.allocated)
      .map(|block| block.ptr)
      .collect();
    let free_by_index: HashSet<_> = allocator.free_blocks().collect();
    assert_eq!(free_by_walk, free_by_index, "{config:?}");

    let stats = allocator.check().unwrap();
    assert_eq!(stats.free_blocks, free_by_walk.len());
    assert_eq!(stats.blocks(), allocator.blocks().count());
    assert!(stats.utilization() > 0.0 && stats.utilization() < 1.0);
  }
}

#[test]
fn test_resize_preserves_prefix() {
  for config in configs() {
    let mut allocator = Allocator::with_config(config).unwrap();

    let ptr = allocate(&mut allocator, 200);
    for (i, byte) in allocator.payload_mut(ptr).iter_mut().enumerate() {
      *byte = i as u8;
    }

    let shrunk = allocator.resize(ptr, 50).unwrap().unwrap();
    let expected: Vec<u8> = (0..50).map(|i| i as u8).collect();
    assert_eq!(&allocator.payload(shrunk)[..50], &expected[..], "{config:?}");

    let grown = allocator.resize(shrunk, 3000).unwrap().unwrap();
    assert_eq!(&allocator.payload(grown)[..50], &expected[..], "{config:?}");
    allocator.check().unwrap();
  }
}

#[test]
fn test_exhaustion_leaves_heap_usable() {
  for config in configs() {
    let source = VecSource::with_limit(16 * 1024);
    let mut allocator = Allocator::with_source(source, config).unwrap();

    let mut live = Vec::new();
    let err = loop {
      match allocator.allocate(1000) {
        Ok(Some(ptr)) => live.push(ptr),
        Ok(None) => unreachable!(),
        Err(err) => break err,
      }
    };
    assert!(matches!(err, HeapError::OutOfMemory { .. }), "{config:?}");
    allocator.check().unwrap();

    for ptr in live.drain(..) {
      allocator.free(ptr);
    }
    let stats = allocator.check().unwrap();
    assert_eq!(stats.allocated_blocks, 0, "{config:?}");
    assert_eq!(stats.free_blocks, 1, "{config:?}");

    assert!(allocator.allocate(1000).unwrap().is_some());
  }
}

#[test]
fn test_independent_allocators() {
  let mut first = Allocator::with_config(AllocatorConfig::new(IndexKind::Explicit, FitPolicy::FirstFit)).unwrap();
  let mut second = Allocator::with_config(AllocatorConfig::new(IndexKind::Segregated, FitPolicy::BestFit)).unwrap();

  let a = allocate(&mut first, 64);
  let b = allocate(&mut second, 64);
  first.payload_mut(a).fill(1);
  second.payload_mut(b).fill(2);

  first.free(a);
  assert!(second.payload(b).iter().all(|&byte| byte == 2));
  first.check().unwrap();
  second.check().unwrap();
}

#[cfg(unix)]
#[test]
fn test_sbrk_backed_allocator() {
  init_logger();

  let source = match tagalloc::SbrkSource::new() {
    Ok(source) => source,
    Err(_) => return,
  };

  // Other threads may move the program break under us; only a contiguous
  // heap is expected to work.
  let Ok(mut allocator) = Allocator::with_source(source, AllocatorConfig::default()) else {
    return;
  };

  let ptr = allocator.allocate(256).unwrap().unwrap();
  allocator.payload_mut(ptr).fill(0xEE);
  assert_eq!(ptr.offset() % DSIZE, 0);
  assert_eq!(allocator.source().start() as usize % DSIZE, 0);
  allocator.free(ptr);
  allocator.check().unwrap();
}

/// A large `MAP_NORESERVE` mapping: only the pages holding tags are ever
/// touched, so a multi-gigabyte heap costs next to nothing.
#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
mod sparse {
  use tagalloc::{HeapError, MemorySource, Result};

  pub struct SparseSource {
    base: *mut u8,
    capacity: usize,
    len: usize,
  }

  impl SparseSource {
    pub fn new(capacity: usize) -> Option<Self> {
      let base = unsafe {
        libc::mmap(
          std::ptr::null_mut(),
          capacity,
          libc::PROT_READ | libc::PROT_WRITE,
          libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
          -1,
          0,
        )
      };
      if base == libc::MAP_FAILED {
        return None;
      }

      Some(Self {
        base: base.cast(),
        capacity,
        len: 0,
      })
    }
  }

  impl Drop for SparseSource {
    fn drop(&mut self) {
      unsafe {
        libc::munmap(self.base.cast(), self.capacity);
      }
    }
  }

  impl MemorySource for SparseSource {
    fn grow(
      &mut self,
      bytes: usize,
    ) -> Result<usize> {
      let old_len = self.len;
      match old_len.checked_add(bytes) {
        Some(new_len) if new_len <= self.capacity => {
          self.len = new_len;
          Ok(old_len)
        }
        _ => Err(HeapError::OutOfMemory {
          requested: bytes,
          limit: self.capacity,
        }),
      }
    }

    fn len(&self) -> usize {
      self.len
    }

    fn bytes(&self) -> &[u8] {
      unsafe { std::slice::from_raw_parts(self.base, self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
      unsafe { std::slice::from_raw_parts_mut(self.base, self.len) }
    }
  }
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
#[test]
fn test_huge_merges_stay_within_tag_range() {
  use tagalloc::heap::MAX_HEAP_SIZE;

  init_logger();

  // Larger than any heap a 32-bit tag can describe.
  let Some(source) = sparse::SparseSource::new(8 << 30) else {
    return;
  };
  let mut allocator = Allocator::with_source(source, AllocatorConfig::default()).unwrap();

  let a = allocator.allocate(2 << 30).unwrap().unwrap();
  let b = allocator.allocate(1 << 30).unwrap().unwrap();
  allocator.free(a);
  allocator.free(b);

  let stats = allocator.check().unwrap();
  assert_eq!(stats.free_blocks, 1);
  assert!(stats.largest_free > 3 << 30);

  // Served from the merged block without growing.
  let heap_size = allocator.heap_size();
  let c = allocator.allocate(2 << 30).unwrap().unwrap();
  assert_eq!(c, a);
  assert_eq!(allocator.heap_size(), heap_size);

  // Another 2 GiB would push the heap past what one free block could record.
  let err = allocator.allocate(2 << 30).unwrap_err();
  assert!(matches!(err, HeapError::OutOfMemory { limit: MAX_HEAP_SIZE, .. }));
  assert_eq!(allocator.heap_size(), heap_size);

  allocator.free(c);
  let stats = allocator.check().unwrap();
  assert_eq!(stats.free_blocks, 1);
  assert!(allocator.heap_size() <= MAX_HEAP_SIZE);
}
