//! Heap consistency checker.
//!
//! Nothing on the allocation path validates anything; this walk is the one
//! place that looks for damage, for tests and debugging.

use std::collections::HashSet;

use crate::{
  block::{self, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  error::Corruption,
  heap::Heap,
  index::FreeIndex,
  source::MemorySource,
};

/// Occupancy figures for ordinary blocks; sentinels are not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
  /// Bytes from the padding word through the epilogue.
  pub heap_size: usize,
  pub allocated_blocks: usize,
  pub free_blocks: usize,
  pub allocated_bytes: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  pub fn blocks(&self) -> usize {
    self.allocated_blocks + self.free_blocks
  }

  /// Share of the heap held by allocated blocks, tags included.
  pub fn utilization(&self) -> f64 {
    if self.heap_size == 0 {
      return 0.0;
    }
    self.allocated_bytes as f64 / self.heap_size as f64
  }

  fn record(
    &mut self,
    size: usize,
    allocated: bool,
  ) {
    if allocated {
      self.allocated_blocks += 1;
      self.allocated_bytes += size;
    } else {
      self.free_blocks += 1;
      self.free_bytes += size;
      self.largest_free = self.largest_free.max(size);
    }
  }
}

pub fn stats<S: MemorySource>(heap: &Heap<S>) -> HeapStats {
  let mut stats = HeapStats {
    heap_size: heap.len(),
    ..HeapStats::default()
  };
  for info in heap.blocks() {
    stats.record(info.size, info.allocated);
  }
  stats
}

pub fn check<S: MemorySource>(
  heap: &Heap<S>,
  index: &FreeIndex,
) -> Result<HeapStats, Corruption> {
  let bytes = heap.bytes();
  let end = bytes.len();

  let prologue = heap.prologue();
  let prologue_tag = Tag::pack(DSIZE, true);
  if heap.tag(prologue) != prologue_tag || block::read_tag(bytes, prologue) != prologue_tag {
    return Err(Corruption::BadPrologue);
  }

  let mut stats = HeapStats {
    heap_size: heap.len(),
    ..HeapStats::default()
  };
  // Padding word, prologue and epilogue.
  let mut counted = WSIZE + DSIZE + WSIZE;
  let mut free = HashSet::new();
  let mut prev_free: Option<usize> = None;
  let mut bp = heap.first_block();

  loop {
    if block::header(bp) + WSIZE > end {
      return Err(Corruption::BadEpilogue);
    }

    let header = heap.tag(bp);
    let (size, allocated) = header.unpack();

    if size == 0 {
      if !allocated || block::header(bp) != heap.epilogue() {
        return Err(Corruption::BadEpilogue);
      }
      break;
    }

    if size % DSIZE != 0 || size < MIN_BLOCK_SIZE || bp + size - DSIZE + WSIZE > end {
      return Err(Corruption::BadSize { bp, size });
    }
    if bp % DSIZE != 0 {
      return Err(Corruption::Misaligned { bp });
    }

    let footer = block::read_tag(bytes, bp + size - DSIZE);
    if footer != header {
      return Err(Corruption::TagMismatch {
        bp,
        header: header.bits(),
        footer: footer.bits(),
      });
    }

    if !allocated {
      if let Some(first) = prev_free {
        return Err(Corruption::Uncoalesced { first, second: bp });
      }
      free.insert(bp);
    }

    prev_free = (!allocated).then_some(bp);
    counted += size;
    stats.record(size, allocated);
    bp += size;
  }

  if counted != heap.len() {
    return Err(Corruption::SizeMismatch {
      counted,
      heap_size: heap.len(),
    });
  }

  check_index(heap, index, &free)?;

  Ok(stats)
}

fn check_index<S: MemorySource>(
  heap: &Heap<S>,
  index: &FreeIndex,
  free: &HashSet<usize>,
) -> Result<(), Corruption> {
  let mut seen = HashSet::new();

  for bucket in 0..index.bucket_count() {
    let mut prev = None;
    let mut cursor = index.head(bucket);

    while let Some(bp) = cursor {
      if !seen.insert(bp) {
        return Err(Corruption::Duplicate { bp });
      }
      if !free.contains(&bp) {
        return Err(Corruption::StaleEntry { bp });
      }

      let links = index.links(bp).ok_or(Corruption::BrokenLink { bp })?;
      if links.prev != prev || links.bucket != bucket {
        return Err(Corruption::BrokenLink { bp });
      }

      let expected = index.bucket_of(heap.size(bp));
      if expected != bucket {
        return Err(Corruption::WrongBucket {
          bp,
          found: bucket,
          expected,
        });
      }

      if index.is_size_ordered()
        && let Some(prev) = prev
        && heap.size(prev) > heap.size(bp)
      {
        return Err(Corruption::Unordered { bucket, bp });
      }

      prev = Some(bp);
      cursor = links.next;
    }
  }

  if index.bucket_count() > 0
    && let Some(&bp) = free.iter().find(|bp| !seen.contains(*bp))
  {
    return Err(Corruption::Unindexed { bp });
  }

  if let Some(bp) = index.linked_blocks().find(|bp| !seen.contains(bp)) {
    return Err(Corruption::StaleEntry { bp });
  }

  Ok(())
}
