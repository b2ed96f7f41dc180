use crate::{heap::Heap, index::FreeIndex, source::MemorySource};

/// Rule for picking a free block out of the index.
///
/// Ties between equally sized blocks always go to the one met first in the
/// index's traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum FitPolicy {
  /// First sufficient block from the start of the index.
  #[default]
  FirstFit,
  /// First sufficient block from where the previous search left off,
  /// wrapping around once.
  NextFit,
  /// Smallest sufficient block.
  BestFit,
  /// Largest sufficient block.
  WorstFit,
}

impl FitPolicy {
  pub const ALL: [Self; 4] = [Self::FirstFit, Self::NextFit, Self::BestFit, Self::WorstFit];

  /// Finds a free block of at least `size` bytes. `size` is an adjusted block
  /// size, tags included.
  pub fn find<S: MemorySource>(
    self,
    index: &FreeIndex,
    heap: &Heap<S>,
    size: usize,
  ) -> Option<usize> {
    match self {
      Self::FirstFit => first_fit(index, heap, size),
      Self::NextFit => next_fit(index, heap, size),
      Self::BestFit => best_fit(index, heap, size),
      Self::WorstFit => worst_fit(index, heap, size),
    }
  }
}

fn first_fit<S: MemorySource>(
  index: &FreeIndex,
  heap: &Heap<S>,
  size: usize,
) -> Option<usize> {
  index.iter_fitting(heap, size).find(|&bp| heap.size(bp) >= size)
}

fn next_fit<S: MemorySource>(
  index: &FreeIndex,
  heap: &Heap<S>,
  size: usize,
) -> Option<usize> {
  let start = index.resume_point(heap)?;
  let mut bp = start;

  loop {
    if heap.size(bp) >= size {
      return Some(bp);
    }

    bp = index.next_of(heap, bp).or_else(|| index.first(heap))?;
    if bp == start {
      return None;
    }
  }
}

fn best_fit<S: MemorySource>(
  index: &FreeIndex,
  heap: &Heap<S>,
  size: usize,
) -> Option<usize> {
  // Size classes are disjoint and each is sorted, so the first sufficient
  // block is already the smallest one.
  if index.is_size_ordered() {
    return first_fit(index, heap, size);
  }

  let mut best: Option<(usize, usize)> = None;
  for bp in index.iter_fitting(heap, size) {
    let block_size = heap.size(bp);
    if block_size == size {
      return Some(bp);
    }
    if block_size > size && best.is_none_or(|(_, best_size)| block_size < best_size) {
      best = Some((bp, block_size));
    }
  }
  best.map(|(bp, _)| bp)
}

fn worst_fit<S: MemorySource>(
  index: &FreeIndex,
  heap: &Heap<S>,
  size: usize,
) -> Option<usize> {
  let mut worst: Option<(usize, usize)> = None;
  for bp in index.iter_fitting(heap, size) {
    let block_size = heap.size(bp);
    if block_size >= size && worst.is_none_or(|(_, worst_size)| block_size > worst_size) {
      worst = Some((bp, block_size));
    }
  }
  worst.map(|(bp, _)| bp)
}
