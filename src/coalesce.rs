use crate::{heap::Heap, index::FreeIndex, source::MemorySource};

/// Merges the free block at `bp` with whichever physical neighbors are free
/// and indexes the result. Returns the merged block.
///
/// ```text
///   prev   bp   next             result
///   [A]   [F]   [A]      ─▶   [A] [  F  ] [A]
///   [A]   [F]   [F]      ─▶   [A] [    F    ]
///   [F]   [F]   [A]      ─▶   [    F    ] [A]
///   [F]   [F]   [F]      ─▶   [      F      ]
/// ```
///
/// `bp` must already carry free tags and must not be indexed. Free neighbors
/// leave the index before their tags are rewritten.
pub fn coalesce<S: MemorySource>(
  heap: &mut Heap<S>,
  index: &mut FreeIndex,
  bp: usize,
) -> usize {
  let prev = heap.prev(bp);
  let next = heap.next(bp);
  let prev_free = !heap.is_allocated(prev);
  let next_free = !heap.is_allocated(next);

  let mut bp = bp;
  let mut size = heap.size(bp);

  if next_free {
    index.remove(next);
    size += heap.size(next);
  }

  if prev_free {
    index.remove(prev);
    size += heap.size(prev);
    bp = prev;
  }

  if prev_free || next_free {
    heap.set(bp, size, false);
  }

  index.insert(heap, bp);
  bp
}
