//! Free-block index.
//!
//! ```text
//!   Implicit:    no side structure, free blocks are found by walking tags
//!
//!   Explicit:    head ─▶ [F3] ◀─▶ [F1] ◀─▶ [F7] ─▶ ∅        (newest first)
//!
//!   Segregated:  [0]  ∅
//!                [4]  ─▶ [16] ◀─▶ [24]                       (ascending size)
//!                [5]  ─▶ [32] ◀─▶ [48] ◀─▶ [48]
//!                ...
//!                [19] ─▶ [2 MiB] ◀─▶ [9 MiB]                 (everything larger)
//! ```
//!
//! Links live in a side table keyed by payload offset rather than inside the
//! free payload itself. Each entry remembers its bucket, so unlinking never
//! needs to re-read a block's size.

use std::collections::HashMap;

use crate::{heap::Heap, source::MemorySource};

/// Organization of the free-block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum IndexKind {
  /// Free blocks are discovered by scanning every block in address order.
  Implicit,
  /// One doubly-linked list, new blocks pushed at the head.
  #[default]
  Explicit,
  /// One list per power-of-two size class, each kept in ascending size.
  Segregated,
}

impl IndexKind {
  pub const ALL: [Self; 3] = [Self::Implicit, Self::Explicit, Self::Segregated];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
  pub prev: Option<usize>,
  pub next: Option<usize>,
  pub bucket: usize,
}

#[derive(Debug, Clone)]
pub struct FreeIndex {
  kind: IndexKind,
  heads: Vec<Option<usize>>,
  links: HashMap<usize, Links>,
  /// Where next-fit resumes. Implicit: a block boundary, free or not.
  /// Lists: an indexed free block, or `None` for the start.
  rover: Option<usize>,
}

impl FreeIndex {
  pub fn new(
    kind: IndexKind,
    bucket_count: usize,
  ) -> Self {
    let buckets = match kind {
      IndexKind::Implicit => 0,
      IndexKind::Explicit => 1,
      IndexKind::Segregated => bucket_count.max(1),
    };

    Self {
      kind,
      heads: vec![None; buckets],
      links: HashMap::new(),
      rover: None,
    }
  }

  pub fn kind(&self) -> IndexKind {
    self.kind
  }

  pub fn bucket_count(&self) -> usize {
    self.heads.len()
  }

  /// Whether each bucket is sorted by size, making the first sufficient
  /// block of a bucket also the smallest.
  pub fn is_size_ordered(&self) -> bool {
    self.kind == IndexKind::Segregated
  }

  /// Size class of `size`: `floor(log2(size))`, clamped to the last bucket.
  pub fn bucket_of(
    &self,
    size: usize,
  ) -> usize {
    if self.kind != IndexKind::Segregated {
      return 0;
    }

    let last = self.heads.len() - 1;
    let mut size = size;
    let mut bucket = 0;
    while bucket < last && size > 1 {
      size >>= 1;
      bucket += 1;
    }
    bucket
  }

  /// Indexes the free block at `bp`. It must not already be indexed.
  pub fn insert<S: MemorySource>(
    &mut self,
    heap: &Heap<S>,
    bp: usize,
  ) {
    let size = heap.size(bp);

    match self.kind {
      IndexKind::Implicit => {
        // The block may have swallowed the boundary the rover sat on.
        if matches!(self.rover, Some(rover) if rover > bp && rover < bp + size) {
          self.rover = Some(bp);
        }
      }
      IndexKind::Explicit => {
        let head = self.heads[0];
        self.link(bp, 0, None, head);
      }
      IndexKind::Segregated => {
        let bucket = self.bucket_of(size);
        let mut prev = None;
        let mut cursor = self.heads[bucket];

        while let Some(current) = cursor {
          if size <= heap.size(current) {
            break;
          }
          prev = Some(current);
          cursor = self.links.get(&current).and_then(|links| links.next);
        }

        self.link(bp, bucket, prev, cursor);
      }
    }
  }

  /// Unindexes the block at `bp`. It must currently be indexed; on the
  /// implicit index this is a no-op.
  pub fn remove(
    &mut self,
    bp: usize,
  ) {
    let Some(links) = self.links.remove(&bp) else {
      debug_assert!(self.kind == IndexKind::Implicit, "block {bp} is not indexed");
      return;
    };

    if self.rover == Some(bp) {
      self.rover = links.next.or_else(|| self.list_first(links.bucket + 1));
    }

    match links.prev {
      Some(prev) => {
        if let Some(prev_links) = self.links.get_mut(&prev) {
          prev_links.next = links.next;
        }
      }
      None => self.heads[links.bucket] = links.next,
    }

    if let Some(next) = links.next
      && let Some(next_links) = self.links.get_mut(&next)
    {
      next_links.prev = links.prev;
    }
  }

  /// Makes next-fit resume at `bp`, the block about to be placed.
  pub fn resume_at(
    &mut self,
    bp: usize,
  ) {
    self.rover = Some(bp);
  }

  /// The free block next-fit starts from.
  pub fn resume_point<S: MemorySource>(
    &self,
    heap: &Heap<S>,
  ) -> Option<usize> {
    let resumed = match (self.kind, self.rover) {
      (IndexKind::Implicit, Some(rover)) => scan_free(heap, rover),
      (_, rover) => rover,
    };
    resumed.or_else(|| self.first(heap))
  }

  pub fn first<S: MemorySource>(
    &self,
    heap: &Heap<S>,
  ) -> Option<usize> {
    self.first_in(heap, 0)
  }

  /// Successor of `bp` in traversal order.
  pub fn next_of<S: MemorySource>(
    &self,
    heap: &Heap<S>,
    bp: usize,
  ) -> Option<usize> {
    match self.kind {
      IndexKind::Implicit => scan_free(heap, heap.next(bp)),
      _ => {
        let links = self.links.get(&bp)?;
        links.next.or_else(|| self.list_first(links.bucket + 1))
      }
    }
  }

  /// Every free block in traversal order.
  pub fn iter<'a, S: MemorySource>(
    &'a self,
    heap: &'a Heap<S>,
  ) -> FreeBlocks<'a, S> {
    FreeBlocks {
      index: self,
      heap,
      cursor: self.first(heap),
    }
  }

  /// Free blocks in traversal order, skipping size classes that are all
  /// smaller than `size`.
  pub fn iter_fitting<'a, S: MemorySource>(
    &'a self,
    heap: &'a Heap<S>,
    size: usize,
  ) -> FreeBlocks<'a, S> {
    FreeBlocks {
      index: self,
      heap,
      cursor: self.first_in(heap, self.bucket_of(size)),
    }
  }

  pub(crate) fn links(
    &self,
    bp: usize,
  ) -> Option<Links> {
    self.links.get(&bp).copied()
  }

  pub(crate) fn head(
    &self,
    bucket: usize,
  ) -> Option<usize> {
    self.heads.get(bucket).copied().flatten()
  }

  /// Every linked entry, in no particular order. Empty for the implicit
  /// index.
  pub(crate) fn linked_blocks(&self) -> impl Iterator<Item = usize> + '_ {
    self.links.keys().copied()
  }

  fn first_in<S: MemorySource>(
    &self,
    heap: &Heap<S>,
    bucket: usize,
  ) -> Option<usize> {
    match self.kind {
      IndexKind::Implicit => scan_free(heap, heap.first_block()),
      _ => self.list_first(bucket),
    }
  }

  fn list_first(
    &self,
    bucket: usize,
  ) -> Option<usize> {
    self.heads.get(bucket..)?.iter().find_map(|head| *head)
  }

  fn link(
    &mut self,
    bp: usize,
    bucket: usize,
    prev: Option<usize>,
    next: Option<usize>,
  ) {
    match prev {
      Some(prev) => {
        if let Some(prev_links) = self.links.get_mut(&prev) {
          prev_links.next = Some(bp);
        }
      }
      None => self.heads[bucket] = Some(bp),
    }

    if let Some(next) = next
      && let Some(next_links) = self.links.get_mut(&next)
    {
      next_links.prev = Some(bp);
    }

    self.links.insert(bp, Links { prev, next, bucket });
  }
}

/// First free block at or after the boundary `bp`, walking tags.
fn scan_free<S: MemorySource>(
  heap: &Heap<S>,
  mut bp: usize,
) -> Option<usize> {
  loop {
    let (size, allocated) = heap.tag(bp).unpack();
    if size == 0 {
      return None;
    }
    if !allocated {
      return Some(bp);
    }
    bp += size;
  }
}

pub struct FreeBlocks<'a, S> {
  index: &'a FreeIndex,
  heap: &'a Heap<S>,
  cursor: Option<usize>,
}

impl<S: MemorySource> Iterator for FreeBlocks<'_, S> {
  type Item = usize;

  fn next(&mut self) -> Option<Self::Item> {
    let bp = self.cursor?;
    self.cursor = self.index.next_of(self.heap, bp);
    Some(bp)
  }
}
