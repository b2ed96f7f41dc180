use log::{debug, trace, warn};

use crate::{
  block::{BlockInfo, BlockPtr, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
  check::{self, HeapStats},
  coalesce::coalesce,
  config::AllocatorConfig,
  error::{Corruption, HeapError, Result},
  heap::{Blocks, Heap},
  index::FreeIndex,
  source::{MemorySource, VecSource},
};

/// Block size needed to serve a `size`-byte request: the payload plus header
/// and footer, rounded up to a double word, never below the minimum block.
pub fn adjusted_size(size: usize) -> Result<usize> {
  if size <= DSIZE {
    return Ok(MIN_BLOCK_SIZE);
  }

  size
    .checked_add(DSIZE + DSIZE - 1)
    .map(|padded| padded & !(DSIZE - 1))
    .filter(|&asize| asize <= MAX_BLOCK_SIZE)
    .ok_or(HeapError::Overflow { requested: size })
}

/// A boundary-tag allocator over a single growable heap.
///
/// The heap, the free-block index and the configuration all live here; there
/// is no process-wide state, so independent allocators can coexist.
pub struct Allocator<S = VecSource> {
  heap: Heap<S>,
  index: FreeIndex,
  config: AllocatorConfig,
}

impl Allocator<VecSource> {
  /// An allocator with the default configuration over a fresh in-process
  /// arena.
  pub fn init() -> Result<Self> {
    Self::with_config(AllocatorConfig::default())
  }

  pub fn with_config(config: AllocatorConfig) -> Result<Self> {
    Self::with_source(VecSource::new(), config)
  }
}

impl<S: MemorySource> Allocator<S> {
  /// Builds the sentinels on `source` and grows the heap by one chunk so the
  /// first request has something to search.
  pub fn with_source(
    source: S,
    config: AllocatorConfig,
  ) -> Result<Self> {
    let config = config.normalized();
    let heap = Heap::new(source)?;

    let mut allocator = Self {
      heap,
      index: FreeIndex::new(config.index, config.bucket_count),
      config,
    };
    allocator.extend_heap(config.chunk_size)?;

    debug!(
      "allocator ready: {:?} index, {:?}, {} byte chunks",
      config.index, config.fit, config.chunk_size
    );

    Ok(allocator)
  }

  /// Allocates a block with at least `size` usable bytes.
  ///
  /// Returns `Ok(None)` for a zero-size request. Fails only when the heap
  /// has to grow and the memory source refuses; the heap stays usable.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<BlockPtr>> {
    if size == 0 {
      return Ok(None);
    }

    let asize = adjusted_size(size)?;

    let bp = match self.config.fit.find(&self.index, &self.heap, asize) {
      Some(bp) => bp,
      None => self
        .extend_heap(asize.max(self.config.chunk_size))
        .inspect_err(|err| warn!("allocate({size}) failed: {err}"))?,
    };

    self.index.resume_at(bp);
    self.place(bp, asize);

    trace!("allocate({size}) -> {bp} ({} byte block)", self.heap.size(bp));

    Ok(Some(BlockPtr::new(bp)))
  }

  /// Releases the block at `ptr`, merging it with free neighbors.
  ///
  /// `ptr` must come from this allocator and still be allocated; anything
  /// else corrupts the heap.
  pub fn free(
    &mut self,
    ptr: BlockPtr,
  ) {
    let bp = ptr.offset();
    let size = self.heap.size(bp);

    self.heap.set(bp, size, false);
    let merged = coalesce(&mut self.heap, &mut self.index, bp);

    trace!("free({bp}) -> free block {merged} of {} bytes", self.heap.size(merged));
  }

  /// Moves the block at `ptr` into a new block of at least `size` usable
  /// bytes, keeping the first `min(old capacity, size)` bytes.
  ///
  /// Always relocates. A zero-size request allocates nothing, so it returns
  /// `Ok(None)` and `ptr` stays live. On failure the old block is left
  /// untouched as well.
  pub fn resize(
    &mut self,
    ptr: BlockPtr,
    size: usize,
  ) -> Result<Option<BlockPtr>> {
    let new = match self.allocate(size)? {
      Some(new) => new,
      None => return Ok(None),
    };

    let old = ptr.offset();
    let copied = (self.heap.size(old) - DSIZE).min(size);
    self.heap.bytes_mut().copy_within(old..old + copied, new.offset());
    self.free(ptr);

    trace!("resize({old}, {size}) -> {}, copied {copied} bytes", new.offset());

    Ok(Some(new))
  }

  /// Usable bytes of the block at `ptr`.
  pub fn payload(
    &self,
    ptr: BlockPtr,
  ) -> &[u8] {
    self.heap.payload(ptr.offset())
  }

  pub fn payload_mut(
    &mut self,
    ptr: BlockPtr,
  ) -> &mut [u8] {
    self.heap.payload_mut(ptr.offset())
  }

  /// Decoded header of the block at `ptr`.
  pub fn block(
    &self,
    ptr: BlockPtr,
  ) -> BlockInfo {
    let (size, allocated) = self.heap.tag(ptr.offset()).unpack();
    BlockInfo { ptr, size, allocated }
  }

  /// Every ordinary block in address order.
  pub fn blocks(&self) -> Blocks<'_, S> {
    self.heap.blocks()
  }

  /// Free blocks in the index's traversal order.
  pub fn free_blocks(&self) -> impl Iterator<Item = BlockPtr> + '_ {
    self.index.iter(&self.heap).map(BlockPtr::new)
  }

  pub fn heap_size(&self) -> usize {
    self.heap.len()
  }

  pub fn config(&self) -> &AllocatorConfig {
    &self.config
  }

  pub fn source(&self) -> &S {
    self.heap.source()
  }

  pub fn stats(&self) -> HeapStats {
    check::stats(&self.heap)
  }

  /// Walks the whole heap and the free index, verifying every invariant.
  pub fn check(&self) -> core::result::Result<HeapStats, Corruption> {
    check::check(&self.heap, &self.index)
  }

  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let bp = self.heap.extend(bytes)?;
    Ok(coalesce(&mut self.heap, &mut self.index, bp))
  }

  /// Turns the free block at `bp` into an allocated block of `asize` bytes,
  /// splitting off the rest when it can stand as a block of its own.
  fn place(
    &mut self,
    bp: usize,
    asize: usize,
  ) {
    let csize = self.heap.size(bp);
    self.index.remove(bp);

    if csize - asize >= MIN_BLOCK_SIZE {
      self.heap.set(bp, asize, true);

      let rest = bp + asize;
      self.heap.set(rest, csize - asize, false);
      self.index.insert(&self.heap, rest);
      // Next-fit picks up where this block was carved.
      self.index.resume_at(rest);

      trace!("split {csize} byte block at {bp}, remainder {} at {rest}", csize - asize);
    } else {
      self.heap.set(bp, csize, true);
    }
  }
}
