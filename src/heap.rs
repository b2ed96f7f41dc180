//! The heap proper: sentinels, growth and block navigation over a
//! [`MemorySource`].
//!
//! ```text
//!   start
//!   ┌─────┬───────────┬───────────┬─────────────────────┬─────┬──────────┐
//!   │ pad │ prologue  │ prologue  │   ordinary blocks   │ ... │ epilogue │
//!   │  0  │ hdr (8,1) │ ftr (8,1) │                     │     │ hdr (0,1)│
//!   └─────┴───────────┴───────────┴─────────────────────┴─────┴──────────┘
//!                     ▲           ▲                                      ▲
//!                 prologue bp   first block                           heap end
//! ```

use log::debug;

use crate::{
  align,
  block::{self, BlockInfo, BlockPtr, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  error::{HeapError, Result},
  source::MemorySource,
};

/// Largest heap, padding and sentinels included. Every ordinary block, even
/// one spanning the whole heap, must still fit in a 32-bit tag.
pub const MAX_HEAP_SIZE: usize = MAX_BLOCK_SIZE.saturating_add(4 * WSIZE);

pub struct Heap<S> {
  source: S,
  /// Offset of the padding word in front of the prologue.
  start: usize,
}

impl<S: MemorySource> Heap<S> {
  /// Lays down the padding word, the prologue and the epilogue. The heap has
  /// no ordinary blocks yet.
  pub fn new(mut source: S) -> Result<Self> {
    let pad = align!(source.len()) - source.len();
    let granted = source.grow(pad + 4 * WSIZE)?;
    let start = granted + pad;

    let arena = source.bytes_mut();
    block::write_tag(arena, start, Tag::from_bits(0));
    block::write_tag(arena, start + WSIZE, Tag::pack(DSIZE, true));
    block::write_tag(arena, start + 2 * WSIZE, Tag::pack(DSIZE, true));
    block::write_tag(arena, start + 3 * WSIZE, Tag::pack(0, true));

    debug!("heap initialized at offset {start}");

    Ok(Self { source, start })
  }

  /// Grows the heap by at least `bytes` and turns the new space into one free
  /// block whose header overwrites the old epilogue. Returns that block
  /// without merging it with anything.
  ///
  /// Refuses to grow past [`MAX_HEAP_SIZE`], so no merge can ever produce a
  /// block too large for its tags.
  pub fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize> {
    let size = bytes
      .checked_add(DSIZE - 1)
      .map(|padded| padded & !(DSIZE - 1))
      .filter(|&size| size <= MAX_BLOCK_SIZE)
      .ok_or(HeapError::Overflow { requested: bytes })?
      .max(MIN_BLOCK_SIZE);

    if self.len().checked_add(size).is_none_or(|len| len > MAX_HEAP_SIZE) {
      return Err(HeapError::OutOfMemory {
        requested: size,
        limit: MAX_HEAP_SIZE,
      });
    }

    let bp = self.source.grow(size)?;

    let arena = self.source.bytes_mut();
    block::write_block(arena, bp, size, false);
    block::write_tag(arena, block::header(bp + size), Tag::pack(0, true));

    debug!("heap extended by {size} bytes, now {} bytes", self.len());

    Ok(bp)
  }

  pub fn bytes(&self) -> &[u8] {
    self.source.bytes()
  }

  pub fn bytes_mut(&mut self) -> &mut [u8] {
    self.source.bytes_mut()
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  /// Bytes from the padding word through the epilogue.
  pub fn len(&self) -> usize {
    self.source.len() - self.start
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Offset of the padding word.
  pub fn start(&self) -> usize {
    self.start
  }

  pub fn prologue(&self) -> usize {
    self.start + DSIZE
  }

  pub fn first_block(&self) -> usize {
    self.start + 2 * DSIZE
  }

  /// Offset of the epilogue header: always the last word.
  pub fn epilogue(&self) -> usize {
    self.source.len() - WSIZE
  }

  #[inline]
  pub fn tag(
    &self,
    bp: usize,
  ) -> Tag {
    block::read_tag(self.bytes(), block::header(bp))
  }

  #[inline]
  pub fn size(
    &self,
    bp: usize,
  ) -> usize {
    self.tag(bp).size()
  }

  #[inline]
  pub fn is_allocated(
    &self,
    bp: usize,
  ) -> bool {
    self.tag(bp).is_allocated()
  }

  #[inline]
  pub fn next(
    &self,
    bp: usize,
  ) -> usize {
    block::next_block(self.bytes(), bp)
  }

  #[inline]
  pub fn prev(
    &self,
    bp: usize,
  ) -> usize {
    block::prev_block(self.bytes(), bp)
  }

  /// Rewrites both boundary tags of the block at `bp`.
  #[inline]
  pub fn set(
    &mut self,
    bp: usize,
    size: usize,
    allocated: bool,
  ) {
    block::write_block(self.bytes_mut(), bp, size, allocated);
  }

  pub fn payload(
    &self,
    bp: usize,
  ) -> &[u8] {
    let size = self.size(bp);
    &self.bytes()[bp..bp + size - DSIZE]
  }

  pub fn payload_mut(
    &mut self,
    bp: usize,
  ) -> &mut [u8] {
    let size = self.size(bp);
    &mut self.bytes_mut()[bp..bp + size - DSIZE]
  }

  /// Ordinary blocks in address order, sentinels excluded.
  pub fn blocks(&self) -> Blocks<'_, S> {
    Blocks {
      heap: self,
      cursor: self.first_block(),
    }
  }
}

pub struct Blocks<'a, S> {
  heap: &'a Heap<S>,
  cursor: usize,
}

impl<S: MemorySource> Iterator for Blocks<'_, S> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let bp = self.cursor;
    let (size, allocated) = self.heap.tag(bp).unpack();
    if size == 0 {
      return None;
    }

    self.cursor = bp + size;
    Some(BlockInfo {
      ptr: BlockPtr::new(bp),
      size,
      allocated,
    })
  }
}
