//! Boundary-tag encoding and block navigation.
//!
//! ```text
//!   bp - WSIZE          bp                          bp + size - DSIZE
//!   ┌──────────┬────────────────────────────────────┬──────────┐
//!   │  header  │              payload               │  footer  │
//!   │ size | a │                                    │ size | a │
//!   └──────────┴────────────────────────────────────┴──────────┘
//! ```
//!
//! Every offset here is a byte offset into the arena; `bp` always names the
//! first payload byte of a block.

/// Size of a single boundary tag.
pub const WSIZE: usize = 4;

/// Double word: the payload alignment and the header + footer overhead.
pub const DSIZE: usize = 8;

/// Smallest block that can exist on its own: header, footer and one double word.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Largest block size a 32-bit tag can record.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX & !0x7) as usize;

const ALLOC_BIT: u32 = 0x1;
const SIZE_MASK: u32 = !0x7;

/// Handle to an allocated block: the offset of its payload in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(usize);

impl BlockPtr {
  pub(crate) const fn new(bp: usize) -> Self {
    Self(bp)
  }

  pub const fn offset(self) -> usize {
    self.0
  }
}

/// A decoded block as seen while walking the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  pub ptr: BlockPtr,
  pub size: usize,
  pub allocated: bool,
}

/// A packed `(size, allocated)` boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag(u32);

impl Tag {
  /// Packs a size and an allocation bit. `size` must be a multiple of 8 that
  /// fits in 32 bits.
  pub const fn pack(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size % DSIZE == 0);
    debug_assert!(size <= u32::MAX as usize);
    Self(size as u32 | allocated as u32)
  }

  pub const fn from_bits(bits: u32) -> Self {
    Self(bits)
  }

  pub const fn bits(self) -> u32 {
    self.0
  }

  pub const fn size(self) -> usize {
    (self.0 & SIZE_MASK) as usize
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOC_BIT != 0
  }

  pub const fn unpack(self) -> (usize, bool) {
    (self.size(), self.is_allocated())
  }
}

/// Reads the tag word stored at `offset`.
#[inline]
pub fn read_tag(
  arena: &[u8],
  offset: usize,
) -> Tag {
  let mut word = [0u8; WSIZE];
  word.copy_from_slice(&arena[offset..offset + WSIZE]);
  Tag::from_bits(u32::from_ne_bytes(word))
}

/// Writes `tag` at `offset`.
#[inline]
pub fn write_tag(
  arena: &mut [u8],
  offset: usize,
  tag: Tag,
) {
  arena[offset..offset + WSIZE].copy_from_slice(&tag.bits().to_ne_bytes());
}

#[inline]
pub const fn header(bp: usize) -> usize {
  bp - WSIZE
}

/// Footer offset of the block at `bp`; the size comes from its header.
#[inline]
pub fn footer(
  arena: &[u8],
  bp: usize,
) -> usize {
  bp + read_tag(arena, header(bp)).size() - DSIZE
}

/// Payload offset of the physically following block.
#[inline]
pub fn next_block(
  arena: &[u8],
  bp: usize,
) -> usize {
  bp + read_tag(arena, header(bp)).size()
}

/// Payload offset of the physically preceding block, found through the
/// footer that sits directly before this block's header.
#[inline]
pub fn prev_block(
  arena: &[u8],
  bp: usize,
) -> usize {
  bp - read_tag(arena, bp - DSIZE).size()
}

/// Writes matching header and footer tags for a block of `size` at `bp`.
#[inline]
pub fn write_block(
  arena: &mut [u8],
  bp: usize,
  size: usize,
  allocated: bool,
) {
  let tag = Tag::pack(size, allocated);
  write_tag(arena, header(bp), tag);
  write_tag(arena, bp + size - DSIZE, tag);
}
