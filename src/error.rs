use thiserror::Error;

/// Errors that can occur while growing or allocating from the heap.
///
/// Every error leaves the heap exactly as it was before the failing call.
#[derive(Debug, Error)]
pub enum HeapError {
  /// The memory source reached its cap, or the heap would outgrow what a
  /// 32-bit tag can describe.
  #[error("out of memory: cannot grow the heap by {requested} bytes (limit {limit} bytes)")]
  OutOfMemory { requested: usize, limit: usize },

  /// `sbrk` refused to move the program break.
  #[error("sbrk refused to grow the heap by {requested} bytes")]
  Sbrk {
    requested: usize,
    #[source]
    source: std::io::Error,
  },

  /// Someone else moved the program break between two of our grants.
  #[error("heap grant is not contiguous: expected {expected:#x}, got {actual:#x}")]
  NonContiguous { expected: usize, actual: usize },

  /// The request cannot be represented in a boundary tag.
  #[error("request of {requested} bytes is too large for a block")]
  Overflow { requested: usize },
}

pub type Result<T> = core::result::Result<T, HeapError>;

/// Inconsistencies reported by the heap checker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
  #[error("prologue block is damaged")]
  BadPrologue,

  #[error("epilogue is missing or not the last word of the heap")]
  BadEpilogue,

  #[error("block at {bp} has header {header:#x} but footer {footer:#x}")]
  TagMismatch { bp: usize, header: u32, footer: u32 },

  #[error("block at {bp} has invalid size {size}")]
  BadSize { bp: usize, size: usize },

  #[error("payload at {bp} is not double-word aligned")]
  Misaligned { bp: usize },

  #[error("blocks at {first} and {second} are both free")]
  Uncoalesced { first: usize, second: usize },

  #[error("block sizes add up to {counted} bytes, heap holds {heap_size}")]
  SizeMismatch { counted: usize, heap_size: usize },

  #[error("free block at {bp} is not in the free index")]
  Unindexed { bp: usize },

  #[error("free index entry {bp} is not a free block")]
  StaleEntry { bp: usize },

  #[error("free index lists {bp} more than once")]
  Duplicate { bp: usize },

  #[error("free index links around {bp} are inconsistent")]
  BrokenLink { bp: usize },

  #[error("block at {bp} sits in bucket {found}, expected {expected}")]
  WrongBucket { bp: usize, found: usize, expected: usize },

  #[error("bucket {bucket} is out of size order at {bp}")]
  Unordered { bucket: usize, bp: usize },
}
