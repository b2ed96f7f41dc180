use crate::{
  align,
  block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE},
  fit::FitPolicy,
  index::IndexKind,
};

/// Default heap growth: one 4 KiB chunk.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Default number of segregated size classes.
pub const LIST_LIMIT: usize = 20;

/// Configuration for [`Allocator`](crate::Allocator). Chosen once, at
/// construction; every index and policy combination is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
  /// How free blocks are tracked. Default: explicit list.
  pub index: IndexKind,

  /// How a free block is picked. Default: first fit.
  pub fit: FitPolicy,

  /// Minimum number of bytes the heap grows by when nothing fits.
  /// Rounded up to a double word. Default: 4096.
  pub chunk_size: usize,

  /// Size classes of the segregated index; ignored by the others.
  /// Default: 20.
  pub bucket_count: usize,
}

impl Default for AllocatorConfig {
  fn default() -> Self {
    Self {
      index: IndexKind::Explicit,
      fit: FitPolicy::FirstFit,
      chunk_size: CHUNK_SIZE,
      bucket_count: LIST_LIMIT,
    }
  }
}

impl AllocatorConfig {
  pub fn new(
    index: IndexKind,
    fit: FitPolicy,
  ) -> Self {
    Self {
      index,
      fit,
      ..Self::default()
    }
  }

  #[must_use]
  pub fn with_index(
    mut self,
    index: IndexKind,
  ) -> Self {
    self.index = index;
    self
  }

  #[must_use]
  pub fn with_fit(
    mut self,
    fit: FitPolicy,
  ) -> Self {
    self.fit = fit;
    self
  }

  #[must_use]
  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  #[must_use]
  pub fn with_bucket_count(
    mut self,
    bucket_count: usize,
  ) -> Self {
    self.bucket_count = bucket_count;
    self
  }

  /// Clamps the tunables into the range the heap can honour.
  pub(crate) fn normalized(self) -> Self {
    Self {
      chunk_size: align!(self.chunk_size.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)),
      bucket_count: self.bucket_count.max(1),
      ..self
    }
  }
}
