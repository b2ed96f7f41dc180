//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate implements a classic **boundary-tag allocator** over one
//! contiguous, growable heap. It serves allocate/free/resize requests, merges
//! freed neighbors immediately, and finds free blocks through a pluggable
//! index and fit policy.
//!
//! ## Overview
//!
//! Every block carries its size and an allocation bit twice, in a header and a
//! footer. The footer lets the allocator step backwards to the previous block
//! without any side table, which is what makes constant-time coalescing work:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────┬──────────┬────────────────┬──────────────────────┬──────────┐
//!   │ pad │ prologue │   allocated    │        free          │ epilogue │
//!   │     │  (8, 1)  │ hdr│ data │ftr │ hdr│             │ftr │  (0, 1)  │
//!   └─────┴──────────┴────────────────┴──────────────────────┴──────────┘
//!                         ▲
//!                         └── BlockPtr returned to the caller
//!
//!   Freeing a block between two free neighbors:
//!
//!   [ free 32 ][ alloc 48 ][ free 64 ]   ─▶   [          free 144          ]
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary tags and block navigation
//!   ├── source     - Memory-growth primitive (VecSource, SbrkSource)
//!   ├── heap       - Sentinels and heap growth
//!   ├── index      - Free-block index (implicit, explicit, segregated)
//!   ├── fit        - Fit policies (first, next, best, worst)
//!   ├── coalesce   - Merging adjacent free blocks
//!   ├── allocator  - Allocator façade
//!   ├── config     - AllocatorConfig
//!   └── check      - Heap consistency checker and statistics
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Allocator, AllocatorConfig, FitPolicy, IndexKind};
//!
//! let config = AllocatorConfig::new(IndexKind::Segregated, FitPolicy::BestFit);
//! let mut allocator = Allocator::with_config(config).unwrap();
//!
//! let ptr = allocator.allocate(100).unwrap().unwrap();
//! allocator.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = allocator.resize(ptr, 400).unwrap().unwrap();
//! assert_eq!(&allocator.payload(ptr)[..5], b"hello");
//!
//! allocator.free(ptr);
//! allocator.check().unwrap();
//! ```
//!
//! ## Free-Block Index and Fit Policy
//!
//! Both are picked at construction through [`AllocatorConfig`]:
//!
//! | [`IndexKind`] | Structure                          | Insert          |
//! |---------------|------------------------------------|-----------------|
//! | `Implicit`    | none, scan every block             | nothing to do   |
//! | `Explicit`    | one doubly-linked list             | O(1), at head   |
//! | `Segregated`  | one list per power-of-two class    | sorted by size  |
//!
//! [`FitPolicy`] is one of first, next, best or worst fit.
//!
//! ## Memory Sources
//!
//! The heap grows through a [`MemorySource`]. [`VecSource`] is an in-process
//! byte buffer with a cap; [`SbrkSource`] moves the real program break with
//! `sbrk(2)` on unix.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: wrap the allocator in a mutex if needed
//! - **Never shrinks**: the heap only grows
//! - **Trusted callers**: freeing a pointer that is not live corrupts the heap
//! - **Always relocates on resize**: no in-place growth

pub mod align;
pub mod block;
pub mod coalesce;
pub mod fit;
pub mod heap;
pub mod index;
pub mod source;

mod allocator;
mod check;
mod config;
mod error;

pub use allocator::{Allocator, adjusted_size};
pub use block::{BlockInfo, BlockPtr};
pub use check::HeapStats;
pub use config::{AllocatorConfig, CHUNK_SIZE, LIST_LIMIT};
pub use error::{Corruption, HeapError, Result};
pub use fit::FitPolicy;
pub use index::IndexKind;
#[cfg(unix)]
pub use source::SbrkSource;
pub use source::{MemorySource, VecSource};
