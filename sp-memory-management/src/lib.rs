//! SP Memory Management
//!
//! Page-granular and byte-granular allocation for the secure partition.
//! The allocator is initialized exactly once from the heap region recovered
//! from the partition manifest and serves every later caller.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;

pub use allocator::MemoryAllocator;
pub use allocator::page_pool::PagePool;
pub use allocator::pool::BytePool;
pub use sp_api::{MemoryCategory, MemoryRange, PAGE_SIZE};
