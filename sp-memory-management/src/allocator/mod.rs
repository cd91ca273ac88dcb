//! Memory allocator for the secure partition
//!
//! [`MemoryAllocator`] is created once, during bootstrap, over the heap region
//! named in the partition manifest. Every operation is keyed by
//! [`MemoryCategory`]; categories whose policy is
//! [`CategoryPolicy::Unbacked`](sp_api::CategoryPolicy::Unbacked) never
//! receive memory.
//!
//! Exhaustion is reported as `None`. Frees that do not match a prior
//! allocation are programming faults and panic.

pub mod page_pool;
pub mod pool;

use core::cmp;
use core::ptr::{self, NonNull};

use spin::Mutex;

use page_pool::PagePool;
use pool::BytePool;
use sp_api::{MemoryCategory, MemoryRange};

struct AllocatorState {
    pages: PagePool,
    pool: BytePool,
}

/// Page and pool allocator over the partition heap
pub struct MemoryAllocator {
    state: Mutex<AllocatorState>,
}

impl MemoryAllocator {
    /// Initialize the allocator over `range`
    ///
    /// # Safety
    ///
    /// `range` must be mapped, readable and writable memory that nothing else
    /// uses for as long as the allocator or any buffer it hands out is alive.
    pub unsafe fn new(range: MemoryRange) -> Self {
        log::info!(
            "Initializing memory services: {:#018x} - {:#018x}",
            range.base,
            range.size
        );
        Self {
            state: Mutex::new(AllocatorState {
                // SAFETY: forwarded from the caller.
                pages: unsafe { PagePool::new(range) },
                pool: BytePool::new(),
            }),
        }
    }

    /// Allocate `count` pages
    pub fn allocate_pages(&self, category: MemoryCategory, count: u64) -> Option<NonNull<u8>> {
        if !category.is_backed() {
            return None;
        }
        let base = self.state.lock().pages.allocate(count)?;
        to_ptr(base)
    }

    /// Allocate `count` pages aligned to `alignment` bytes
    ///
    /// # Panics
    ///
    /// If `alignment` is neither zero nor a power of two, or the request
    /// overflows.
    pub fn allocate_aligned_pages(
        &self,
        category: MemoryCategory,
        count: u64,
        alignment: u64,
    ) -> Option<NonNull<u8>> {
        if !category.is_backed() {
            return None;
        }
        let base = self.state.lock().pages.allocate_aligned(count, alignment)?;
        to_ptr(base)
    }

    /// Free pages returned by [`allocate_pages`](Self::allocate_pages) or
    /// [`allocate_aligned_pages`](Self::allocate_aligned_pages)
    ///
    /// # Panics
    ///
    /// If `(buffer, count)` does not exactly match an outstanding grant.
    pub fn free_pages(&self, buffer: NonNull<u8>, count: u64) {
        self.state
            .lock()
            .pages
            .free(buffer.as_ptr() as usize as u64, count);
    }

    /// Allocate `bytes` bytes of pool memory
    pub fn allocate_pool(&self, category: MemoryCategory, bytes: usize) -> Option<NonNull<u8>> {
        if !category.is_backed() {
            return None;
        }
        let mut state = self.state.lock();
        let AllocatorState { pages, pool } = &mut *state;
        // SAFETY: the page pool range satisfies the contract of `new`.
        unsafe { pool.allocate(pages, bytes as u64) }
    }

    /// Allocate `bytes` bytes of zero-filled pool memory
    pub fn allocate_zero_pool(&self, category: MemoryCategory, bytes: usize) -> Option<NonNull<u8>> {
        let buffer = self.allocate_pool(category, bytes)?;
        // SAFETY: `buffer` is a fresh allocation of at least `bytes` bytes.
        unsafe { ptr::write_bytes(buffer.as_ptr(), 0, bytes) };
        Some(buffer)
    }

    /// Allocate pool memory holding a copy of `source`
    pub fn allocate_copy_pool(&self, category: MemoryCategory, source: &[u8]) -> Option<NonNull<u8>> {
        let buffer = self.allocate_pool(category, source.len())?;
        // SAFETY: `buffer` is a fresh allocation of `source.len()` bytes and
        // cannot overlap a live slice.
        unsafe { ptr::copy_nonoverlapping(source.as_ptr(), buffer.as_ptr(), source.len()) };
        Some(buffer)
    }

    /// Grow or shrink a pool allocation
    ///
    /// The new buffer is zero-filled, then the first `min(old_size, new_size)`
    /// bytes of `old` are copied over and `old` is freed. On failure `old` is
    /// left untouched.
    ///
    /// # Safety
    ///
    /// If present, `old` must be a live pool allocation of at least
    /// `old_size` bytes.
    pub unsafe fn reallocate_pool(
        &self,
        category: MemoryCategory,
        old_size: usize,
        new_size: usize,
        old: Option<NonNull<u8>>,
    ) -> Option<NonNull<u8>> {
        let buffer = self.allocate_zero_pool(category, new_size)?;
        if let Some(old) = old {
            assert!(
                (old.as_ptr() as usize).checked_add(old_size).is_some(),
                "reallocation source {:p} + {:#x} wraps",
                old,
                old_size
            );
            // SAFETY: the caller guarantees `old` is live for `old_size` bytes
            // and `buffer` is a fresh allocation of `new_size` bytes, so the
            // two cannot overlap and `min(old_size, new_size)` bytes are in
            // bounds for both.
            unsafe {
                ptr::copy_nonoverlapping(old.as_ptr(), buffer.as_ptr(), cmp::min(old_size, new_size));
            }
            self.free_pool(old);
        }
        Some(buffer)
    }

    /// Free a pool allocation
    ///
    /// # Panics
    ///
    /// If `buffer` is not a live pool allocation.
    pub fn free_pool(&self, buffer: NonNull<u8>) {
        let mut state = self.state.lock();
        let AllocatorState { pages, pool } = &mut *state;
        // SAFETY: the page pool range satisfies the contract of `new`.
        unsafe { pool.free(pages, buffer) }
    }

    /// Number of free pages in the heap
    pub fn free_pages_count(&self) -> u64 {
        self.state.lock().pages.free_pages()
    }

    /// Number of pages in the heap
    pub fn total_pages(&self) -> u64 {
        self.state.lock().pages.total_pages()
    }

    /// Range served by the allocator
    pub fn range(&self) -> MemoryRange {
        self.state.lock().pages.range()
    }
}

fn to_ptr(base: u64) -> Option<NonNull<u8>> {
    NonNull::new(base as usize as *mut u8)
}
