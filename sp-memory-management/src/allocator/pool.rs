//! Byte-granular pool layered on the page pool
//!
//! Small requests are served from power-of-two size classes carved out of
//! single pages; anything larger than half a page gets its own page grant.
//! Every block starts with a [`PoolHeader`] so frees can be validated.

use core::mem::size_of;
use core::ptr::{self, NonNull};

use static_assertions::const_assert_eq;

use super::page_pool::PagePool;
use sp_api::{PAGE_SIZE, size_to_pages};

const POOL_HEAD_SIGNATURE: u32 = u32::from_le_bytes(*b"sphd");
const POOL_FREE_SIGNATURE: u32 = u32::from_le_bytes(*b"spfr");

/// Class marker for allocations backed by their own page grant
const LARGE_CLASS: u32 = u32::MAX;

const MIN_BLOCK_SHIFT: u32 = 5;
const CLASS_COUNT: usize = 7;
const MAX_BLOCK_SIZE: u64 = 1 << (MIN_BLOCK_SHIFT as usize + CLASS_COUNT - 1);

#[repr(C)]
#[derive(Clone, Copy)]
struct PoolHeader {
    signature: u32,
    class: u32,
    size: u64,
}

const HEADER_SIZE: u64 = size_of::<PoolHeader>() as u64;
const_assert_eq!(HEADER_SIZE, 16);
const_assert_eq!(MAX_BLOCK_SIZE, PAGE_SIZE / 2);

/// Size-class pool allocator
pub struct BytePool {
    /// Head of each class free list, zero when empty
    free_lists: [u64; CLASS_COUNT],
}

impl Default for BytePool {
    fn default() -> Self {
        Self::new()
    }
}

impl BytePool {
    /// Create an empty pool; pages are pulled from the page pool on demand
    pub const fn new() -> Self {
        Self {
            free_lists: [0; CLASS_COUNT],
        }
    }

    /// Allocate `bytes` bytes
    ///
    /// A zero-byte request yields a valid, unique pointer.
    ///
    /// # Safety
    ///
    /// The range managed by `pages` must be mapped, writable memory owned
    /// exclusively by this allocator.
    pub unsafe fn allocate(&mut self, pages: &mut PagePool, bytes: u64) -> Option<NonNull<u8>> {
        let total = bytes.checked_add(HEADER_SIZE)?;

        let (block, class) = if total > MAX_BLOCK_SIZE {
            (pages.allocate(size_to_pages(total))?, LARGE_CLASS)
        } else {
            let class = class_for(total);
            if self.free_lists[class] == 0 {
                unsafe { self.refill(pages, class)? };
            }
            (unsafe { self.pop(class) }, class as u32)
        };

        unsafe {
            write_header(
                block,
                PoolHeader {
                    signature: POOL_HEAD_SIGNATURE,
                    class,
                    size: bytes,
                },
            );
        }
        NonNull::new((block + HEADER_SIZE) as usize as *mut u8)
    }

    /// Return an allocation to the pool
    ///
    /// # Panics
    ///
    /// If `buffer` does not point at a live pool allocation.
    ///
    /// # Safety
    ///
    /// Same contract as [`BytePool::allocate`].
    pub unsafe fn free(&mut self, pages: &mut PagePool, buffer: NonNull<u8>) {
        let block = (buffer.as_ptr() as usize as u64)
            .checked_sub(HEADER_SIZE)
            .filter(|block| pages.range().contains(*block, HEADER_SIZE));
        let block = match block {
            Some(block) => block,
            None => panic!("free of {:p} outside the pool", buffer),
        };

        let header = unsafe { read_header(block) };
        if header.signature != POOL_HEAD_SIGNATURE {
            panic!("free of {:p}: no live pool allocation (signature {:#x})", buffer, header.signature);
        }

        if header.class == LARGE_CLASS {
            unsafe {
                write_header(block, PoolHeader { signature: 0, ..header });
            }
            pages.free(block, size_to_pages(header.size + HEADER_SIZE));
        } else if (header.class as usize) < CLASS_COUNT {
            unsafe { self.push(header.class as usize, block) };
        } else {
            panic!("free of {:p}: corrupt pool class {}", buffer, header.class);
        }
    }

    unsafe fn refill(&mut self, pages: &mut PagePool, class: usize) -> Option<()> {
        let page = pages.allocate(1)?;
        let block_size = block_size(class);
        log::trace!("pool class {} refilled from page {:#x}", block_size, page);
        for index in (0..PAGE_SIZE / block_size).rev() {
            unsafe { self.push(class, page + index * block_size) };
        }
        Some(())
    }

    unsafe fn push(&mut self, class: usize, block: u64) {
        unsafe {
            write_header(
                block,
                PoolHeader {
                    signature: POOL_FREE_SIGNATURE,
                    class: class as u32,
                    size: 0,
                },
            );
            ptr::write((block + HEADER_SIZE) as usize as *mut u64, self.free_lists[class]);
        }
        self.free_lists[class] = block;
    }

    unsafe fn pop(&mut self, class: usize) -> u64 {
        let block = self.free_lists[class];
        let header = unsafe { read_header(block) };
        assert!(
            header.signature == POOL_FREE_SIGNATURE && header.class == class as u32,
            "pool free list corrupted at {:#x}",
            block
        );
        self.free_lists[class] = unsafe { ptr::read((block + HEADER_SIZE) as usize as *const u64) };
        block
    }
}

fn block_size(class: usize) -> u64 {
    1 << (MIN_BLOCK_SHIFT as usize + class)
}

fn class_for(total: u64) -> usize {
    (0..CLASS_COUNT)
        .find(|class| block_size(*class) >= total)
        .unwrap_or(CLASS_COUNT - 1)
}

unsafe fn read_header(block: u64) -> PoolHeader {
    unsafe { ptr::read(block as usize as *const PoolHeader) }
}

unsafe fn write_header(block: u64, header: PoolHeader) {
    unsafe { ptr::write(block as usize as *mut PoolHeader, header) }
}
