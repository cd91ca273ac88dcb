//! Page pool
//!
//! Tracks the heap region one bit per page. Two bitmaps live in the first
//! pages of the managed range: `used` marks granted pages and `head` marks
//! the first page of each grant, so frees can be checked against the exact
//! grant they return. The bookkeeping scales with the heap and needs no
//! allocator of its own.

use core::mem::size_of;
use core::ptr;
use core::slice;

use sp_api::{MemoryRange, PAGE_SIZE, pages_to_size, size_to_pages};

const BITS_PER_WORD: u64 = u64::BITS as u64;

/// Page allocator over a single memory range
pub struct PagePool {
    /// Pages handed out by the pool, after the bitmaps
    range: MemoryRange,
    /// Address of the `used` bitmap; `head` follows it
    bitmap: usize,
    /// Words in each bitmap
    words: usize,
    free_pages: u64,
}

impl PagePool {
    /// Create a pool over the page-aligned part of `range`
    ///
    /// The leading pages of the range hold the pool's bitmaps and are never
    /// handed out.
    ///
    /// # Safety
    ///
    /// `range` must be mapped, writable memory that nothing else uses for as
    /// long as the pool is alive.
    pub unsafe fn new(range: MemoryRange) -> Self {
        let base = align_up(range.base);
        let end = range.end().map(align_down).unwrap_or(align_down(u64::MAX));
        let pages = match base {
            Some(base) if end > base => (end - base) / PAGE_SIZE,
            _ => 0,
        };
        let base = base.unwrap_or(range.base);

        let words = pages.div_ceil(BITS_PER_WORD);
        let meta_pages = size_to_pages(2 * words * size_of::<u64>() as u64);
        let usable = pages.saturating_sub(meta_pages);

        if usable > 0 {
            // SAFETY: the bitmaps fit in the leading `meta_pages` pages, which
            // the caller hands over to the pool.
            unsafe { ptr::write_bytes(base as usize as *mut u64, 0, 2 * words as usize) };
        }

        let pool = Self {
            range: MemoryRange::new(base + pages_to_size(meta_pages.min(pages)), pages_to_size(usable)),
            bitmap: base as usize,
            words: words as usize,
            free_pages: usable,
        };

        log::debug!(
            "Page pool: {:#x} - {:#x} ({} pages, {} for bookkeeping)",
            pool.range.base,
            pool.range.base + pool.range.size,
            usable,
            meta_pages.min(pages)
        );

        pool
    }

    /// Range handed out by this pool
    pub fn range(&self) -> MemoryRange {
        self.range
    }

    /// Allocate `pages` pages anywhere in the pool
    ///
    /// Returns `None` when `pages` is zero or no free window is large enough.
    pub fn allocate(&mut self, pages: u64) -> Option<u64> {
        if pages == 0 {
            return None;
        }
        let index = self.find_free(pages)?;
        self.grant(index, pages);
        Some(self.address(index))
    }

    /// Allocate `pages` pages whose base is a multiple of `alignment`
    ///
    /// # Panics
    ///
    /// If `alignment` is neither zero nor a power of two, or if the
    /// over-allocation needed to satisfy it overflows.
    pub fn allocate_aligned(&mut self, pages: u64, alignment: u64) -> Option<u64> {
        assert!(
            alignment == 0 || alignment.is_power_of_two(),
            "alignment {:#x} is not a power of two",
            alignment
        );
        if pages == 0 {
            return None;
        }
        if alignment <= PAGE_SIZE {
            return self.allocate(pages);
        }

        let real_pages = match pages.checked_add(size_to_pages(alignment)) {
            Some(real) => real,
            None => panic!("{} pages at alignment {:#x} overflows", pages, alignment),
        };
        let memory = self.address(self.find_free(real_pages)?);

        let mask = alignment - 1;
        let aligned = match memory.checked_add(mask) {
            Some(value) => value & !mask,
            None => panic!("aligning {:#x} to {:#x} overflows", memory, alignment),
        };

        // Only the aligned part is marked, the slack around it stays free.
        self.grant((aligned - self.range.base) / PAGE_SIZE, pages);
        Some(aligned)
    }

    /// Return a grant to the pool
    ///
    /// # Panics
    ///
    /// If `(base, pages)` is not exactly an outstanding grant.
    pub fn free(&mut self, base: u64, pages: u64) {
        let index = match self.grant_index(base, pages) {
            Some(index) => index,
            None => panic!(
                "free of {:#x} ({} pages) does not match any allocation",
                base, pages
            ),
        };

        let (used, head) = self.bitmaps_mut();
        set_bit(head, index, false);
        for page in index..index + pages {
            set_bit(used, page, false);
        }
        self.free_pages += pages;
        log::trace!("released {:#x} - {:#x}", base, base + pages_to_size(pages));
    }

    /// Number of free pages
    pub fn free_pages(&self) -> u64 {
        self.free_pages
    }

    /// Number of pages the pool can hand out
    pub fn total_pages(&self) -> u64 {
        self.range.size / PAGE_SIZE
    }

    /// Whether `(base, pages)` is an outstanding grant
    pub fn is_granted(&self, base: u64, pages: u64) -> bool {
        self.grant_index(base, pages).is_some()
    }

    fn address(&self, index: u64) -> u64 {
        self.range.base + pages_to_size(index)
    }

    /// Lowest index of the highest window of `pages` free pages
    fn find_free(&self, pages: u64) -> Option<u64> {
        if pages > self.free_pages {
            return None;
        }
        let (used, _) = self.bitmaps();
        let mut run = 0;
        let mut index = self.total_pages();
        while index > 0 {
            index -= 1;
            if index % BITS_PER_WORD == BITS_PER_WORD - 1
                && used[(index / BITS_PER_WORD) as usize] == u64::MAX
            {
                run = 0;
                index -= BITS_PER_WORD - 1;
                continue;
            }
            if test_bit(used, index) {
                run = 0;
            } else {
                run += 1;
                if run == pages {
                    return Some(index);
                }
            }
        }
        None
    }

    fn grant(&mut self, index: u64, pages: u64) {
        let (used, head) = self.bitmaps_mut();
        set_bit(head, index, true);
        for page in index..index + pages {
            set_bit(used, page, true);
        }
        self.free_pages -= pages;
        let base = self.address(index);
        log::trace!("carved {:#x} - {:#x}", base, base + pages_to_size(pages));
    }

    /// Page index of the grant `(base, pages)`, if it is outstanding
    fn grant_index(&self, base: u64, pages: u64) -> Option<u64> {
        let offset = base.checked_sub(self.range.base)?;
        if pages == 0 || offset % PAGE_SIZE != 0 {
            return None;
        }
        let index = offset / PAGE_SIZE;
        let end = index.checked_add(pages)?;
        if end > self.total_pages() {
            return None;
        }

        let (used, head) = self.bitmaps();
        let whole = test_bit(head, index)
            && (index..end).all(|page| test_bit(used, page))
            && (index + 1..end).all(|page| !test_bit(head, page));
        let ends_here =
            end == self.total_pages() || !test_bit(used, end) || test_bit(head, end);
        (whole && ends_here).then_some(index)
    }

    fn bitmaps(&self) -> (&[u64], &[u64]) {
        if self.total_pages() == 0 {
            return (&[], &[]);
        }
        // SAFETY: `new` reserved and zeroed `2 * words` words at `bitmap`, and
        // the pool owns them for its lifetime.
        let words = unsafe { slice::from_raw_parts(self.bitmap as *const u64, 2 * self.words) };
        words.split_at(self.words)
    }

    fn bitmaps_mut(&mut self) -> (&mut [u64], &mut [u64]) {
        if self.total_pages() == 0 {
            return (&mut [], &mut []);
        }
        // SAFETY: as in `bitmaps`; `&mut self` makes the access exclusive.
        let words = unsafe { slice::from_raw_parts_mut(self.bitmap as *mut u64, 2 * self.words) };
        words.split_at_mut(self.words)
    }
}

fn test_bit(bits: &[u64], index: u64) -> bool {
    bits[(index / BITS_PER_WORD) as usize] & (1 << (index % BITS_PER_WORD)) != 0
}

fn set_bit(bits: &mut [u64], index: u64, value: bool) {
    let word = &mut bits[(index / BITS_PER_WORD) as usize];
    let mask = 1 << (index % BITS_PER_WORD);
    if value {
        *word |= mask;
    } else {
        *word &= !mask;
    }
}

fn align_up(addr: u64) -> Option<u64> {
    addr.checked_add(PAGE_SIZE - 1).map(align_down)
}

fn align_down(addr: u64) -> u64 {
    addr & !(PAGE_SIZE - 1)
}
