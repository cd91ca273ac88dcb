//! Memory categories and page arithmetic

/// Page size used by the partition allocator (4KB)
pub const PAGE_SIZE: u64 = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: u64 = 12;

/// Number of pages needed to hold `size` bytes
#[inline]
pub const fn size_to_pages(size: u64) -> u64 {
    (size >> PAGE_SHIFT) + if size & (PAGE_SIZE - 1) != 0 { 1 } else { 0 }
}

/// Size in bytes of `pages` pages
#[inline]
pub const fn pages_to_size(pages: u64) -> u64 {
    pages << PAGE_SHIFT
}

/// Memory categories callers may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MemoryCategory {
    /// Runtime services data, backed by the partition heap
    Runtime = 0,
    /// Reserved memory, never backed inside a secure partition
    Reserved = 1,
}

/// How the allocator treats a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryPolicy {
    /// Requests are served from the allocation pool
    Backed,
    /// Requests always yield no allocation
    Unbacked,
}

/// Category policy table. Only runtime memory exists in this environment.
const CATEGORY_POLICY: [(MemoryCategory, CategoryPolicy); 2] = [
    (MemoryCategory::Runtime, CategoryPolicy::Backed),
    (MemoryCategory::Reserved, CategoryPolicy::Unbacked),
];

impl MemoryCategory {
    /// Allocation policy for this category
    pub fn policy(self) -> CategoryPolicy {
        CATEGORY_POLICY
            .iter()
            .find(|(category, _)| *category == self)
            .map(|(_, policy)| *policy)
            .unwrap_or(CategoryPolicy::Unbacked)
    }

    /// Whether allocations of this category are backed by real memory
    pub fn is_backed(self) -> bool {
        self.policy() == CategoryPolicy::Backed
    }
}
