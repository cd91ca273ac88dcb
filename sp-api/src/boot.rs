//! Boot information
//!
//! Memory layout of the partition as described by the SPM manifest.

use static_assertions::const_assert_eq;

/// Derived memory layout of the secure partition.
///
/// Built once per boot from the manifest and never modified afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct BootInfo {
    /// Address of the boot firmware volume (`load-address + entrypoint-offset`)
    pub sp_mem_base: u64,
    /// Size of the partition image in bytes
    pub sp_mem_size: u64,
    /// Base of the heap region, zero when the manifest carries none
    pub sp_heap_base: u64,
    /// Size of the heap region in bytes
    pub sp_heap_size: u64,
}

const_assert_eq!(core::mem::size_of::<BootInfo>(), 32);

impl BootInfo {
    /// Heap region as a memory range, if the manifest described one
    pub fn heap(&self) -> Option<MemoryRange> {
        if self.sp_heap_size == 0 {
            return None;
        }
        Some(MemoryRange::new(self.sp_heap_base, self.sp_heap_size))
    }

    /// Image region as a memory range
    pub fn image(&self) -> MemoryRange {
        MemoryRange::new(self.sp_mem_base, self.sp_mem_size)
    }
}

/// A contiguous range of addresses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryRange {
    /// First address of the range
    pub base: u64,
    /// Length in bytes
    pub size: u64,
}

impl MemoryRange {
    /// Create a new range
    pub const fn new(base: u64, size: u64) -> Self {
        Self { base, size }
    }

    /// One past the last address, or `None` if the range wraps the address space
    pub const fn end(&self) -> Option<u64> {
        self.base.checked_add(self.size)
    }

    /// Whether `[addr, addr + len)` lies inside this range
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        match (self.end(), addr.checked_add(len)) {
            (Some(end), Some(last)) => addr >= self.base && last <= end,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_absent_when_size_zero() {
        let info = BootInfo {
            sp_mem_base: 0x1040,
            sp_mem_size: 0x2000,
            ..Default::default()
        };
        assert_eq!(info.heap(), None);
        assert_eq!(info.image(), MemoryRange::new(0x1040, 0x2000));
    }

    #[test]
    fn test_range_contains() {
        let range = MemoryRange::new(0x8000_0000, 0x1_0000);
        assert!(range.contains(0x8000_0000, 0x1_0000));
        assert!(range.contains(0x8000_f000, 0x1000));
        assert!(!range.contains(0x8000_f000, 0x1001));
        assert!(!range.contains(0x7fff_f000, 0x10));
        assert!(!range.contains(u64::MAX, 2));
    }
}
