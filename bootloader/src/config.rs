//! Bootstrap configuration
//!
//! Constants the bootstrap is built with. The defaults describe a standalone
//! MM partition speaking FF-A v1.1 with its heap in a manifest region called
//! `heap`.

use crate::ffa::FfaVersion;

/// What to do when the manifest carries no heap region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapRegionPolicy {
    /// Abort the boot (`memory-regions` absent: invalid parameter, heap
    /// entry absent: unsupported)
    Required,
    /// Log a warning and boot without an allocator
    Optional,
}

/// Bootstrap configuration
#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    /// FF-A version advertised to the SPM
    pub ffa_version: FfaVersion,
    /// Compatible string of the manifest node holding the image description
    pub manifest_compatible: &'static str,
    /// Name of the node listing the partition memory regions
    pub memory_regions_node: &'static str,
    /// Description of the region backing the allocator
    pub heap_region: &'static [u8],
    /// Policy for a missing heap region
    pub heap_policy: HeapRegionPolicy,
    /// Size of the header page unlocked while relocating the image
    pub header_page_size: u64,
}

impl BootConfig {
    /// Default configuration
    pub const fn new() -> Self {
        Self {
            ffa_version: FfaVersion::V1_1,
            manifest_compatible: "arm,ffa-manifest-1.0",
            memory_regions_node: "memory-regions",
            heap_region: b"heap",
            heap_policy: HeapRegionPolicy::Required,
            header_page_size: 0x1000,
        }
    }

    /// Same configuration with a different heap policy
    pub const fn with_heap_policy(mut self, policy: HeapRegionPolicy) -> Self {
        self.heap_policy = policy;
        self
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::new()
    }
}
