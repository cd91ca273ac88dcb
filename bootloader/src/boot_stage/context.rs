//! Boot context passed to the modules started after the bootstrap

use sp_api::BootInfo;
use sp_memory_management::MemoryAllocator;

use crate::ffa::FfaVersion;
use crate::image::LoadedImage;

/// Everything the bootstrap learned about the partition
///
/// Built once by the orchestrator and only lent out afterwards.
pub struct BootContext {
    pub boot_info: BootInfo,
    /// Address of the partition manifest
    pub manifest_address: u64,
    /// FF-A version reported by the SPM
    pub ffa_version: FfaVersion,
    pub image: LoadedImage,
    /// Heap allocator; absent when the heap region is optional and missing
    pub allocator: Option<MemoryAllocator>,
}

impl BootContext {
    /// Heap allocator
    pub fn allocator(&self) -> Option<&MemoryAllocator> {
        self.allocator.as_ref()
    }
}

/// A module started once the partition is bootstrapped
#[cfg_attr(test, mockall::automock)]
pub trait ModuleEntry {
    /// Name for the boot log
    fn name(&self) -> &'static str;

    /// Run the module
    fn run(&self, context: &BootContext);
}
