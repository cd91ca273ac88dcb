//! Bootstrap orchestration
//!
//! Sequences the boot steps:
//! 1. FF-A version negotiation
//! 2. manifest lookup through the boot information blob
//! 3. manifest parsing
//! 4. MM core loading
//! 5. heap allocator setup
//!
//! Each step returns a [`Result`]; the first error ends the boot and is
//! turned into an exit code in [`BootstrapOrchestrator::run`].

use sp_api::{BootError, MemoryRange, Result, Status};
use sp_memory_management::MemoryAllocator;

use super::context::{BootContext, ModuleEntry};
use crate::config::{BootConfig, HeapRegionPolicy};
use crate::ffa::{FfaConduit, FfaVersion, MemoryAttributes, VersionNegotiator};
use crate::image::{ImageLoader, ImageRelocator, volume_at};
use crate::manifest::{ManifestParser, ManifestReader, unreadable};
use crate::protocol::BootInfoLocator;

/// How the bootstrap ended when nothing failed
pub enum BootOutcome {
    /// The partition is ready for the downstream modules
    Started(BootContext),
    /// The SPM only offers an older minor version; the legacy
    /// initialization path has to take over
    LegacyInterface(FfaVersion),
}

/// Drives the bootstrap of the partition
pub struct BootstrapOrchestrator<'a, C: ?Sized, A: ?Sized, R: ?Sized> {
    conduit: &'a C,
    attributes: &'a A,
    relocator: &'a R,
    config: BootConfig,
}

impl<'a, C, A, R> BootstrapOrchestrator<'a, C, A, R>
where
    C: FfaConduit + ?Sized,
    A: MemoryAttributes + ?Sized,
    R: ImageRelocator + ?Sized,
{
    /// Create an orchestrator
    ///
    /// # Arguments
    /// * `conduit` - transport into the SPM
    /// * `attributes` - page permission updates
    /// * `relocator` - base relocation of the MM core
    /// * `config` - bootstrap configuration
    pub fn new(conduit: &'a C, attributes: &'a A, relocator: &'a R, config: BootConfig) -> Self {
        Self {
            conduit,
            attributes,
            relocator,
            config,
        }
    }

    /// Run the bootstrap steps
    ///
    /// # Safety
    ///
    /// `boot_info_address` must be zero or point at the boot information
    /// blob handed over by the SPM. The manifest, firmware volume and heap
    /// region it leads to must be mapped and owned by this partition.
    pub unsafe fn bootstrap(&self, boot_info_address: u64) -> Result<BootOutcome> {
        let negotiation = VersionNegotiator::new(self.conduit, self.config.ffa_version)
            .negotiate()
            .map_err(|error| {
                log::error!("FF-A version query failed: {:?}", error);
                BootError::VersionQueryFailed(error)
            })?;
        if !negotiation.compatible {
            log::error!("Incompatible FF-A version {}", negotiation.peer);
            return Err(BootError::VersionIncompatible {
                local_major: self.config.ffa_version.major,
                peer_major: negotiation.peer.major,
            });
        }
        if !negotiation.full_capability_set {
            log::warn!(
                "SPM offers FF-A {}, {} required for FF-A only boot",
                negotiation.peer,
                self.config.ffa_version
            );
            return Ok(BootOutcome::LegacyInterface(negotiation.peer));
        }

        // SAFETY: forwarded from the caller.
        let manifest_address = unsafe { BootInfoLocator::from_address(boot_info_address) }?
            .locate_manifest()?;

        let reader =
            unsafe { ManifestReader::from_address(manifest_address) }.map_err(unreadable)?;
        let parser = ManifestParser::new(reader, self.config);
        let (mut boot_info, granule) = parser.parse()?;

        let volume = unsafe { volume_at(boot_info.sp_mem_base) }?;
        let image = ImageLoader::new(self.attributes, self.relocator, self.config.header_page_size)
            .load(volume, boot_info.sp_mem_base)?;

        let allocator = match self.heap_region(&parser, granule.page_size())? {
            Some(range) => {
                boot_info.sp_heap_base = range.base;
                boot_info.sp_heap_size = range.size;
                // SAFETY: the manifest assigns the heap region to this
                // partition alone.
                Some(unsafe { MemoryAllocator::new(range) })
            }
            None => None,
        };

        log::info!("SP bootstrap complete");
        Ok(BootOutcome::Started(BootContext {
            boot_info,
            manifest_address,
            ffa_version: negotiation.peer,
            image,
            allocator,
        }))
    }

    /// Run the bootstrap, then every module in `modules`
    ///
    /// # Returns
    /// The exit code reported to the SPM
    ///
    /// # Safety
    ///
    /// Same contract as [`bootstrap`](Self::bootstrap).
    pub unsafe fn run(&self, boot_info_address: u64, modules: &[&dyn ModuleEntry]) -> i32 {
        let status = match unsafe { self.bootstrap(boot_info_address) } {
            Ok(BootOutcome::Started(context)) => {
                for module in modules {
                    log::info!("Starting {}", module.name());
                    module.run(&context);
                }
                Status::Success
            }
            Ok(BootOutcome::LegacyInterface(_)) => Status::Success,
            Err(error) => {
                log::error!("{}", error);
                error.status()
            }
        };
        status.exit_code()
    }

    fn heap_region(&self, parser: &ManifestParser<'_>, page_size: u64) -> Result<Option<MemoryRange>> {
        match parser.find_region(self.config.heap_region, page_size) {
            Ok(range) => Ok(Some(range)),
            Err(BootError::HeapRegionMissing) if self.config.heap_policy == HeapRegionPolicy::Optional => {
                log::warn!("No heap region in manifest, booting without an allocator");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}
