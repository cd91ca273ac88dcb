//! Partition manifest parser
//!
//! Recovers the image description and the named memory regions from the
//! node compatible with the FF-A manifest identifier.

use sp_api::{BootError, BootInfo, ManifestFault, ManifestMissingKind, MemoryRange, Result};

use super::fdt::{ManifestNode, ManifestReader};
use crate::config::BootConfig;

/// Translation granule of the partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granule {
    Size4K,
    Size16K,
    Size64K,
}

impl Granule {
    /// Decode the `xlat-granule` property
    pub fn from_manifest(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Granule::Size4K),
            1 => Ok(Granule::Size16K),
            2 => Ok(Granule::Size64K),
            other => {
                log::error!("Invalid page type: {}", other);
                Err(BootError::ManifestMalformed(ManifestFault::UnknownGranule(other)))
            }
        }
    }

    /// Page size in bytes
    pub const fn page_size(self) -> u64 {
        match self {
            Granule::Size4K => 0x1000,
            Granule::Size16K => 0x4000,
            Granule::Size64K => 0x1_0000,
        }
    }
}

/// Image properties of the manifest node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescription {
    pub load_address: u64,
    pub entrypoint_offset: u32,
    pub image_size: u64,
    pub granule: Granule,
}

impl ImageDescription {
    /// Partition layout without a heap
    pub fn boot_info(&self) -> Result<BootInfo> {
        let sp_mem_base = self
            .load_address
            .checked_add(self.entrypoint_offset as u64)
            .ok_or_else(|| {
                log::error!(
                    "load-address {:#x} + entrypoint-offset {:#x} overflows",
                    self.load_address,
                    self.entrypoint_offset
                );
                BootError::ManifestMalformed(ManifestFault::OutOfBounds)
            })?;
        Ok(BootInfo {
            sp_mem_base,
            sp_mem_size: self.image_size,
            sp_heap_base: 0,
            sp_heap_size: 0,
        })
    }
}

/// Extracts the boot information from a manifest
pub struct ManifestParser<'a> {
    reader: ManifestReader<'a>,
    config: BootConfig,
}

impl<'a> ManifestParser<'a> {
    pub fn new(reader: ManifestReader<'a>, config: BootConfig) -> Self {
        Self { reader, config }
    }

    /// Node compatible with the configured manifest identifier
    pub fn manifest_node(&self) -> Result<ManifestNode> {
        self.reader
            .find_compatible(self.config.manifest_compatible)
            .map_err(super::unreadable)?
            .ok_or_else(|| {
                log::error!(
                    "No node compatible with {} in manifest",
                    self.config.manifest_compatible
                );
                BootError::ManifestMissing(ManifestMissingKind::NoManifestNode)
            })
    }

    /// Read the image properties, in manifest order
    pub fn image_description(&self) -> Result<ImageDescription> {
        let node = self.manifest_node()?;

        let load_address = self.reader.read_u64(node, "load-address")?;
        log::debug!("load-address = {:#x}", load_address);
        let entrypoint_offset = self.reader.read_u32(node, "entrypoint-offset")?;
        log::debug!("entrypoint-offset = {:#x}", entrypoint_offset);
        let image_size = self.reader.read_u64(node, "image-size")?;
        log::debug!("image-size = {:#x}", image_size);
        let granule = self.reader.read_u32(node, "xlat-granule")?;
        log::debug!("xlat-granule = {}", granule);

        Ok(ImageDescription {
            load_address,
            entrypoint_offset,
            image_size,
            granule: Granule::from_manifest(granule)?,
        })
    }

    /// Partition layout, heap not yet resolved
    pub fn parse(&self) -> Result<(BootInfo, Granule)> {
        let description = self.image_description()?;
        let info = description.boot_info()?;
        log::info!(
            "SP image: {:#x} - {:#x}, page size {:#x}",
            info.sp_mem_base,
            info.sp_mem_size,
            description.granule.page_size()
        );
        Ok((info, description.granule))
    }

    /// Memory region whose description matches `name`
    ///
    /// Descriptions are compared over the shorter of the two lengths. A
    /// missing region list is a manifest error; no match, or a first match
    /// without `base-address` and `pages-count`, is
    /// [`BootError::HeapRegionMissing`].
    pub fn find_region(&self, name: &[u8], page_size: u64) -> Result<MemoryRange> {
        let node = self.manifest_node()?;
        let regions = self
            .reader
            .subnode(node, self.config.memory_regions_node)?
            .ok_or_else(|| {
                log::error!(
                    "{}: Missing in FF-A boot information manifest",
                    self.config.memory_regions_node
                );
                BootError::ManifestMissing(ManifestMissingKind::NoMemoryRegions)
            })?;

        for region in self.reader.subnodes(regions) {
            let region = region?;
            if let Some(range) = self.read_region(region, name, page_size)? {
                log::info!("{}: {:#018x} - {:#018x}", DisplayBytes(name), range.base, range.size);
                return Ok(range);
            }
        }

        log::error!("Failed to read {} region", DisplayBytes(name));
        Err(BootError::HeapRegionMissing)
    }

    fn read_region(&self, region: ManifestNode, name: &[u8], page_size: u64) -> Result<Option<MemoryRange>> {
        let Some(description) = self.reader.property(region, "description")? else {
            return Ok(None);
        };
        let len = description.len().min(name.len());
        if description[..len] != name[..len] {
            return Ok(None);
        }

        let Some(base) = self.reader.u64_property(region, "base-address")? else {
            log::error!("base-address missing in manifest");
            return Err(BootError::HeapRegionMissing);
        };
        let Some(pages) = self.reader.u32_property(region, "pages-count")? else {
            log::error!("pages-count missing in manifest");
            return Err(BootError::HeapRegionMissing);
        };
        log::debug!("base-address = {:#x}, pages-count = {:#x}", base, pages);
        if pages == 0 {
            log::error!("{} region is empty", DisplayBytes(name));
            return Err(BootError::HeapRegionMissing);
        }

        let size = (pages as u64)
            .checked_mul(page_size)
            .ok_or_else(|| BootError::ManifestMalformed(ManifestFault::OutOfBounds))?;
        Ok(Some(MemoryRange::new(base, size)))
    }
}

struct DisplayBytes<'a>(&'a [u8]);

impl core::fmt::Display for DisplayBytes<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            write!(f, "{}", *byte as char)?;
        }
        Ok(())
    }
}
