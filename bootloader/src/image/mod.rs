//! MM core image loading
//!
//! [`ImageLoader`] runs the image pipeline over the boot firmware volume:
//! locate the MM core, compute its layout, lock down its sections and, if
//! it does not sit at its linked address, relocate it.

pub mod firmware_volume;
pub mod pe_coff;
pub mod permissions;
pub mod relocation;

use sp_api::{BootError, Result};

use crate::ffa::MemoryAttributes;

pub use firmware_volume::{ImageLocation, locate_mm_core, volume_at};
pub use pe_coff::{ImageContext, ImageFormat, ImageLayout, SectionFlags, SectionHeader, compute_layout};
pub use permissions::apply_permissions;
pub use relocation::{ImageRelocator, PeCoffRelocator, RelocationError, relocate_if_needed};

/// The MM core after loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub context: ImageContext,
    pub layout: ImageLayout,
    /// Address of the first image byte
    pub data_address: u64,
    pub size: usize,
    /// Base relocations were applied
    pub relocated: bool,
}

impl LoadedImage {
    /// Entry point of the MM core
    pub fn entry_point(&self) -> Option<u64> {
        self.layout.address_of(self.context.entry_point_rva)
    }
}

/// Loads the MM core out of a firmware volume
pub struct ImageLoader<'a, A: ?Sized, R: ?Sized> {
    attributes: &'a A,
    relocator: &'a R,
    header_page_size: u64,
}

impl<'a, A, R> ImageLoader<'a, A, R>
where
    A: MemoryAttributes + ?Sized,
    R: ImageRelocator + ?Sized,
{
    pub fn new(attributes: &'a A, relocator: &'a R, header_page_size: u64) -> Self {
        Self {
            attributes,
            relocator,
            header_page_size,
        }
    }

    /// Load the MM core of `volume`, which sits at `volume_address`
    pub fn load(&self, volume: &mut [u8], volume_address: u64) -> Result<LoadedImage> {
        let location = locate_mm_core(volume)?;
        let image = volume
            .get_mut(location.offset..location.offset + location.size)
            .ok_or(BootError::ImageNotFound)?;
        let data_address = volume_address + location.offset as u64;

        let (mut context, layout) = compute_layout(image, data_address)?;
        apply_permissions(self.attributes, image, &layout)?;
        let relocated = relocate_if_needed(
            self.attributes,
            self.relocator,
            &mut context,
            &layout,
            image,
            data_address,
            self.header_page_size,
        )?;

        let loaded = LoadedImage {
            context,
            layout,
            data_address,
            size: location.size,
            relocated,
        };
        if let Some(entry) = loaded.entry_point() {
            log::info!("MM core entry point at {:#x}", entry);
        }
        Ok(loaded)
    }
}
