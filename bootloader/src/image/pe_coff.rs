//! PE32(+) and TE image headers
//!
//! A TE image is a PE image whose DOS, PE and optional headers were replaced
//! by a 40-byte header. Its section RVAs still count from the start of the
//! stripped PE headers, so the image data begins `StrippedSize - 40` bytes
//! after the address the RVAs are relative to.

use bitflags::bitflags;
use sp_api::{BootError, ImageFault, Result};

use crate::utils::bytes::{le_u16, le_u32, le_u64};

/// `MZ`
pub const EFI_IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;
/// `PE\0\0`
pub const EFI_IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;
/// `VZ`
pub const EFI_TE_IMAGE_HEADER_SIGNATURE: u16 = 0x5A56;

pub const EFI_IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10B;
pub const EFI_IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20B;

/// COFF characteristics: relocation information stripped
pub const EFI_IMAGE_FILE_RELOCS_STRIPPED: u16 = 0x0001;

pub const TE_HEADER_SIZE: usize = 40;
pub const SECTION_HEADER_SIZE: usize = 40;

const DOS_LFANEW_OFFSET: usize = 0x3C;
const COFF_HEADER_OFFSET: usize = 4;
const OPTIONAL_HEADER_OFFSET: usize = 24;

bitflags! {
    /// Section characteristics relevant to page permissions
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const CNT_CODE = 0x0000_0020;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

/// Header variant of the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Te,
    Pe32,
    Pe32Plus,
}

/// Data directory entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

/// What relocation needs to know about the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageContext {
    /// Where the image headers expect the image data to sit. Updated to the
    /// real data address before relocating.
    pub image_address: u64,
    /// `ImageBase` field of the headers
    pub image_base: u64,
    pub format: ImageFormat,
    /// Bytes between the RVA origin and the first byte of image data
    pub header_adjust: u64,
    /// Offset of the `ImageBase` field inside the image data
    pub image_base_offset: usize,
    pub entry_point_rva: u32,
    pub reloc_dir: DataDirectory,
    pub relocs_stripped: bool,
}

impl ImageContext {
    /// Offset inside the image data of the byte at `rva`
    pub fn rva_offset(&self, rva: u32) -> Option<usize> {
        usize::try_from((rva as u64).checked_sub(self.header_adjust)?).ok()
    }

    /// Address the headers were linked for, before any relocation
    pub fn linked_address(&self) -> u64 {
        self.image_base.wrapping_add(self.header_adjust)
    }
}

/// Where the image lives and where its section table is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    /// Base the image was linked at
    pub declared_base: u64,
    /// Address the RVAs of the image resolve against in memory
    pub true_base: u64,
    /// Offset of the section table inside the image data
    pub section_header_offset: u32,
    pub section_count: u16,
}

impl ImageLayout {
    /// Memory address of `rva`
    pub fn address_of(&self, rva: u32) -> Option<u64> {
        self.true_base.checked_add(rva as u64)
    }
}

/// One entry of the section table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub characteristics: SectionFlags,
}

impl SectionHeader {
    pub fn is_code(&self) -> bool {
        self.characteristics
            .intersects(SectionFlags::CNT_CODE | SectionFlags::MEM_EXECUTE)
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_WRITE)
    }
}

/// Parse the headers of the image whose data starts at `data_address`
pub fn compute_layout(image: &[u8], data_address: u64) -> Result<(ImageContext, ImageLayout)> {
    let (context, section_header_offset, section_count) =
        match le_u16(image, 0).ok_or_else(truncated)? {
            EFI_TE_IMAGE_HEADER_SIGNATURE => parse_te(image)?,
            EFI_IMAGE_DOS_SIGNATURE => parse_pe(image)?,
            signature => {
                log::error!("Unknown image signature {:#06x}", signature);
                return Err(BootError::ImageMalformed(ImageFault::BadSignature));
            }
        };

    let table_end = (section_count as usize)
        .checked_mul(SECTION_HEADER_SIZE)
        .and_then(|size| size.checked_add(section_header_offset as usize));
    if table_end.is_none_or(|end| end > image.len()) {
        log::error!(
            "Section table ({} entries at {:#x}) outside the image",
            section_count,
            section_header_offset
        );
        return Err(truncated());
    }

    let declared_base = context.image_base;
    let true_base = declared_base.wrapping_add(data_address.wrapping_sub(context.image_address));
    let layout = ImageLayout {
        declared_base,
        true_base,
        section_header_offset,
        section_count,
    };

    log::info!(
        "MM core image: {:?}, declared base {:#x}, loaded base {:#x}, {} sections",
        context.format,
        declared_base,
        true_base,
        section_count
    );
    Ok((context, layout))
}

/// Section table entry `index`
pub fn section(image: &[u8], layout: &ImageLayout, index: u16) -> Result<SectionHeader> {
    let offset = layout.section_header_offset as usize + index as usize * SECTION_HEADER_SIZE;
    let raw = image
        .get(offset..offset + SECTION_HEADER_SIZE)
        .ok_or_else(truncated)?;
    let mut name = [0u8; 8];
    name.copy_from_slice(&raw[..8]);
    Ok(SectionHeader {
        name,
        virtual_size: le_u32(raw, 8).ok_or_else(truncated)?,
        virtual_address: le_u32(raw, 12).ok_or_else(truncated)?,
        characteristics: SectionFlags::from_bits_retain(le_u32(raw, 36).ok_or_else(truncated)?),
    })
}

fn parse_te(image: &[u8]) -> Result<(ImageContext, u32, u16)> {
    let header = image.get(..TE_HEADER_SIZE).ok_or_else(truncated)?;
    let section_count = header[4] as u16;
    let stripped_size = le_u16(header, 6).ok_or_else(truncated)? as u64;
    let header_adjust = stripped_size
        .checked_sub(TE_HEADER_SIZE as u64)
        .ok_or_else(|| {
            log::error!("TE stripped size {:#x} smaller than its header", stripped_size);
            truncated()
        })?;
    let image_base = le_u64(header, 16).ok_or_else(truncated)?;

    let context = ImageContext {
        image_address: image_base.wrapping_add(header_adjust),
        image_base,
        format: ImageFormat::Te,
        header_adjust,
        image_base_offset: 16,
        entry_point_rva: le_u32(header, 8).ok_or_else(truncated)?,
        reloc_dir: DataDirectory {
            rva: le_u32(header, 24).ok_or_else(truncated)?,
            size: le_u32(header, 28).ok_or_else(truncated)?,
        },
        relocs_stripped: false,
    };
    Ok((context, TE_HEADER_SIZE as u32, section_count))
}

fn parse_pe(image: &[u8]) -> Result<(ImageContext, u32, u16)> {
    let nt = le_u32(image, DOS_LFANEW_OFFSET).ok_or_else(truncated)? as usize;
    if le_u32(image, nt) != Some(EFI_IMAGE_NT_SIGNATURE) {
        log::error!("Missing PE signature at {:#x}", nt);
        return Err(BootError::ImageMalformed(ImageFault::BadSignature));
    }

    let coff = nt + COFF_HEADER_OFFSET;
    let section_count = le_u16(image, coff + 2).ok_or_else(truncated)?;
    let optional_size = le_u16(image, coff + 16).ok_or_else(truncated)?;
    let characteristics = le_u16(image, coff + 18).ok_or_else(truncated)?;

    let optional = nt + OPTIONAL_HEADER_OFFSET;
    let read_dir = |offset: usize| -> Result<DataDirectory> {
        Ok(DataDirectory {
            rva: le_u32(image, optional + offset).ok_or_else(truncated)?,
            size: le_u32(image, optional + offset + 4).ok_or_else(truncated)?,
        })
    };
    let (format, image_base, image_base_offset, reloc_dir) =
        match le_u16(image, optional).ok_or_else(truncated)? {
            EFI_IMAGE_NT_OPTIONAL_HDR64_MAGIC => (
                ImageFormat::Pe32Plus,
                le_u64(image, optional + 24).ok_or_else(truncated)?,
                optional + 24,
                read_dir(152)?,
            ),
            EFI_IMAGE_NT_OPTIONAL_HDR32_MAGIC => (
                ImageFormat::Pe32,
                le_u32(image, optional + 28).ok_or_else(truncated)? as u64,
                optional + 28,
                read_dir(136)?,
            ),
            magic => {
                log::error!("Unknown optional header magic {:#x}", magic);
                return Err(BootError::ImageMalformed(ImageFault::BadSignature));
            }
        };

    let context = ImageContext {
        image_address: image_base,
        image_base,
        format,
        header_adjust: 0,
        image_base_offset,
        entry_point_rva: le_u32(image, optional + 16).ok_or_else(truncated)?,
        reloc_dir,
        relocs_stripped: characteristics & EFI_IMAGE_FILE_RELOCS_STRIPPED != 0,
    };
    let section_header_offset = u32::try_from(optional + optional_size as usize).map_err(|_| truncated())?;
    Ok((context, section_header_offset, section_count))
}

fn truncated() -> BootError {
    BootError::ImageMalformed(ImageFault::Truncated)
}
