//! Boot firmware volume
//!
//! The partition image is a firmware volume whose MM core file carries the
//! executable as a PE32 or TE section. Files are 8-byte aligned, sections
//! 4-byte aligned; both use 24-bit sizes with an escape for large entries.

use core::slice;

use sp_api::{BootError, ImageFault, Result};

use crate::utils::bytes::{align_up, le_u16, le_u24, le_u32, le_u64};

/// `_FVH`
pub const EFI_FVH_SIGNATURE: u32 = u32::from_le_bytes(*b"_FVH");
/// Fixed part of the volume header, up to the block map
pub const FV_HEADER_SIZE: usize = 56;

pub const EFI_FV_FILETYPE_MM_CORE_STANDALONE: u8 = 0x0F;
pub const EFI_FV_FILETYPE_FFS_PAD: u8 = 0xF0;

pub const EFI_SECTION_PE32: u8 = 0x10;
pub const EFI_SECTION_TE: u8 = 0x12;

/// File attribute: 64-bit size follows the standard header
pub const FFS_ATTRIB_LARGE_FILE: u8 = 0x01;

const FFS_HEADER_SIZE: usize = 24;
const FFS_HEADER2_SIZE: usize = 32;
const SECTION_HEADER_SIZE: usize = 4;
const SECTION_HEADER2_SIZE: usize = 8;
const SECTION_SIZE_ESCAPE: u32 = 0x00ff_ffff;
const FFS_ALIGNMENT: usize = 8;
const SECTION_ALIGNMENT: usize = 4;

/// Location of the image bytes inside the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLocation {
    /// Offset of the first image byte from the volume start
    pub offset: usize,
    /// Image size in bytes
    pub size: usize,
    /// Section type the image was found in
    pub section_type: u8,
}

/// View the firmware volume at `address`
///
/// # Safety
///
/// `address` must point at readable and writable memory holding the volume
/// header and, if its signature matches, `FvLength` bytes. Nothing else may
/// access that memory while the returned slice is alive.
pub unsafe fn volume_at(address: u64) -> Result<&'static mut [u8]> {
    let base = address as usize as *mut u8;
    // SAFETY: the caller guarantees the header is readable.
    let header = unsafe { slice::from_raw_parts(base as *const u8, FV_HEADER_SIZE) };
    if le_u32(header, 40) != Some(EFI_FVH_SIGNATURE) {
        log::error!("No firmware volume at {:#x}", address);
        return Err(bad_volume());
    }
    let length = le_u64(header, 32).ok_or_else(bad_volume)?;
    let length = usize::try_from(length).map_err(|_| bad_volume())?;
    if length < FV_HEADER_SIZE {
        return Err(bad_volume());
    }
    // SAFETY: a valid signature means the caller guarantees `FvLength`
    // bytes of exclusively owned memory.
    Ok(unsafe { slice::from_raw_parts_mut(base, length) })
}

/// Find the MM core image in `volume`
///
/// A PE32 section is preferred over a TE section.
pub fn locate_mm_core(volume: &[u8]) -> Result<ImageLocation> {
    let (start, end) = file_area(volume)?;
    let mut offset = start;

    while offset < end {
        let Some(file) = FileHeader::parse(volume, offset, end)? else {
            break;
        };
        if file.file_type == EFI_FV_FILETYPE_MM_CORE_STANDALONE {
            log::debug!("MM core file at {:#x} ({:#x} bytes)", offset, file.size);
            let sections = offset + file.header_size..offset + file.size;
            for wanted in [EFI_SECTION_PE32, EFI_SECTION_TE] {
                if let Some(location) = find_section(volume, sections.clone(), wanted)? {
                    log::info!(
                        "MM core image at FV offset {:#x} ({:#x} bytes, section type {:#x})",
                        location.offset,
                        location.size,
                        location.section_type
                    );
                    return Ok(location);
                }
            }
            log::error!("MM core file carries no PE32 or TE section");
            return Err(BootError::ImageNotFound);
        }
        offset = align_up(offset + file.size, FFS_ALIGNMENT).ok_or_else(bad_volume)?;
    }

    log::error!("MM core file not found in firmware volume");
    Err(BootError::ImageNotFound)
}

/// Offsets of the first file and one past the last byte of the volume
fn file_area(volume: &[u8]) -> Result<(usize, usize)> {
    if le_u32(volume, 40) != Some(EFI_FVH_SIGNATURE) {
        log::error!("Invalid firmware volume signature");
        return Err(bad_volume());
    }
    let length = le_u64(volume, 32).ok_or_else(bad_volume)?;
    let end = usize::try_from(length)
        .ok()
        .filter(|end| *end <= volume.len())
        .ok_or_else(bad_volume)?;

    let header_length = le_u16(volume, 48).ok_or_else(bad_volume)? as usize;
    let ext_offset = le_u16(volume, 52).ok_or_else(bad_volume)? as usize;
    let first = if ext_offset != 0 {
        let ext_size = le_u32(volume, ext_offset + 16).ok_or_else(bad_volume)? as usize;
        ext_offset + ext_size
    } else {
        header_length
    };
    let first = align_up(first, FFS_ALIGNMENT).ok_or_else(bad_volume)?;
    if first < FV_HEADER_SIZE || first > end {
        return Err(bad_volume());
    }
    Ok((first, end))
}

struct FileHeader {
    file_type: u8,
    header_size: usize,
    size: usize,
}

impl FileHeader {
    /// `None` once the erased tail of the volume is reached
    fn parse(volume: &[u8], offset: usize, end: usize) -> Result<Option<Self>> {
        let Some(raw) = volume.get(offset..end).and_then(|rest| rest.get(..FFS_HEADER_SIZE)) else {
            return Ok(None);
        };
        if raw.iter().all(|b| *b == 0xff) {
            return Ok(None);
        }

        let file_type = raw[18];
        let attributes = raw[19];
        let (header_size, size) = if attributes & FFS_ATTRIB_LARGE_FILE != 0 {
            let size = le_u64(volume, offset + FFS_HEADER_SIZE).ok_or_else(bad_volume)?;
            (FFS_HEADER2_SIZE, usize::try_from(size).map_err(|_| bad_volume())?)
        } else {
            (FFS_HEADER_SIZE, le_u24(raw, 20).ok_or_else(bad_volume)? as usize)
        };

        let fits = offset.checked_add(size).is_some_and(|file_end| file_end <= end);
        if size < header_size || !fits {
            log::error!("Corrupt FFS file header at {:#x} (size {:#x})", offset, size);
            return Err(bad_volume());
        }
        if file_type == EFI_FV_FILETYPE_FFS_PAD {
            log::trace!("pad file at {:#x}", offset);
        }
        Ok(Some(Self {
            file_type,
            header_size,
            size,
        }))
    }
}

fn find_section(volume: &[u8], area: core::ops::Range<usize>, wanted: u8) -> Result<Option<ImageLocation>> {
    let mut offset = area.start;
    while offset + SECTION_HEADER_SIZE <= area.end {
        let size = le_u24(volume, offset).ok_or_else(bad_volume)?;
        let section_type = volume[offset + 3];
        let (header_size, size) = if size == SECTION_SIZE_ESCAPE {
            let extended = le_u32(volume, offset + SECTION_HEADER_SIZE).ok_or_else(bad_volume)?;
            (SECTION_HEADER2_SIZE, extended as usize)
        } else {
            (SECTION_HEADER_SIZE, size as usize)
        };

        let fits = offset.checked_add(size).is_some_and(|section_end| section_end <= area.end);
        if size < header_size || !fits {
            log::error!("Corrupt section header at {:#x} (size {:#x})", offset, size);
            return Err(bad_volume());
        }
        if section_type == wanted {
            return Ok(Some(ImageLocation {
                offset: offset + header_size,
                size: size - header_size,
                section_type,
            }));
        }
        offset = align_up(offset + size, SECTION_ALIGNMENT).ok_or_else(bad_volume)?;
    }
    Ok(None)
}

fn bad_volume() -> BootError {
    BootError::ImageMalformed(ImageFault::BadVolume)
}
