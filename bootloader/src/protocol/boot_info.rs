//! FF-A boot information blob (FF-A v1.1, section 5.4)

use core::slice;

use sp_api::{BootError, ManifestFault, ManifestMissingKind, Result};

use crate::utils::bytes::{le_u32, le_u64};

/// Signature at offset 0 of the blob
pub const FFA_BOOT_INFO_SIGNATURE: u32 = 0x0FFA;

/// Size of the blob header
pub const BOOT_INFO_HEADER_SIZE: usize = 32;
/// Size of one descriptor
pub const BOOT_INFO_DESCRIPTOR_SIZE: usize = 32;

/// Type bit 7: implementation defined (set) or standard (clear)
pub const BOOT_INFO_TYPE_IMPDEF: u8 = 1 << 7;
/// Type bits [6:0] of a standard descriptor
pub const BOOT_INFO_TYPE_ID_MASK: u8 = 0x7f;
/// Standard type id: flattened device tree
pub const BOOT_INFO_TYPE_ID_FDT: u8 = 0;
/// Standard type id: hand-off block list
pub const BOOT_INFO_TYPE_ID_HOB: u8 = 1;

/// Encode a descriptor type byte
pub const fn boot_info_type(impdef: bool, id: u8) -> u8 {
    let category = if impdef { BOOT_INFO_TYPE_IMPDEF } else { 0 };
    category | (id & BOOT_INFO_TYPE_ID_MASK)
}

/// Blob header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfoHeader {
    pub signature: u32,
    pub version: u32,
    pub blob_size: u32,
    pub desc_size: u32,
    pub desc_count: u32,
    pub desc_offset: u32,
}

/// One entry of the descriptor table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfoDescriptor {
    pub name: [u8; 16],
    pub info_type: u8,
    pub flags: u16,
    pub size: u32,
    pub content: u64,
}

impl BootInfoDescriptor {
    /// Standard descriptor carrying a device tree
    pub fn is_manifest(&self) -> bool {
        self.info_type == boot_info_type(false, BOOT_INFO_TYPE_ID_FDT)
    }
}

/// Validated view of a boot information blob
#[derive(Debug, Clone, Copy)]
pub struct BootInfoLocator<'a> {
    blob: &'a [u8],
    header: BootInfoHeader,
}

impl<'a> BootInfoLocator<'a> {
    /// Validate the header of `blob`; trailing bytes past `blob_size` are ignored
    pub fn new(blob: &'a [u8]) -> Result<Self> {
        let signature = le_u32(blob, 0).ok_or_else(out_of_bounds)?;
        if signature != FFA_BOOT_INFO_SIGNATURE {
            log::error!("Invalid FF-A boot information signature: {:#x}", signature);
            return Err(BootError::ManifestMissing(
                ManifestMissingKind::BadBootInfoMagic(signature),
            ));
        }

        let field = |offset| le_u32(blob, offset).ok_or_else(out_of_bounds);
        let header = BootInfoHeader {
            signature,
            version: field(4)?,
            blob_size: field(8)?,
            desc_size: field(12)?,
            desc_count: field(16)?,
            desc_offset: field(20)?,
        };

        let blob_size = header.blob_size as usize;
        if blob_size < BOOT_INFO_HEADER_SIZE || blob_size > blob.len() {
            log::error!(
                "FF-A boot information size {:#x} is invalid (buffer {:#x})",
                blob_size,
                blob.len()
            );
            return Err(out_of_bounds());
        }

        Ok(Self {
            blob: &blob[..blob_size],
            header,
        })
    }

    /// View the blob at `address`
    ///
    /// # Safety
    ///
    /// A non-null `address` must point at readable memory holding at least
    /// the signature, and the whole blob if the signature matches. The
    /// memory must stay valid and unmodified for the rest of the boot.
    pub unsafe fn from_address(address: u64) -> Result<BootInfoLocator<'static>> {
        if address == 0 {
            log::error!("FF-A boot information is NULL");
            return Err(BootError::ManifestMissing(ManifestMissingKind::NullBootInfo));
        }

        let base = address as usize as *const u8;
        // SAFETY: the caller guarantees the signature is readable.
        let head = unsafe { slice::from_raw_parts(base, 4) };
        let signature = le_u32(head, 0).ok_or_else(out_of_bounds)?;
        if signature != FFA_BOOT_INFO_SIGNATURE {
            return BootInfoLocator::new(head);
        }

        // SAFETY: with a valid signature the caller guarantees the header is
        // readable, and `blob_size` bytes after it.
        let header = unsafe { slice::from_raw_parts(base, BOOT_INFO_HEADER_SIZE) };
        let blob_size = le_u32(header, 8).ok_or_else(out_of_bounds)? as usize;
        let blob = unsafe { slice::from_raw_parts(base, blob_size.max(BOOT_INFO_HEADER_SIZE)) };
        BootInfoLocator::new(blob)
    }

    /// Blob header
    pub fn header(&self) -> &BootInfoHeader {
        &self.header
    }

    /// Read descriptor `index`, bounds-checked against the blob size
    pub fn descriptor(&self, index: u32) -> Result<BootInfoDescriptor> {
        let desc_size = self.header.desc_size as usize;
        if desc_size < BOOT_INFO_DESCRIPTOR_SIZE {
            log::error!("FF-A boot information descriptor size {:#x} too small", desc_size);
            return Err(BootError::ManifestMalformed(ManifestFault::BadStructure));
        }

        let offset = (index as usize)
            .checked_mul(desc_size)
            .and_then(|offset| offset.checked_add(self.header.desc_offset as usize))
            .ok_or_else(out_of_bounds)?;
        let raw = offset
            .checked_add(BOOT_INFO_DESCRIPTOR_SIZE)
            .and_then(|end| self.blob.get(offset..end))
            .ok_or_else(|| {
                log::error!("FF-A boot information descriptor {} out of bounds", index);
                out_of_bounds()
            })?;

        let mut name = [0u8; 16];
        name.copy_from_slice(&raw[..16]);
        Ok(BootInfoDescriptor {
            name,
            info_type: raw[16],
            flags: u16::from_le_bytes([raw[18], raw[19]]),
            size: le_u32(raw, 20).ok_or_else(out_of_bounds)?,
            content: le_u64(raw, 24).ok_or_else(out_of_bounds)?,
        })
    }

    /// Address of the partition manifest
    ///
    /// Every descriptor is validated before the first manifest descriptor
    /// is returned.
    pub fn locate_manifest(&self) -> Result<u64> {
        let mut manifest = None;
        for index in 0..self.header.desc_count {
            let descriptor = self.descriptor(index)?;
            if manifest.is_none() && descriptor.is_manifest() {
                manifest = Some(descriptor);
            }
        }

        match manifest {
            Some(descriptor) if descriptor.content != 0 => {
                log::info!(
                    "SP manifest at {:#x} ({:#x} bytes)",
                    descriptor.content,
                    descriptor.size
                );
                Ok(descriptor.content)
            }
            _ => {
                log::error!("SP manifest descriptor not found in FF-A boot information");
                Err(BootError::ManifestMissing(
                    ManifestMissingKind::NoManifestDescriptor,
                ))
            }
        }
    }
}

fn out_of_bounds() -> BootError {
    BootError::ManifestMalformed(ManifestFault::OutOfBounds)
}
