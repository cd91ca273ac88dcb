//! Section permissions
//!
//! Code sections end up read-only and executable, data sections
//! non-executable and read-only unless the section is writable. Data is
//! made non-executable before it is made writable, so no section is ever
//! writable and executable at once.

use sp_api::{BootError, FfaError, ImageFault, PermissionOp, Result};

use super::pe_coff::{ImageLayout, section};
use crate::ffa::MemoryAttributes;

/// Apply the permissions of every section of `image`
pub fn apply_permissions<A: MemoryAttributes + ?Sized>(
    attributes: &A,
    image: &[u8],
    layout: &ImageLayout,
) -> Result {
    for index in 0..layout.section_count {
        let header = section(image, layout, index)?;
        if header.virtual_size == 0 {
            continue;
        }
        let base = layout
            .address_of(header.virtual_address)
            .ok_or(BootError::ImageMalformed(ImageFault::Truncated))?;
        let size = header.virtual_size as u64;

        if header.is_code() {
            log::debug!("{}: {:#x} - {:#x} RX", SectionName(&header.name), base, size);
            update(PermissionOp::SetReadOnly, base, attributes.set_read_only(base, size))?;
        } else {
            update(PermissionOp::SetNoExec, base, attributes.set_no_exec(base, size))?;
            if header.is_writable() {
                log::debug!("{}: {:#x} - {:#x} RW", SectionName(&header.name), base, size);
                update(PermissionOp::ClearReadOnly, base, attributes.clear_read_only(base, size))?;
            } else {
                log::debug!("{}: {:#x} - {:#x} RO", SectionName(&header.name), base, size);
                update(PermissionOp::SetReadOnly, base, attributes.set_read_only(base, size))?;
            }
        }
    }
    Ok(())
}

/// Tag a failed permission change with what was attempted
pub(crate) fn update(op: PermissionOp, base: u64, result: core::result::Result<(), FfaError>) -> Result {
    result.map_err(|error| {
        log::error!("{:?} at {:#x} failed: {:?}", op, base, error);
        BootError::PermissionUpdateFailure { op, base, error }
    })
}

struct SectionName<'a>(&'a [u8; 8]);

impl core::fmt::Display for SectionName<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let len = self.0.iter().position(|b| *b == 0).unwrap_or(self.0.len());
        for byte in &self.0[..len] {
            write!(f, "{}", *byte as char)?;
        }
        Ok(())
    }
}
