//! Page permissions through `FFA_MEM_PERM_GET` / `FFA_MEM_PERM_SET`

use bitflags::bitflags;
use sp_api::{FfaError, PAGE_SIZE, size_to_pages};

use super::{FFA_MEM_PERM_GET, FFA_MEM_PERM_SET, FfaArgs, FfaConduit};
use crate::arch;

bitflags! {
    /// Attribute word of the FF-A memory permission ABIs
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemPermAttributes: u32 {
        /// Data access read/write
        const READ_WRITE = 0b01;
        /// Data access read-only
        const READ_ONLY = 0b11;
        /// Data access field, bits [1:0]
        const DATA_ACCESS = 0b11;
        /// Instruction access disabled
        const NON_EXECUTABLE = 0b100;
    }
}

impl MemPermAttributes {
    fn with_data_access(self, access: MemPermAttributes) -> Self {
        (self - Self::DATA_ACCESS) | access
    }
}

/// Page attribute updates used while loading the image
#[cfg_attr(test, mockall::automock)]
pub trait MemoryAttributes {
    /// Remove instruction access from `[base, base + length)`
    fn set_no_exec(&self, base: u64, length: u64) -> Result<(), FfaError>;
    /// Remove write access from `[base, base + length)`
    fn set_read_only(&self, base: u64, length: u64) -> Result<(), FfaError>;
    /// Grant write access to `[base, base + length)`
    fn clear_read_only(&self, base: u64, length: u64) -> Result<(), FfaError>;
}

/// [`MemoryAttributes`] backed by the SPM
pub struct FfaMemoryPermissions<'a, C: FfaConduit + ?Sized> {
    conduit: &'a C,
}

impl<'a, C: FfaConduit + ?Sized> FfaMemoryPermissions<'a, C> {
    /// Create a permission updater over `conduit`
    pub fn new(conduit: &'a C) -> Self {
        Self { conduit }
    }

    /// Current attributes of the page at `base`
    pub fn get(&self, base: u64) -> Result<MemPermAttributes, FfaError> {
        let response = self
            .conduit
            .call(FfaArgs::new(FFA_MEM_PERM_GET, &[base]))
            .into_success()?;
        Ok(MemPermAttributes::from_bits_retain(response.x[2] as u32))
    }

    /// Replace the attributes of `[base, base + length)`
    pub fn set(&self, base: u64, length: u64, attributes: MemPermAttributes) -> Result<(), FfaError> {
        let pages = size_to_pages(length);
        self.conduit
            .call(FfaArgs::new(
                FFA_MEM_PERM_SET,
                &[base, pages, attributes.bits() as u64],
            ))
            .into_success()?;
        arch::memory_attributes_barrier();
        log::trace!(
            "mem perm {:#x} - {:#x}: {:?}",
            base,
            base.wrapping_add(pages * PAGE_SIZE),
            attributes
        );
        Ok(())
    }

    fn update(
        &self,
        base: u64,
        length: u64,
        change: impl FnOnce(MemPermAttributes) -> MemPermAttributes,
    ) -> Result<(), FfaError> {
        let current = self.get(base)?;
        self.set(base, length, change(current))
    }
}

impl<C: FfaConduit + ?Sized> MemoryAttributes for FfaMemoryPermissions<'_, C> {
    fn set_no_exec(&self, base: u64, length: u64) -> Result<(), FfaError> {
        self.update(base, length, |attrs| attrs | MemPermAttributes::NON_EXECUTABLE)
    }

    fn set_read_only(&self, base: u64, length: u64) -> Result<(), FfaError> {
        self.update(base, length, |attrs| {
            attrs.with_data_access(MemPermAttributes::READ_ONLY)
        })
    }

    fn clear_read_only(&self, base: u64, length: u64) -> Result<(), FfaError> {
        self.update(base, length, |attrs| {
            attrs.with_data_access(MemPermAttributes::READ_WRITE)
        })
    }
}
