//! Base relocation
//!
//! When the image runs somewhere other than the address it was linked for,
//! every absolute address recorded in its base relocation table is shifted
//! by the difference.

use core::fmt;

use sp_api::{PermissionOp, Result};

use super::pe_coff::{ImageContext, ImageFormat, ImageLayout};
use super::permissions::update;
use crate::ffa::MemoryAttributes;
use crate::utils::bytes::{le_u16, le_u32, le_u64, put_le_u32, put_le_u64};

pub const EFI_IMAGE_REL_BASED_ABSOLUTE: u16 = 0;
pub const EFI_IMAGE_REL_BASED_HIGHLOW: u16 = 3;
pub const EFI_IMAGE_REL_BASED_DIR64: u16 = 10;

const BLOCK_HEADER_SIZE: usize = 8;

/// Why an image could not be relocated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocationError {
    /// The image must move but carries no relocation information
    RelocationsStripped,
    /// A block header is inconsistent with the directory
    BadBlock { offset: usize },
    /// Fixup type outside ABSOLUTE, HIGHLOW and DIR64
    UnsupportedType(u16),
    /// A fixup or the directory points outside the image
    OutOfBounds { rva: u32 },
}

impl fmt::Display for RelocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocationError::RelocationsStripped => write!(f, "relocations stripped"),
            RelocationError::BadBlock { offset } => {
                write!(f, "bad relocation block at {:#x}", offset)
            }
            RelocationError::UnsupportedType(kind) => {
                write!(f, "unsupported relocation type {}", kind)
            }
            RelocationError::OutOfBounds { rva } => write!(f, "fixup at rva {:#x} out of bounds", rva),
        }
    }
}

/// Applies base relocations to image data in place
#[cfg_attr(test, mockall::automock)]
pub trait ImageRelocator {
    /// Relocate `image` from the address it was linked for to
    /// `context.image_address`
    fn relocate(&self, context: &ImageContext, image: &mut [u8]) -> core::result::Result<(), RelocationError>;
}

/// Relocator for PE32(+) and TE base relocation tables
#[derive(Debug, Default, Clone, Copy)]
pub struct PeCoffRelocator;

impl ImageRelocator for PeCoffRelocator {
    fn relocate(&self, context: &ImageContext, image: &mut [u8]) -> core::result::Result<(), RelocationError> {
        let delta = context.image_address.wrapping_sub(context.linked_address());
        if delta == 0 {
            return Ok(());
        }
        if context.relocs_stripped {
            return Err(RelocationError::RelocationsStripped);
        }

        let dir = context.reloc_dir;
        let start = context
            .rva_offset(dir.rva)
            .ok_or(RelocationError::OutOfBounds { rva: dir.rva })?;
        let end = start
            .checked_add(dir.size as usize)
            .filter(|end| *end <= image.len())
            .ok_or(RelocationError::OutOfBounds { rva: dir.rva })?;

        let mut block = start;
        let mut fixups = 0usize;
        while block + BLOCK_HEADER_SIZE <= end {
            let page_rva = le_u32(image, block).ok_or(RelocationError::BadBlock { offset: block })?;
            let block_size = le_u32(image, block + 4).ok_or(RelocationError::BadBlock { offset: block })? as usize;
            let block_end = block
                .checked_add(block_size)
                .filter(|block_end| block_size >= BLOCK_HEADER_SIZE && *block_end <= end)
                .ok_or(RelocationError::BadBlock { offset: block })?;

            let mut entry = block + BLOCK_HEADER_SIZE;
            while entry + 2 <= block_end {
                let raw = le_u16(image, entry).ok_or(RelocationError::BadBlock { offset: block })?;
                apply_fixup(context, image, page_rva, raw, delta)?;
                fixups += 1;
                entry += 2;
            }
            block = block_end;
        }

        // The headers now describe the image at its new address.
        let new_base = context.image_base.wrapping_add(delta);
        let written = match context.format {
            ImageFormat::Te | ImageFormat::Pe32Plus => {
                put_le_u64(image, context.image_base_offset, new_base)
            }
            ImageFormat::Pe32 => put_le_u32(image, context.image_base_offset, new_base as u32),
        };
        written.ok_or(RelocationError::OutOfBounds { rva: 0 })?;

        log::debug!("applied {} fixups, delta {:#x}", fixups, delta);
        Ok(())
    }
}

fn apply_fixup(
    context: &ImageContext,
    image: &mut [u8],
    page_rva: u32,
    raw: u16,
    delta: u64,
) -> core::result::Result<(), RelocationError> {
    let kind = raw >> 12;
    let rva = page_rva.wrapping_add((raw & 0x0fff) as u32);
    let out_of_bounds = RelocationError::OutOfBounds { rva };

    match kind {
        EFI_IMAGE_REL_BASED_ABSOLUTE => Ok(()),
        EFI_IMAGE_REL_BASED_HIGHLOW => {
            let offset = context.rva_offset(rva).ok_or(out_of_bounds)?;
            let value = le_u32(image, offset).ok_or(out_of_bounds)?;
            put_le_u32(image, offset, value.wrapping_add(delta as u32)).ok_or(out_of_bounds)
        }
        EFI_IMAGE_REL_BASED_DIR64 => {
            let offset = context.rva_offset(rva).ok_or(out_of_bounds)?;
            let value = le_u64(image, offset).ok_or(out_of_bounds)?;
            put_le_u64(image, offset, value.wrapping_add(delta)).ok_or(out_of_bounds)
        }
        other => Err(RelocationError::UnsupportedType(other)),
    }
}

/// Relocate the image if it does not sit where its headers expect
///
/// The header page is made writable for the fixups and read-only again
/// afterwards; it stays non-executable. Returns whether the image moved.
///
/// # Panics
///
/// If the relocator fails: the image would be left half fixed up.
pub fn relocate_if_needed<A, R>(
    attributes: &A,
    relocator: &R,
    context: &mut ImageContext,
    layout: &ImageLayout,
    image: &mut [u8],
    data_address: u64,
    header_page_size: u64,
) -> Result<bool>
where
    A: MemoryAttributes + ?Sized,
    R: ImageRelocator + ?Sized,
{
    if context.image_address == data_address {
        log::debug!("MM core image runs at its linked address");
        return Ok(false);
    }

    let header = layout.true_base;
    log::info!(
        "Relocating MM core image: {:#x} -> {:#x}",
        context.image_address,
        data_address
    );
    update(
        PermissionOp::SetNoExec,
        header,
        attributes.set_no_exec(header, header_page_size),
    )?;
    update(
        PermissionOp::ClearReadOnly,
        header,
        attributes.clear_read_only(header, header_page_size),
    )?;

    context.image_address = data_address;
    if let Err(error) = relocator.relocate(context, image) {
        panic!("MM core relocation failed: {}", error);
    }

    update(
        PermissionOp::SetReadOnly,
        header,
        attributes.set_read_only(header, header_page_size),
    )?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffa::MockMemoryAttributes;
    use crate::image::pe_coff::{SectionFlags, compute_layout};
    use crate::test_support::ImageBuilder;
    use mockall::Sequence;
    use mockall::predicate::{always, eq};

    const LINKED: u64 = 0x1_0000_0000;

    fn permissive() -> MockMemoryAttributes {
        let mut attributes = MockMemoryAttributes::new();
        attributes.expect_set_no_exec().returning(|_, _| Ok(()));
        attributes.expect_clear_read_only().returning(|_, _| Ok(()));
        attributes.expect_set_read_only().returning(|_, _| Ok(()));
        attributes
    }

    fn read_u64(image: &[u8], offset: usize) -> u64 {
        le_u64(image, offset).unwrap()
    }

    #[test]
    fn test_pe_dir64_and_highlow_fixups() {
        let mut image = ImageBuilder::pe(LINKED)
            .section(".data", 0x1000, 0x100, SectionFlags::MEM_WRITE)
            .word64(0x1010, LINKED + 0x1234)
            .word32(0x1020, 0x0000_5678)
            .reloc_block(0x1000, &[(EFI_IMAGE_REL_BASED_DIR64, 0x10), (EFI_IMAGE_REL_BASED_HIGHLOW, 0x20), (0, 0)])
            .build();
        let new_address = 0x8000_0000;
        let (mut context, _) = compute_layout(&image, new_address).unwrap();
        context.image_address = new_address;

        PeCoffRelocator.relocate(&context, &mut image).unwrap();

        let delta = new_address.wrapping_sub(LINKED);
        assert_eq!(read_u64(&image, 0x1010), 0x8000_1234);
        assert_eq!(le_u32(&image, 0x1020), Some(0x5678u32.wrapping_add(delta as u32)));
        assert_eq!(read_u64(&image, context.image_base_offset), new_address);
    }

    #[test]
    fn test_te_fixups_account_for_stripped_headers() {
        let mut image = ImageBuilder::te(LINKED)
            .section(".data", 0x2000, 0x100, SectionFlags::MEM_WRITE)
            .word64(0x2008, LINKED + 0x2000)
            .reloc_block(0x2000, &[(EFI_IMAGE_REL_BASED_DIR64, 0x8)])
            .build();
        let data_address = 0x7000_0000;
        let (mut context, layout) = compute_layout(&image, data_address).unwrap();
        context.image_address = data_address;

        PeCoffRelocator.relocate(&context, &mut image).unwrap();

        let offset = context.rva_offset(0x2008).unwrap();
        assert_eq!(read_u64(&image, offset), layout.true_base + 0x2000);
    }

    #[test]
    fn test_unsupported_fixup_type() {
        let mut image = ImageBuilder::pe(LINKED)
            .section(".data", 0x1000, 0x100, SectionFlags::MEM_WRITE)
            .reloc_block(0x1000, &[(5, 0x10)])
            .build();
        let (mut context, _) = compute_layout(&image, 0x2000_0000).unwrap();
        context.image_address = 0x2000_0000;
        assert_eq!(
            PeCoffRelocator.relocate(&context, &mut image),
            Err(RelocationError::UnsupportedType(5))
        );
    }

    #[test]
    fn test_stripped_relocations_cannot_move() {
        let mut image = ImageBuilder::pe(LINKED).relocs_stripped().build();
        let (mut context, _) = compute_layout(&image, 0x2000_0000).unwrap();
        context.image_address = 0x2000_0000;
        assert_eq!(
            PeCoffRelocator.relocate(&context, &mut image),
            Err(RelocationError::RelocationsStripped)
        );
    }

    #[test]
    fn test_no_relocation_at_linked_address() {
        let mut image = ImageBuilder::pe(LINKED).build();
        let (mut context, layout) = compute_layout(&image, LINKED).unwrap();
        let attributes = MockMemoryAttributes::new();
        let relocator = MockImageRelocator::new();

        let moved = relocate_if_needed(&attributes, &relocator, &mut context, &layout, &mut image, LINKED, 0x1000);
        assert_eq!(moved, Ok(false));
    }

    #[test]
    fn test_header_page_is_unlocked_then_locked() {
        let mut image = ImageBuilder::pe(LINKED).build();
        let data_address = 0x6000_0000;
        let (mut context, layout) = compute_layout(&image, data_address).unwrap();

        let mut attributes = MockMemoryAttributes::new();
        let mut relocator = MockImageRelocator::new();
        let mut seq = Sequence::new();
        attributes
            .expect_set_no_exec()
            .with(eq(data_address), eq(0x1000))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        attributes
            .expect_clear_read_only()
            .with(eq(data_address), eq(0x1000))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        relocator
            .expect_relocate()
            .withf(move |context, _| context.image_address == data_address)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        attributes
            .expect_set_read_only()
            .with(eq(data_address), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let moved = relocate_if_needed(&attributes, &relocator, &mut context, &layout, &mut image, data_address, 0x1000);
        assert_eq!(moved, Ok(true));
        assert_eq!(context.image_address, data_address);
    }

    #[test]
    #[should_panic(expected = "relocation failed")]
    fn test_relocation_failure_aborts() {
        let mut image = ImageBuilder::pe(LINKED).build();
        let (mut context, layout) = compute_layout(&image, 0x6000_0000).unwrap();
        let attributes = permissive();
        let mut relocator = MockImageRelocator::new();
        relocator
            .expect_relocate()
            .returning(|_, _| Err(RelocationError::UnsupportedType(7)));

        let _ = relocate_if_needed(&attributes, &relocator, &mut context, &layout, &mut image, 0x6000_0000, 0x1000);
    }
}
