//! In-memory builders for the structures the SPM hands to the partition

use std::alloc::{Layout, alloc_zeroed, dealloc};

use sp_api::{MemoryRange, PAGE_SIZE};

use crate::image::LoadedImage;
use crate::image::firmware_volume::{EFI_FV_FILETYPE_MM_CORE_STANDALONE, EFI_SECTION_TE};
use crate::image::pe_coff::{ImageFormat, SectionFlags};
use crate::image::relocation::EFI_IMAGE_REL_BASED_DIR64;
use crate::protocol::boot_info::{
    BOOT_INFO_TYPE_ID_FDT, BOOT_INFO_TYPE_ID_HOB, FFA_BOOT_INFO_SIGNATURE, boot_info_type,
};
use crate::utils::bytes::le_u64;

fn pad_to(bytes: &mut Vec<u8>, align: usize, fill: u8) {
    while bytes.len() % align != 0 {
        bytes.push(fill);
    }
}

fn put(bytes: &mut [u8], offset: usize, value: &[u8]) {
    bytes[offset..offset + value.len()].copy_from_slice(value);
}

/// Flattened device tree
pub struct FdtBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
}

impl FdtBuilder {
    pub fn new() -> Self {
        Self {
            structure: Vec::new(),
            strings: Vec::new(),
        }
    }

    fn token(mut self, token: u32) -> Self {
        self.structure.extend_from_slice(&token.to_be_bytes());
        self
    }

    pub fn begin_node(self, name: &str) -> Self {
        let mut builder = self.token(1);
        builder.structure.extend_from_slice(name.as_bytes());
        builder.structure.push(0);
        pad_to(&mut builder.structure, 4, 0);
        builder
    }

    pub fn end_node(self) -> Self {
        self.token(2)
    }

    pub fn nop(self) -> Self {
        self.token(4)
    }

    pub fn prop(self, name: &str, value: &[u8]) -> Self {
        let mut builder = self.token(3);
        let name_offset = builder.string_offset(name);
        builder.structure.extend_from_slice(&(value.len() as u32).to_be_bytes());
        builder.structure.extend_from_slice(&name_offset.to_be_bytes());
        builder.structure.extend_from_slice(value);
        pad_to(&mut builder.structure, 4, 0);
        builder
    }

    pub fn prop_u32(self, name: &str, value: u32) -> Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_u64(self, name: &str, value: u64) -> Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_str(self, name: &str, value: &str) -> Self {
        self.prop_str_list(name, &[value])
    }

    pub fn prop_str_list(self, name: &str, values: &[&str]) -> Self {
        let mut value = Vec::new();
        for entry in values {
            value.extend_from_slice(entry.as_bytes());
            value.push(0);
        }
        self.prop(name, &value)
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        offset
    }

    pub fn build(self) -> Vec<u8> {
        let structure = self.token(9);
        let header_size = 40;
        let reserve_map = 16;
        let off_struct = header_size + reserve_map;
        let off_strings = off_struct + structure.structure.len();
        let total = off_strings + structure.strings.len();

        let mut blob = vec![0u8; off_struct];
        let fields = [
            0xd00d_feed,
            total as u32,
            off_struct as u32,
            off_strings as u32,
            header_size as u32,
            17,
            16,
            0,
            structure.strings.len() as u32,
            structure.structure.len() as u32,
        ];
        for (index, field) in fields.iter().enumerate() {
            put(&mut blob, index * 4, &field.to_be_bytes());
        }
        blob.extend_from_slice(&structure.structure);
        blob.extend_from_slice(&structure.strings);
        blob
    }
}

/// Manifest with one FF-A partition node and an optional heap region
pub fn manifest_blob(
    load_address: u64,
    entrypoint_offset: u32,
    image_size: u64,
    granule: u32,
    heap: Option<(u64, u32)>,
) -> Vec<u8> {
    let mut fdt = FdtBuilder::new()
        .begin_node("")
        .begin_node("partition")
        .prop_str("compatible", "arm,ffa-manifest-1.0")
        .prop_u64("load-address", load_address)
        .prop_u32("entrypoint-offset", entrypoint_offset)
        .prop_u64("image-size", image_size)
        .prop_u32("xlat-granule", granule);
    if let Some((base, pages)) = heap {
        fdt = fdt
            .begin_node("memory-regions")
            .begin_node("heap")
            .prop_str("description", "heap")
            .prop_u64("base-address", base)
            .prop_u32("pages-count", pages)
            .end_node()
            .end_node();
    }
    fdt.end_node().end_node().build()
}

/// FF-A boot information blob
pub struct BootInfoBlobBuilder {
    descriptors: Vec<(u8, u64)>,
    desc_count: Option<u32>,
}

impl BootInfoBlobBuilder {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
            desc_count: None,
        }
    }

    pub fn descriptor(mut self, info_type: u8, content: u64) -> Self {
        self.descriptors.push((info_type, content));
        self
    }

    /// Override the descriptor count in the header
    pub fn desc_count(mut self, count: u32) -> Self {
        self.desc_count = Some(count);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let size = 32 + 32 * self.descriptors.len();
        let mut blob = vec![0u8; size];
        put(&mut blob, 0, &FFA_BOOT_INFO_SIGNATURE.to_le_bytes());
        put(&mut blob, 4, &0x0001_0001u32.to_le_bytes());
        put(&mut blob, 8, &(size as u32).to_le_bytes());
        put(&mut blob, 12, &32u32.to_le_bytes());
        let count = self.desc_count.unwrap_or(self.descriptors.len() as u32);
        put(&mut blob, 16, &count.to_le_bytes());
        put(&mut blob, 20, &32u32.to_le_bytes());

        for (index, (info_type, content)) in self.descriptors.iter().enumerate() {
            let offset = 32 + index * 32;
            put(&mut blob, offset, b"descriptor");
            blob[offset + 16] = *info_type;
            put(&mut blob, offset + 20, &0x1000u32.to_le_bytes());
            put(&mut blob, offset + 24, &content.to_le_bytes());
        }
        blob
    }
}

struct FvFile {
    file_type: u8,
    large: bool,
    body: Vec<u8>,
}

/// Firmware volume
pub struct FvBuilder {
    ext_header: Option<usize>,
    files: Vec<FvFile>,
}

impl FvBuilder {
    const HEADER_LENGTH: usize = 72;
    /// Offset of the first file when there is no extended header
    pub const FIRST_FILE_OFFSET: usize = Self::HEADER_LENGTH;

    pub fn new() -> Self {
        Self {
            ext_header: None,
            files: Vec::new(),
        }
    }

    pub fn ext_header(mut self, size: usize) -> Self {
        self.ext_header = Some(size);
        self
    }

    pub fn file(self, file_type: u8, sections: &[(u8, &[u8])]) -> Self {
        self.push_file(file_type, false, sections)
    }

    pub fn large_file(self, file_type: u8, sections: &[(u8, &[u8])]) -> Self {
        self.push_file(file_type, true, sections)
    }

    fn push_file(mut self, file_type: u8, large: bool, sections: &[(u8, &[u8])]) -> Self {
        let mut body = Vec::new();
        for (section_type, data) in sections {
            pad_to(&mut body, 4, 0);
            let size = 4 + data.len() as u32;
            body.extend_from_slice(&size.to_le_bytes()[..3]);
            body.push(*section_type);
            body.extend_from_slice(data);
        }
        self.files.push(FvFile {
            file_type,
            large,
            body,
        });
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut fv = vec![0u8; Self::HEADER_LENGTH];
        put(&mut fv, 40, b"_FVH");
        put(&mut fv, 48, &(Self::HEADER_LENGTH as u16).to_le_bytes());
        fv[55] = 2;

        if let Some(size) = self.ext_header {
            put(&mut fv, 52, &(Self::HEADER_LENGTH as u16).to_le_bytes());
            let mut ext = vec![0u8; size];
            put(&mut ext, 16, &(size as u32).to_le_bytes());
            fv.extend_from_slice(&ext);
        }

        for file in &self.files {
            pad_to(&mut fv, 8, 0xff);
            let header_size = if file.large { 32 } else { 24 };
            let size = header_size + file.body.len();
            let mut header = vec![0u8; header_size];
            header[18] = file.file_type;
            header[23] = 0xf8;
            if file.large {
                header[19] = 0x01;
                put(&mut header, 24, &(size as u64).to_le_bytes());
            } else {
                put(&mut header, 20, &(size as u32).to_le_bytes()[..3]);
            }
            fv.extend_from_slice(&header);
            fv.extend_from_slice(&file.body);
        }

        pad_to(&mut fv, 8, 0xff);
        fv.extend_from_slice(&[0xff; 64]);
        let length = fv.len();
        put(&mut fv, 32, &(length as u64).to_le_bytes());
        put(&mut fv, 56, &1u32.to_le_bytes());
        put(&mut fv, 60, &(length as u32).to_le_bytes());
        fv
    }
}

/// PE32+, PE32 or TE image laid out as it sits in memory
pub struct ImageBuilder {
    format: ImageFormat,
    image_base: u64,
    entry_point: u32,
    sections: Vec<([u8; 8], u32, u32, SectionFlags)>,
    words: Vec<(u32, Vec<u8>)>,
    relocs: Vec<(u32, Vec<(u16, u16)>)>,
    relocs_stripped: bool,
}

impl ImageBuilder {
    const TE_STRIPPED_SIZE: u64 = 0x200;
    /// Distance between the RVA origin and the TE header
    pub const TE_HEADER_ADJUST: u64 = Self::TE_STRIPPED_SIZE - 40;

    const PE_NT_OFFSET: usize = 0x40;
    const PE_OPTIONAL_OFFSET: usize = Self::PE_NT_OFFSET + 24;

    fn new(format: ImageFormat, image_base: u64) -> Self {
        Self {
            format,
            image_base,
            entry_point: 0,
            sections: Vec::new(),
            words: Vec::new(),
            relocs: Vec::new(),
            relocs_stripped: false,
        }
    }

    pub fn pe(image_base: u64) -> Self {
        Self::new(ImageFormat::Pe32Plus, image_base)
    }

    pub fn pe32(image_base: u64) -> Self {
        Self::new(ImageFormat::Pe32, image_base)
    }

    pub fn te(image_base: u64) -> Self {
        Self::new(ImageFormat::Te, image_base)
    }

    pub fn entry_point(mut self, rva: u32) -> Self {
        self.entry_point = rva;
        self
    }

    pub fn section(mut self, name: &str, rva: u32, size: u32, flags: SectionFlags) -> Self {
        let mut raw = [0u8; 8];
        raw[..name.len()].copy_from_slice(name.as_bytes());
        self.sections.push((raw, rva, size, flags));
        self
    }

    pub fn word64(mut self, rva: u32, value: u64) -> Self {
        self.words.push((rva, value.to_le_bytes().to_vec()));
        self
    }

    pub fn word32(mut self, rva: u32, value: u32) -> Self {
        self.words.push((rva, value.to_le_bytes().to_vec()));
        self
    }

    pub fn reloc_block(mut self, page_rva: u32, entries: &[(u16, u16)]) -> Self {
        self.relocs.push((page_rva, entries.to_vec()));
        self
    }

    pub fn relocs_stripped(mut self) -> Self {
        self.relocs_stripped = true;
        self
    }

    fn adjust(&self) -> u64 {
        match self.format {
            ImageFormat::Te => Self::TE_HEADER_ADJUST,
            _ => 0,
        }
    }

    pub fn build(self) -> Vec<u8> {
        let mut relocs = Vec::new();
        for (page_rva, entries) in &self.relocs {
            let mut entries = entries.clone();
            if entries.len() % 2 != 0 {
                entries.push((0, 0));
            }
            relocs.extend_from_slice(&page_rva.to_le_bytes());
            relocs.extend_from_slice(&(8 + 2 * entries.len() as u32).to_le_bytes());
            for (kind, offset) in entries {
                relocs.extend_from_slice(&((kind << 12) | (offset & 0x0fff)).to_le_bytes());
            }
        }

        let data_end = self
            .sections
            .iter()
            .map(|(_, rva, size, _)| rva + size)
            .chain(self.words.iter().map(|(rva, word)| rva + word.len() as u32))
            .fold(0x1000, u32::max);
        let reloc_rva = (data_end + 0xff) & !0xff;
        let end = reloc_rva + relocs.len() as u32;

        let adjust = self.adjust();
        let offset = |rva: u32| (rva as u64 - adjust) as usize;
        let mut image = vec![0u8; offset(end)];

        let reloc_dir = if relocs.is_empty() { (0, 0) } else { (reloc_rva, relocs.len() as u32) };
        let section_table = self.write_headers(&mut image, reloc_dir);

        for (index, (name, rva, size, flags)) in self.sections.iter().enumerate() {
            let entry = section_table + index * 40;
            put(&mut image, entry, name);
            put(&mut image, entry + 8, &size.to_le_bytes());
            put(&mut image, entry + 12, &rva.to_le_bytes());
            put(&mut image, entry + 16, &size.to_le_bytes());
            put(&mut image, entry + 20, &(offset(*rva) as u32).to_le_bytes());
            put(&mut image, entry + 36, &flags.bits().to_le_bytes());
        }
        for (rva, word) in &self.words {
            put(&mut image, offset(*rva), word);
        }
        if !relocs.is_empty() {
            put(&mut image, offset(reloc_rva), &relocs);
        }
        image
    }

    /// Write the image headers and return the offset of the section table
    fn write_headers(&self, image: &mut [u8], reloc_dir: (u32, u32)) -> usize {
        let count = self.sections.len();
        match self.format {
            ImageFormat::Te => {
                put(image, 0, b"VZ");
                put(image, 2, &0xAA64u16.to_le_bytes());
                image[4] = count as u8;
                image[5] = 0x0B;
                put(image, 6, &(Self::TE_STRIPPED_SIZE as u16).to_le_bytes());
                put(image, 8, &self.entry_point.to_le_bytes());
                put(image, 16, &self.image_base.to_le_bytes());
                put(image, 24, &reloc_dir.0.to_le_bytes());
                put(image, 28, &reloc_dir.1.to_le_bytes());
                40
            }
            ImageFormat::Pe32 | ImageFormat::Pe32Plus => {
                let nt = Self::PE_NT_OFFSET;
                let optional = Self::PE_OPTIONAL_OFFSET;
                put(image, 0, b"MZ");
                put(image, 0x3C, &(nt as u32).to_le_bytes());
                put(image, nt, b"PE\0\0");
                put(image, nt + 4, &0xAA64u16.to_le_bytes());
                put(image, nt + 6, &(count as u16).to_le_bytes());
                let mut characteristics: u16 = 0x0022;
                if self.relocs_stripped {
                    characteristics |= 0x0001;
                }
                put(image, nt + 22, &characteristics.to_le_bytes());
                put(image, optional + 16, &self.entry_point.to_le_bytes());

                let (magic, optional_size, dirs): (u16, usize, usize) = match self.format {
                    ImageFormat::Pe32Plus => {
                        put(image, optional + 24, &self.image_base.to_le_bytes());
                        put(image, optional + 108, &16u32.to_le_bytes());
                        (0x20B, 240, 112)
                    }
                    _ => {
                        put(image, optional + 28, &(self.image_base as u32).to_le_bytes());
                        put(image, optional + 92, &16u32.to_le_bytes());
                        (0x10B, 224, 96)
                    }
                };
                put(image, optional, &magic.to_le_bytes());
                put(image, nt + 20, &(optional_size as u16).to_le_bytes());
                put(image, optional + dirs + 40, &reloc_dir.0.to_le_bytes());
                put(image, optional + dirs + 44, &reloc_dir.1.to_le_bytes());
                optional + optional_size
            }
        }
    }
}

/// Page-aligned host memory standing in for the partition heap
pub struct HeapRegion {
    base: *mut u8,
    layout: Layout,
}

impl HeapRegion {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE_SIZE as usize, 0x1_0000).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null());
        Self { base, layout }
    }

    pub fn range(&self) -> MemoryRange {
        MemoryRange::new(self.base as u64, self.layout.size() as u64)
    }

    pub fn pages(&self) -> u32 {
        (self.layout.size() as u64 / PAGE_SIZE) as u32
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.base, self.layout) };
    }
}

/// Everything the SPM hands over: boot information, manifest and a firmware
/// volume holding a relocatable TE MM core
pub struct BootImage {
    volume: Vec<u8>,
    volume_address: u64,
    manifest: Vec<u8>,
    boot_info: Vec<u8>,
}

impl BootImage {
    /// Address the MM core was linked for
    pub const LINKED_BASE: u64 = 0x1_0000_0000;
    /// RVA of the 64-bit word the relocation table fixes up
    const FIXUP_RVA: u32 = 0x2008;

    pub fn new(heap: Option<&HeapRegion>) -> Self {
        Self::build(heap.map(|heap| (heap.range().base, heap.pages())), true)
    }

    pub fn without_memory_regions() -> Self {
        Self::build(None, false)
    }

    /// Heap region node with a `pages-count` of zero
    pub fn with_empty_heap() -> Self {
        Self::build(Some((0x7100_0000, 0)), true)
    }

    fn build(heap: Option<(u64, u32)>, memory_regions: bool) -> Self {
        let image = ImageBuilder::te(Self::LINKED_BASE)
            .entry_point(0x1000)
            .section(".text", 0x1000, 0x800, SectionFlags::CNT_CODE | SectionFlags::MEM_EXECUTE)
            .section(".data", 0x2000, 0x100, SectionFlags::MEM_READ | SectionFlags::MEM_WRITE)
            .word64(Self::FIXUP_RVA, Self::LINKED_BASE + 0x2000)
            .reloc_block(0x2000, &[(EFI_IMAGE_REL_BASED_DIR64, 0x8)])
            .build();
        let mut volume = FvBuilder::new()
            .file(EFI_FV_FILETYPE_MM_CORE_STANDALONE, &[(EFI_SECTION_TE, &image)])
            .build();
        let volume_address = volume.as_mut_ptr() as u64;

        let mut fdt = FdtBuilder::new()
            .begin_node("")
            .begin_node("stmm")
            .prop_str("compatible", "arm,ffa-manifest-1.0")
            .prop_u64("load-address", volume_address - 0x1000)
            .prop_u32("entrypoint-offset", 0x1000)
            .prop_u64("image-size", volume.len() as u64)
            .prop_u32("xlat-granule", 0);
        if memory_regions {
            fdt = fdt
                .begin_node("memory-regions")
                .begin_node("rx-buffer")
                .prop_str("description", "rx-buffer")
                .prop_u64("base-address", 0x7000_0000)
                .prop_u32("pages-count", 1)
                .end_node();
            if let Some((base, pages)) = heap {
                fdt = fdt
                    .begin_node("heap")
                    .prop_str("description", "heap")
                    .prop_u64("base-address", base)
                    .prop_u32("pages-count", pages)
                    .end_node();
            }
            fdt = fdt.end_node();
        }
        let manifest = fdt.end_node().end_node().build();

        let boot_info = BootInfoBlobBuilder::new()
            .descriptor(boot_info_type(false, BOOT_INFO_TYPE_ID_HOB), 0x1234_0000)
            .descriptor(boot_info_type(false, BOOT_INFO_TYPE_ID_FDT), manifest.as_ptr() as u64)
            .build();

        Self {
            volume,
            volume_address,
            manifest,
            boot_info,
        }
    }

    pub fn boot_info_address(&self) -> u64 {
        self.boot_info.as_ptr() as u64
    }

    pub fn manifest_address(&self) -> u64 {
        self.manifest.as_ptr() as u64
    }

    /// Overwrite the big-endian word at `offset` of the manifest in place
    pub fn patch_manifest(&mut self, offset: usize, word: u32) {
        put(&mut self.manifest, offset, &word.to_be_bytes());
    }

    pub fn volume_address(&self) -> u64 {
        self.volume_address
    }

    pub fn volume_len(&self) -> usize {
        self.volume.len()
    }

    /// The word covered by the relocation table, as it is now
    pub fn relocated_word(&self, image: &LoadedImage) -> u64 {
        let offset = image.context.rva_offset(Self::FIXUP_RVA).unwrap();
        let start = (image.data_address - self.volume_address) as usize;
        le_u64(&self.volume, start + offset).unwrap()
    }
}
