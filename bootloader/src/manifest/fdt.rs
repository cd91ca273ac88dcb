//! Flattened device tree reader
//!
//! Only the operations the bootstrap needs: find a node by compatible
//! string, walk subnodes, and read properties. Every offset taken from the
//! blob is checked, so a corrupt tree yields an error and never a read past
//! its end.

use core::slice;

use sp_api::{BootError, ManifestFault, ManifestMissingKind, Result};

use crate::utils::bytes::{align_up, be_u32, be_u64};

/// Device tree header magic
pub const FDT_MAGIC: u32 = 0xd00d_feed;

/// Size of the v17 header
pub const FDT_HEADER_SIZE: usize = 40;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

const FDT_TAG_SIZE: usize = 4;

/// Handle to a node of a [`ManifestReader`]
///
/// Wraps the offset of the node's `BEGIN_NODE` token in the structure block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestNode(usize);

#[derive(Debug, Clone, Copy)]
enum Token<'a> {
    BeginNode(&'a [u8]),
    EndNode,
    Prop { name_offset: u32, value: &'a [u8] },
    End,
}

/// Read-only view of a flattened device tree
#[derive(Debug, Clone, Copy)]
pub struct ManifestReader<'a> {
    structure: &'a [u8],
    strings: &'a [u8],
}

impl<'a> ManifestReader<'a> {
    /// Validate the header of `blob`
    pub fn new(blob: &'a [u8]) -> Result<Self> {
        let magic = be_u32(blob, 0).ok_or_else(out_of_bounds)?;
        if magic != FDT_MAGIC {
            log::error!("Invalid manifest magic: {:#x}", magic);
            return Err(BootError::ManifestMissing(
                ManifestMissingKind::BadManifestMagic(magic),
            ));
        }

        let field = |offset| be_u32(blob, offset).map(|v| v as usize).ok_or_else(out_of_bounds);
        let total_size = field(4)?;
        let off_struct = field(8)?;
        let off_strings = field(12)?;
        let size_strings = field(32)?;
        let size_struct = field(36)?;

        let blob = blob.get(..total_size).ok_or_else(out_of_bounds)?;
        let block = |offset: usize, size: usize| {
            offset
                .checked_add(size)
                .and_then(|end| blob.get(offset..end))
                .ok_or_else(out_of_bounds)
        };

        Ok(Self {
            structure: block(off_struct, size_struct)?,
            strings: block(off_strings, size_strings)?,
        })
    }

    /// View the tree at `address`
    ///
    /// # Safety
    ///
    /// `address` must point at readable memory holding at least the magic,
    /// and `totalsize` bytes if the magic matches. The memory must stay
    /// valid and unmodified for the rest of the boot.
    pub unsafe fn from_address(address: u64) -> Result<ManifestReader<'static>> {
        let base = address as usize as *const u8;
        // SAFETY: the caller guarantees the magic is readable.
        let head = unsafe { slice::from_raw_parts(base, 4) };
        if be_u32(head, 0) != Some(FDT_MAGIC) {
            return ManifestReader::new(head);
        }
        // SAFETY: a valid magic means the caller guarantees the header and
        // `totalsize` bytes are readable.
        let header = unsafe { slice::from_raw_parts(base, FDT_HEADER_SIZE) };
        let total_size = be_u32(header, 4).ok_or_else(out_of_bounds)? as usize;
        let blob = unsafe { slice::from_raw_parts(base, total_size.max(FDT_HEADER_SIZE)) };
        ManifestReader::new(blob)
    }

    /// The root node
    pub fn root(&self) -> Result<ManifestNode> {
        let offset = self.skip_nops(0)?;
        match self.token(offset)?.0 {
            Token::BeginNode(_) => Ok(ManifestNode(offset)),
            _ => Err(bad_structure()),
        }
    }

    /// Node name including any unit address
    pub fn name(&self, node: ManifestNode) -> Result<&'a [u8]> {
        match self.token(node.0)?.0 {
            Token::BeginNode(name) => Ok(name),
            _ => Err(bad_structure()),
        }
    }

    /// First node, in document order, whose `compatible` list contains `compatible`
    pub fn find_compatible(&self, compatible: &str) -> Result<Option<ManifestNode>> {
        let mut offset = 0;
        loop {
            let (token, next) = self.token(offset)?;
            match token {
                Token::BeginNode(_) => {
                    let node = ManifestNode(offset);
                    if let Some(list) = self.property(node, "compatible")? {
                        if string_list_contains(list, compatible.as_bytes()) {
                            return Ok(Some(node));
                        }
                    }
                }
                Token::End => return Ok(None),
                Token::EndNode | Token::Prop { .. } => {}
            }
            offset = next;
        }
    }

    /// Raw value of property `name` of `node`
    pub fn property(&self, node: ManifestNode, name: &str) -> Result<Option<&'a [u8]>> {
        let mut offset = self.body(node)?;
        loop {
            match self.token(offset)? {
                (Token::Prop { name_offset, value }, next) => {
                    if self.string(name_offset)? == name.as_bytes() {
                        return Ok(Some(value));
                    }
                    offset = next;
                }
                _ => return Ok(None),
            }
        }
    }

    /// Big-endian u32 property; present properties must be exactly 4 bytes
    pub fn u32_property(&self, node: ManifestNode, name: &'static str) -> Result<Option<u32>> {
        self.sized_property::<4>(node, name)
            .map(|value| value.map(u32::from_be_bytes))
    }

    /// Big-endian u64 property; present properties must be exactly 8 bytes
    pub fn u64_property(&self, node: ManifestNode, name: &'static str) -> Result<Option<u64>> {
        self.sized_property::<8>(node, name)
            .map(|value| value.map(u64::from_be_bytes))
    }

    /// Required u32 property
    pub fn read_u32(&self, node: ManifestNode, name: &'static str) -> Result<u32> {
        self.u32_property(node, name)?.ok_or_else(|| missing(name))
    }

    /// Required u64 property
    pub fn read_u64(&self, node: ManifestNode, name: &'static str) -> Result<u64> {
        self.u64_property(node, name)?.ok_or_else(|| missing(name))
    }

    /// Required byte-string property
    pub fn read_bytes(&self, node: ManifestNode, name: &'static str) -> Result<&'a [u8]> {
        self.property(node, name)?.ok_or_else(|| missing(name))
    }

    /// Direct subnodes of `node`
    pub fn subnodes(&self, node: ManifestNode) -> Subnodes<'_, 'a> {
        Subnodes {
            reader: self,
            next: Some(self.first_child(node)),
        }
    }

    /// Direct subnode called `name`; a `@unit` suffix on the subnode is ignored
    pub fn subnode(&self, node: ManifestNode, name: &str) -> Result<Option<ManifestNode>> {
        for child in self.subnodes(node) {
            let child = child?;
            let child_name = self.name(child)?;
            let base = child_name
                .iter()
                .position(|b| *b == b'@')
                .map_or(child_name, |at| &child_name[..at]);
            if base == name.as_bytes() || child_name == name.as_bytes() {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    fn sized_property<const N: usize>(
        &self,
        node: ManifestNode,
        name: &'static str,
    ) -> Result<Option<[u8; N]>> {
        let Some(value) = self.property(node, name)? else {
            return Ok(None);
        };
        match <[u8; N]>::try_from(value) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(_) => {
                log::error!("{}: {} bytes, expected {}", name, value.len(), N);
                Err(BootError::ManifestMalformed(ManifestFault::PropertyWidth {
                    name,
                    expected: N,
                    actual: value.len(),
                }))
            }
        }
    }

    fn first_child(&self, node: ManifestNode) -> Result<Option<ManifestNode>> {
        let offset = self.skip_properties(self.body(node)?)?;
        self.node_at(offset)
    }

    fn next_sibling(&self, node: ManifestNode) -> Result<Option<ManifestNode>> {
        let offset = self.skip_node(node.0)?;
        self.node_at(offset)
    }

    fn node_at(&self, offset: usize) -> Result<Option<ManifestNode>> {
        let offset = self.skip_nops(offset)?;
        match self.token(offset)?.0 {
            Token::BeginNode(_) => Ok(Some(ManifestNode(offset))),
            Token::EndNode => Ok(None),
            _ => Err(bad_structure()),
        }
    }

    /// Offset just past the node's `BEGIN_NODE` token
    fn body(&self, node: ManifestNode) -> Result<usize> {
        match self.token(node.0)? {
            (Token::BeginNode(_), next) => Ok(next),
            _ => Err(bad_structure()),
        }
    }

    fn skip_properties(&self, mut offset: usize) -> Result<usize> {
        loop {
            match self.token(offset)? {
                (Token::Prop { .. }, next) => offset = next,
                _ => return Ok(offset),
            }
        }
    }

    /// Offset just past the `END_NODE` matching the node at `offset`
    fn skip_node(&self, mut offset: usize) -> Result<usize> {
        let mut depth = 0usize;
        loop {
            let (token, next) = self.token(offset)?;
            match token {
                Token::BeginNode(_) => depth += 1,
                Token::EndNode => {
                    depth = depth.checked_sub(1).ok_or_else(bad_structure)?;
                    if depth == 0 {
                        return Ok(next);
                    }
                }
                Token::Prop { .. } => {}
                Token::End => return Err(bad_structure()),
            }
            offset = next;
        }
    }

    fn skip_nops(&self, mut offset: usize) -> Result<usize> {
        while be_u32(self.structure, offset) == Some(FDT_NOP) {
            offset += FDT_TAG_SIZE;
        }
        Ok(offset)
    }

    /// Decode the token at `offset`, skipping NOPs; returns the offset of
    /// the token after it
    fn token(&self, offset: usize) -> Result<(Token<'a>, usize)> {
        let offset = self.skip_nops(offset)?;
        let tag = be_u32(self.structure, offset).ok_or_else(out_of_bounds)?;
        let data = offset + FDT_TAG_SIZE;
        match tag {
            FDT_BEGIN_NODE => {
                let rest = self.structure.get(data..).ok_or_else(out_of_bounds)?;
                let len = rest.iter().position(|b| *b == 0).ok_or_else(out_of_bounds)?;
                let next = align_up(data + len + 1, FDT_TAG_SIZE).ok_or_else(out_of_bounds)?;
                Ok((Token::BeginNode(&rest[..len]), next))
            }
            FDT_END_NODE => Ok((Token::EndNode, data)),
            FDT_PROP => {
                let len = be_u32(self.structure, data).ok_or_else(out_of_bounds)? as usize;
                let name_offset = be_u32(self.structure, data + 4).ok_or_else(out_of_bounds)?;
                let start = data + 8;
                let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
                let value = self.structure.get(start..end).ok_or_else(out_of_bounds)?;
                let next = align_up(end, FDT_TAG_SIZE).ok_or_else(out_of_bounds)?;
                Ok((Token::Prop { name_offset, value }, next))
            }
            FDT_END => Ok((Token::End, data)),
            other => {
                log::error!("Unexpected device tree token {:#x} at {:#x}", other, offset);
                Err(bad_structure())
            }
        }
    }

    fn string(&self, offset: u32) -> Result<&'a [u8]> {
        let rest = self.strings.get(offset as usize..).ok_or_else(out_of_bounds)?;
        let len = rest.iter().position(|b| *b == 0).ok_or_else(out_of_bounds)?;
        Ok(&rest[..len])
    }
}

/// Iterator over the direct subnodes of a node; stops after the first error
pub struct Subnodes<'r, 'a> {
    reader: &'r ManifestReader<'a>,
    next: Option<Result<Option<ManifestNode>>>,
}

impl Iterator for Subnodes<'_, '_> {
    type Item = Result<ManifestNode>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next.take()? {
            Ok(Some(node)) => {
                self.next = Some(self.reader.next_sibling(node));
                Some(Ok(node))
            }
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

fn string_list_contains(list: &[u8], wanted: &[u8]) -> bool {
    list.split(|b| *b == 0).any(|entry| entry == wanted)
}

fn missing(name: &'static str) -> BootError {
    log::error!("{} missing in manifest", name);
    BootError::ManifestMissing(ManifestMissingKind::MissingProperty(name))
}

fn out_of_bounds() -> BootError {
    BootError::ManifestMalformed(ManifestFault::OutOfBounds)
}

fn bad_structure() -> BootError {
    BootError::ManifestMalformed(ManifestFault::BadStructure)
}
