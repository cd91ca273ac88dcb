//! Bounds-checked reads and writes of fixed-width integers
//!
//! Every accessor returns `None` instead of reading past the end of the slice.

fn field<const N: usize>(bytes: &[u8], offset: usize) -> Option<[u8; N]> {
    bytes.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

/// Little-endian u16 at `offset`
pub fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    field(bytes, offset).map(u16::from_le_bytes)
}

/// Little-endian 24-bit size field at `offset`
pub fn le_u24(bytes: &[u8], offset: usize) -> Option<u32> {
    field::<3>(bytes, offset).map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
}

/// Little-endian u32 at `offset`
pub fn le_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    field(bytes, offset).map(u32::from_le_bytes)
}

/// Little-endian u64 at `offset`
pub fn le_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    field(bytes, offset).map(u64::from_le_bytes)
}

/// Big-endian u32 at `offset`
pub fn be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    field(bytes, offset).map(u32::from_be_bytes)
}

/// Big-endian u64 at `offset`
pub fn be_u64(bytes: &[u8], offset: usize) -> Option<u64> {
    field(bytes, offset).map(u64::from_be_bytes)
}

/// Store a little-endian u32 at `offset`
pub fn put_le_u32(bytes: &mut [u8], offset: usize, value: u32) -> Option<()> {
    bytes
        .get_mut(offset..offset.checked_add(4)?)?
        .copy_from_slice(&value.to_le_bytes());
    Some(())
}

/// Store a little-endian u64 at `offset`
pub fn put_le_u64(bytes: &mut [u8], offset: usize, value: u64) -> Option<()> {
    bytes
        .get_mut(offset..offset.checked_add(8)?)?
        .copy_from_slice(&value.to_le_bytes());
    Some(())
}

/// Round `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: usize, align: usize) -> Option<usize> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_bounds_checked() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(le_u32(&bytes, 0), Some(0x0403_0201));
        assert_eq!(be_u32(&bytes, 1), Some(0x0203_0405));
        assert_eq!(le_u24(&bytes, 2), Some(0x05_0403));
        assert_eq!(le_u32(&bytes, 2), None);
        assert_eq!(le_u64(&bytes, 0), None);
        assert_eq!(le_u16(&bytes, usize::MAX), None);
    }

    #[test]
    fn test_writes_are_bounds_checked() {
        let mut bytes = [0u8; 8];
        assert_eq!(put_le_u32(&mut bytes, 4, 0xAABB_CCDD), Some(()));
        assert_eq!(bytes[4..], [0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(put_le_u64(&mut bytes, 1, 0), None);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 4), Some(0));
        assert_eq!(align_up(5, 4), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(usize::MAX, 8), None);
    }
}
