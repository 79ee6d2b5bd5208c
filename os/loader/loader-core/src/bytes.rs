//! Bounds checked little-endian field access into on-disk structures.

#[inline]
pub fn u8_at(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

#[inline]
pub fn u16_at(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    let lo = u32_at(buf, offset)?;
    let hi = u32_at(buf, offset.checked_add(4)?)?;
    Some(u64::from(lo) | (u64::from(hi) << 32))
}

/// Parses an unsigned number in the given radix, ignoring surrounding NULs
/// and spaces as archive headers pad them.
pub fn parse_radix(field: &[u8], radix: u32) -> Option<u64> {
    let mut value: u64 = 0;
    let mut digits = 0;
    for &b in field {
        if b == 0 || b == b' ' {
            if digits > 0 {
                break;
            }
            continue;
        }
        let digit = char::from(b).to_digit(radix)?;
        value = value.checked_mul(u64::from(radix))?.checked_add(u64::from(digit))?;
        digits += 1;
    }
    (digits > 0).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_reads_are_bounds_checked() {
        let buf = [0x34, 0x12, 0x78, 0x56, 0xff];
        assert_eq!(u16_at(&buf, 0), Some(0x1234));
        assert_eq!(u32_at(&buf, 0), Some(0x5678_1234));
        assert_eq!(u32_at(&buf, 2), None);
        assert_eq!(u64_at(&buf, 0), None);
        assert_eq!(u8_at(&buf, 4), Some(0xff));
    }

    #[test]
    fn radix_fields() {
        assert_eq!(parse_radix(b"00000001750\0", 8), Some(0o1750));
        assert_eq!(parse_radix(b"  17 ", 8), Some(0o17));
        assert_eq!(parse_radix(b"0000001A", 16), Some(0x1a));
        assert_eq!(parse_radix(b"\0\0\0", 8), None);
        assert_eq!(parse_radix(b"9", 8), None);
    }
}
