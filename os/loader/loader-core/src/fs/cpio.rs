//! cpio archives, portable ASCII (`070707`) and SVR4 (`070701`, `070702`) headers.

use super::name_matches;
use crate::bytes::parse_radix;

const TRAILER: &[u8] = b"TRAILER!!!";

const ODC_MAGIC: &[u8] = b"070707";
const ODC_HEADER: usize = 76;

const NEWC_MAGIC: &[u8] = b"070701";
const CRC_MAGIC: &[u8] = b"070702";
const NEWC_HEADER: usize = 110;

/// One archive member as located by a header walker.
struct Member<'a> {
    name: &'a [u8],
    data: &'a [u8],
    next: usize,
}

/// Name field without its terminating NUL.
fn member_name(image: &[u8], start: usize, namesize: usize) -> Option<&[u8]> {
    let raw = image.get(start..start.checked_add(namesize)?)?;
    Some(raw.strip_suffix(&[0]).unwrap_or(raw))
}

fn odc_member(image: &[u8], offset: usize) -> Option<Member<'_>> {
    let header = image.get(offset..offset.checked_add(ODC_HEADER)?)?;
    if &header[..6] != ODC_MAGIC {
        return None;
    }
    let namesize = usize::try_from(parse_radix(&header[59..65], 8)?).ok()?;
    let filesize = usize::try_from(parse_radix(&header[65..76], 8)?).ok()?;
    let name_start = offset + ODC_HEADER;
    let data_start = name_start.checked_add(namesize)?;
    let next = data_start.checked_add(filesize)?;
    Some(Member {
        name: member_name(image, name_start, namesize)?,
        data: image.get(data_start..next)?,
        next,
    })
}

fn newc_member(image: &[u8], offset: usize) -> Option<Member<'_>> {
    let header = image.get(offset..offset.checked_add(NEWC_HEADER)?)?;
    if &header[..6] != NEWC_MAGIC && &header[..6] != CRC_MAGIC {
        return None;
    }
    let filesize = usize::try_from(parse_radix(&header[54..62], 16)?).ok()?;
    let namesize = usize::try_from(parse_radix(&header[94..102], 16)?).ok()?;
    let name_start = offset + NEWC_HEADER;
    let data_start = name_start.checked_add(namesize)?.next_multiple_of(4);
    let data_end = data_start.checked_add(filesize)?;
    Some(Member {
        name: member_name(image, name_start, namesize)?,
        data: image.get(data_start..data_end)?,
        next: data_end.next_multiple_of(4),
    })
}

fn walk<'a>(
    image: &'a [u8],
    path: &str,
    member_at: fn(&'a [u8], usize) -> Option<Member<'a>>,
) -> Option<&'a [u8]> {
    let mut offset = 0;
    while offset < image.len() {
        let member = member_at(image, offset)?;
        if member.name == TRAILER {
            return None;
        }
        if name_matches(member.name, path) {
            return Some(member.data);
        }
        offset = member.next;
    }
    None
}

pub fn locate_odc<'a>(image: &'a [u8], path: &str) -> Option<&'a [u8]> {
    walk(image, path, odc_member)
}

pub fn locate_newc<'a>(image: &'a [u8], path: &str) -> Option<&'a [u8]> {
    walk(image, path, newc_member)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{newc, odc};
    use super::*;

    #[test]
    fn newc_data_is_four_byte_aligned() {
        let archive = newc(&[("ab", b"xyz"), ("sys/core", b"core")]);
        assert_eq!(locate_newc(&archive, "ab"), Some(b"xyz".as_slice()));
        assert_eq!(locate_newc(&archive, "sys/core"), Some(b"core".as_slice()));
        assert_eq!(locate_odc(&archive, "ab"), None);
    }

    #[test]
    fn crc_flavor_uses_newc_layout() {
        let mut archive = newc(&[("k", b"v")]);
        archive[5] = b'2';
        assert_eq!(locate_newc(&archive, "k"), Some(b"v".as_slice()));
    }

    #[test]
    fn odc_stops_at_trailer() {
        let mut archive = odc(&[("a", b"1")]);
        archive.extend_from_slice(&odc(&[("b", b"2")]));
        assert_eq!(locate_odc(&archive, "a"), Some(b"1".as_slice()));
        assert_eq!(locate_odc(&archive, "b"), None);
        assert_eq!(locate_newc(&archive, "a"), None);
    }
}
