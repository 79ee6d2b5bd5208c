//! POSIX ustar archives.

use super::name_matches;
use crate::bytes::parse_radix;

const RECORD: usize = 512;

pub fn locate<'a>(image: &'a [u8], path: &str) -> Option<&'a [u8]> {
    let mut offset: usize = 0;
    loop {
        let header = image.get(offset..offset.checked_add(RECORD)?)?;
        if &header[257..262] != b"ustar" {
            return None;
        }
        let size = usize::try_from(parse_radix(&header[124..136], 8)?).ok()?;
        let data_start = offset + RECORD;
        let name = &header[..100];
        let name = &name[..name.iter().position(|&b| b == 0).unwrap_or(name.len())];
        if name_matches(name, path) {
            return image.get(data_start..data_start.checked_add(size)?);
        }
        offset = data_start.checked_add(size.next_multiple_of(RECORD))?;
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::ustar;
    use super::*;

    #[test]
    fn walks_past_padded_members() {
        let big = vec![7u8; 1000];
        let archive = ustar(&[("a", &big), ("b", b"second")]);
        assert_eq!(locate(&archive, "b"), Some(b"second".as_slice()));
        assert_eq!(locate(&archive, "a").map(<[u8]>::len), Some(1000));
    }

    #[test]
    fn truncated_member_is_not_returned() {
        let mut archive = ustar(&[("a", &[1u8; 600])]);
        archive.truncate(RECORD + 100);
        assert_eq!(locate(&archive, "a"), None);
    }
}
