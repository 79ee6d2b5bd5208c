//! gzip member framing around a DEFLATE stream.

use super::{InflateError, inflate};
use crate::bytes::{u16_at, u32_at};

const MAGIC: [u8; 2] = [0x1F, 0x8B];
const METHOD_DEFLATE: u8 = 8;
const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;
const FIXED_HEADER: usize = 10;
/// CRC32 and ISIZE.
const TRAILER: usize = 8;

/// A parsed gzip member: the compressed payload and the size it declares.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GzipStream<'a> {
    pub deflate: &'a [u8],
    /// ISIZE, the uncompressed length modulo 2^32.
    pub declared_size: u32,
}

impl<'a> GzipStream<'a> {
    /// Whether `blob` starts with the gzip magic.
    #[must_use]
    pub fn is_gzip(blob: &[u8]) -> bool {
        blob.starts_with(&MAGIC)
    }

    /// Parses the header, skipping the optional extra, name, comment and header CRC fields.
    ///
    /// # Errors
    /// [`InflateError::BadHeader`] if the framing is inconsistent,
    /// [`InflateError::UnsupportedMethod`] for anything but DEFLATE.
    pub fn parse(blob: &'a [u8]) -> Result<Self, InflateError> {
        if !Self::is_gzip(blob) || blob.len() < FIXED_HEADER + TRAILER {
            return Err(InflateError::BadHeader);
        }
        let method = blob[2];
        if method != METHOD_DEFLATE {
            return Err(InflateError::UnsupportedMethod(method));
        }
        let flags = blob[3];
        let body_end = blob.len() - TRAILER;
        let header = &blob[..body_end];

        let mut pos = FIXED_HEADER;
        if flags & FEXTRA != 0 {
            let extra = u16_at(header, pos).ok_or(InflateError::BadHeader)?;
            pos += 2 + usize::from(extra);
        }
        for field in [FNAME, FCOMMENT] {
            if flags & field != 0 {
                let text = header.get(pos..).ok_or(InflateError::BadHeader)?;
                let nul = text.iter().position(|&b| b == 0).ok_or(InflateError::BadHeader)?;
                pos += nul + 1;
            }
        }
        if flags & FHCRC != 0 {
            pos += 2;
        }

        let deflate = blob.get(pos..body_end).ok_or(InflateError::BadHeader)?;
        let declared_size = u32_at(blob, body_end + 4).ok_or(InflateError::BadHeader)?;
        Ok(Self {
            deflate,
            declared_size,
        })
    }

    #[must_use]
    pub const fn declared_size(&self) -> usize {
        self.declared_size as usize
    }

    /// Inflates into `dest`, which must hold at least [`declared_size`](Self::declared_size) bytes.
    ///
    /// # Errors
    /// Any decode error, [`InflateError::OutputOverflow`] if `dest` is too small,
    /// or [`InflateError::LengthMismatch`] if the output is shorter than declared.
    pub fn inflate_into(&self, dest: &mut [u8]) -> Result<usize, InflateError> {
        let expected = self.declared_size();
        let dest = dest.get_mut(..expected).ok_or(InflateError::OutputOverflow)?;
        let actual = inflate(self.deflate, dest)?;
        if actual != expected {
            return Err(InflateError::LengthMismatch { expected, actual });
        }
        log::debug!(
            "Inflated {} compressed bytes to {actual}",
            self.deflate.len()
        );
        Ok(actual)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_vectors::{FIXED, dynamic_text, DYNAMIC};
    use super::*;

    fn member(flags: u8, optional: &[u8], deflate: &[u8], isize: u32) -> Vec<u8> {
        let mut out = vec![0x1F, 0x8B, 8, flags, 0, 0, 0, 0, 0, 3];
        out.extend_from_slice(optional);
        out.extend_from_slice(deflate);
        out.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        out.extend_from_slice(&isize.to_le_bytes());
        out
    }

    #[test]
    fn skips_every_optional_header_field() {
        let mut optional = Vec::new();
        optional.extend_from_slice(&3u16.to_le_bytes());
        optional.extend_from_slice(b"xyz");
        optional.extend_from_slice(b"initrd.tar\0");
        optional.extend_from_slice(b"a comment\0");
        optional.extend_from_slice(&[0xAA, 0xBB]);
        let blob = member(FEXTRA | FNAME | FCOMMENT | FHCRC, &optional, &FIXED, 18);

        let stream = GzipStream::parse(&blob).expect("valid header");
        assert_eq!(stream.deflate, FIXED.as_slice());
        assert_eq!(stream.declared_size(), 18);

        let mut out = [0u8; 18];
        assert_eq!(stream.inflate_into(&mut out), Ok(18));
        assert_eq!(&out, b"abcabcabcabcabcabc");
    }

    fn inflate_fixed(blob: &[u8]) {
        let stream = GzipStream::parse(blob).expect("valid header");
        assert_eq!(stream.deflate, FIXED.as_slice());
        let mut out = [0u8; 18];
        assert_eq!(stream.inflate_into(&mut out), Ok(18));
        assert_eq!(&out, b"abcabcabcabcabcabc");
    }

    #[test]
    fn extra_field_is_skipped_by_its_length() {
        let mut optional = Vec::new();
        optional.extend_from_slice(&5u16.to_le_bytes());
        optional.extend_from_slice(&[0, 0, 0x1f, 0x8b, 8]);
        inflate_fixed(&member(FEXTRA, &optional, &FIXED, 18));
    }

    #[test]
    fn file_name_is_skipped_up_to_its_terminator() {
        inflate_fixed(&member(FNAME, b"initrd\0", &FIXED, 18));
    }

    #[test]
    fn comment_is_skipped_up_to_its_terminator() {
        inflate_fixed(&member(FCOMMENT, b"built by mkbootimg\0", &FIXED, 18));
    }

    #[test]
    fn header_crc_is_skipped() {
        inflate_fixed(&member(FHCRC, &[0x12, 0x34], &FIXED, 18));
    }

    #[test]
    fn plain_member_round_trips_dynamic_block() {
        let text = dynamic_text();
        let blob = member(0, &[], &DYNAMIC, text.len() as u32);
        let stream = GzipStream::parse(&blob).expect("valid header");
        let mut out = vec![0u8; stream.declared_size()];
        stream.inflate_into(&mut out).expect("inflates");
        assert_eq!(out, text);
    }

    #[test]
    fn short_output_is_not_silently_accepted() {
        let blob = member(0, &[], &FIXED, 20);
        let stream = GzipStream::parse(&blob).expect("valid header");
        let mut out = [0u8; 20];
        assert_eq!(
            stream.inflate_into(&mut out),
            Err(InflateError::LengthMismatch { expected: 20, actual: 18 })
        );
        let mut small = [0u8; 10];
        assert_eq!(stream.inflate_into(&mut small), Err(InflateError::OutputOverflow));
    }

    #[test]
    fn bad_framing() {
        assert!(!GzipStream::is_gzip(b"070701"));
        assert_eq!(GzipStream::parse(b"\x1f\x8b"), Err(InflateError::BadHeader));

        let mut blob = member(0, &[], &FIXED, 18);
        blob[2] = 7;
        assert_eq!(GzipStream::parse(&blob), Err(InflateError::UnsupportedMethod(7)));

        // Name without terminator runs into the trailer.
        let blob = member(FNAME, b"name", &[], 0);
        assert_eq!(GzipStream::parse(&blob), Err(InflateError::BadHeader));
    }
}
