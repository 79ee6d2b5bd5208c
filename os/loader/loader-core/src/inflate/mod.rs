//! # DEFLATE Decoder
//!
//! A bounded, allocation free decoder for raw DEFLATE streams (RFC 1951)
//! with the gzip framing of RFC 1952 in [`gzip`]. Huffman codes are kept in
//! canonical form as per-length counts plus symbols sorted by code, and
//! decoded one bit at a time. That is slower than table driven decoding
//! but needs no scratch space beyond the two code tables.
//!
//! Every failure is an [`InflateError`]; the decoder never writes past the
//! end of its output slice and never reads past the end of its input.

#![allow(clippy::cast_possible_truncation)]

pub mod gzip;

/// Longest code length DEFLATE allows.
const MAX_BITS: usize = 15;
/// Literal/length symbols, including the two that never occur.
const MAX_LIT_LEN_CODES: usize = 288;
const MAX_DIST_CODES: usize = 30;
const MAX_CODE_LENGTH_CODES: usize = 19;
const END_OF_BLOCK: u16 = 256;

const LENGTH_BASE: [u16; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u8; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];
const DIST_BASE: [u16; 30] = [
    1, 2, 3, 4, 5, 7, 9, 13, 17, 25, 33, 49, 65, 97, 129, 193, 257, 385, 513, 769, 1025, 1537,
    2049, 3073, 4097, 6145, 8193, 12289, 16385, 24577,
];
const DIST_EXTRA: [u8; 30] = [
    0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13,
    13,
];
/// Order in which code length code lengths are transmitted.
const CODE_LENGTH_ORDER: [usize; MAX_CODE_LENGTH_CODES] =
    [16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15];

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InflateError {
    #[error("not a gzip stream")]
    BadHeader,
    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u8),
    #[error("invalid block type")]
    BadBlockType,
    #[error("stored block length does not match its complement")]
    StoredLengthMismatch,
    #[error("invalid Huffman code table")]
    BadTable,
    #[error("invalid literal/length or distance symbol")]
    BadSymbol,
    #[error("back reference points before the start of the output")]
    DistanceTooFar,
    #[error("compressed stream ends unexpectedly")]
    UnexpectedEnd,
    #[error("output exceeds the destination buffer")]
    OutputOverflow,
    #[error("inflated {actual} bytes, the stream declares {expected}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// LSB-first bit source over the compressed input.
struct BitReader<'a> {
    src: &'a [u8],
    pos: usize,
    buf: u32,
    count: u32,
}

impl<'a> BitReader<'a> {
    const fn new(src: &'a [u8]) -> Self {
        Self {
            src,
            pos: 0,
            buf: 0,
            count: 0,
        }
    }

    /// Takes `need` (at most 16) bits. Fewer than 8 bits stay buffered afterwards.
    fn bits(&mut self, need: u32) -> Result<u32, InflateError> {
        while self.count < need {
            let byte = *self.src.get(self.pos).ok_or(InflateError::UnexpectedEnd)?;
            self.buf |= u32::from(byte) << self.count;
            self.pos += 1;
            self.count += 8;
        }
        let value = self.buf & ((1 << need) - 1);
        self.buf >>= need;
        self.count -= need;
        Ok(value)
    }

    /// Drops the partial byte so the next read starts on a byte boundary.
    const fn align_to_byte(&mut self) {
        self.buf = 0;
        self.count = 0;
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], InflateError> {
        let end = self.pos.checked_add(len).ok_or(InflateError::UnexpectedEnd)?;
        let bytes = self.src.get(self.pos..end).ok_or(InflateError::UnexpectedEnd)?;
        self.pos = end;
        Ok(bytes)
    }
}

/// Bounded output window; the whole output is the history.
struct Output<'d> {
    dest: &'d mut [u8],
    len: usize,
}

impl Output<'_> {
    fn push(&mut self, byte: u8) -> Result<(), InflateError> {
        let slot = self.dest.get_mut(self.len).ok_or(InflateError::OutputOverflow)?;
        *slot = byte;
        self.len += 1;
        Ok(())
    }

    fn extend(&mut self, bytes: &[u8]) -> Result<(), InflateError> {
        let end = self.len + bytes.len();
        self.dest
            .get_mut(self.len..end)
            .ok_or(InflateError::OutputOverflow)?
            .copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Copies `length` bytes from `distance` back. Overlapping copies repeat.
    fn copy_back(&mut self, distance: usize, length: usize) -> Result<(), InflateError> {
        if distance > self.len {
            return Err(InflateError::DistanceTooFar);
        }
        if self.len + length > self.dest.len() {
            return Err(InflateError::OutputOverflow);
        }
        for _ in 0..length {
            self.dest[self.len] = self.dest[self.len - distance];
            self.len += 1;
        }
        Ok(())
    }
}

/// A canonical Huffman code.
struct Huffman {
    /// Number of codes of each length; `counts[0]` counts unused symbols.
    counts: [u16; MAX_BITS + 1],
    /// Symbols ordered by code.
    symbols: [u16; MAX_LIT_LEN_CODES],
}

/// How a set of code lengths covers the code space.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Coverage {
    Complete,
    Incomplete,
}

impl Huffman {
    fn new(lengths: &[u8]) -> Result<(Self, Coverage), InflateError> {
        let mut code = Self {
            counts: [0; MAX_BITS + 1],
            symbols: [0; MAX_LIT_LEN_CODES],
        };
        for &len in lengths {
            code.counts[usize::from(len)] += 1;
        }
        if usize::from(code.counts[0]) == lengths.len() {
            return Ok((code, Coverage::Incomplete));
        }

        let mut left: i32 = 1;
        for &count in &code.counts[1..] {
            left <<= 1;
            left -= i32::from(count);
            if left < 0 {
                return Err(InflateError::BadTable);
            }
        }

        let mut offsets = [0u16; MAX_BITS + 1];
        for len in 1..MAX_BITS {
            offsets[len + 1] = offsets[len] + code.counts[len];
        }
        for (symbol, &len) in (0u16..).zip(lengths) {
            if len != 0 {
                let slot = &mut offsets[usize::from(len)];
                code.symbols[usize::from(*slot)] = symbol;
                *slot += 1;
            }
        }

        let coverage = if left > 0 { Coverage::Incomplete } else { Coverage::Complete };
        Ok((code, coverage))
    }

    /// An incomplete code is only accepted if it has no codes longer than one bit.
    fn new_allowing_single(lengths: &[u8]) -> Result<Self, InflateError> {
        let (code, coverage) = Self::new(lengths)?;
        let short = usize::from(code.counts[0]) + usize::from(code.counts[1]);
        if coverage == Coverage::Incomplete && short != lengths.len() {
            return Err(InflateError::BadTable);
        }
        Ok(code)
    }

    fn decode(&self, reader: &mut BitReader<'_>) -> Result<u16, InflateError> {
        let mut code: i32 = 0;
        let mut first: i32 = 0;
        let mut index: i32 = 0;
        for &count in &self.counts[1..] {
            code |= reader.bits(1)?.cast_signed();
            let count = i32::from(count);
            if code - count < first {
                let slot = usize::try_from(index + (code - first)).map_err(|_| InflateError::BadSymbol)?;
                return Ok(self.symbols[slot]);
            }
            index += count;
            first += count;
            first <<= 1;
            code <<= 1;
        }
        Err(InflateError::BadSymbol)
    }
}

fn fixed_codes() -> Result<(Huffman, Huffman), InflateError> {
    let mut lengths = [0u8; MAX_LIT_LEN_CODES];
    lengths[..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..].fill(8);
    let (lit_len, _) = Huffman::new(&lengths)?;
    let (dist, _) = Huffman::new(&[5; MAX_DIST_CODES])?;
    Ok((lit_len, dist))
}

fn dynamic_codes(reader: &mut BitReader<'_>) -> Result<(Huffman, Huffman), InflateError> {
    let lit_len_count = reader.bits(5)? as usize + 257;
    let dist_count = reader.bits(5)? as usize + 1;
    let code_length_count = reader.bits(4)? as usize + 4;
    if lit_len_count > 286 || dist_count > MAX_DIST_CODES {
        return Err(InflateError::BadTable);
    }

    let mut lengths = [0u8; MAX_LIT_LEN_CODES + MAX_DIST_CODES];
    for &slot in &CODE_LENGTH_ORDER[..code_length_count] {
        lengths[slot] = reader.bits(3)? as u8;
    }
    let (code_lengths, coverage) = Huffman::new(&lengths[..MAX_CODE_LENGTH_CODES])?;
    if coverage != Coverage::Complete {
        return Err(InflateError::BadTable);
    }

    let total = lit_len_count + dist_count;
    let mut index = 0;
    while index < total {
        let symbol = code_lengths.decode(reader)?;
        if symbol < 16 {
            lengths[index] = symbol as u8;
            index += 1;
            continue;
        }
        let (value, repeat) = match symbol {
            16 => {
                let previous = *index
                    .checked_sub(1)
                    .and_then(|i| lengths.get(i))
                    .ok_or(InflateError::BadTable)?;
                (previous, 3 + reader.bits(2)? as usize)
            }
            17 => (0, 3 + reader.bits(3)? as usize),
            _ => (0, 11 + reader.bits(7)? as usize),
        };
        if index + repeat > total {
            return Err(InflateError::BadTable);
        }
        lengths[index..index + repeat].fill(value);
        index += repeat;
    }

    if lengths[usize::from(END_OF_BLOCK)] == 0 {
        return Err(InflateError::BadTable);
    }
    let lit_len = Huffman::new_allowing_single(&lengths[..lit_len_count])?;
    let dist = Huffman::new_allowing_single(&lengths[lit_len_count..total])?;
    Ok((lit_len, dist))
}

fn stored(reader: &mut BitReader<'_>, out: &mut Output<'_>) -> Result<(), InflateError> {
    reader.align_to_byte();
    let header = reader.bytes(4)?;
    let len = u16::from_le_bytes([header[0], header[1]]);
    let complement = u16::from_le_bytes([header[2], header[3]]);
    if len != !complement {
        return Err(InflateError::StoredLengthMismatch);
    }
    out.extend(reader.bytes(usize::from(len))?)
}

fn codes(
    reader: &mut BitReader<'_>,
    out: &mut Output<'_>,
    lit_len: &Huffman,
    dist: &Huffman,
) -> Result<(), InflateError> {
    loop {
        let symbol = lit_len.decode(reader)?;
        match symbol {
            0..=255 => out.push(symbol as u8)?,
            END_OF_BLOCK => return Ok(()),
            _ => {
                let index = usize::from(symbol - 257);
                let (&base, &extra) = LENGTH_BASE
                    .get(index)
                    .zip(LENGTH_EXTRA.get(index))
                    .ok_or(InflateError::BadSymbol)?;
                let length = usize::from(base) + reader.bits(u32::from(extra))? as usize;

                let index = usize::from(dist.decode(reader)?);
                let (&base, &extra) = DIST_BASE
                    .get(index)
                    .zip(DIST_EXTRA.get(index))
                    .ok_or(InflateError::BadSymbol)?;
                let distance = usize::from(base) + reader.bits(u32::from(extra))? as usize;

                out.copy_back(distance, length)?;
            }
        }
    }
}

/// Inflates the raw DEFLATE stream in `src` into `dest`.
///
/// Returns the number of bytes written. Trailing input after the final block
/// is ignored.
///
/// # Errors
/// Any [`InflateError`] describing why the stream cannot be decoded into `dest`.
pub fn inflate(src: &[u8], dest: &mut [u8]) -> Result<usize, InflateError> {
    let mut reader = BitReader::new(src);
    let mut out = Output { dest, len: 0 };
    loop {
        let last = reader.bits(1)? == 1;
        match reader.bits(2)? {
            0 => stored(&mut reader, &mut out)?,
            1 => {
                let (lit_len, dist) = fixed_codes()?;
                codes(&mut reader, &mut out, &lit_len, &dist)?;
            }
            2 => {
                let (lit_len, dist) = dynamic_codes(&mut reader)?;
                codes(&mut reader, &mut out, &lit_len, &dist)?;
            }
            _ => return Err(InflateError::BadBlockType),
        }
        if last {
            return Ok(out.len);
        }
    }
}
