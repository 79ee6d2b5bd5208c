//! # Kernel Image Recognition
//!
//! The loader does not relocate or lay out segments. A kernel is linked so
//! that its first loadable segment starts at the file's first byte and runs
//! at [`BOOTBOOT_CORE`](loader_protocol::memory::BOOTBOOT_CORE); the image is
//! mapped there page by page as it lies in memory. Recognition therefore
//! answers where the segment starts in the file, how many bytes to map, how
//! its first byte must be aligned, and where to jump.

use crate::arch::Architecture;
use crate::bytes::{u16_at, u32_at};
use core::mem::size_of;
use core::ptr::read_unaligned;
use loader_protocol::memory::{PAGE_SIZE, page_align_up};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("no ELF64 or PE32+ header")]
    Unrecognized,
    #[error("image is built for machine {0:#x}")]
    ForeignMachine(u16),
    #[error("image header is truncated or inconsistent")]
    Malformed,
    #[error("no loadable segment at file offset 0 in the high half")]
    NoLoadableSegment,
    #[error("image declares a zero sized kernel")]
    ZeroSize,
    #[error("image declares a zero entry point")]
    ZeroEntry,
    #[error("entry point {0:#x} lies outside the high half")]
    EntryOutsideHighHalf(u64),
    #[error("segment alignment {0:#x} is not a power of two")]
    Alignment(u64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageFormat {
    Elf64,
    Pe32Plus,
}

/// A recognized kernel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExecutableImage {
    pub format: ImageFormat,
    pub entry: u64,
    /// File offset of the loadable segment.
    pub offset: u64,
    /// Bytes to map from `offset`. ELF rounds the file size up to whole
    /// pages; PE32+ reports the exact sum of its header fields.
    pub size: u64,
    /// Alignment the segment asks for, a power of two; 1 if it asks for none.
    pub alignment: u64,
}

impl ExecutableImage {
    /// Pages the core window needs for the segment.
    #[must_use]
    pub const fn pages(&self) -> u64 {
        self.size.div_ceil(PAGE_SIZE as u64)
    }

    /// Alignment of the segment's first byte in physical memory: what the
    /// image asks for, but never less than the page the core window maps.
    #[must_use]
    pub const fn frame_alignment(&self) -> u64 {
        let page = PAGE_SIZE as u64;
        if self.alignment > page { self.alignment } else { page }
    }
}

/// `0` and `1` both mean unaligned.
const fn checked_alignment(align: u64) -> Result<u64, ImageError> {
    match align {
        0 | 1 => Ok(1),
        a if a.is_power_of_two() => Ok(a),
        a => Err(ImageError::Alignment(a)),
    }
}

// Minimal ELF64 definitions
#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Ehdr {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u64,
    e_phoff: u64,
    e_shoff: u64,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(clippy::struct_field_names)]
struct Elf64Phdr {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_paddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
/// OS/Z images carry their own magic in place of `\x7fELF`.
const OSZ_MAGIC: [u8; 4] = *b"OS/Z";
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const PT_LOAD: u32 = 1;

const MZ_MAGIC: [u8; 2] = *b"MZ";
const PE_MAGIC: [u8; 4] = *b"PE\0\0";
const PE_OPTIONAL_MAGIC_64: u16 = 0x20B;
const E_LFANEW: usize = 0x3C;

const fn is_high_half(address: u64) -> bool {
    address >> 48 == 0xFFFF
}

fn read_elf_header(blob: &[u8]) -> Option<Elf64Ehdr> {
    if blob.len() < size_of::<Elf64Ehdr>() {
        return None;
    }
    // SAFETY: bounds checked above; the blob has no alignment guarantee.
    let ehdr = unsafe { read_unaligned(blob.as_ptr().cast::<Elf64Ehdr>()) };
    let magic = [ehdr.e_ident[0], ehdr.e_ident[1], ehdr.e_ident[2], ehdr.e_ident[3]];
    (magic == ELF_MAGIC || magic == OSZ_MAGIC).then_some(ehdr)
}

/// Offset of the PE signature, if `blob` starts with an `MZ` stub pointing at one.
fn pe_offset(blob: &[u8]) -> Option<usize> {
    if blob.get(..2)? != MZ_MAGIC {
        return None;
    }
    let offset = usize::try_from(u32_at(blob, E_LFANEW)?).ok()?;
    (blob.get(offset..offset.checked_add(4)?)? == PE_MAGIC).then_some(offset)
}

/// Whether `blob` starts with a native ELF64 or PE32+ header.
/// Used to scan an unknown ramdisk for an embedded kernel.
#[must_use]
pub fn has_signature(blob: &[u8], arch: Architecture) -> bool {
    if let Some(ehdr) = read_elf_header(blob) {
        return ehdr.e_ident[4] == ELFCLASS64
            && ehdr.e_ident[5] == ELFDATA2LSB
            && ehdr.e_machine == arch.elf_machine()
            && ehdr.e_phnum > 0;
    }
    pe_offset(blob).is_some_and(|pe| {
        u16_at(blob, pe + 4) == Some(arch.pe_machine())
            && u16_at(blob, pe + 24) == Some(PE_OPTIONAL_MAGIC_64)
    })
}

/// Recognizes the kernel at the start of `blob`.
///
/// # Errors
/// [`ImageError::Unrecognized`] if it is neither ELF64 nor PE32+; any other
/// variant if it is, but cannot be booted on `arch`.
pub fn recognize(blob: &[u8], arch: Architecture) -> Result<ExecutableImage, ImageError> {
    let image = if let Some(ehdr) = read_elf_header(blob) {
        recognize_elf(blob, &ehdr, arch)?
    } else if let Some(pe) = pe_offset(blob) {
        recognize_pe(blob, pe, arch)?
    } else {
        return Err(ImageError::Unrecognized);
    };

    if image.size == 0 {
        return Err(ImageError::ZeroSize);
    }
    if image.entry == 0 {
        return Err(ImageError::ZeroEntry);
    }
    if !is_high_half(image.entry) {
        return Err(ImageError::EntryOutsideHighHalf(image.entry));
    }
    log::info!(
        "Kernel is {:?} for {}, entry {:#x}, {} pages",
        image.format,
        arch.name(),
        image.entry,
        image.pages()
    );
    Ok(image)
}

fn recognize_elf(
    blob: &[u8],
    ehdr: &Elf64Ehdr,
    arch: Architecture,
) -> Result<ExecutableImage, ImageError> {
    if ehdr.e_ident[4] != ELFCLASS64 || ehdr.e_ident[5] != ELFDATA2LSB {
        return Err(ImageError::Malformed);
    }
    if ehdr.e_machine != arch.elf_machine() {
        return Err(ImageError::ForeignMachine(ehdr.e_machine));
    }
    if ehdr.e_phnum == 0 {
        return Err(ImageError::NoLoadableSegment);
    }
    if usize::from(ehdr.e_phentsize) != size_of::<Elf64Phdr>() {
        return Err(ImageError::Malformed);
    }

    let phoff = usize::try_from(ehdr.e_phoff).map_err(|_| ImageError::Malformed)?;
    let table_size = size_of::<Elf64Phdr>() * usize::from(ehdr.e_phnum);
    let end = phoff.checked_add(table_size).ok_or(ImageError::Malformed)?;
    if end > blob.len() {
        return Err(ImageError::Malformed);
    }

    let segment = (0..usize::from(ehdr.e_phnum))
        .map(|i| {
            let off = phoff + i * size_of::<Elf64Phdr>();
            // SAFETY: off + sizeof(Phdr) is within blob by the table bound above.
            unsafe { read_unaligned(blob.as_ptr().add(off).cast::<Elf64Phdr>()) }
        })
        .find(|ph| ph.p_type == PT_LOAD && is_high_half(ph.p_vaddr) && ph.p_offset == 0)
        .ok_or(ImageError::NoLoadableSegment)?;

    Ok(ExecutableImage {
        format: ImageFormat::Elf64,
        entry: ehdr.e_entry,
        offset: segment.p_offset,
        size: page_align_up(segment.p_filesz),
        alignment: checked_alignment(segment.p_align)?,
    })
}

fn recognize_pe(blob: &[u8], pe: usize, arch: Architecture) -> Result<ExecutableImage, ImageError> {
    let field32 = |at| u32_at(blob, pe + at).ok_or(ImageError::Malformed);
    let machine = u16_at(blob, pe + 4).ok_or(ImageError::Malformed)?;
    if machine != arch.pe_machine() {
        return Err(ImageError::ForeignMachine(machine));
    }
    if u16_at(blob, pe + 24) != Some(PE_OPTIONAL_MAGIC_64) {
        return Err(ImageError::Malformed);
    }

    let text_size = u64::from(field32(28)?);
    let data_size = u64::from(field32(32)?);
    // Both are 32-bit fields that kernels link against the top 2 GiB, so they sign extend.
    let entry = i64::from(field32(40)?.cast_signed()).cast_unsigned();
    let code_base = i64::from(field32(44)?.cast_signed()).cast_unsigned();

    let size = entry
        .checked_sub(code_base)
        .and_then(|s| s.checked_add(text_size))
        .and_then(|s| s.checked_add(data_size))
        .ok_or(ImageError::Malformed)?;

    // The image is mapped as it lies in the file, so the file alignment is what
    // the first byte needs; the section alignment is the fallback.
    let alignment = match field32(60)? {
        0 => field32(56)?,
        file => file,
    };

    Ok(ExecutableImage {
        format: ImageFormat::Pe32Plus,
        entry,
        offset: 0,
        size,
        alignment: checked_alignment(u64::from(alignment))?,
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{elf, pe};
    use super::*;

    #[test]
    fn elf_size_is_file_size_rounded_to_pages() {
        let blob = elf(62, 0xFFFF_FFFF_FFE0_2000, 0x2345);
        let image = recognize(&blob, Architecture::X86_64).expect("recognized");
        assert_eq!(image.format, ImageFormat::Elf64);
        assert_eq!(image.entry, 0xFFFF_FFFF_FFE0_2000);
        assert_eq!(image.size, 0x3000);
        assert_eq!(image.pages(), 3);
        assert_eq!(image.offset, 0);
        assert_eq!(image.alignment, 1);
        assert_eq!(image.frame_alignment(), 0x1000);
    }

    #[test]
    fn elf_alignment_comes_from_the_segment() {
        let mut blob = elf(62, 0xFFFF_FFFF_FFE0_2000, 0x1000);
        blob[64 + 48..64 + 56].copy_from_slice(&0x20_0000u64.to_le_bytes());
        let image = recognize(&blob, Architecture::X86_64).expect("recognized");
        assert_eq!(image.alignment, 0x20_0000);
        assert_eq!(image.frame_alignment(), 0x20_0000);

        blob[64 + 48..64 + 56].copy_from_slice(&0x3000u64.to_le_bytes());
        assert_eq!(
            recognize(&blob, Architecture::X86_64),
            Err(ImageError::Alignment(0x3000))
        );
    }

    #[test]
    fn osz_magic_is_accepted() {
        let mut blob = elf(183, 0xFFFF_FFFF_FFE0_2080, 0x1000);
        blob[..4].copy_from_slice(b"OS/Z");
        assert!(recognize(&blob, Architecture::Aarch64).is_ok());
        assert!(has_signature(&blob, Architecture::Aarch64));
    }

    #[test]
    fn foreign_machine_is_rejected() {
        let blob = elf(183, 0xFFFF_FFFF_FFE0_2000, 0x1000);
        assert_eq!(
            recognize(&blob, Architecture::X86_64),
            Err(ImageError::ForeignMachine(183))
        );
        assert!(!has_signature(&blob, Architecture::X86_64));

        let blob = pe(0x8664, 0x8000_1000, 0x8000_1000, 0x1000, 0);
        assert_eq!(
            recognize(&blob, Architecture::Aarch64),
            Err(ImageError::ForeignMachine(0x8664))
        );
    }

    #[test]
    fn elf_needs_a_high_half_segment_at_offset_zero() {
        let mut blob = elf(62, 0xFFFF_FFFF_FFE0_2000, 0x1000);
        blob[64 + 8..64 + 16].copy_from_slice(&0x1000u64.to_le_bytes());
        assert_eq!(
            recognize(&blob, Architecture::X86_64),
            Err(ImageError::NoLoadableSegment)
        );

        let mut blob = elf(62, 0xFFFF_FFFF_FFE0_2000, 0x1000);
        blob[64 + 16..64 + 24].copy_from_slice(&0x40_0000u64.to_le_bytes());
        assert_eq!(
            recognize(&blob, Architecture::X86_64),
            Err(ImageError::NoLoadableSegment)
        );
    }

    #[test]
    fn zero_entry_and_zero_size_are_fatal() {
        let blob = elf(62, 0, 0x1000);
        assert_eq!(recognize(&blob, Architecture::X86_64), Err(ImageError::ZeroEntry));

        let mut blob = elf(62, 0xFFFF_FFFF_FFE0_2000, 0x1000);
        blob[64 + 32..64 + 40].fill(0);
        assert_eq!(recognize(&blob, Architecture::X86_64), Err(ImageError::ZeroSize));

        let blob = elf(62, 0x40_1000, 0x1000);
        assert_eq!(
            recognize(&blob, Architecture::X86_64),
            Err(ImageError::EntryOutsideHighHalf(0x40_1000))
        );
    }

    #[test]
    fn pe_entry_is_sign_extended() {
        let blob = pe(0xAA64, 0xFFE0_2100, 0xFFE0_2000, 0x1800, 0x900);
        let image = recognize(&blob, Architecture::Aarch64).expect("recognized");
        assert_eq!(image.format, ImageFormat::Pe32Plus);
        assert_eq!(image.entry, 0xFFFF_FFFF_FFE0_2100);
        assert!(has_signature(&blob, Architecture::Aarch64));
    }

    #[test]
    fn pe_size_is_the_exact_header_sum() {
        let blob = pe(0xAA64, 0xFFE0_2100, 0xFFE0_2000, 0x1800, 0x900);
        let image = recognize(&blob, Architecture::Aarch64).expect("recognized");
        // (entry - code base) + text + data, not rounded.
        assert_eq!(image.size, 0x2200);
        assert_eq!(image.pages(), 3);
        assert_eq!(image.offset, 0);
        assert_eq!(image.alignment, 0x1000);
    }

    #[test]
    fn pe_file_alignment_wins_over_section_alignment() {
        let mut blob = pe(0x8664, 0xFFE0_2000, 0xFFE0_2000, 0x1000, 0);
        blob[0x80 + 60..0x80 + 64].copy_from_slice(&0x200u32.to_le_bytes());
        let image = recognize(&blob, Architecture::X86_64).expect("recognized");
        assert_eq!(image.alignment, 0x200);
        assert_eq!(image.frame_alignment(), 0x1000);
    }

    #[test]
    fn garbage_is_unrecognized() {
        assert_eq!(recognize(&[0u8; 256], Architecture::X86_64), Err(ImageError::Unrecognized));
        assert_eq!(recognize(b"MZ", Architecture::X86_64), Err(ImageError::Unrecognized));
        assert!(!has_signature(&[], Architecture::X86_64));
    }
}
