//! # Handoff Structure

use crate::memory::PAGE_SIZE;
use core::mem::{offset_of, size_of};

/// Kernel entry point. BOOTBOOT kernels take no arguments; they find the
/// handoff page at [`BOOTBOOT_INFO`](crate::memory::BOOTBOOT_INFO).
pub type KernelEntryFn = extern "C" fn() -> !;

/// The magic bytes at offset 0 of the handoff structure.
pub const BOOTBOOT_MAGIC: [u8; 4] = *b"BOOT";

/// Size of the fixed header that precedes the memory map.
pub const HEADER_SIZE: usize = 128;

/// Number of memory map entries that fit in the handoff page.
pub const MMAP_CAPACITY: usize = (PAGE_SIZE - HEADER_SIZE) / size_of::<MMapEnt>();

/// Protocol level reported in [`BootBoot::protocol`].
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    Minimal = 0,
    /// Static virtual addresses; the only level this loader produces.
    Static = 1,
    Dynamic = 2,
}

/// Identifies which loader produced the handoff.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoaderType {
    Bios = 0,
    Uefi = 1,
    RaspberryPi = 2,
}

/// Byte order of a framebuffer pixel, most significant channel first.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FramebufferType {
    Argb = 0,
    Rgba = 1,
    Abgr = 2,
    Bgra = 3,
}

/// The classification of a physical memory region.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemoryKind {
    /// Usable RAM.
    Free = 1,
    /// Reserved or unknown; never touch.
    Reserved = 2,
    /// Usable once the ACPI tables have been parsed.
    AcpiFree = 3,
    /// ACPI non-volatile storage.
    AcpiNvs = 4,
    /// Memory mapped I/O.
    Mmio = 5,
}

impl MemoryKind {
    /// Decodes a kind nibble; unknown values are reported as [`MemoryKind::Reserved`].
    #[must_use]
    pub const fn from_nibble(nibble: u8) -> Self {
        match nibble & 0xF {
            1 => Self::Free,
            3 => Self::AcpiFree,
            4 => Self::AcpiNvs,
            5 => Self::Mmio,
            _ => Self::Reserved,
        }
    }

    /// Whether the kernel may allocate from a region of this kind.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::AcpiFree)
    }
}

/// One memory map entry: a base pointer and a size whose low nibble holds the
/// [`MemoryKind`]. Sizes are therefore always multiples of 16 bytes.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MMapEnt {
    ptr: u64,
    size: u64,
}

impl MMapEnt {
    /// Builds an entry; the low four bits of `length` are discarded.
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryKind) -> Self {
        Self {
            ptr: base,
            size: (length & !0xF) | kind as u64,
        }
    }

    #[must_use]
    pub const fn base(&self) -> u64 {
        self.ptr
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.size & !0xF
    }

    /// Exclusive end address, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.ptr.saturating_add(self.length())
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn kind(&self) -> MemoryKind {
        MemoryKind::from_nibble((self.size & 0xF) as u8)
    }

    pub const fn set_length(&mut self, length: u64) {
        self.size = (length & !0xF) | (self.size & 0xF);
    }

    /// The raw size field, including the kind nibble.
    #[must_use]
    pub const fn raw_size(&self) -> u64 {
        self.size
    }
}

/// The 56-byte architecture specific union at offset 72.
///
/// On x86-64 the words are `acpi_ptr`, `smbi_ptr`, `efi_ptr`, `mp_ptr`;
/// on AArch64 they are `acpi_ptr`, `mmio_ptr`. Unused words stay zero.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ArchInfo {
    words: [u64; 7],
}

impl ArchInfo {
    #[must_use]
    pub const fn acpi_ptr(&self) -> u64 {
        self.words[0]
    }

    pub const fn set_acpi_ptr(&mut self, ptr: u64) {
        self.words[0] = ptr;
    }

    /// x86-64: SMBIOS entry point.
    #[must_use]
    pub const fn smbi_ptr(&self) -> u64 {
        self.words[1]
    }

    pub const fn set_smbi_ptr(&mut self, ptr: u64) {
        self.words[1] = ptr;
    }

    /// x86-64: EFI system table.
    #[must_use]
    pub const fn efi_ptr(&self) -> u64 {
        self.words[2]
    }

    pub const fn set_efi_ptr(&mut self, ptr: u64) {
        self.words[2] = ptr;
    }

    /// x86-64: MP floating pointer structure.
    #[must_use]
    pub const fn mp_ptr(&self) -> u64 {
        self.words[3]
    }

    pub const fn set_mp_ptr(&mut self, ptr: u64) {
        self.words[3] = ptr;
    }

    /// AArch64: physical base of the peripheral window. Shares its slot with `smbi_ptr`.
    #[must_use]
    pub const fn mmio_ptr(&self) -> u64 {
        self.words[1]
    }

    pub const fn set_mmio_ptr(&mut self, ptr: u64) {
        self.words[1] = ptr;
    }
}

/// Wall clock time at boot, encoded as eight BCD bytes in the handoff.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BcdTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub daylight: u8,
}

impl BcdTimestamp {
    /// Encodes as `[century, year, month, day, hour, minute, second, daylight]`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn to_bcd(&self) -> [u8; 8] {
        [
            to_bcd((self.year / 100) as u8),
            to_bcd((self.year % 100) as u8),
            to_bcd(self.month),
            to_bcd(self.day),
            to_bcd(self.hour),
            to_bcd(self.minute),
            to_bcd(self.second),
            to_bcd(self.daylight),
        ]
    }
}

const fn to_bcd(value: u8) -> u8 {
    let value = value % 100;
    ((value / 10) << 4) | (value % 10)
}

/// The fixed 128-byte handoff header.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct BootBoot {
    /// Always [`BOOTBOOT_MAGIC`].
    pub magic: [u8; 4],
    /// Header plus memory map length in bytes.
    pub size: u32,
    pub protocol: u8,
    pub loader_type: u8,
    pub flags: u16,
    /// Minutes east of UTC, within ±1440.
    pub timezone: i16,
    pub fb_type: u16,
    pub pagesize: u32,
    /// Boot processor id (local APIC id on x86-64).
    pub bspid: u32,
    pub datetime: [u8; 8],
    pub initrd_ptr: u64,
    pub initrd_size: u64,
    pub fb_ptr: u64,
    pub fb_size: u32,
    pub fb_width: u32,
    pub fb_height: u32,
    /// Bytes per framebuffer line.
    pub fb_scanline: u32,
    pub arch: ArchInfo,
}

impl BootBoot {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new() -> Self {
        Self {
            magic: BOOTBOOT_MAGIC,
            size: HEADER_SIZE as u32,
            protocol: Protocol::Static as u8,
            loader_type: LoaderType::Bios as u8,
            flags: 0,
            timezone: 0,
            fb_type: FramebufferType::Argb as u16,
            pagesize: PAGE_SIZE as u32,
            bspid: 0,
            datetime: [0; 8],
            initrd_ptr: 0,
            initrd_size: 0,
            fb_ptr: 0,
            fb_size: 0,
            fb_width: 0,
            fb_height: 0,
            fb_scanline: 0,
            arch: ArchInfo { words: [0; 7] },
        }
    }

    /// Stores the timezone, replacing out-of-range values with UTC.
    pub const fn set_timezone(&mut self, minutes: i16) {
        self.timezone = if minutes < -1440 || minutes > 1440 {
            0
        } else {
            minutes
        };
    }
}

impl Default for BootBoot {
    fn default() -> Self {
        Self::new()
    }
}

/// The handoff page: header followed by as many map entries as fit in 4 KiB.
///
/// The kernel sees this page at [`BOOTBOOT_INFO`](crate::memory::BOOTBOOT_INFO).
#[repr(C, align(4096))]
pub struct HandoffPage {
    pub header: BootBoot,
    pub mmap: [MMapEnt; MMAP_CAPACITY],
}

impl HandoffPage {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            header: BootBoot::new(),
            mmap: [MMapEnt { ptr: 0, size: 0 }; MMAP_CAPACITY],
        }
    }

    /// Number of memory map entries covered by `header.size`.
    #[must_use]
    pub const fn entry_count(&self) -> usize {
        let size = self.header.size as usize;
        if size <= HEADER_SIZE {
            0
        } else {
            (size - HEADER_SIZE) / size_of::<MMapEnt>()
        }
    }

    /// Updates `header.size` to cover `count` entries.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn set_entry_count(&mut self, count: usize) {
        let count = if count > MMAP_CAPACITY {
            MMAP_CAPACITY
        } else {
            count
        };
        self.header.size = (HEADER_SIZE + count * size_of::<MMapEnt>()) as u32;
    }

    #[must_use]
    pub fn entries(&self) -> &[MMapEnt] {
        &self.mmap[..self.entry_count()]
    }

    /// Physical address of the page, valid while the loader runs identity mapped.
    #[must_use]
    pub fn address(&self) -> u64 {
        core::ptr::from_ref(self) as u64
    }
}

impl Default for HandoffPage {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = {
    assert!(size_of::<BootBoot>() == HEADER_SIZE);
    assert!(size_of::<MMapEnt>() == 16);
    assert!(size_of::<ArchInfo>() == 56);
    assert!(size_of::<HandoffPage>() == PAGE_SIZE);
    assert!(offset_of!(BootBoot, size) == 4);
    assert!(offset_of!(BootBoot, protocol) == 8);
    assert!(offset_of!(BootBoot, loader_type) == 9);
    assert!(offset_of!(BootBoot, flags) == 10);
    assert!(offset_of!(BootBoot, timezone) == 12);
    assert!(offset_of!(BootBoot, fb_type) == 14);
    assert!(offset_of!(BootBoot, pagesize) == 16);
    assert!(offset_of!(BootBoot, bspid) == 20);
    assert!(offset_of!(BootBoot, datetime) == 24);
    assert!(offset_of!(BootBoot, initrd_ptr) == 32);
    assert!(offset_of!(BootBoot, initrd_size) == 40);
    assert!(offset_of!(BootBoot, fb_ptr) == 48);
    assert!(offset_of!(BootBoot, fb_size) == 56);
    assert!(offset_of!(BootBoot, fb_width) == 60);
    assert!(offset_of!(BootBoot, fb_height) == 64);
    assert!(offset_of!(BootBoot, fb_scanline) == 68);
    assert!(offset_of!(BootBoot, arch) == 72);
    assert!(offset_of!(HandoffPage, mmap) == HEADER_SIZE);
};
