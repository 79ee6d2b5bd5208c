//! Constants that differ between the two supported CPU architectures.

/// CPU architecture the kernel is built for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Aarch64,
}

impl Architecture {
    /// `e_machine` of a native ELF image.
    #[must_use]
    pub const fn elf_machine(self) -> u16 {
        match self {
            Self::X86_64 => 62,
            Self::Aarch64 => 183,
        }
    }

    /// COFF machine of a native PE image. Also the GUID `Data2` of an OS/Z root partition.
    #[must_use]
    pub const fn pe_machine(self) -> u16 {
        match self {
            Self::X86_64 => 0x8664,
            Self::Aarch64 => 0xAA64,
        }
    }

    /// 8.3 name of the architecture specific ramdisk in the `BOOTBOOT` directory.
    #[must_use]
    pub const fn ramdisk_name(self) -> &'static [u8; 11] {
        match self {
            Self::X86_64 => b"X86_64     ",
            Self::Aarch64 => b"AARCH64    ",
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }
}
