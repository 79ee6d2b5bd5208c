use bitfield_struct::bitfield;

/// Size offset used for both halves: a 30-bit (1 GiB) address space per TTBR,
/// which with a 4 KiB granule starts the walk at level 2.
pub const TWO_LEVEL_TXSZ: u8 = 34;

/// TCR_EL1: Translation Control Register.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Tcr {
    /// Bits 0-5, T0SZ: TTBR0 region is 2^(64-T0SZ) bytes.
    #[bits(6)]
    pub t0sz: u8,
    #[bits(1)]
    reserved6: u8,
    /// Bit 7, EPD0: disable TTBR0 walks.
    pub epd0: bool,
    /// Bits 8-9, IRGN0: inner cacheability of TTBR0 walks.
    #[bits(2)]
    pub irgn0: u8,
    /// Bits 10-11, ORGN0: outer cacheability of TTBR0 walks.
    #[bits(2)]
    pub orgn0: u8,
    /// Bits 12-13, SH0: shareability of TTBR0 walks.
    #[bits(2)]
    pub sh0: u8,
    /// Bits 14-15, TG0: TTBR0 granule (0 = 4 KiB).
    #[bits(2)]
    pub tg0: u8,
    /// Bits 16-21, T1SZ: TTBR1 region is 2^(64-T1SZ) bytes.
    #[bits(6)]
    pub t1sz: u8,
    /// Bit 22, A1: ASID comes from TTBR1.
    pub a1: bool,
    /// Bit 23, EPD1: disable TTBR1 walks.
    pub epd1: bool,
    #[bits(2)]
    pub irgn1: u8,
    #[bits(2)]
    pub orgn1: u8,
    #[bits(2)]
    pub sh1: u8,
    /// Bits 30-31, TG1: TTBR1 granule (2 = 4 KiB).
    #[bits(2)]
    pub tg1: u8,
    /// Bits 32-34, IPS: intermediate physical address size.
    #[bits(3)]
    pub ips: u8,
    #[bits(1)]
    reserved35: u8,
    /// Bit 36, AS: 16-bit ASIDs.
    pub asid16: bool,
    /// Bit 37, TBI0: top byte ignored for TTBR0 addresses.
    pub tbi0: bool,
    /// Bit 38, TBI1: top byte ignored for TTBR1 addresses.
    pub tbi1: bool,
    #[bits(25)]
    reserved39: u32,
}

impl Tcr {
    const WRITE_BACK: u8 = 0b11;
    const INNER_SHAREABLE: u8 = 0b11;
    const TG0_4K: u8 = 0b00;
    const TG1_4K: u8 = 0b10;

    /// The loader's split: two 1 GiB halves, 4 KiB granules, cacheable
    /// inner-shareable walks, and `pa_range` as read from `ID_AA64MMFR0_EL1`.
    #[must_use]
    pub const fn two_level(pa_range: u8) -> Self {
        Self::new()
            .with_t0sz(TWO_LEVEL_TXSZ)
            .with_irgn0(Self::WRITE_BACK)
            .with_orgn0(Self::WRITE_BACK)
            .with_sh0(Self::INNER_SHAREABLE)
            .with_tg0(Self::TG0_4K)
            .with_t1sz(TWO_LEVEL_TXSZ)
            .with_irgn1(Self::WRITE_BACK)
            .with_orgn1(Self::WRITE_BACK)
            .with_sh1(Self::INNER_SHAREABLE)
            .with_tg1(Self::TG1_4K)
            .with_ips(pa_range & 0b111)
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::StoreRegisterUnsafe for Tcr {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!(
                "msr tcr_el1, {}",
                "isb",
                in(reg) self.into_bits(),
                options(nostack, preserves_flags)
            );
        }
    }
}
