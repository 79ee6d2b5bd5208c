use bitfield_struct::bitfield;

/// SCTLR_EL1: System Control Register, the bits the loader touches.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Sctlr {
    /// Bit 0, M: stage 1 translation enable.
    pub m: bool,
    /// Bit 1, A: alignment checking.
    pub a: bool,
    /// Bit 2, C: data cacheability.
    pub c: bool,
    /// Bit 3, SA: EL1 stack alignment check.
    pub sa: bool,
    /// Bit 4, SA0: EL0 stack alignment check.
    pub sa0: bool,
    #[bits(7)]
    bits5_11: u8,
    /// Bit 12, I: instruction cacheability.
    pub i: bool,
    #[bits(6)]
    bits13_18: u8,
    /// Bit 19, WXN: writable implies execute never.
    pub wxn: bool,
    #[bits(4)]
    bits20_23: u8,
    /// Bit 24, E0E: EL0 data endianness.
    pub e0e: bool,
    /// Bit 25, EE: EL1 data and table walk endianness.
    pub ee: bool,
    #[bits(38)]
    bits26_63: u64,
}

impl Sctlr {
    /// Bits 11, 22 and 23 are RES1 on ARMv8.0.
    const RES1: u64 = (1 << 11) | (1 << 22) | (1 << 23);

    /// Turns on translation and both caches, little-endian walks, no
    /// alignment or WXN checks. Other bits are kept.
    #[must_use]
    pub const fn with_translation_enabled(self) -> Self {
        Self::from_bits(self.into_bits() | Self::RES1)
            .with_ee(false)
            .with_e0e(false)
            .with_wxn(false)
            .with_sa0(false)
            .with_sa(false)
            .with_a(false)
            .with_m(true)
            .with_c(true)
            .with_i(true)
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::LoadRegisterUnsafe for Sctlr {
    unsafe fn load_unsafe() -> Self {
        let value: u64;
        unsafe {
            core::arch::asm!("mrs {}, sctlr_el1", out(reg) value, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(value)
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::StoreRegisterUnsafe for Sctlr {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!(
                "msr sctlr_el1, {}",
                "isb",
                in(reg) self.into_bits(),
                options(nostack, preserves_flags)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabling_translation_sets_and_clears_expected_bits() {
        let reset = Sctlr::from_bits((1 << 25) | (1 << 19) | (1 << 1) | (1 << 40));
        let enabled = reset.with_translation_enabled().into_bits();
        assert_eq!(enabled, 0xC0_0800 | (1 << 12) | (1 << 2) | 1 | (1 << 40));
    }
}
