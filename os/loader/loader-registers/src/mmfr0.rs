use bitfield_struct::bitfield;

/// ID_AA64MMFR0_EL1: only the physical address range field is modelled.
#[bitfield(u64)]
pub struct IdAa64Mmfr0 {
    /// Bits 0-3: PARange, the encoding `TCR_EL1.IPS` expects.
    #[bits(4)]
    pub pa_range: u8,

    /// Bits 4-63: other feature fields, not interpreted.
    #[bits(60)]
    other: u64,
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::LoadRegisterUnsafe for IdAa64Mmfr0 {
    unsafe fn load_unsafe() -> Self {
        let value: u64;
        unsafe {
            core::arch::asm!("mrs {}, id_aa64mmfr0_el1", out(reg) value, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(value)
    }
}
