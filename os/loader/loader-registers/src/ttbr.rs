//! TTBR0_EL1 / TTBR1_EL1: translation table base registers.
//!
//! TTBR0 translates the low (identity) range, TTBR1 the high-half window.

/// Base of the table walked for addresses whose top bits are clear.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ttbr0(pub u64);

/// Base of the table walked for addresses whose top bits are set.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ttbr1(pub u64);

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::StoreRegisterUnsafe for Ttbr0 {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!("msr ttbr0_el1, {}", in(reg) self.0, options(nostack, preserves_flags));
        }
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::StoreRegisterUnsafe for Ttbr1 {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!("msr ttbr1_el1, {}", in(reg) self.0, options(nostack, preserves_flags));
        }
    }
}
