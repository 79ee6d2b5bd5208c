use bitfield_struct::bitfield;

/// CR3: Page-Map Level-4 Base Register (IA-32e, PCID disabled).
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0-2: Reserved.
    #[bits(3)]
    reserved0: u8,

    /// Bit 3, PWT: Page-level Write-Through for PML4 accesses.
    pub pwt: bool,

    /// Bit 4, PCD: Page-level Cache Disable for PML4 accesses.
    pub pcd: bool,

    /// Bits 5-11: Reserved.
    #[bits(7)]
    reserved1: u8,

    /// Bits 12-51: PML4 physical base >> 12.
    #[bits(40)]
    pml4_base_4k: u64,

    /// Bits 52-63: Reserved.
    #[bits(12)]
    reserved2: u16,
}

impl Cr3 {
    /// A write-back CR3 value pointing at a 4 KiB aligned PML4.
    #[must_use]
    pub fn from_pml4_phys(pml4_phys: u64) -> Self {
        debug_assert_eq!(pml4_phys & 0xFFF, 0, "PML4 base must be 4K-aligned");
        Self::new().with_pml4_base_4k(pml4_phys >> 12)
    }

    #[must_use]
    pub fn pml4_phys(&self) -> u64 {
        self.pml4_base_4k() << 12
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
