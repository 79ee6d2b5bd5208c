use bitfield_struct::bitfield;

/// Attribute index of normal, write-back cacheable memory.
pub const MAIR_NORMAL: u8 = 0;

/// Attribute index of device memory (nGnRE).
pub const MAIR_DEVICE: u8 = 1;

/// Attribute index of strongly ordered device memory (nGnRnE).
pub const MAIR_DEVICE_STRICT: u8 = 2;

/// MAIR_EL1: Memory Attribute Indirection Register.
///
/// Page descriptors select one of these eight attribute bytes by index.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Mair {
    pub attr0: u8,
    pub attr1: u8,
    pub attr2: u8,
    pub attr3: u8,
    pub attr4: u8,
    pub attr5: u8,
    pub attr6: u8,
    pub attr7: u8,
}

impl Mair {
    /// Inner/outer write-back, non-transient, no allocation hints.
    pub const NORMAL_WRITE_BACK: u8 = 0xCC;

    /// Device, non-gathering, non-reordering, early write acknowledgement.
    pub const DEVICE_NGNRE: u8 = 0x04;

    /// Device, non-gathering, non-reordering, no early write acknowledgement.
    pub const DEVICE_NGNRNE: u8 = 0x00;

    /// The loader's table: index [`MAIR_NORMAL`], [`MAIR_DEVICE`], [`MAIR_DEVICE_STRICT`].
    #[must_use]
    pub const fn loader() -> Self {
        Self::new()
            .with_attr0(Self::NORMAL_WRITE_BACK)
            .with_attr1(Self::DEVICE_NGNRE)
            .with_attr2(Self::DEVICE_NGNRNE)
    }
}

#[cfg(all(feature = "asm", target_arch = "aarch64"))]
impl crate::StoreRegisterUnsafe for Mair {
    unsafe fn store_unsafe(self) {
        unsafe {
            core::arch::asm!("msr mair_el1, {}", in(reg) self.into_bits(), options(nostack, preserves_flags));
        }
    }
}
