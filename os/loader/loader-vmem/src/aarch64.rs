//! AArch64 two-level translation with 4 KiB granules and a 1 GiB window per
//! half: each TTBR points at an L2 table of 2 MiB blocks, any of which can be
//! split into an L3 table of 4 KiB pages.

use crate::{
    FrameAlloc, FramePool, MapAttributes, MemoryType, PageSize, PagingError, PagingScheme,
    PhysicalAddress, Translation, TranslationRoots, VirtualAddress,
};
use bitfield_struct::bitfield;
use loader_registers::mair::{MAIR_DEVICE, MAIR_NORMAL};

/// Bytes translated by each half.
pub const WINDOW_SIZE: u64 = 1 << 30;

/// First address translated through TTBR1.
pub const HIGH_WINDOW_BASE: u64 = 0u64.wrapping_sub(WINDOW_SIZE);

const L2_SHIFT: u32 = 21;
const L3_SHIFT: u32 = 12;

const SH_INNER: u8 = 0b11;
const AP_READ_ONLY: u8 = 0b10;

/// A stage 1 VMSAv8-64 descriptor, table or block or page.
///
/// Bit 1 distinguishes blocks (clear) from tables and L3 pages (set).
#[bitfield(u64)]
pub struct Descriptor {
    pub valid: bool,
    pub table_or_page: bool,
    /// MAIR_EL1 attribute slot.
    #[bits(3)]
    pub attr_index: u8,
    pub non_secure: bool,
    /// AP[2:1]; `0b00` is EL1 read/write.
    #[bits(2)]
    pub access: u8,
    #[bits(2)]
    pub shareability: u8,
    pub access_flag: bool,
    pub not_global: bool,
    /// Bits 12-47 of the output address.
    #[bits(36)]
    frame: u64,
    #[bits(4)]
    pub reserved: u8,
    pub contiguous: bool,
    pub privileged_execute_never: bool,
    pub unprivileged_execute_never: bool,
    #[bits(4)]
    pub software: u8,
    #[bits(5)]
    pub table_attributes: u8,
}

impl Descriptor {
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    #[must_use]
    pub const fn table(next: PhysicalAddress) -> Self {
        Self::new()
            .with_valid(true)
            .with_table_or_page(true)
            .with_frame(next.as_u64() >> 12)
    }

    /// Block (L2) or page (L3) descriptor.
    #[must_use]
    pub const fn leaf(pa: PhysicalAddress, size: PageSize, attrs: MapAttributes) -> Self {
        let device = matches!(attrs.memory, MemoryType::Device);
        Self::new()
            .with_valid(true)
            .with_table_or_page(matches!(size, PageSize::Size4K))
            .with_attr_index(if device { MAIR_DEVICE } else { MAIR_NORMAL })
            .with_access(if attrs.writable { 0 } else { AP_READ_ONLY })
            .with_shareability(SH_INNER)
            .with_access_flag(true)
            .with_privileged_execute_never(device)
            .with_unprivileged_execute_never(device)
            .with_frame(pa.as_u64() >> 12)
    }

    #[must_use]
    pub const fn attributes(&self) -> MapAttributes {
        MapAttributes {
            memory: if self.attr_index() == MAIR_NORMAL {
                MemoryType::Normal
            } else {
                MemoryType::Device
            },
            writable: self.access() & AP_READ_ONLY == 0,
        }
    }
}

/// AArch64 translation with separate low (TTBR0) and high (TTBR1) roots.
pub struct Aarch64TwoLevel {
    low: PhysicalAddress,
    high: PhysicalAddress,
}

impl Aarch64TwoLevel {
    /// Root table and window offset for `va`.
    const fn root_for(&self, va: VirtualAddress) -> Option<(PhysicalAddress, VirtualAddress)> {
        let addr = va.as_u64();
        if addr < WINDOW_SIZE {
            Some((self.low, va))
        } else if addr >= HIGH_WINDOW_BASE {
            Some((self.high, VirtualAddress::new(addr - HIGH_WINDOW_BASE)))
        } else {
            None
        }
    }
}

impl PagingScheme for Aarch64TwoLevel {
    /// Two roots, the identity L3, the core window L3, the stack page and
    /// up to 31 framebuffer L3s.
    const POOL_FRAMES: usize = 36;

    const IDENTITY_LIMIT: u64 = WINDOW_SIZE;

    fn new(pool: &mut FramePool<'_>) -> Result<Self, PagingError> {
        let low = pool.alloc_4k().ok_or(PagingError::PoolExhausted)?;
        let high = pool.alloc_4k().ok_or(PagingError::PoolExhausted)?;
        Ok(Self { low, high })
    }

    fn map(
        &mut self,
        pool: &mut FramePool<'_>,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: PageSize,
        attrs: MapAttributes,
    ) -> Result<(), PagingError> {
        let (l2, offset) = self
            .root_for(va)
            .ok_or(PagingError::OutOfRange(va.as_u64()))?;
        if !va.is_aligned(size.bytes()) {
            return Err(PagingError::Misaligned(va.as_u64()));
        }
        if !pa.is_aligned(size.bytes()) {
            return Err(PagingError::Misaligned(pa.as_u64()));
        }

        let l2_index = offset.table_index(L2_SHIFT);
        let existing = Descriptor::from_bits(pool.table(l2)?.entry(l2_index));

        if matches!(size, PageSize::Size2M) {
            if existing.valid() {
                return Err(PagingError::AlreadyMapped(va.as_u64()));
            }
            pool.table_mut(l2)?
                .set_entry(l2_index, Descriptor::leaf(pa, size, attrs).into_bits());
            return Ok(());
        }

        let l3 = if existing.valid() {
            if !existing.table_or_page() {
                return Err(PagingError::AlreadyMapped(va.as_u64()));
            }
            existing.address()
        } else {
            let next = pool.alloc_4k().ok_or(PagingError::PoolExhausted)?;
            pool.table_mut(l2)?
                .set_entry(l2_index, Descriptor::table(next).into_bits());
            next
        };

        let l3_index = offset.table_index(L3_SHIFT);
        let frame = pool.table_mut(l3)?;
        if Descriptor::from_bits(frame.entry(l3_index)).valid() {
            return Err(PagingError::AlreadyMapped(va.as_u64()));
        }
        frame.set_entry(l3_index, Descriptor::leaf(pa, size, attrs).into_bits());
        Ok(())
    }

    fn translate(&self, pool: &FramePool<'_>, va: VirtualAddress) -> Option<Translation> {
        let (l2, offset) = self.root_for(va)?;
        let entry = Descriptor::from_bits(pool.table(l2).ok()?.entry(offset.table_index(L2_SHIFT)));
        if !entry.valid() {
            return None;
        }

        let (leaf, size) = if entry.table_or_page() {
            let page = Descriptor::from_bits(
                pool.table(entry.address())
                    .ok()?
                    .entry(offset.table_index(L3_SHIFT)),
            );
            if !page.valid() {
                return None;
            }
            (page, PageSize::Size4K)
        } else {
            (entry, PageSize::Size2M)
        };

        Some(Translation {
            phys: leaf.address() + (va.as_u64() & (size.bytes() - 1)),
            size,
            attrs: leaf.attributes(),
        })
    }

    fn roots(&self) -> TranslationRoots {
        TranslationRoots {
            low: self.low,
            high: self.high,
        }
    }

    unsafe fn activate(&self) -> Result<(), PagingError> {
        unsafe { enable_translation(self.roots()) }
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
unsafe fn enable_translation(roots: TranslationRoots) -> Result<(), PagingError> {
    use loader_mmio::barrier::{dsb, isb};
    use loader_registers::mair::Mair;
    use loader_registers::mmfr0::IdAa64Mmfr0;
    use loader_registers::sctlr::Sctlr;
    use loader_registers::tcr::Tcr;
    use loader_registers::ttbr::{Ttbr0, Ttbr1};
    use loader_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

    log::debug!("Enabling translation, TTBR0 {} TTBR1 {}", roots.low, roots.high);
    unsafe {
        let pa_range = IdAa64Mmfr0::load_unsafe().pa_range();
        Mair::loader().store_unsafe();
        Ttbr0(roots.low.as_u64()).store_unsafe();
        Ttbr1(roots.high.as_u64()).store_unsafe();
        Tcr::two_level(pa_range).store_unsafe();
        dsb();
        isb();
        Sctlr::load_unsafe().with_translation_enabled().store_unsafe();
    }
    Ok(())
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
#[allow(clippy::unnecessary_wraps)]
unsafe fn enable_translation(_roots: TranslationRoots) -> Result<(), PagingError> {
    Err(PagingError::UnsupportedTarget)
}
