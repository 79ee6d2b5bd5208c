//! Four-level x86-64 paging: PML4 → PDPT → PD → PT.

use crate::{
    FrameAlloc, FramePool, MapAttributes, MemoryType, PageSize, PagingError, PagingScheme,
    PhysicalAddress, Translation, TranslationRoots, VirtualAddress,
};
use bitfield_struct::bitfield;

/// Index shifts for PML4, PDPT, PD and PT.
const LEVEL_SHIFTS: [u32; 4] = [39, 30, 21, 12];

const PD_LEVEL: usize = 2;
const PT_LEVEL: usize = 3;

/// Any x86-64 paging entry (PML4E, PDPTE, PDE, PTE).
///
/// `huge` is the PS bit; it only exists in PDPTEs and PDEs. In a 2 MiB PDE
/// bit 12 becomes PAT, which stays clear because block addresses are aligned.
#[bitfield(u64)]
pub struct X86Entry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub huge: bool,
    pub global: bool,
    #[bits(3)]
    pub os_available_low: u8,
    /// Bits 12-51 of the referenced frame.
    #[bits(40)]
    frame: u64,
    #[bits(11)]
    pub os_available_high: u16,
    pub no_execute: bool,
}

impl X86Entry {
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    #[must_use]
    pub const fn with_address(self, pa: PhysicalAddress) -> Self {
        self.with_frame(pa.as_u64() >> 12)
    }

    /// Non-leaf entry; permissions are left to the leaves.
    #[must_use]
    pub const fn table(next: PhysicalAddress) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_address(next)
    }

    /// Leaf entry. Execute-disable is never set: EFER.NXE may be off at handoff.
    #[must_use]
    pub const fn leaf(pa: PhysicalAddress, size: PageSize, attrs: MapAttributes) -> Self {
        let device = matches!(attrs.memory, MemoryType::Device);
        Self::new()
            .with_present(true)
            .with_writable(attrs.writable)
            .with_write_through(device)
            .with_cache_disable(device)
            .with_huge(matches!(size, PageSize::Size2M))
            .with_address(pa)
    }

    #[must_use]
    pub const fn attributes(&self) -> MapAttributes {
        MapAttributes {
            memory: if self.cache_disable() {
                MemoryType::Device
            } else {
                MemoryType::Normal
            },
            writable: self.writable(),
        }
    }
}

/// x86-64 four-level paging with a single root in CR3.
pub struct X86FourLevel {
    pml4: PhysicalAddress,
}

/// Sign extension of bit 47 must fill the upper bits.
const fn is_canonical(va: VirtualAddress) -> bool {
    let upper = va.as_u64() >> 47;
    upper == 0 || upper == 0x1_ffff
}

impl PagingScheme for X86FourLevel {
    /// Root, identity PDPT, 16 identity PDs, the split first PD's PT,
    /// high PDPT/PD/PT, the stack page and up to 31 framebuffer PTs.
    const POOL_FRAMES: usize = 56;

    const IDENTITY_LIMIT: u64 = 16 << 30;

    fn new(pool: &mut FramePool<'_>) -> Result<Self, PagingError> {
        let pml4 = pool.alloc_4k().ok_or(PagingError::PoolExhausted)?;
        Ok(Self { pml4 })
    }

    fn map(
        &mut self,
        pool: &mut FramePool<'_>,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: PageSize,
        attrs: MapAttributes,
    ) -> Result<(), PagingError> {
        if !is_canonical(va) {
            return Err(PagingError::OutOfRange(va.as_u64()));
        }
        if !va.is_aligned(size.bytes()) {
            return Err(PagingError::Misaligned(va.as_u64()));
        }
        if !pa.is_aligned(size.bytes()) {
            return Err(PagingError::Misaligned(pa.as_u64()));
        }

        let leaf_level = match size {
            PageSize::Size4K => PT_LEVEL,
            PageSize::Size2M => PD_LEVEL,
        };

        let mut table = self.pml4;
        for shift in &LEVEL_SHIFTS[..leaf_level] {
            let index = va.table_index(*shift);
            let entry = X86Entry::from_bits(pool.table(table)?.entry(index));
            table = if entry.present() {
                if entry.huge() {
                    return Err(PagingError::AlreadyMapped(va.as_u64()));
                }
                entry.address()
            } else {
                let next = pool.alloc_4k().ok_or(PagingError::PoolExhausted)?;
                pool.table_mut(table)?
                    .set_entry(index, X86Entry::table(next).into_bits());
                next
            };
        }

        let index = va.table_index(LEVEL_SHIFTS[leaf_level]);
        let frame = pool.table_mut(table)?;
        if X86Entry::from_bits(frame.entry(index)).present() {
            return Err(PagingError::AlreadyMapped(va.as_u64()));
        }
        frame.set_entry(index, X86Entry::leaf(pa, size, attrs).into_bits());
        Ok(())
    }

    fn translate(&self, pool: &FramePool<'_>, va: VirtualAddress) -> Option<Translation> {
        if !is_canonical(va) {
            return None;
        }
        let mut table = self.pml4;
        for (level, shift) in LEVEL_SHIFTS.iter().enumerate() {
            let entry = X86Entry::from_bits(pool.table(table).ok()?.entry(va.table_index(*shift)));
            if !entry.present() {
                return None;
            }
            let size = match level {
                PT_LEVEL => PageSize::Size4K,
                PD_LEVEL if entry.huge() => PageSize::Size2M,
                // 1 GiB leaves are never installed by this loader.
                _ if entry.huge() => return None,
                _ => {
                    table = entry.address();
                    continue;
                }
            };
            let offset = va.as_u64() & (size.bytes() - 1);
            return Some(Translation {
                phys: entry.address() + offset,
                size,
                attrs: entry.attributes(),
            });
        }
        None
    }

    fn roots(&self) -> TranslationRoots {
        TranslationRoots {
            low: self.pml4,
            high: self.pml4,
        }
    }

    unsafe fn activate(&self) -> Result<(), PagingError> {
        unsafe { load_cr3(self.pml4) }
    }
}

#[cfg(all(target_arch = "x86_64", any(target_os = "uefi", target_os = "none")))]
unsafe fn load_cr3(pml4: PhysicalAddress) -> Result<(), PagingError> {
    use loader_registers::StoreRegisterUnsafe;
    use loader_registers::cr3::Cr3;

    log::debug!("Loading CR3 with PML4 at {pml4}");
    unsafe { Cr3::from_pml4_phys(pml4.as_u64()).store_unsafe() };
    Ok(())
}

#[cfg(not(all(target_arch = "x86_64", any(target_os = "uefi", target_os = "none"))))]
#[allow(clippy::unnecessary_wraps)]
unsafe fn load_cr3(_pml4: PhysicalAddress) -> Result<(), PagingError> {
    Err(PagingError::UnsupportedTarget)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::frames;

    #[test]
    fn leaf_encoding() {
        let e = X86Entry::leaf(PhysicalAddress::new(0x20_0000), PageSize::Size2M, MapAttributes::NORMAL);
        assert_eq!(e.into_bits(), 0x20_0000 | 0x83);
        let d = X86Entry::leaf(PhysicalAddress::new(0xfee0_0000), PageSize::Size4K, MapAttributes::DEVICE);
        assert_eq!(d.into_bits(), 0xfee0_0000 | 0x1b);
        assert_eq!(d.attributes(), MapAttributes::DEVICE);
    }

    #[test]
    fn maps_and_translates_both_sizes() {
        let mut backing = frames(8);
        let mut pool = FramePool::new(&mut backing);
        let mut paging = X86FourLevel::new(&mut pool).expect("root");

        let high = VirtualAddress::new(0xffff_ffff_ffe0_0000);
        paging
            .map(&mut pool, high, PhysicalAddress::new(0x7000), PageSize::Size4K, MapAttributes::NORMAL)
            .expect("4k");
        paging
            .map(
                &mut pool,
                VirtualAddress::new(0x40_0000),
                PhysicalAddress::new(0x40_0000),
                PageSize::Size2M,
                MapAttributes::NORMAL,
            )
            .expect("2m");

        let t = paging.translate(&pool, high + 0x123).expect("mapped");
        assert_eq!(t.phys, PhysicalAddress::new(0x7123));
        assert_eq!(t.size, PageSize::Size4K);

        let t = paging.translate(&pool, VirtualAddress::new(0x45_6789)).expect("mapped");
        assert_eq!(t.phys, PhysicalAddress::new(0x45_6789));
        assert_eq!(t.size, PageSize::Size2M);

        assert!(paging.translate(&pool, VirtualAddress::new(0x1000)).is_none());
    }

    #[test]
    fn refuses_double_mapping_and_bad_input() {
        let mut backing = frames(8);
        let mut pool = FramePool::new(&mut backing);
        let mut paging = X86FourLevel::new(&mut pool).expect("root");
        let va = VirtualAddress::new(0x20_0000);
        let pa = PhysicalAddress::new(0x20_0000);

        paging.map(&mut pool, va, pa, PageSize::Size2M, MapAttributes::NORMAL).expect("first");
        assert_eq!(
            paging.map(&mut pool, va, pa, PageSize::Size2M, MapAttributes::NORMAL),
            Err(PagingError::AlreadyMapped(va.as_u64()))
        );
        assert_eq!(
            paging.map(&mut pool, va + 0x1000, pa, PageSize::Size4K, MapAttributes::NORMAL),
            Err(PagingError::AlreadyMapped(va.as_u64() + 0x1000))
        );
        assert_eq!(
            paging.map(&mut pool, va + 0x1000, pa, PageSize::Size2M, MapAttributes::NORMAL),
            Err(PagingError::Misaligned(va.as_u64() + 0x1000))
        );
        assert_eq!(
            paging.map(
                &mut pool,
                VirtualAddress::new(0x0000_8000_0000_0000),
                pa,
                PageSize::Size4K,
                MapAttributes::NORMAL
            ),
            Err(PagingError::OutOfRange(0x0000_8000_0000_0000))
        );
    }

    #[test]
    fn hosted_activation_is_refused() {
        let mut backing = frames(1);
        let mut pool = FramePool::new(&mut backing);
        let paging = X86FourLevel::new(&mut pool).expect("root");
        assert_eq!(unsafe { paging.activate() }, Err(PagingError::UnsupportedTarget));
    }
}
