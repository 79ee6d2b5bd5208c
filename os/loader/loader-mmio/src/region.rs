use core::ptr::{read_volatile, write_volatile};

/// A window of device registers.
///
/// Every access is a single volatile load or store of the requested width, so
/// the compiler neither caches, merges nor reorders register accesses.
#[derive(Clone, Copy)]
pub struct MmioRegion {
    base: usize,
    size: usize,
}

impl MmioRegion {
    /// # Safety
    /// `base..base + size` must be device registers (or memory standing in for
    /// them) that stay valid and mapped without caching for every use of the region.
    #[must_use]
    pub const unsafe fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    #[must_use]
    pub const fn base(&self) -> usize {
        self.base
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// A window of `size` bytes at `offset` inside this one.
    ///
    /// # Panics
    /// Panics if the window does not fit.
    #[must_use]
    pub const fn subregion(&self, offset: usize, size: usize) -> Self {
        assert!(offset + size <= self.size, "subregion exceeds parent bounds");
        Self {
            base: self.base + offset,
            size,
        }
    }

    #[inline]
    #[must_use]
    pub fn read32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size, "read32 out of bounds");
        debug_assert!(offset.is_multiple_of(4), "read32 misaligned");
        // SAFETY: in bounds of a region the constructor vouched for.
        unsafe { read_volatile((self.base + offset) as *const u32) }
    }

    #[inline]
    pub fn write32(&self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size, "write32 out of bounds");
        debug_assert!(offset.is_multiple_of(4), "write32 misaligned");
        // SAFETY: in bounds of a region the constructor vouched for.
        unsafe { write_volatile((self.base + offset) as *mut u32, value) }
    }

    /// Read-modify-write of a 32-bit register.
    #[inline]
    pub fn modify32(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let value = self.read32(offset);
        self.write32(offset, f(value));
    }

    /// Re-reads the register at `offset` until `condition` holds, at most
    /// `budget` times. Returns `false` on timeout.
    #[inline]
    pub fn poll32(&self, offset: usize, condition: impl Fn(u32) -> bool, budget: usize) -> bool {
        for _ in 0..budget {
            if condition(self.read32(offset)) {
                return true;
            }
            core::hint::spin_loop();
        }
        false
    }
}

impl core::fmt::Debug for MmioRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmioRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("size", &format_args!("{:#x}", self.size))
            .finish()
    }
}
