use core::fmt;
use core::ops::Add;

/// A physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalAddress(u64);

/// A virtual memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualAddress(u64);

impl PhysicalAddress {
    #[inline(always)]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// The address of a value the loader can see identity mapped.
    #[inline(always)]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    #[inline(always)]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl VirtualAddress {
    #[inline(always)]
    #[must_use]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    #[inline(always)]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline(always)]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    /// The 9-bit table index selected by the bits starting at `shift`.
    #[inline(always)]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn table_index(self, shift: u32) -> usize {
        ((self.0 >> shift) & 0x1ff) as usize
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: u64) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: u64) -> Self {
        Self(self.0.wrapping_add(rhs))
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA({:#018x})", self.0)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#018x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_indices() {
        let va = VirtualAddress::new(0xffff_ffff_ffe0_2000);
        assert_eq!(va.table_index(39), 511);
        assert_eq!(va.table_index(30), 511);
        assert_eq!(va.table_index(21), 511);
        assert_eq!(va.table_index(12), 2);
    }

    #[test]
    fn stack_top_wraps() {
        let stack = VirtualAddress::new(0xffff_ffff_ffff_f000);
        assert_eq!((stack + 0x1000).as_u64(), 0);
        assert!(stack.is_aligned(0x1000));
        assert!(!PhysicalAddress::new(0x1234).is_aligned(0x1000));
    }
}
