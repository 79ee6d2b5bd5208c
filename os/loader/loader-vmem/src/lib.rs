//! # Loader Address Space Construction
//!
//! Builds the translation tables the kernel starts with, for two page table
//! architectures behind one [`PagingScheme`] interface:
//!
//! | Scheme | Levels | Roots | Identity range |
//! |---|---|---|---|
//! | [`X86FourLevel`] | PML4 → PDPT → PD → PT | one (CR3) | 16 GiB |
//! | [`Aarch64TwoLevel`] | L2 → L3 | TTBR0 (low) + TTBR1 (high) | 1 GiB |
//!
//! Every table frame comes from a caller supplied, statically reserved
//! [`FramePool`]; nothing is allocated from firmware or a heap. The mapping
//! policy itself lives in [`AddressSpace::build`] and is shared by both
//! schemes:
//!
//! 1. an identity map of low memory in 2 MiB blocks, with the first 2 MiB
//!    split into 4 KiB pages and device ranges mapped non-cacheable,
//! 2. the core window at [`BOOTBOOT_INFO`](loader_protocol::memory::BOOTBOOT_INFO):
//!    handoff page, environment page, kernel pages, kernel stack page,
//! 3. the framebuffer window at [`BOOTBOOT_FB`](loader_protocol::memory::BOOTBOOT_FB).
//!
//! Activation consumes the [`AddressSpace`], so it can only happen once.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod aarch64;
pub mod address_space;
mod addresses;
mod pool;
pub mod x86_64;

pub use crate::aarch64::Aarch64TwoLevel;
pub use crate::address_space::{AddressSpace, BootLayout, FramebufferMapping};
pub use crate::addresses::{PhysicalAddress, VirtualAddress};
pub use crate::pool::{FramePool, PageFrame};
pub use crate::x86_64::X86FourLevel;

/// Entries per table for 4 KiB granules on both architectures.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Leaf sizes the schemes can install.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageSize {
    /// 4 KiB page in the last level.
    Size4K,
    /// 2 MiB block one level above.
    Size2M,
}

impl PageSize {
    #[inline(always)]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size4K => 0x1000,
            Self::Size2M => 0x20_0000,
        }
    }
}

/// Cacheability of a mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryType {
    /// Write-back cacheable RAM.
    Normal,
    /// Uncached, strongly ordered device registers.
    Device,
}

/// Permission and cache attributes of a leaf mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MapAttributes {
    pub memory: MemoryType,
    pub writable: bool,
}

impl MapAttributes {
    /// Cacheable, writable and executable; what the kernel window uses.
    pub const NORMAL: Self = Self {
        memory: MemoryType::Normal,
        writable: true,
    };

    /// Uncached and writable; never executable where the architecture can express it.
    pub const DEVICE: Self = Self {
        memory: MemoryType::Device,
        writable: true,
    };
}

/// Result of walking the tables for one virtual address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Translation {
    pub phys: PhysicalAddress,
    pub size: PageSize,
    pub attrs: MapAttributes,
}

/// Physical addresses of the root table(s) to load on activation.
///
/// Single-root schemes report the same table for both halves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TranslationRoots {
    pub low: PhysicalAddress,
    pub high: PhysicalAddress,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    #[error("page table frame pool exhausted")]
    PoolExhausted,
    #[error("address {0:#x} is not aligned to the mapping size")]
    Misaligned(u64),
    #[error("virtual address {0:#x} lies outside the translated ranges")]
    OutOfRange(u64),
    #[error("virtual address {0:#x} is already mapped")]
    AlreadyMapped(u64),
    #[error("table at {0:#x} is not a frame of the pool")]
    ForeignTable(u64),
    #[error("kernel image of {0} pages does not fit the core window")]
    KernelTooLarge(usize),
    #[error("translation tables cannot be activated on this target")]
    UnsupportedTarget,
}

/// Hands out zeroed, 4 KiB aligned physical frames for page tables.
pub trait FrameAlloc {
    /// Returns `None` once the backing store is exhausted.
    fn alloc_4k(&mut self) -> Option<PhysicalAddress>;
}

/// One page table architecture.
///
/// Implementations own only their root pointers; every table lives in the
/// [`FramePool`] passed to each call.
pub trait PagingScheme: Sized {
    /// Pool frames needed for the loader's worst-case layout.
    const POOL_FRAMES: usize;

    /// Exclusive end of the identity mapped low range.
    const IDENTITY_LIMIT: u64;

    /// Allocates the empty root table(s).
    ///
    /// # Errors
    /// [`PagingError::PoolExhausted`] if the pool cannot provide the roots.
    fn new(pool: &mut FramePool<'_>) -> Result<Self, PagingError>;

    /// Installs one leaf mapping, creating intermediate tables on demand.
    ///
    /// # Errors
    /// Misaligned or untranslatable addresses, a slot that is already
    /// mapped, or an exhausted pool.
    fn map(
        &mut self,
        pool: &mut FramePool<'_>,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: PageSize,
        attrs: MapAttributes,
    ) -> Result<(), PagingError>;

    /// Walks the tables like the MMU would.
    fn translate(&self, pool: &FramePool<'_>, va: VirtualAddress) -> Option<Translation>;

    fn roots(&self) -> TranslationRoots;

    /// Programs the translation registers and turns translation on.
    ///
    /// # Safety
    /// The tables must map the currently executing code, its stack and every
    /// structure still in use, identically to their physical addresses.
    ///
    /// # Errors
    /// [`PagingError::UnsupportedTarget`] when built for a different architecture or a hosted OS.
    unsafe fn activate(&self) -> Result<(), PagingError>;
}

/// Align `x` down to the power of two `a`.
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the power of two `a`; `x + a - 1` must not overflow.
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
