//! # Board Memory
//!
//! The Raspberry Pi has no firmware memory map. The loader derives it from
//! what the VideoCore reports as ARM memory and the fixed peripheral window:
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────────┐
//!             │ ARM memory (free, minus the  │
//!             │ loader image and used pages) │
//!    arm top  ├──────────────────────────────┤
//!             │ VideoCore memory (reserved)  │
//! 0x3F00_0000 ├──────────────────────────────┤
//!             │ Peripherals (MMIO)           │
//! 0x4000_0000 └──────────────────────────────┘
//! ```
//!
//! Every page the loader needs, from the handoff page to the page tables,
//! comes out of one arena after the loader image.

use crate::board::{MMIO_BASE, MMIO_END};
use core::ops::Range;
use loader_core::environment::EnvironmentPage;
use loader_core::{BumpPages, PageSource, ResourceError, Span};
use loader_protocol::boot::{HandoffPage, MemoryKind};
use loader_protocol::memory::PAGE_SIZE;
use loader_vmem::{PageFrame, PagingScheme};

/// Assumed ARM memory when the VideoCore does not say.
pub const FALLBACK_ARM_MEMORY: Range<u64> = 0..64 * 1024 * 1024;

/// The board's memory regions for the memory map builder.
#[must_use]
pub fn board_regions(arm: &Range<u64>) -> [(u64, u64, MemoryKind); 3] {
    let mmio = MMIO_BASE as u64;
    let top = arm.end.min(mmio);
    let start = arm.start.min(top);
    [
        (start, top - start, MemoryKind::Free),
        (top, mmio - top, MemoryKind::Reserved),
        (mmio, MMIO_END as u64 - mmio, MemoryKind::Mmio),
    ]
}

/// [`PageSource`] over the arena after the loader image.
pub struct ArenaPages {
    pages: BumpPages<'static>,
    first_page: u64,
}

impl ArenaPages {
    #[must_use]
    pub fn new(arena: &'static mut [u8]) -> Self {
        let first_page = (arena.as_ptr() as u64).next_multiple_of(PAGE_SIZE as u64);
        Self {
            pages: BumpPages::new(arena),
            first_page,
        }
    }

    /// The pages handed out so far; the rest of the arena stays free memory.
    #[must_use]
    pub const fn claimed(&self) -> Span {
        Span::from_len(self.first_page, (self.pages.claimed_pages() * PAGE_SIZE) as u64)
    }

    /// Moves `value` into fresh pages of the arena.
    ///
    /// # Safety
    /// `T` must need no more than page alignment.
    unsafe fn place<T>(&mut self, value: T) -> Result<&'static mut T, ResourceError> {
        let bytes = self.pages.claim_bytes(size_of::<T>())?;
        #[allow(clippy::cast_ptr_alignment)]
        let ptr = bytes.as_mut_ptr().cast::<T>();
        // SAFETY: page aligned, large enough, and handed out exactly once.
        unsafe {
            ptr.write(value);
            Ok(&mut *ptr)
        }
    }

    /// # Errors
    /// [`ResourceError::OutOfPages`].
    pub fn handoff_page(&mut self) -> Result<&'static mut HandoffPage, ResourceError> {
        // SAFETY: the handoff page is page aligned plain data.
        unsafe { self.place(HandoffPage::new()) }
    }

    /// # Errors
    /// [`ResourceError::OutOfPages`].
    pub fn environment_page(&mut self) -> Result<&'static mut EnvironmentPage, ResourceError> {
        // SAFETY: the environment page is a page aligned byte array.
        unsafe { self.place(EnvironmentPage::new()) }
    }

    /// Backing for the page table pool of scheme `S`.
    ///
    /// # Errors
    /// [`ResourceError::OutOfPages`].
    pub fn table_frames<S: PagingScheme>(&mut self) -> Result<&'static mut [PageFrame], ResourceError> {
        let bytes = self.pages.claim(S::POOL_FRAMES)?;
        #[allow(clippy::cast_ptr_alignment)]
        let ptr = bytes.as_mut_ptr().cast::<PageFrame>();
        // SAFETY: zeroed frames are valid; the claim holds POOL_FRAMES page aligned frames.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr, S::POOL_FRAMES) })
    }
}

impl PageSource<'static> for ArenaPages {
    fn claim(&mut self, count: usize) -> Result<&'static mut [u8], ResourceError> {
        self.pages.claim(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loader_vmem::Aarch64TwoLevel;

    #[test]
    fn regions_cover_arm_gpu_and_peripherals() {
        let regions = board_regions(&(0..0x3C00_0000));
        assert_eq!(
            regions,
            [
                (0, 0x3C00_0000, MemoryKind::Free),
                (0x3C00_0000, 0x0300_0000, MemoryKind::Reserved),
                (0x3F00_0000, 0x0100_0000, MemoryKind::Mmio),
            ]
        );
    }

    #[test]
    fn arm_memory_is_clipped_at_the_peripherals() {
        let regions = board_regions(&(0..0x4000_0000));
        assert_eq!(regions[0], (0, 0x3F00_0000, MemoryKind::Free));
        assert_eq!(regions[1].1, 0);
    }

    #[test]
    fn arena_hands_out_aligned_loader_structures() {
        let arena: &'static mut [u8] = Box::leak(vec![0u8; 48 * PAGE_SIZE].into_boxed_slice());
        let mut pages = ArenaPages::new(arena);
        assert!(pages.claimed().is_empty());

        let handoff = pages.handoff_page().expect("handoff page");
        assert_eq!(handoff.address() % PAGE_SIZE as u64, 0);
        assert_eq!(handoff.entry_count(), 0);

        let environment = pages.environment_page().expect("environment page");
        assert_eq!(environment.address(), handoff.address() + PAGE_SIZE as u64);

        let frames = pages.table_frames::<Aarch64TwoLevel>().expect("frames");
        assert_eq!(frames.len(), Aarch64TwoLevel::POOL_FRAMES);
        let base = frames.as_ptr() as u64;
        assert_eq!(
            pages.claimed(),
            Span::new(handoff.address(), base + (frames.len() * PAGE_SIZE) as u64)
        );
        assert!(pages.table_frames::<Aarch64TwoLevel>().is_err());
    }
}
