//! # Firmware Backed Pages
//!
//! Every buffer the loader hands to the kernel comes from `AllocatePages` as
//! `LOADER_DATA`. Nothing is ever freed; what the kernel must keep is
//! reserved in the memory map, everything else becomes free memory.

use core::ptr::NonNull;
use loader_core::environment::EnvironmentPage;
use loader_core::{PageSource, ResourceError};
use loader_protocol::boot::HandoffPage;
use loader_protocol::memory::PAGE_SIZE;
use loader_vmem::{PageFrame, PagingScheme};
use uefi::boot::{self, AllocateType, MemoryType};

/// [`PageSource`] over `AllocatePages`. Only usable while boot services are.
pub struct FirmwarePages;

impl FirmwarePages {
    fn allocate(count: usize) -> Result<NonNull<u8>, ResourceError> {
        let pages = boot::allocate_pages(AllocateType::AnyPages, MemoryType::LOADER_DATA, count)
            .map_err(|e| {
                log::error!("AllocatePages for {count} page(s) failed: {e:?}");
                ResourceError::OutOfPages { requested: count }
            })?;
        // SAFETY: the firmware just handed out `count` pages at `pages`.
        unsafe { pages.as_ptr().write_bytes(0, count * PAGE_SIZE) };
        Ok(pages)
    }

    /// Moves `value` into fresh pages that live until the kernel runs.
    ///
    /// # Safety
    /// `T` must fit in `pages` pages and need no more than page alignment.
    unsafe fn leak<T>(pages: usize, value: T) -> Result<&'static mut T, ResourceError> {
        let ptr = Self::allocate(pages)?.cast::<T>();
        // SAFETY: the allocation is page aligned, large enough and exclusively ours.
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    pub fn handoff_page() -> Result<&'static mut HandoffPage, ResourceError> {
        // SAFETY: the handoff page is plain data of exactly one page.
        unsafe { Self::leak(1, HandoffPage::new()) }
    }

    pub fn environment_page() -> Result<&'static mut EnvironmentPage, ResourceError> {
        // SAFETY: the environment page is a one page byte array.
        unsafe { Self::leak(1, EnvironmentPage::new()) }
    }

    /// Backing for the page table pool of scheme `S`.
    pub fn table_frames<S: PagingScheme>() -> Result<&'static mut [PageFrame], ResourceError> {
        let ptr = Self::allocate(S::POOL_FRAMES)?.cast::<PageFrame>();
        // SAFETY: zeroed frames are valid; the allocation holds POOL_FRAMES of them.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), S::POOL_FRAMES) })
    }
}

impl PageSource<'static> for FirmwarePages {
    fn claim(&mut self, count: usize) -> Result<&'static mut [u8], ResourceError> {
        let ptr = Self::allocate(count)?;
        // SAFETY: zeroed pages owned by the loader until the kernel takes over.
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), count * PAGE_SIZE) })
    }
}
