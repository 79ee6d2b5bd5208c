//! The loader's mapping policy, shared by every [`PagingScheme`].

use crate::{
    FrameAlloc, FramePool, MapAttributes, PageSize, PagingError, PagingScheme, PhysicalAddress,
    Translation, TranslationRoots, VirtualAddress, align_up,
};
use core::ops::Range;
use loader_protocol::memory::{
    BOOTBOOT_CORE, BOOTBOOT_ENV, BOOTBOOT_FB, BOOTBOOT_INFO, BOOTBOOT_STACK, CORE_WINDOW_PAGES,
    FB_WINDOW_SIZE, PAGE_SIZE,
};

const PAGE: u64 = PAGE_SIZE as u64;

/// Physical framebuffer to expose at [`BOOTBOOT_FB`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FramebufferMapping {
    pub base: PhysicalAddress,
    pub size: u64,
}

/// Everything the kernel's initial address space has to reach.
#[derive(Clone, Debug)]
pub struct BootLayout<'a> {
    /// Handoff page, shown at [`BOOTBOOT_INFO`].
    pub handoff: PhysicalAddress,
    /// Environment page, shown at [`BOOTBOOT_ENV`].
    pub environment: PhysicalAddress,
    /// First byte of the page aligned kernel image.
    pub kernel: PhysicalAddress,
    pub kernel_size: u64,
    pub framebuffer: Option<FramebufferMapping>,
    /// Physical ranges inside the identity map that must be mapped as device memory.
    pub device_ranges: &'a [Range<u64>],
}

/// Translation tables under construction.
pub struct AddressSpace<'p, S: PagingScheme> {
    pool: FramePool<'p>,
    scheme: S,
    stack: Option<PhysicalAddress>,
}

impl<'p, S: PagingScheme> AddressSpace<'p, S> {
    /// Empty tables drawing frames from `pool`.
    ///
    /// # Errors
    /// [`PagingError::PoolExhausted`] if the pool cannot hold the roots.
    pub fn new(mut pool: FramePool<'p>) -> Result<Self, PagingError> {
        let scheme = S::new(&mut pool)?;
        Ok(Self {
            pool,
            scheme,
            stack: None,
        })
    }

    /// Builds the complete initial address space for `layout`.
    ///
    /// # Errors
    /// Any [`PagingError`] from mapping, or [`PagingError::KernelTooLarge`]
    /// when the kernel does not fit between the environment and stack pages.
    pub fn build(pool: FramePool<'p>, layout: &BootLayout<'_>) -> Result<Self, PagingError> {
        let mut space = Self::new(pool)?;
        space.map_identity(S::IDENTITY_LIMIT, layout.device_ranges)?;
        space.map_core_window(layout)?;
        if let Some(fb) = layout.framebuffer {
            space.map_framebuffer(fb)?;
        }
        log::debug!(
            "Address space ready, {} of {} table frames used",
            space.pool.used(),
            space.pool.capacity()
        );
        Ok(space)
    }

    /// Maps one leaf.
    ///
    /// # Errors
    /// See [`PagingScheme::map`].
    pub fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: PageSize,
        attrs: MapAttributes,
    ) -> Result<(), PagingError> {
        self.scheme.map(&mut self.pool, va, pa, size, attrs)
    }

    /// Maps `len` bytes, using 2 MiB blocks wherever both sides are aligned
    /// and enough of the range is left.
    ///
    /// # Errors
    /// See [`PagingScheme::map`].
    pub fn map_range(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        attrs: MapAttributes,
    ) -> Result<(), PagingError> {
        let large = PageSize::Size2M.bytes();
        let mut offset = 0;
        while offset < len {
            let (v, p) = (va + offset, pa + offset);
            let size = if v.is_aligned(large) && p.is_aligned(large) && len - offset >= large {
                PageSize::Size2M
            } else {
                PageSize::Size4K
            };
            self.map(v, p, size, attrs)?;
            offset += size.bytes();
        }
        Ok(())
    }

    /// Identity maps `[0, limit)`; the first 2 MiB with page granularity.
    #[allow(clippy::cast_possible_truncation)]
    fn map_identity(&mut self, limit: u64, devices: &[Range<u64>]) -> Result<(), PagingError> {
        let attrs_for = |start: u64, len: u64| {
            if devices.iter().any(|r| r.start < start + len && start < r.end) {
                MapAttributes::DEVICE
            } else {
                MapAttributes::NORMAL
            }
        };

        let large = PageSize::Size2M.bytes();
        for page in (0..large).step_by(PAGE_SIZE) {
            self.map(
                VirtualAddress::new(page),
                PhysicalAddress::new(page),
                PageSize::Size4K,
                attrs_for(page, PAGE),
            )?;
        }
        for block in (large..limit).step_by(large as usize) {
            self.map(
                VirtualAddress::new(block),
                PhysicalAddress::new(block),
                PageSize::Size2M,
                attrs_for(block, large),
            )?;
        }
        log::trace!("Identity mapped {limit:#x} bytes");
        Ok(())
    }

    fn map_core_window(&mut self, layout: &BootLayout<'_>) -> Result<(), PagingError> {
        let kernel_pages = usize::try_from(align_up(layout.kernel_size, PAGE) / PAGE)
            .map_err(|_| PagingError::KernelTooLarge(usize::MAX))?;
        if kernel_pages > CORE_WINDOW_PAGES {
            return Err(PagingError::KernelTooLarge(kernel_pages));
        }

        self.map(
            VirtualAddress::new(BOOTBOOT_INFO),
            layout.handoff,
            PageSize::Size4K,
            MapAttributes::NORMAL,
        )?;
        self.map(
            VirtualAddress::new(BOOTBOOT_ENV),
            layout.environment,
            PageSize::Size4K,
            MapAttributes::NORMAL,
        )?;

        let core = VirtualAddress::new(BOOTBOOT_CORE);
        for page in 0..kernel_pages as u64 {
            self.map(
                core + page * PAGE,
                layout.kernel + page * PAGE,
                PageSize::Size4K,
                MapAttributes::NORMAL,
            )?;
        }

        let stack = self.pool.alloc_4k().ok_or(PagingError::PoolExhausted)?;
        self.map(
            VirtualAddress::new(BOOTBOOT_STACK),
            stack,
            PageSize::Size4K,
            MapAttributes::NORMAL,
        )?;
        self.stack = Some(stack);
        log::trace!("Core window holds {kernel_pages} kernel pages, stack at {stack}");
        Ok(())
    }

    fn map_framebuffer(&mut self, fb: FramebufferMapping) -> Result<(), PagingError> {
        if !fb.base.is_aligned(PAGE) {
            return Err(PagingError::Misaligned(fb.base.as_u64()));
        }
        let size = if fb.size > FB_WINDOW_SIZE {
            log::warn!(
                "Framebuffer of {:#x} bytes exceeds its window, mapping the first {FB_WINDOW_SIZE:#x}",
                fb.size
            );
            FB_WINDOW_SIZE
        } else {
            fb.size
        };
        self.map_range(
            VirtualAddress::new(BOOTBOOT_FB),
            fb.base,
            align_up(size, PAGE),
            MapAttributes::NORMAL,
        )
    }

    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<Translation> {
        self.scheme.translate(&self.pool, va)
    }

    #[must_use]
    pub fn roots(&self) -> TranslationRoots {
        self.scheme.roots()
    }

    /// Physical frame behind [`BOOTBOOT_STACK`], once the core window is mapped.
    #[must_use]
    pub const fn stack(&self) -> Option<PhysicalAddress> {
        self.stack
    }

    /// Physical range of the table pool, to be reported as reserved memory.
    #[must_use]
    pub fn table_region(&self) -> Range<u64> {
        let base = self.pool.base().as_u64();
        base..base + self.pool.span()
    }

    /// Turns translation on. Consumes the tables so this happens once.
    ///
    /// # Safety
    /// See [`PagingScheme::activate`].
    ///
    /// # Errors
    /// [`PagingError::UnsupportedTarget`] when not running on the scheme's own hardware.
    pub unsafe fn activate(self) -> Result<TranslationRoots, PagingError> {
        let roots = self.scheme.roots();
        unsafe { self.scheme.activate()? };
        Ok(roots)
    }
}
