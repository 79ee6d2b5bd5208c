//! # BOOTBOOT Loader for the Raspberry Pi 3
//!
//! The AArch64 platform of the loader. It runs at EL1 with the MMU off, as
//! left by the board's start code, and has no firmware services beyond the
//! VideoCore mailbox: the boot disk, the memory map and the console are all
//! driven directly.
//!
//! ## Boot Process
//!
//! ```text
//! start code (EL1, MMU off, stack in the loader image)
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │ 1. PL011 console, trace logger              │
//! │ 2. Handoff, environment and table pages     │
//! │    from the arena after the loader image    │
//! │ 3. GPT on the SD card → FAT or raw ramdisk  │
//! │ 4. Inflate, parse CONFIG                    │
//! │ 5. VideoCore framebuffer for screen=        │
//! │ 6. Recognize the kernel (ELF64 or PE32+)    │
//! │ 7. Memory map from the VideoCore memory     │
//! │    split and the peripheral window          │
//! │ 8. TTBR0 identity, TTBR1 kernel window      │
//! │ 9. MMU on, reset SP, jump                   │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Kernel at its entry, stack at the top of the address space
//! ```
//!
//! The SD card driver is not part of this crate; [`boot`] takes any
//! [`BlockDevice`].
//!
//! Every failure is reported on the console; after a key press, or a bounded
//! wait, the watchdog resets the board.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod board;
pub mod mailbox;
pub mod memory;
pub mod uart;
pub mod watchdog;

use crate::board::{MAILBOX_BASE, MAILBOX_SIZE, MMIO_BASE, MMIO_RANGE, PM_BASE, PM_SIZE, UART0_BASE, UART0_SIZE};
use crate::mailbox::{Mailbox, VideoCore};
use crate::memory::{ArenaPages, FALLBACK_ARM_MEMORY};
use crate::uart::Pl011;
use crate::watchdog::Watchdog;
use core::fmt::Write;
use loader_core::{Architecture, BlockDevice, BootContext, BootError, Handoff, Span};
use loader_mmio::MmioRegion;
use loader_protocol::boot::LoaderType;
use loader_trace::TraceLogger;
use loader_vmem::{Aarch64TwoLevel, AddressSpace, FramePool};
use log::LevelFilter;

/// Console polls for a key before the failure path resets anyway.
const KEY_WAIT_POLLS: usize = 50_000_000;

/// The devices the loader drives itself.
pub struct Board<V: VideoCore = Mailbox> {
    pub console: Pl011,
    pub videocore: V,
    pub watchdog: Watchdog,
}

impl Board {
    /// # Safety
    /// Must run on a Raspberry Pi 3 with the peripherals at [`MMIO_BASE`],
    /// with translation off or identity mapped as device memory.
    #[must_use]
    pub unsafe fn raspberry_pi3() -> Self {
        // SAFETY: fixed peripheral addresses of the board, per the caller.
        unsafe {
            Self {
                console: Pl011::new(MmioRegion::new(UART0_BASE, UART0_SIZE)),
                videocore: Mailbox::new(MmioRegion::new(MAILBOX_BASE, MAILBOX_SIZE)),
                watchdog: Watchdog::new(MmioRegion::new(PM_BASE, PM_SIZE)),
            }
        }
    }
}

impl<V: VideoCore> Board<V> {
    /// The single failure path: report, wait for a key, reset.
    pub fn fail(&mut self, error: BootError) -> ! {
        log::error!("BOOTBOOT-PANIC: {error}");
        // The console may be gone too; the reset happens either way.
        let _ = writeln!(self.console, "BOOTBOOT-PANIC: {error}\nPress any key to reboot");
        let _ = self.console.getc(KEY_WAIT_POLLS);
        self.watchdog.reset()
    }
}

/// Loads the kernel from `disk` and enters it.
///
/// `arena` is the free memory after the loader image, `image` the loader
/// image itself including its stack; both stay out of the kernel's free memory.
///
/// # Safety
/// See [`Board::raspberry_pi3`]. `arena` must not overlap `image`.
pub unsafe fn boot<D: BlockDevice>(disk: &mut D, arena: &'static mut [u8], image: Span) -> ! {
    // SAFETY: forwarded to the caller.
    let mut board = unsafe { Board::raspberry_pi3() };
    board.console.init();
    loader_trace::report_install(TraceLogger::new(LevelFilter::Info).init(), &mut board.console);
    log::info!("BOOTBOOT loader starting");

    let mut pages = ArenaPages::new(arena);
    let (space, jump) = match prepare(&mut board.videocore, disk, &mut pages, image) {
        Ok(ready) => ready,
        Err(e) => board.fail(e),
    };

    // SAFETY: the identity map covers the loader, its stack and the peripherals.
    if let Err(e) = unsafe { space.activate() } {
        board.fail(e.into());
    }

    // SAFETY: translation is on and maps the kernel's entry and stack.
    unsafe { switch_to_kernel(jump.entry, jump.stack_top) }
}

/// Runs the pipeline up to the point of no return.
///
/// A VideoCore that cannot provide a framebuffer leaves the kernel without
/// one; one that cannot report the memory split leaves it with 64 MiB.
///
/// # Errors
/// Any [`BootError`] of the pipeline.
pub fn prepare<V, D>(
    videocore: &mut V,
    disk: &mut D,
    pages: &mut ArenaPages,
    image: Span,
) -> Result<(AddressSpace<'static, Aarch64TwoLevel>, Handoff), BootError>
where
    V: VideoCore,
    D: BlockDevice,
{
    let handoff = pages.handoff_page()?;
    let environment = pages.environment_page()?;
    let frames = pages.table_frames::<Aarch64TwoLevel>()?;

    let mut ctx = BootContext::new(Architecture::Aarch64, LoaderType::RaspberryPi, handoff, environment);
    ctx.device_ready()?;
    ctx.resolve_volume(disk, pages)?;
    ctx.prepare_ramdisk(pages)?;
    ctx.parse_config()?;

    let (width, height) = (ctx.environment().screen_width, ctx.environment().screen_height);
    match videocore.allocate_framebuffer(width, height) {
        Ok(fb) => ctx.set_framebuffer(fb),
        Err(e) => log::warn!("No framebuffer for {width}x{height}: {e}"),
    }

    ctx.recognize_kernel(pages)?;
    ctx.arch_info_mut().set_mmio_ptr(MMIO_BASE as u64);

    let arm = videocore.arm_memory().unwrap_or_else(|e| {
        log::warn!("Assuming 64 MiB of ARM memory: {e}");
        FALLBACK_ARM_MEMORY
    });
    log::debug!("ARM memory {:#x}..{:#x}", arm.start, arm.end);

    ctx.reserve(image)?;
    ctx.reserve(pages.claimed())?;
    ctx.build_memory_map(memory::board_regions(&arm))?;

    let space = ctx.build_address_space::<Aarch64TwoLevel>(FramePool::new(frames), &[MMIO_RANGE])?;
    let jump = ctx.finalize(&space)?;
    Ok((space, jump))
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
unsafe fn switch_to_kernel(entry: u64, stack_top: u64) -> ! {
    log::info!("Jumping to the kernel at {entry:#x}");
    unsafe {
        core::arch::asm!(
            "mov    sp, {stack}",
            "br     {entry}",
            stack = in(reg) stack_top,
            entry = in(reg) entry,
            options(noreturn)
        )
    }
}

/// Translation cannot be activated off target, so this is never reached there.
#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
unsafe fn switch_to_kernel(entry: u64, _stack_top: u64) -> ! {
    log::error!("Cannot enter the kernel at {entry:#x} on this target");
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(all(feature = "panic_handler", target_os = "none", not(test)))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    log::error!("BOOTBOOT-PANIC: {info}");
    // SAFETY: the loader only ever runs on the board it was built for.
    unsafe { Watchdog::new(MmioRegion::new(PM_BASE, PM_SIZE)) }.reset()
}
