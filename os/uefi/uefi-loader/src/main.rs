//! # BOOTBOOT Loader for x86-64 UEFI
//!
//! A UEFI application that loads a BOOTBOOT compliant kernel from an initial
//! ramdisk and enters it in the higher half with the handoff structures the
//! protocol promises. The platform independent work lives in `loader-core`;
//! this binary supplies the firmware services it runs on.
//!
//! ## Boot Process
//!
//! ```text
//! UEFI Firmware
//!         ↓
//! ┌─────────────────────────────────────────────┐
//! │ 1. Handoff page, environment page and page  │
//! │    table pool from AllocatePages            │
//! │ 2. Ramdisk: \BOOTBOOT\INITRD, \BOOTBOOT\    │
//! │    X86_64, else the GPT on the boot disk    │
//! │ 3. Inflate, parse CONFIG, pick a GOP mode   │
//! │ 4. Recognize the kernel (ELF64 or PE32+)    │
//! │ 5. Memory map from GetMemoryMap             │
//! │ 6. Four level page tables                   │
//! │ 7. ExitBootServices, retrying stale keys    │
//! │ 8. Load CR3, reset RSP, jump                │
//! └─────────────────────────────────────────────┘
//!         ↓
//! Kernel at its ELF/PE entry, stack at the top of the address space
//! ```
//!
//! ## Virtual Memory Layout at Entry
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌────────────────────────────────┐
//!                       │  Identity mapped, 16 GiB       │
//!                       │  (loader code, tables, stack)  │
//!                       ├────────────────────────────────┤
//!                       │        Unmapped Space          │
//! 0xFFFF_FFFF_FC00_0000 ├────────────────────────────────┤
//!                       │  Framebuffer                   │
//! 0xFFFF_FFFF_FFE0_0000 ├────────────────────────────────┤
//!                       │  Handoff page                  │
//!                       │  Environment page              │
//!                       │  Kernel pages                  │
//!                       │  Stack page                    │
//! 0xFFFF_FFFF_FFFF_FFFF └────────────────────────────────┘
//! ```
//!
//! ## Failure
//!
//! Every error ends in [`fail`]: the reason is logged, and while the console
//! still exists the loader waits a bounded time for a key before it resets
//! the machine through the runtime services.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![no_main]
#![allow(unsafe_code)]

mod block_device;
mod file_system;
mod framebuffer;
mod logger;
mod pages;
mod system_info;
mod tracing;
mod uefi_mmap;

use crate::block_device::FirmwareDisk;
use crate::logger::UefiLogger;
use crate::pages::FirmwarePages;
use crate::uefi_mmap::UefiFirmware;
use core::ops::Range;
use loader_core::error::VolumeError;
use loader_core::{Architecture, BootContext, BootError, FirmwareError, Handoff, Span};
use loader_protocol::boot::LoaderType;
use loader_protocol::memory::PAGE_SIZE;
use loader_vmem::{AddressSpace, FramePool, X86FourLevel};
use log::{LevelFilter, error, info};
use uefi::prelude::*;
use uefi::runtime::{self, ResetType};

static LOGGER: UefiLogger = UefiLogger::new(LevelFilter::Debug);

/// How long the failure path waits for a key: polls times interval.
const KEY_POLLS: usize = 500;
const KEY_POLL_INTERVAL_US: usize = 20_000;

/// Local APIC and I/O APIC register pages, which firmware rarely lists as MMIO.
const APIC_PAGES: [Range<u64>; 2] = [0xFEE0_0000..0xFEE0_1000, 0xFEC0_0000..0xFEC0_1000];

/// Device ranges carried into the identity map.
const MAX_DEVICE_RANGES: usize = 32;

/// Busy wait before resetting when no console is left to read a key from.
const RESET_PAUSE_SPINS: usize = 100_000_000;

#[entry]
fn efi_main() -> Status {
    if uefi::helpers::init().is_err() {
        return Status::UNSUPPORTED;
    }
    system::with_stdout(|stdout| loader_trace::report_install(LOGGER.init(), stdout));
    info!("BOOTBOOT loader starting");

    let mut pages = FirmwarePages;
    let mut firmware = match UefiFirmware::new(&LOGGER, &mut pages) {
        Ok(firmware) => firmware,
        Err(e) => fail(e.into(), false),
    };

    let (space, jump) = match boot(&mut pages, &mut firmware) {
        Ok(ready) => ready,
        Err(e) => fail(e, firmware.exited()),
    };

    // SAFETY: boot services are gone and the new tables identity map the
    // loader's code and stack, so execution continues after the switch.
    if let Err(e) = unsafe { space.activate() } {
        fail(e.into(), true);
    }

    // Off we pop.
    unsafe { switch_to_kernel(jump.entry, jump.stack_top) }
}

/// Runs the pipeline up to the point of no return.
fn boot(
    pages: &mut FirmwarePages,
    firmware: &mut UefiFirmware,
) -> Result<(AddressSpace<'static, X86FourLevel>, Handoff), BootError> {
    let handoff = FirmwarePages::handoff_page()?;
    let environment = FirmwarePages::environment_page()?;
    let frames = FirmwarePages::table_frames::<X86FourLevel>()?;
    let tables = Span::from_len(frames.as_ptr() as u64, (frames.len() * PAGE_SIZE) as u64);

    let mut ctx = BootContext::new(Architecture::X86_64, LoaderType::Uefi, handoff, environment);
    ctx.device_ready()?;

    if let Some(initrd) = file_system::load_initrd(pages)? {
        let config = file_system::load_file(file_system::CONFIG_PATH, pages)?;
        ctx.use_files(initrd, config)?;
    } else {
        info!("No ramdisk file, searching the boot disk's GPT");
        let mut disk = FirmwareDisk::open()?;
        ctx.resolve_volume(&mut disk, pages)?;
    }

    ctx.prepare_ramdisk(pages)?;
    ctx.parse_config()?;

    let (width, height) = (ctx.environment().screen_width, ctx.environment().screen_height);
    if let Some(fb) = framebuffer::select(width, height) {
        ctx.set_framebuffer(fb);
    }

    ctx.recognize_kernel(pages)?;
    system_info::record(&mut ctx);

    ctx.reserve(tables)?;
    ctx.snapshot_memory_map(firmware)?;
    let mut devices = [const { 0..0 }; MAX_DEVICE_RANGES];
    let devices = ctx.memory_map().device_ranges(&APIC_PAGES, &mut devices);
    info!("{} device ranges mapped uncached", devices.len());
    let space = ctx.build_address_space::<X86FourLevel>(FramePool::new(frames), devices)?;
    ctx.leave_firmware(firmware)?;

    let jump = ctx.finalize(&space)?;
    tracing::trace_handoff(ctx.handoff_page(), &jump);
    Ok((space, jump))
}

/// The firmware status a failure is reported with.
struct FailureStatus(Status);

impl From<BootError> for FailureStatus {
    fn from(error: BootError) -> Self {
        Self(match error {
            BootError::Device(_) => Status::DEVICE_ERROR,
            BootError::Volume(VolumeError::Fat(_)) => Status::VOLUME_CORRUPTED,
            BootError::Volume(_) => Status::NOT_FOUND,
            BootError::Format(_) => Status::LOAD_ERROR,
            BootError::Resource(_) => Status::OUT_OF_RESOURCES,
            BootError::Firmware(FirmwareError::Service { status, .. }) => Status(status),
            BootError::Firmware(FirmwareError::Unavailable(_)) => Status::UNSUPPORTED,
            BootError::Consistency(_) => Status::ABORTED,
        })
    }
}

/// The single failure path: report, wait for a key while there is a console, reset.
fn fail(error: BootError, boot_services_gone: bool) -> ! {
    error!("BOOTBOOT-PANIC: {error}");
    let FailureStatus(status) = error.into();

    if boot_services_gone {
        for _ in 0..RESET_PAUSE_SPINS {
            core::hint::spin_loop();
        }
    } else {
        uefi::println!("BOOTBOOT-PANIC: {error}");
        uefi::println!("Press any key to reboot");
        wait_for_key();
    }
    runtime::reset(ResetType::COLD, status, None)
}

fn wait_for_key() {
    for _ in 0..KEY_POLLS {
        if matches!(system::with_stdin(|stdin| stdin.read_key()), Ok(Some(_))) {
            return;
        }
        boot::stall(KEY_POLL_INTERVAL_US);
    }
}

/// Enters the kernel with a fresh stack. The active tables must map both.
///
/// `stack_top` is the address just past the stack page; zero means the top of
/// the address space, and the first push wraps into the stack page.
#[inline(never)]
unsafe fn switch_to_kernel(entry: u64, stack_top: u64) -> ! {
    info!("UEFI is about to jump into Kernel land. Ciao Kakao ...");
    unsafe {
        core::arch::asm!(
            "cli",
            "mov    rsp, {stack}",
            "jmp    {entry}",
            stack = in(reg) stack_top,
            entry = in(reg) entry,
            options(noreturn)
        )
    }
}
