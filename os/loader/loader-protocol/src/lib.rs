//! # BOOTBOOT Handoff Protocol
//!
//! This crate defines the fixed binary contract between the stage-2 loader and
//! the kernel it starts: the 128-byte [`BootBoot`](boot::BootBoot) header, the
//! trailing memory map of [`MMapEnt`](boot::MMapEnt) entries, and the static
//! virtual address layout the kernel is linked against.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │      Identity mapped RAM        │
//!                       │   (+ device range on AArch64)   │
//!                       ├─────────────────────────────────┤
//!                       │           Unmapped              │
//! BOOTBOOT_MMIO         ├─────────────────────────────────┤ 0xffff_ffff_f800_0000
//!                       │   Reserved for kernel MMIO      │
//! BOOTBOOT_FB           ├─────────────────────────────────┤ 0xffff_ffff_fc00_0000
//!                       │     Linear framebuffer          │ 62 MiB
//! BOOTBOOT_INFO         ├─────────────────────────────────┤ 0xffff_ffff_ffe0_0000
//!                       │     Handoff page (this crate)   │
//! BOOTBOOT_ENV          ├─────────────────────────────────┤ 0xffff_ffff_ffe0_1000
//!                       │     Environment text            │
//! BOOTBOOT_CORE         ├─────────────────────────────────┤ 0xffff_ffff_ffe0_2000
//!                       │     Kernel image                │
//!                       │           ...                   │
//!                       │     Kernel stack page           │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//!
//! The header is byte-exact; field offsets are asserted at compile time and
//! the memory map entries encode the region kind in the low nibble of their
//! size field. See [`boot`] for details.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod boot;
pub mod memory;

pub use boot::{
    ArchInfo, BcdTimestamp, BootBoot, FramebufferType, HandoffPage, LoaderType, MMapEnt,
    MemoryKind, Protocol,
};
