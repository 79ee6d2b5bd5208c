//! # Platform Independent Boot Pipeline
//!
//! Everything between "a block device or firmware file service exists" and
//! "jump to the kernel" that does not depend on the platform:
//!
//! ```text
//! BlockDevice ──► volume (GPT → FAT | raw)
//!                    │ ramdisk, CONFIG
//!                    ▼
//!                 inflate (gzip) ──► fs readers (ustar, cpio) ─► image (ELF64 | PE32+)
//!                                                                   │
//!          mmap builder ◄── firmware / hand-derived regions          │
//!                    │                                              ▼
//!                    └──────────► BootContext ──► loader_vmem::AddressSpace ──► handoff
//! ```
//!
//! A single [`BootContext`] carries the in-progress handoff page, the
//! environment page, and every artifact a stage produced. Each stage is a
//! method on the context that checks it runs in order, and records the
//! failure reason on error so the platform can route to its failure path.
//!
//! Nothing here allocates. Buffers come from a [`PageSource`], which the
//! platforms back with firmware page allocations or a fixed arena, and every
//! claimed range is reported to the memory map builder as reserved.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod arch;
mod bytes;
pub mod context;
pub mod device;
pub mod environment;
pub mod error;
pub mod fs;
pub mod handoff;
pub mod image;
pub mod inflate;
pub mod mmap;
pub mod pages;
pub mod volume;

pub use crate::arch::Architecture;
pub use crate::context::{BootContext, BootStage, Framebuffer, Handoff, Kernel};
pub use crate::device::{BlockDevice, MemoryDisk, SECTOR_SIZE};
pub use crate::environment::{Environment, EnvironmentPage};
pub use crate::error::{
    BootError, ConsistencyError, DeviceError, FirmwareError, FormatError, ResourceError,
    VolumeError,
};
pub use crate::handoff::{ExitError, FirmwareExit, MapKey};
pub use crate::image::{ExecutableImage, ImageFormat};
pub use crate::mmap::{MemoryMapBuilder, Span};
pub use crate::pages::{BumpPages, PageSource};
