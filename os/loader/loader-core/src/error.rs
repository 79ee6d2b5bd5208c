//! Failure taxonomy of the boot pipeline.
//!
//! Leaf errors live beside the code that raises them and convert into one of
//! six categories, which convert into [`BootError`]. Every error is `Copy` so
//! that the failed stage can be recorded in the [`BootStage`](crate::BootStage).

use crate::image::ImageError;
use crate::inflate::InflateError;
use crate::volume::fat::FatError;
use crate::volume::gpt::GptError;
use loader_vmem::PagingError;

/// The storage device misbehaved or holds no usable partition table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("reading {count} sector(s) at LBA {lba} failed")]
    ReadFailed { lba: u64, count: usize },
    #[error("LBA {lba} lies beyond the end of the device")]
    OutOfRange { lba: u64 },
    #[error("buffer of {0} bytes is not a whole number of sectors")]
    PartialSector(usize),
    #[error("unsupported block size of {0} bytes")]
    UnsupportedBlockSize(usize),
    #[error("the boot device is opened read-only")]
    ReadOnly,
    #[error(transparent)]
    PartitionTable(#[from] GptError),
}

/// No boot volume, or a file the pipeline needs is missing from it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VolumeError {
    #[error("no partition qualifies as boot volume")]
    NoBootPartition,
    #[error("initial ramdisk not found")]
    RamdiskNotFound,
    #[error("kernel not found in the initial ramdisk")]
    KernelNotFound,
    #[error(transparent)]
    Fat(#[from] FatError),
}

/// Content that does not have the expected format.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error(transparent)]
    Inflate(#[from] InflateError),
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Memory the pipeline needs is not available.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("{requested} page(s) requested, the page source is exhausted")]
    OutOfPages { requested: usize },
    #[error("no room to track more reserved ranges")]
    TooManyReservations,
    #[error(transparent)]
    Paging(#[from] PagingError),
}

/// A firmware service call reported failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FirmwareError {
    #[error("firmware service {service} failed with status {status:#x}")]
    Service { service: &'static str, status: usize },
    #[error("firmware service {0} is unavailable")]
    Unavailable(&'static str),
}

/// The pipeline's own bookkeeping disagrees with what it observes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("memory map key still stale after {attempts} attempts")]
    StaleMemoryMap { attempts: usize },
    #[error("stage {found} cannot run {operation}")]
    StageOrder {
        operation: &'static str,
        found: &'static str,
    },
    #[error("address {0:#x} is not mapped by the kernel's address space")]
    Unmapped(u64),
    #[error("loader structure at {0:#x} is reported as free memory")]
    LiveRangeFree(u64),
    #[error("inflate target at {dest:#x} overlaps the live range at {live:#x}")]
    InflateOverlap { live: u64, dest: u64 },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootError {
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    #[error("volume error: {0}")]
    Volume(#[from] VolumeError),
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),
    #[error("firmware error: {0}")]
    Firmware(#[from] FirmwareError),
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
}

impl From<GptError> for BootError {
    fn from(e: GptError) -> Self {
        Self::Device(e.into())
    }
}

impl From<FatError> for BootError {
    fn from(e: FatError) -> Self {
        Self::Volume(e.into())
    }
}

impl From<InflateError> for BootError {
    fn from(e: InflateError) -> Self {
        Self::Format(e.into())
    }
}

impl From<ImageError> for BootError {
    fn from(e: ImageError) -> Self {
        Self::Format(e.into())
    }
}

impl From<PagingError> for BootError {
    fn from(e: PagingError) -> Self {
        Self::Resource(e.into())
    }
}
