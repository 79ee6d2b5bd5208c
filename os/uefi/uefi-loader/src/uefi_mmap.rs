//! # UEFI Memory Map and Exit
//!
//! `ExitBootServices` only succeeds with the key of the most recent memory
//! map, so both calls go straight to the boot services table: the key has to
//! travel from one to the other and back to the retry loop in
//! [`loader_core::handoff`].

use crate::logger::UefiLogger;
use crate::pages::FirmwarePages;
use loader_core::handoff::{ExitError, FirmwareExit, MapKey};
use loader_core::mmap::{MemoryMapBuilder, classify_efi};
use loader_core::{FirmwareError, PageSource, ResourceError};
use loader_protocol::memory::PAGE_SIZE;
use uefi::mem::memory_map::MemoryDescriptor;
use uefi::{Status, boot};

/// Enough for several hundred descriptors.
const MAP_BUFFER_PAGES: usize = 8;

/// The firmware side of the handoff.
pub struct UefiFirmware {
    logger: &'static UefiLogger,
    buffer: &'static mut [u8],
    exited: bool,
}

impl UefiFirmware {
    /// Claims the memory map buffer up front: allocating later would change the map.
    ///
    /// # Errors
    /// [`ResourceError::OutOfPages`].
    pub fn new(logger: &'static UefiLogger, pages: &mut FirmwarePages) -> Result<Self, ResourceError> {
        Ok(Self {
            logger,
            buffer: pages.claim(MAP_BUFFER_PAGES)?,
            exited: false,
        })
    }

    /// Whether boot services are gone.
    pub const fn exited(&self) -> bool {
        self.exited
    }
}

/// The raw boot services table, or an error naming `service` if it is gone.
macro_rules! boot_services {
    ($service:literal) => {{
        let st = uefi::table::system_table_raw().ok_or(FirmwareError::Unavailable($service))?;
        // SAFETY: the system table stays valid for the lifetime of the image.
        unsafe { st.as_ref().boot_services.as_ref() }.ok_or(FirmwareError::Unavailable($service))?
    }};
}

impl FirmwareExit for UefiFirmware {
    fn snapshot(&mut self, map: &mut MemoryMapBuilder) -> Result<MapKey, FirmwareError> {
        let bs = boot_services!("GetMemoryMap");
        let mut size = self.buffer.len();
        let mut key = 0usize;
        let mut desc_size = 0usize;
        let mut desc_version = 0u32;
        // SAFETY: every out pointer is valid; the buffer is ours and `size` bytes long.
        let status = unsafe {
            (bs.get_memory_map)(
                &raw mut size,
                self.buffer.as_mut_ptr().cast::<MemoryDescriptor>(),
                &raw mut key,
                &raw mut desc_size,
                &raw mut desc_version,
            )
        };
        if status != Status::SUCCESS {
            return Err(FirmwareError::Service {
                service: "GetMemoryMap",
                status: status.0,
            });
        }
        if desc_size < size_of::<MemoryDescriptor>() {
            return Err(FirmwareError::Service {
                service: "GetMemoryMap",
                status: Status::INCOMPATIBLE_VERSION.0,
            });
        }

        let descriptors = self.buffer[..size].chunks_exact(desc_size);
        let count = descriptors.len();
        for raw in descriptors {
            // SAFETY: each chunk holds at least one descriptor; the firmware does not align them for us.
            let desc = unsafe { raw.as_ptr().cast::<MemoryDescriptor>().read_unaligned() };
            let length = desc.page_count.saturating_mul(PAGE_SIZE as u64);
            map.push(desc.phys_start, length, classify_efi(desc.ty.0));
        }
        log::trace!("Firmware reported {count} descriptors, key {key:#x}");
        Ok(MapKey(key as u64))
    }

    fn exit(&mut self, key: MapKey, _map: &mut MemoryMapBuilder) -> Result<(), ExitError> {
        let bs = boot_services!("ExitBootServices");
        let image = boot::image_handle();
        self.logger.exit_boot_services();
        // SAFETY: nothing uses boot services past this point unless the call fails.
        let status = unsafe { (bs.exit_boot_services)(image.as_ptr(), key.0 as usize) };
        match status {
            Status::SUCCESS => {
                self.exited = true;
                log::info!("Boot services exited, we're now flying by instruments.");
                Ok(())
            }
            Status::INVALID_PARAMETER => Err(ExitError::StaleKey),
            other => Err(FirmwareError::Service {
                service: "ExitBootServices",
                status: other.0,
            }
            .into()),
        }
    }
}
