use crate::pages::FirmwarePages;
use loader_core::{BootError, FirmwareError, PageSource};
use uefi::proto::media::file::{File, FileAttribute, FileMode, RegularFile};
use uefi::{CStr16, Status, boot, cstr16};

pub const INITRD_PATH: &CStr16 = cstr16!("\\BOOTBOOT\\INITRD");
pub const ARCH_INITRD_PATH: &CStr16 = cstr16!("\\BOOTBOOT\\X86_64");
pub const CONFIG_PATH: &CStr16 = cstr16!("\\BOOTBOOT\\CONFIG");

const fn service_error(service: &'static str, status: Status) -> FirmwareError {
    FirmwareError::Service {
        service,
        status: status.0,
    }
}

/// Loads a file from the file system the loader was started from.
///
/// `Ok(None)` if the file system or the file does not exist, or the file is empty.
///
/// # Errors
/// Read failures once the file is open, or exhausted pages.
pub fn load_file(
    path: &CStr16,
    pages: &mut FirmwarePages,
) -> Result<Option<&'static [u8]>, BootError> {
    let Ok(mut sfs) = boot::get_image_file_system(boot::image_handle()) else {
        log::debug!("No file system on the boot device");
        return Ok(None);
    };
    let mut volume = sfs
        .open_volume()
        .map_err(|e| service_error("OpenVolume", e.status()))?;

    let Ok(handle) = volume.open(path, FileMode::Read, FileAttribute::empty()) else {
        log::debug!("{path} not found");
        return Ok(None);
    };
    let Some(mut file) = handle.into_regular_file() else {
        log::warn!("{path} is not a regular file");
        return Ok(None);
    };

    file.set_position(RegularFile::END_OF_FILE)
        .map_err(|e| service_error("SetPosition", e.status()))?;
    let size = file
        .get_position()
        .map_err(|e| service_error("GetPosition", e.status()))?;
    file.set_position(0)
        .map_err(|e| service_error("SetPosition", e.status()))?;

    let size = usize::try_from(size).map_err(|_| service_error("GetPosition", Status::BAD_BUFFER_SIZE))?;
    if size == 0 {
        return Ok(None);
    }

    let buf = pages.claim_bytes(size)?;
    let read = file
        .read(buf)
        .map_err(|e| service_error("Read", e.status()))?;
    if read != size {
        log::error!("Mismatch in file size: read {read} bytes, expected {size} bytes");
        return Err(service_error("Read", Status::END_OF_FILE).into());
    }

    log::info!("Loaded {path}, {size} bytes");
    Ok(Some(buf))
}

/// The ramdisk file: `INITRD`, else the architecture specific one.
///
/// # Errors
/// See [`load_file`].
pub fn load_initrd(pages: &mut FirmwarePages) -> Result<Option<&'static [u8]>, BootError> {
    match load_file(INITRD_PATH, pages)? {
        Some(initrd) => Ok(Some(initrd)),
        None => load_file(ARCH_INITRD_PATH, pages),
    }
}
