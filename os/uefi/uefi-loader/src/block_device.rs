//! # Whole-Disk Block I/O
//!
//! Fallback when the loader's own file system has no ramdisk: read the boot
//! disk sector by sector and let the GPT resolver find the partition. The
//! resolver reads it through [`loader_core::device::SectorIo`], the same
//! `gpt_disk_io` view every other boot device gets.

use loader_core::{BlockDevice, BootError, DeviceError, FirmwareError, SECTOR_SIZE};
use uefi::boot::{self, OpenProtocolAttributes, OpenProtocolParams, ScopedProtocol, SearchType};
use uefi::proto::media::block::BlockIO;
use uefi::Identify;

pub struct FirmwareDisk {
    block_io: ScopedProtocol<BlockIO>,
    media_id: u32,
    last_lba: u64,
}

impl FirmwareDisk {
    /// Opens the first present, whole-disk device with 512 byte sectors.
    ///
    /// # Errors
    /// [`FirmwareError`] if there is no block I/O at all, [`DeviceError`] if no disk qualifies.
    pub fn open() -> Result<Self, BootError> {
        let handles = boot::locate_handle_buffer(SearchType::ByProtocol(&BlockIO::GUID))
            .map_err(|e| FirmwareError::Service {
                service: "LocateHandleBuffer",
                status: e.status().0,
            })?;

        let mut block_size = None;
        for &handle in handles.iter() {
            // SAFETY: the protocol is only read from, and only while boot services are active.
            let Ok(block_io) = (unsafe {
                boot::open_protocol::<BlockIO>(
                    OpenProtocolParams {
                        handle,
                        agent: boot::image_handle(),
                        controller: None,
                    },
                    OpenProtocolAttributes::GetProtocol,
                )
            }) else {
                continue;
            };

            let media = block_io.media();
            if !media.is_media_present() || media.is_logical_partition() {
                continue;
            }
            if media.block_size() as usize != SECTOR_SIZE {
                block_size = Some(media.block_size() as usize);
                continue;
            }

            let (media_id, last_lba) = (media.media_id(), media.last_block());
            log::debug!("Boot disk: media {media_id}, {} sectors", last_lba + 1);
            return Ok(Self {
                block_io,
                media_id,
                last_lba,
            });
        }

        Err(block_size.map_or(
            BootError::Firmware(FirmwareError::Unavailable("BlockIO")),
            |size| DeviceError::UnsupportedBlockSize(size).into(),
        ))
    }
}

impl BlockDevice for FirmwareDisk {
    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::PartialSector(buf.len()));
        }
        let count = buf.len() / SECTOR_SIZE;
        if lba.saturating_add(count as u64).saturating_sub(1) > self.last_lba {
            return Err(DeviceError::OutOfRange { lba });
        }
        self.block_io
            .read_blocks(self.media_id, lba, buf)
            .map_err(|e| {
                log::debug!("ReadBlocks at LBA {lba} failed: {:?}", e.status());
                DeviceError::ReadFailed { lba, count }
            })
    }

    fn sector_count(&mut self) -> Result<u64, DeviceError> {
        Ok(self.last_lba + 1)
    }
}
