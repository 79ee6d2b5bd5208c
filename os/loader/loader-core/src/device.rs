//! Sector level access to the boot device.

use crate::error::DeviceError;
use gpt_disk_io::BlockIo;
use gpt_disk_types::{BlockSize, Lba};

/// Sector size every on-disk structure is addressed in.
pub const SECTOR_SIZE: usize = 512;

/// Reads whole sectors from the boot device.
///
/// This is the seam to the platform's storage driver (an SD host controller,
/// a firmware block I/O protocol) which lives outside this crate.
pub trait BlockDevice {
    /// Fills `buf`, whose length is a multiple of [`SECTOR_SIZE`], starting at `lba`.
    ///
    /// # Errors
    /// Whatever the driver reports; out of range reads must fail rather than wrap.
    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Size of the device in sectors.
    ///
    /// # Errors
    /// Whatever the driver reports.
    fn sector_count(&mut self) -> Result<u64, DeviceError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_sectors(lba, buf)
    }

    fn sector_count(&mut self) -> Result<u64, DeviceError> {
        (**self).sector_count()
    }
}

/// [`BlockIo`] view of a [`BlockDevice`] for the GPT reader.
///
/// Writes are refused; the loader never modifies the boot disk.
pub struct SectorIo<'d, D: ?Sized> {
    device: &'d mut D,
}

impl<'d, D: BlockDevice + ?Sized> SectorIo<'d, D> {
    #[must_use]
    pub const fn new(device: &'d mut D) -> Self {
        Self { device }
    }
}

impl<D: BlockDevice + ?Sized> BlockIo for SectorIo<'_, D> {
    type Error = DeviceError;

    fn block_size(&self) -> BlockSize {
        BlockSize::BS_512
    }

    fn num_blocks(&mut self) -> Result<u64, Self::Error> {
        self.device.sector_count()
    }

    fn read_blocks(&mut self, start_lba: Lba, dst: &mut [u8]) -> Result<(), Self::Error> {
        self.device.read_sectors(start_lba.to_u64(), dst)
    }

    fn write_blocks(&mut self, _start_lba: Lba, _src: &[u8]) -> Result<(), Self::Error> {
        Err(DeviceError::ReadOnly)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// A disk image held in memory.
pub struct MemoryDisk<'a> {
    image: &'a [u8],
    reads: usize,
}

impl<'a> MemoryDisk<'a> {
    #[must_use]
    pub const fn new(image: &'a [u8]) -> Self {
        Self { image, reads: 0 }
    }

    /// Number of read requests served so far.
    #[must_use]
    pub const fn reads(&self) -> usize {
        self.reads
    }
}

impl BlockDevice for MemoryDisk<'_> {
    fn read_sectors(&mut self, lba: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(DeviceError::PartialSector(buf.len()));
        }
        let start = usize::try_from(lba)
            .ok()
            .and_then(|lba| lba.checked_mul(SECTOR_SIZE))
            .ok_or(DeviceError::OutOfRange { lba })?;
        let end = start
            .checked_add(buf.len())
            .ok_or(DeviceError::OutOfRange { lba })?;
        let data = self
            .image
            .get(start..end)
            .ok_or(DeviceError::OutOfRange { lba })?;
        buf.copy_from_slice(data);
        self.reads += 1;
        Ok(())
    }

    fn sector_count(&mut self) -> Result<u64, DeviceError> {
        Ok((self.image.len() / SECTOR_SIZE) as u64)
    }
}
