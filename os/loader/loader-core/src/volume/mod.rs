//! Boot volume resolution: GPT → boot partition → FAT directory or raw ramdisk.

pub mod fat;
pub mod gpt;

use crate::arch::Architecture;
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::{BootError, VolumeError};
use crate::pages::PageSource;
use fat::{Directory, FatError, FatKind, FatVolume};
use gpt::BootPartition;

/// Directory in the FAT root that holds the loader's files.
pub const BOOT_DIRECTORY: &[u8; 11] = b"BOOTBOOT   ";

pub const CONFIG_NAME: &[u8; 11] = b"CONFIG     ";

pub const INITRD_NAME: &[u8; 11] = b"INITRD     ";

/// Sectors per read when loading a raw partition.
const RAW_READ_CHUNK: usize = 64;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VolumeKind {
    /// The partition itself is the ramdisk.
    Raw,
    Fat12,
    Fat16,
    Fat32,
}

impl From<FatKind> for VolumeKind {
    fn from(kind: FatKind) -> Self {
        match kind {
            FatKind::Fat12 => Self::Fat12,
            FatKind::Fat16 => Self::Fat16,
            FatKind::Fat32 => Self::Fat32,
        }
    }
}

/// The chosen boot partition.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VolumeHandle {
    pub partition_index: usize,
    pub first_lba: u64,
    /// Inclusive.
    pub last_lba: u64,
    pub kind: VolumeKind,
}

/// What the resolver found on the boot volume.
#[derive(Debug)]
pub struct ResolvedVolume<'m> {
    pub handle: VolumeHandle,
    /// Never empty.
    pub ramdisk: &'m [u8],
    /// Contents of `BOOTBOOT/CONFIG`, if present and not empty.
    pub config: Option<&'m [u8]>,
}

/// Finds the boot partition and loads its ramdisk and configuration.
///
/// # Errors
/// * [`DeviceError`](crate::DeviceError) if there is no GPT or a read fails,
/// * [`VolumeError`] if no partition qualifies or no ramdisk is found,
/// * [`ResourceError`](crate::ResourceError) if pages run out.
pub fn resolve<'m, D, P>(
    device: &mut D,
    pages: &mut P,
    arch: Architecture,
) -> Result<ResolvedVolume<'m>, BootError>
where
    D: BlockDevice,
    P: PageSource<'m>,
{
    let partition = gpt::select_boot_partition(device, arch)?.ok_or(VolumeError::NoBootPartition)?;
    log::info!(
        "Boot partition {}: LBA {}..={}",
        partition.index,
        partition.first_lba,
        partition.last_lba
    );

    let mut boot_sector = [0u8; SECTOR_SIZE];
    device.read_sectors(partition.first_lba, &mut boot_sector)?;

    let (kind, ramdisk, config) = match FatVolume::detect(&boot_sector, partition.first_lba)? {
        Some(fat) => {
            let (ramdisk, config) = load_from_fat(device, pages, &fat, arch)?;
            (VolumeKind::from(fat.kind()), ramdisk, config)
        }
        None => (VolumeKind::Raw, load_raw(device, pages, &partition)?, None),
    };

    if ramdisk.is_empty() {
        return Err(VolumeError::RamdiskNotFound.into());
    }

    Ok(ResolvedVolume {
        handle: VolumeHandle {
            partition_index: partition.index,
            first_lba: partition.first_lba,
            last_lba: partition.last_lba,
            kind,
        },
        ramdisk,
        config,
    })
}

fn load_from_fat<'m, D, P>(
    device: &mut D,
    pages: &mut P,
    fat: &FatVolume,
    arch: Architecture,
) -> Result<(&'m [u8], Option<&'m [u8]>), BootError>
where
    D: BlockDevice,
    P: PageSource<'m>,
{
    let boot_dir = fat
        .find(device, Directory::Root, BOOT_DIRECTORY)?
        .filter(fat::DirEntry::is_directory)
        .ok_or(FatError::NoBootDirectory)?
        .as_directory();

    let config = match fat.find(device, boot_dir, CONFIG_NAME)? {
        Some(entry) => Some(fat.read_file(device, &entry, pages)?).filter(|c| !c.is_empty()),
        None => None,
    };

    let initrd = match fat.find(device, boot_dir, INITRD_NAME)? {
        Some(entry) if entry.size > 0 => Some(entry),
        _ => fat.find(device, boot_dir, arch.ramdisk_name())?,
    }
    .ok_or(VolumeError::RamdiskNotFound)?;

    log::debug!(
        "Ramdisk {} is {} bytes at cluster {}",
        core::str::from_utf8(&initrd.name).unwrap_or("?").trim_end(),
        initrd.size,
        initrd.first_cluster
    );
    let ramdisk = fat.read_file(device, &initrd, pages)?;
    Ok((ramdisk, config))
}

fn load_raw<'m, D, P>(
    device: &mut D,
    pages: &mut P,
    partition: &BootPartition,
) -> Result<&'m [u8], BootError>
where
    D: BlockDevice,
    P: PageSource<'m>,
{
    let bytes = usize::try_from(partition.sectors())
        .ok()
        .and_then(|s| s.checked_mul(SECTOR_SIZE))
        .ok_or(VolumeError::RamdiskNotFound)?;
    log::debug!("Partition is not FAT, loading all {bytes} bytes as ramdisk");

    let buf = pages.claim_bytes(bytes)?;
    for (i, chunk) in buf.chunks_mut(RAW_READ_CHUNK * SECTOR_SIZE).enumerate() {
        let lba = partition.first_lba + (i * RAW_READ_CHUNK) as u64;
        device.read_sectors(lba, chunk)?;
    }
    Ok(buf)
}
