//! Read-only FAT12/16/32: the boot parameter block, 8.3 directory entries
//! and cluster chains.

use crate::bytes::{u16_at, u32_at, u8_at};
use crate::device::{BlockDevice, SECTOR_SIZE};
use crate::error::BootError;
use crate::pages::PageSource;
use core::ops::ControlFlow;

const DIR_ENTRY_SIZE: usize = 32;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_LONG_NAME: u8 = 0x0F;
const DELETED: u8 = 0xE5;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatError {
    #[error("unsupported sector size {0}")]
    SectorSize(u16),
    #[error("inconsistent boot parameter block")]
    InvalidBpb,
    #[error("cluster {0} lies outside the volume")]
    BadCluster(u32),
    #[error("cluster chain ends before the file's {0} bytes")]
    ShortChain(u32),
    #[error("cluster chain starting at {0} does not terminate")]
    ChainLoop(u32),
    #[error("directory BOOTBOOT not found")]
    NoBootDirectory,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FatKind {
    Fat12,
    Fat16,
    Fat32,
}

/// A directory to search.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Directory {
    Root,
    Cluster(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 11],
    pub attributes: u8,
    pub first_cluster: u32,
    pub size: u32,
}

impl DirEntry {
    fn parse(raw: &[u8]) -> Option<Self> {
        let mut name = [0u8; 11];
        name.copy_from_slice(raw.get(..11)?);
        let high = u32::from(u16_at(raw, 20)?);
        let low = u32::from(u16_at(raw, 26)?);
        Some(Self {
            name,
            attributes: u8_at(raw, 11)?,
            first_cluster: (high << 16) | low,
            size: u32_at(raw, 28)?,
        })
    }

    #[must_use]
    pub const fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    /// The directory it names: cluster 0 means the root on FAT12/16.
    #[must_use]
    pub const fn as_directory(&self) -> Directory {
        if self.first_cluster == 0 {
            Directory::Root
        } else {
            Directory::Cluster(self.first_cluster)
        }
    }
}

/// Geometry of a mounted FAT volume; all sector numbers relative to its start.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FatVolume {
    start_lba: u64,
    kind: FatKind,
    sectors_per_cluster: u32,
    fat_start: u32,
    root_dir_start: u32,
    root_dir_sectors: u32,
    data_start: u32,
    root_cluster: u32,
    cluster_count: u32,
}

impl FatVolume {
    /// Recognizes a FAT boot sector. `Ok(None)` if it is not FAT at all.
    ///
    /// # Errors
    /// [`FatError`] when the sector claims to be FAT but its geometry is unusable.
    pub fn detect(boot_sector: &[u8], start_lba: u64) -> Result<Option<Self>, FatError> {
        let fat1x = matches!(boot_sector.get(0x36..0x3b), Some(b"FAT12" | b"FAT16"));
        let fat32 = boot_sector.get(0x52..0x57) == Some(b"FAT32".as_slice());
        if !fat1x && !fat32 {
            return Ok(None);
        }

        let field16 = |at| u16_at(boot_sector, at).ok_or(FatError::InvalidBpb);
        let field32 = |at| u32_at(boot_sector, at).ok_or(FatError::InvalidBpb);

        let bytes_per_sector = field16(11)?;
        if usize::from(bytes_per_sector) != SECTOR_SIZE {
            return Err(FatError::SectorSize(bytes_per_sector));
        }
        let sectors_per_cluster = u32::from(u8_at(boot_sector, 13).ok_or(FatError::InvalidBpb)?);
        let reserved = u32::from(field16(14)?);
        let fats = u32::from(u8_at(boot_sector, 16).ok_or(FatError::InvalidBpb)?);
        let root_entries = u32::from(field16(17)?);
        let total = match field16(19)? {
            0 => field32(32)?,
            n => u32::from(n),
        };
        let fat16_size = u32::from(field16(22)?);
        let fat_size = if fat16_size == 0 { field32(36)? } else { fat16_size };

        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() || fats == 0 {
            return Err(FatError::InvalidBpb);
        }

        let root_dir_sectors = (root_entries * DIR_ENTRY_SIZE as u32).div_ceil(SECTOR_SIZE as u32);
        let root_dir_start = fats
            .checked_mul(fat_size)
            .and_then(|s| s.checked_add(reserved))
            .ok_or(FatError::InvalidBpb)?;
        let data_start = root_dir_start
            .checked_add(root_dir_sectors)
            .ok_or(FatError::InvalidBpb)?;
        let cluster_count = total
            .checked_sub(data_start)
            .ok_or(FatError::InvalidBpb)?
            / sectors_per_cluster;

        let kind = if fat16_size == 0 {
            FatKind::Fat32
        } else if cluster_count < 4085 {
            FatKind::Fat12
        } else {
            FatKind::Fat16
        };

        let volume = Self {
            start_lba,
            kind,
            sectors_per_cluster,
            fat_start: reserved,
            root_dir_start,
            root_dir_sectors,
            data_start,
            root_cluster: if kind == FatKind::Fat32 { field32(44)? } else { 0 },
            cluster_count,
        };
        log::debug!(
            "{kind:?} volume at LBA {start_lba}: {cluster_count} clusters of {sectors_per_cluster} sectors, data at +{data_start}"
        );
        Ok(Some(volume))
    }

    #[must_use]
    pub const fn kind(&self) -> FatKind {
        self.kind
    }

    const fn cluster_bytes(&self) -> usize {
        self.sectors_per_cluster as usize * SECTOR_SIZE
    }

    fn cluster_lba(&self, cluster: u32) -> Result<u64, FatError> {
        if cluster < 2 || cluster - 2 >= self.cluster_count {
            return Err(FatError::BadCluster(cluster));
        }
        Ok(self.start_lba
            + u64::from(self.data_start)
            + u64::from(cluster - 2) * u64::from(self.sectors_per_cluster))
    }

    /// Follows the FAT one link. `None` at the end of the chain.
    ///
    /// # Errors
    /// Read failures, or a link to a free, bad or out of range cluster.
    pub fn next_cluster<D: BlockDevice>(
        &self,
        device: &mut D,
        cluster: u32,
    ) -> Result<Option<u32>, BootError> {
        self.cluster_lba(cluster)?;
        let index = cluster as usize;
        let offset = match self.kind {
            FatKind::Fat12 => index + index / 2,
            FatKind::Fat16 => index * 2,
            FatKind::Fat32 => index * 4,
        };
        let lba = self.start_lba + u64::from(self.fat_start) + (offset / SECTOR_SIZE) as u64;
        let within = offset % SECTOR_SIZE;

        // FAT12 entries may straddle two sectors.
        let mut sectors = [0u8; 2 * SECTOR_SIZE];
        let needed = if within + 4 > SECTOR_SIZE { 2 } else { 1 };
        device.read_sectors(lba, &mut sectors[..needed * SECTOR_SIZE])?;

        let bad = FatError::BadCluster(cluster);
        let (next, end_of_chain) = match self.kind {
            FatKind::Fat12 => {
                let raw = u32::from(u16_at(&sectors, within).ok_or(bad)?);
                let value = if cluster & 1 == 1 { raw >> 4 } else { raw & 0xFFF };
                (value, 0xFF8)
            }
            FatKind::Fat16 => (u32::from(u16_at(&sectors, within).ok_or(bad)?), 0xFFF8),
            FatKind::Fat32 => (u32_at(&sectors, within).ok_or(bad)? & 0x0FFF_FFFF, 0x0FFF_FFF8),
        };

        if next >= end_of_chain {
            Ok(None)
        } else if next < 2 || next - 2 >= self.cluster_count {
            Err(FatError::BadCluster(next).into())
        } else {
            Ok(Some(next))
        }
    }

    /// Calls `visit` with the LBA of each sector of `dir` until it breaks.
    fn walk_directory<D, F>(&self, device: &mut D, dir: Directory, mut visit: F) -> Result<(), BootError>
    where
        D: BlockDevice,
        F: FnMut(&mut D, u64) -> Result<ControlFlow<()>, BootError>,
    {
        let first_cluster = match (dir, self.kind) {
            (Directory::Root, FatKind::Fat32) => self.root_cluster,
            (Directory::Cluster(cluster), _) => cluster,
            (Directory::Root, _) => {
                let start = self.start_lba + u64::from(self.root_dir_start);
                for lba in start..start + u64::from(self.root_dir_sectors) {
                    if visit(&mut *device, lba)?.is_break() {
                        break;
                    }
                }
                return Ok(());
            }
        };

        let mut cluster = first_cluster;
        for _ in 0..=self.cluster_count {
            let lba = self.cluster_lba(cluster)?;
            for sector in 0..u64::from(self.sectors_per_cluster) {
                if visit(&mut *device, lba + sector)?.is_break() {
                    return Ok(());
                }
            }
            match self.next_cluster(device, cluster)? {
                Some(next) => cluster = next,
                None => return Ok(()),
            }
        }
        Err(FatError::ChainLoop(first_cluster).into())
    }

    /// Looks up an 8.3 name, space padded to 11 bytes, in `dir`.
    ///
    /// # Errors
    /// Read failures or a broken directory chain.
    pub fn find<D: BlockDevice>(
        &self,
        device: &mut D,
        dir: Directory,
        name: &[u8; 11],
    ) -> Result<Option<DirEntry>, BootError> {
        let mut found = None;
        let mut sector = [0u8; SECTOR_SIZE];
        self.walk_directory(device, dir, |device, lba| {
            device.read_sectors(lba, &mut sector)?;
            for raw in sector.chunks_exact(DIR_ENTRY_SIZE) {
                match raw[0] {
                    0 => return Ok(ControlFlow::Break(())),
                    DELETED => continue,
                    _ => {}
                }
                let attributes = raw[11];
                if attributes == ATTR_LONG_NAME || attributes & ATTR_VOLUME_ID != 0 {
                    continue;
                }
                if raw[..11] == name[..] {
                    found = DirEntry::parse(raw);
                    return Ok(ControlFlow::Break(()));
                }
            }
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(found)
    }

    /// Reads a whole file into freshly claimed pages by following its cluster chain.
    ///
    /// # Errors
    /// Read failures, exhausted pages, or a chain shorter than the file.
    pub fn read_file<'m, D, P>(
        &self,
        device: &mut D,
        entry: &DirEntry,
        pages: &mut P,
    ) -> Result<&'m [u8], BootError>
    where
        D: BlockDevice,
        P: PageSource<'m>,
    {
        let size = entry.size as usize;
        if size == 0 {
            return Ok(&[]);
        }
        let buf = pages.claim_bytes(size)?;
        let mut scratch = [0u8; SECTOR_SIZE];
        let mut offset = 0;
        let mut cluster = entry.first_cluster;

        for _ in 0..=self.cluster_count {
            let lba = self.cluster_lba(cluster)?;
            let in_cluster = self.cluster_bytes().min(size - offset);
            for sector in 0..in_cluster.div_ceil(SECTOR_SIZE) {
                let lba = lba + sector as u64;
                let remaining = size - offset;
                if remaining >= SECTOR_SIZE {
                    device.read_sectors(lba, &mut buf[offset..offset + SECTOR_SIZE])?;
                    offset += SECTOR_SIZE;
                } else {
                    device.read_sectors(lba, &mut scratch)?;
                    buf[offset..].copy_from_slice(&scratch[..remaining]);
                    offset = size;
                }
            }
            if offset == size {
                return Ok(buf);
            }
            cluster = self
                .next_cluster(device, cluster)?
                .ok_or(FatError::ShortChain(entry.size))?;
        }
        Err(FatError::ChainLoop(entry.first_cluster).into())
    }
}
