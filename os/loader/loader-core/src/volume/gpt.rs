//! Boot partition selection over the GUID partition table.
//!
//! Header and entry decoding is `gpt_disk_io`'s; this module only ranks the
//! entries.

use crate::arch::Architecture;
use crate::device::{BlockDevice, SECTOR_SIZE, SectorIo};
use crate::error::DeviceError;
use gpt_disk_io::{Disk, DiskError};
use gpt_disk_types::{GptPartitionEntry, GptPartitionType, Guid};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GptError {
    #[error("no GPT signature at LBA 1")]
    MissingSignature,
    #[error("unsupported partition entry size {0}")]
    EntrySize(u32),
    #[error("the partition entry array does not fit the device's blocks")]
    EntryArray,
    #[error("partition {index} ends before it starts")]
    InvalidRange { index: usize },
}

impl From<DiskError<DeviceError>> for DeviceError {
    fn from(e: DiskError<DeviceError>) -> Self {
        match e {
            DiskError::Io(e) => e,
            _ => GptError::EntryArray.into(),
        }
    }
}

/// An OS/Z root partition type: `"OS/Z"`, the COFF machine code, and `"root"` in the last four bytes.
#[must_use]
pub const fn os_z_root(arch: Architecture) -> GptPartitionType {
    let machine = arch.pe_machine().to_le_bytes();
    GptPartitionType(Guid::from_bytes([
        b'O', b'S', b'/', b'Z', machine[0], machine[1], 0, 0, 0, 0, 0, 0, b'r', b'o', b'o', b't',
    ]))
}

fn is_os_z_root(kind: GptPartitionType, arch: Architecture) -> bool {
    let tag = os_z_root(arch).0.to_bytes();
    let bytes = kind.0.to_bytes();
    bytes[..6] == tag[..6] && bytes[12..] == tag[12..]
}

/// Selection class: lower wins. `None` if the entry does not qualify at all.
#[must_use]
pub fn boot_priority(entry: &GptPartitionEntry, arch: Architecture) -> Option<u8> {
    let kind = entry.partition_type_guid;
    if !entry.is_used() {
        None
    } else if kind == GptPartitionType::EFI_SYSTEM {
        Some(0)
    } else if entry.attributes.legacy_bios_bootable() {
        Some(1)
    } else if is_os_z_root(kind, arch) {
        Some(2)
    } else {
        None
    }
}

/// The partition the loader boots from.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootPartition {
    /// Position in the partition entry array.
    pub index: usize,
    pub kind: GptPartitionType,
    pub first_lba: u64,
    /// Inclusive.
    pub last_lba: u64,
}

impl BootPartition {
    #[must_use]
    pub const fn sectors(&self) -> u64 {
        self.last_lba - self.first_lba + 1
    }
}

/// Picks the boot partition: an EFI system partition, else a legacy bootable
/// one, else an OS/Z root for `arch`. Ties go to the earlier table entry.
///
/// # Errors
/// * [`GptError::MissingSignature`] if LBA 1 holds no GPT header,
/// * [`GptError::EntrySize`] or [`GptError::EntryArray`] for an unreadable entry array,
/// * [`GptError::InvalidRange`] if the selected entry ends before it starts,
/// * device read failures.
pub fn select_boot_partition<D: BlockDevice + ?Sized>(
    device: &mut D,
    arch: Architecture,
) -> Result<Option<BootPartition>, DeviceError> {
    let mut disk = Disk::new(SectorIo::new(device))?;
    let mut block = [0u8; SECTOR_SIZE];

    let header = disk.read_primary_gpt_header(&mut block)?;
    if !header.is_signature_valid() {
        return Err(GptError::MissingSignature.into());
    }
    let layout = header
        .get_partition_entry_array_layout()
        .map_err(|_| GptError::EntrySize(header.size_of_partition_entry.to_u32()))?;

    let mut best: Option<(u8, usize, GptPartitionEntry)> = None;
    for (index, entry) in disk.gpt_partition_entry_array_iter(layout, &mut block)?.enumerate() {
        let entry = entry?;
        let Some(priority) = boot_priority(&entry, arch) else {
            continue;
        };
        if best.as_ref().is_none_or(|(p, _, _)| priority < *p) {
            log::debug!(
                "GPT entry {index} qualifies with priority {priority}: type {}, LBA {}..={}",
                { entry.partition_type_guid.0 },
                entry.starting_lba.to_u64(),
                entry.ending_lba.to_u64()
            );
            best = Some((priority, index, entry));
        }
        if priority == 0 {
            break;
        }
    }

    let Some((_, index, entry)) = best else {
        return Ok(None);
    };
    let (first_lba, last_lba) = (entry.starting_lba.to_u64(), entry.ending_lba.to_u64());
    if last_lba < first_lba {
        return Err(GptError::InvalidRange { index }.into());
    }
    Ok(Some(BootPartition {
        index,
        kind: entry.partition_type_guid,
        first_lba,
        last_lba,
    }))
}
