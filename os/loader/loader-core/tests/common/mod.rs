//! Disk, archive and image builders shared by the pipeline tests.

#![allow(dead_code, clippy::cast_possible_truncation)]

use loader_core::error::FirmwareError;
use loader_core::{ExitError, FirmwareExit, MapKey, MemoryMapBuilder, SECTOR_SIZE};
use loader_protocol::boot::MemoryKind;

pub const ESP_TYPE: [u8; 16] = [
    0x28, 0x73, 0x2A, 0xC1, 0x1F, 0xF8, 0xD2, 0x11, 0xBA, 0x4B, 0x00, 0xA0, 0xC9, 0x3E, 0xC9, 0x3B,
];

/// Microsoft basic data; never selected for booting.
pub const BASIC_DATA_TYPE: [u8; 16] = [
    0xA2, 0xA0, 0xD0, 0xEB, 0xE5, 0xB9, 0x33, 0x44, 0x87, 0xC0, 0x68, 0xB6, 0xB7, 0x26, 0x99, 0xC7,
];

pub fn os_z_root_type(machine: u16) -> [u8; 16] {
    let m = machine.to_le_bytes();
    [b'O', b'S', b'/', b'Z', m[0], m[1], 0, 0, 0, 0, 0, 0, b'r', b'o', b'o', b't']
}

/// A GPT disk with 128 entries at LBA 2 and each partition placed back to back from LBA 64.
pub fn gpt_disk(partitions: &[([u8; 16], &[u8])]) -> Vec<u8> {
    const FIRST_LBA: usize = 64;
    let mut disk = vec![0u8; FIRST_LBA * SECTOR_SIZE];
    disk[510] = 0x55;
    disk[511] = 0xAA;

    let header = &mut disk[SECTOR_SIZE..2 * SECTOR_SIZE];
    header[..8].copy_from_slice(b"EFI PART");
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&128u32.to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());

    let mut lba = FIRST_LBA;
    for (index, (type_guid, contents)) in partitions.iter().enumerate() {
        let sectors = contents.len().div_ceil(SECTOR_SIZE).max(1);
        let at = 2 * SECTOR_SIZE + index * 128;
        disk[at..at + 16].copy_from_slice(type_guid);
        disk[at + 16] = index as u8 + 1;
        disk[at + 32..at + 40].copy_from_slice(&(lba as u64).to_le_bytes());
        disk[at + 40..at + 48].copy_from_slice(&((lba + sectors - 1) as u64).to_le_bytes());

        disk.extend_from_slice(contents);
        disk.resize((lba + sectors) * SECTOR_SIZE, 0);
        lba += sectors;
    }
    disk
}

/// FAT32 with one sector clusters, root directory at cluster 2, files stored contiguously.
pub struct Fat32 {
    clusters: Vec<[u8; SECTOR_SIZE]>,
    fat: Vec<u32>,
}

impl Fat32 {
    pub const ROOT: u32 = 2;
    const RESERVED: usize = 32;
    const EOC: u32 = 0x0FFF_FFFF;

    pub fn new() -> Self {
        Self {
            clusters: vec![[0; SECTOR_SIZE]],
            fat: vec![0x0FFF_FFF8, Self::EOC, Self::EOC],
        }
    }

    fn allocate(&mut self, data: &[u8]) -> u32 {
        let first = self.clusters.len() as u32 + 2;
        let count = data.len().div_ceil(SECTOR_SIZE).max(1);
        for i in 0..count {
            let mut cluster = [0u8; SECTOR_SIZE];
            let chunk = data.get(i * SECTOR_SIZE..).unwrap_or_default();
            let n = chunk.len().min(SECTOR_SIZE);
            cluster[..n].copy_from_slice(&chunk[..n]);
            self.clusters.push(cluster);
            let this = first + i as u32;
            self.fat.push(if i + 1 == count { Self::EOC } else { this + 1 });
        }
        first
    }

    fn add_entry(&mut self, dir: u32, name: &[u8; 11], attributes: u8, cluster: u32, size: u32) {
        let sector = &mut self.clusters[(dir - 2) as usize];
        let slot = sector
            .chunks_exact_mut(32)
            .find(|e| e[0] == 0)
            .expect("directory has a free slot");
        slot[..11].copy_from_slice(name);
        slot[11] = attributes;
        slot[20..22].copy_from_slice(&((cluster >> 16) as u16).to_le_bytes());
        slot[26..28].copy_from_slice(&(cluster as u16).to_le_bytes());
        slot[28..32].copy_from_slice(&size.to_le_bytes());
    }

    pub fn mkdir(&mut self, parent: u32, name: &[u8; 11]) -> u32 {
        let cluster = self.allocate(&[]);
        self.add_entry(parent, name, 0x10, cluster, 0);
        cluster
    }

    pub fn add_file(&mut self, dir: u32, name: &[u8; 11], data: &[u8]) {
        let cluster = self.allocate(data);
        self.add_entry(dir, name, 0x20, cluster, data.len() as u32);
    }

    pub fn image(&self) -> Vec<u8> {
        let fat_sectors = (self.fat.len() * 4).div_ceil(SECTOR_SIZE);
        let total = Self::RESERVED + 2 * fat_sectors + self.clusters.len();

        let mut image = vec![0u8; Self::RESERVED * SECTOR_SIZE];
        let bs = &mut image[..SECTOR_SIZE];
        bs[11..13].copy_from_slice(&(SECTOR_SIZE as u16).to_le_bytes());
        bs[13] = 1;
        bs[14..16].copy_from_slice(&(Self::RESERVED as u16).to_le_bytes());
        bs[16] = 2;
        bs[21] = 0xF8;
        bs[32..36].copy_from_slice(&(total as u32).to_le_bytes());
        bs[36..40].copy_from_slice(&(fat_sectors as u32).to_le_bytes());
        bs[44..48].copy_from_slice(&Self::ROOT.to_le_bytes());
        bs[0x52..0x5A].copy_from_slice(b"FAT32   ");
        bs[510] = 0x55;
        bs[511] = 0xAA;

        let mut fat = vec![0u8; fat_sectors * SECTOR_SIZE];
        for (i, link) in self.fat.iter().enumerate() {
            fat[i * 4..i * 4 + 4].copy_from_slice(&link.to_le_bytes());
        }
        image.extend_from_slice(&fat);
        image.extend_from_slice(&fat);
        for cluster in &self.clusters {
            image.extend_from_slice(cluster);
        }
        image
    }
}

pub fn ustar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, data) in members {
        let mut header = [0u8; 512];
        header[..name.len()].copy_from_slice(name.as_bytes());
        header[124..135].copy_from_slice(format!("{:011o}", data.len()).as_bytes());
        header[156] = b'0';
        header[257..263].copy_from_slice(b"ustar\0");
        out.extend_from_slice(&header);
        out.extend_from_slice(data);
        out.resize(out.len().next_multiple_of(512), 0);
    }
    out.resize(out.len() + 1024, 0);
    out
}

pub fn newc(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut push = |name: &str, data: &[u8]| {
        out.extend_from_slice(b"070701");
        for field in 0..13 {
            let value = match field {
                6 => data.len(),
                11 => name.len() + 1,
                _ => 0,
            };
            out.extend_from_slice(format!("{value:08x}").as_bytes());
        }
        out.extend_from_slice(name.as_bytes());
        out.push(0);
        out.resize(out.len().next_multiple_of(4), 0);
        out.extend_from_slice(data);
        out.resize(out.len().next_multiple_of(4), 0);
    };
    for (name, data) in members {
        push(name, data);
    }
    push("TRAILER!!!", &[]);
    out
}

/// A minimal ELF64 with one loadable segment at file offset zero.
pub fn elf(machine: u16, entry: u64, filesz: usize) -> Vec<u8> {
    let mut image = vec![0u8; filesz.max(120)];
    image[..4].copy_from_slice(b"\x7fELF");
    image[4] = 2;
    image[5] = 1;
    image[6] = 1;
    image[16..18].copy_from_slice(&2u16.to_le_bytes());
    image[18..20].copy_from_slice(&machine.to_le_bytes());
    image[24..32].copy_from_slice(&entry.to_le_bytes());
    image[32..40].copy_from_slice(&64u64.to_le_bytes());
    image[54..56].copy_from_slice(&56u16.to_le_bytes());
    image[56..58].copy_from_slice(&1u16.to_le_bytes());

    let ph = &mut image[64..120];
    ph[..4].copy_from_slice(&1u32.to_le_bytes());
    ph[16..24].copy_from_slice(&(entry & !0xFFF).to_le_bytes());
    ph[32..40].copy_from_slice(&(filesz as u64).to_le_bytes());
    ph[40..48].copy_from_slice(&(filesz as u64).to_le_bytes());
    image
}

const LENGTH_BASE: [usize; 29] = [
    3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115, 131,
    163, 195, 227, 258,
];
const LENGTH_EXTRA: [u32; 29] = [
    0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0,
];

#[derive(Default)]
struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    count: u32,
}

impl BitWriter {
    fn bits(&mut self, value: u32, count: u32) {
        self.acc |= value << self.count;
        self.count += count;
        while self.count >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.count -= 8;
        }
    }

    /// Huffman codes go most significant bit first.
    fn code(&mut self, value: u32, len: u32) {
        for i in (0..len).rev() {
            self.bits((value >> i) & 1, 1);
        }
    }

    fn symbol(&mut self, symbol: u32) {
        match symbol {
            0..=143 => self.code(0x30 + symbol, 8),
            144..=255 => self.code(0x190 + symbol - 144, 9),
            256..=279 => self.code(symbol - 256, 7),
            _ => self.code(0xC0 + symbol - 280, 8),
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.count > 0 {
            self.out.push(self.acc as u8);
        }
        self.out
    }
}

/// Gzip with a single fixed Huffman block that only encodes byte runs,
/// as distance one matches. Enough to shrink zero padding.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut w = BitWriter::default();
    w.bits(1, 1);
    w.bits(1, 2);
    let mut i = 0;
    while i < data.len() {
        let run = if i == 0 {
            0
        } else {
            data[i..]
                .iter()
                .take(258)
                .take_while(|&&b| b == data[i - 1])
                .count()
        };
        if run >= 3 {
            let index = LENGTH_BASE.iter().rposition(|&base| base <= run).unwrap_or(0);
            w.symbol(257 + index as u32);
            w.bits((run - LENGTH_BASE[index]) as u32, LENGTH_EXTRA[index]);
            w.code(0, 5);
            i += run;
        } else {
            w.symbol(u32::from(data[i]));
            i += 1;
        }
    }
    w.symbol(256);

    let mut out = vec![0x1f, 0x8b, 8, 0, 0, 0, 0, 0, 0, 3];
    out.extend_from_slice(&w.finish());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out
}

/// Firmware that reports a fixed map and makes the first `stale_exits` exits fail.
pub struct ScriptedFirmware {
    pub regions: Vec<(u64, u64, MemoryKind)>,
    pub stale_exits: usize,
    pub exits: usize,
}

impl FirmwareExit for ScriptedFirmware {
    fn snapshot(&mut self, map: &mut MemoryMapBuilder) -> Result<MapKey, FirmwareError> {
        for &(base, len, kind) in &self.regions {
            map.push(base, len, kind);
        }
        Ok(MapKey(self.exits as u64))
    }

    fn exit(&mut self, _key: MapKey, _map: &mut MemoryMapBuilder) -> Result<(), ExitError> {
        self.exits += 1;
        if self.stale_exits > 0 {
            self.stale_exits -= 1;
            return Err(ExitError::StaleKey);
        }
        Ok(())
    }
}
