//! Ramdisk filesystem dispatch.
//!
//! The kernel ships inside the ramdisk, in whatever archive format the OS
//! image tooling produced. Each supported format is an [`ArchiveReader`]; the first
//! that recognizes the image and finds the path wins. When nothing matches,
//! [`scan_for_executable`] looks for a bare ELF or PE image instead.

mod cpio;
mod tar;

use crate::arch::Architecture;
use crate::image;

/// Looks `path` up in `image`, returning the file's bytes.
/// `None` if the image is not in this format or has no such file.
pub type ArchiveReader = for<'a> fn(image: &'a [u8], path: &str) -> Option<&'a [u8]>;

/// Readers in the order they are tried.
pub static READERS: [(&str, ArchiveReader); 3] = [
    ("ustar", tar::locate),
    ("cpio odc", cpio::locate_odc),
    ("cpio newc", cpio::locate_newc),
];

/// Finds a file by path in the ramdisk. Empty files count as absent.
#[must_use]
pub fn locate<'a>(image: &'a [u8], path: &str) -> Option<&'a [u8]> {
    READERS.iter().find_map(|(name, read)| {
        let found = read(image, path).filter(|data| !data.is_empty())?;
        log::debug!("Found {path} via {name}: {} bytes", found.len());
        Some(found)
    })
}

/// Scans `image` byte by byte for the first native executable header.
/// Returns the image from that header to the end.
#[must_use]
pub fn scan_for_executable(image: &[u8], arch: Architecture) -> Option<&[u8]> {
    let offset = (0..image.len()).find(|&at| image::has_signature(&image[at..], arch))?;
    log::debug!("Executable signature found at ramdisk offset {offset:#x}");
    Some(&image[offset..])
}

/// Archive member names may carry a leading `./`.
fn name_matches(name: &[u8], path: &str) -> bool {
    name.strip_prefix(b"./").unwrap_or(name) == path.as_bytes()
}

#[cfg(test)]
pub(crate) mod test_support {
    /// A ustar archive of `(name, contents)` members.
    pub fn ustar(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, data) in members {
            let mut header = [0u8; 512];
            header[..name.len()].copy_from_slice(name.as_bytes());
            let size = format!("{:011o}", data.len());
            header[124..135].copy_from_slice(size.as_bytes());
            header[156] = b'0';
            header[257..263].copy_from_slice(b"ustar\0");
            header[263..265].copy_from_slice(b"00");
            out.extend_from_slice(&header);
            out.extend_from_slice(data);
            out.resize(out.len().next_multiple_of(512), 0);
        }
        out.resize(out.len() + 1024, 0);
        out
    }

    /// A `070701` cpio archive.
    pub fn newc(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let trailer: (&str, &[u8]) = ("TRAILER!!!", &[]);
        for (name, data) in members.iter().chain(core::iter::once(&trailer)) {
            out.extend_from_slice(b"070701");
            for field in 0..13usize {
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
        }
        out
    }

    /// A `070707` cpio archive.
    pub fn odc(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let trailer: (&str, &[u8]) = ("TRAILER!!!", &[]);
        for (name, data) in members.iter().chain(core::iter::once(&trailer)) {
            out.extend_from_slice(b"070707");
            out.extend_from_slice(&[b'0'; 53]);
            out.extend_from_slice(format!("{:06o}", name.len() + 1).as_bytes());
            out.extend_from_slice(format!("{:011o}", data.len()).as_bytes());
            out.extend_from_slice(name.as_bytes());
            out.push(0);
            out.extend_from_slice(data);
        }
        out
    }
}
