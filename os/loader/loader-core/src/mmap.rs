//! # Memory Map Builder
//!
//! Turns whatever the platform knows about physical memory into the sorted,
//! non-overlapping, coalesced list the handoff page carries.
//!
//! Usable ranges are clipped against the structures the loader keeps alive
//! (handoff and environment pages, ramdisk, kernel, page tables, stack): the
//! clipped parts are reported as [`MemoryKind::Reserved`] instead. Input may
//! arrive in any order and may overlap; where two reported ranges overlap,
//! the one reported first keeps the overlapping bytes.

use crate::error::ResourceError;
use core::ops::Range;
use loader_protocol::boot::{HandoffPage, MMAP_CAPACITY, MMapEnt, MemoryKind};
use loader_protocol::memory::PAGE_SIZE;

/// How many distinct reserved spans the builder can track.
pub const MAX_RESERVED: usize = 32;

const PAGE: u64 = PAGE_SIZE as u64;

/// A half open physical address range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u64,
    pub end: u64,
}

impl Span {
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// `len` bytes from `start`, saturating at the top of the address space.
    #[must_use]
    pub const fn from_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// The span covering the bytes of `buf`.
    #[must_use]
    pub fn of(buf: &[u8]) -> Self {
        Self::from_len(buf.as_ptr() as u64, buf.len() as u64)
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Grown to whole pages.
    #[must_use]
    pub const fn page_aligned(&self) -> Self {
        Self {
            start: self.start & !(PAGE - 1),
            end: self.end.saturating_add(PAGE - 1) & !(PAGE - 1),
        }
    }
}

/// One entry of the map being built.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Region {
    pub span: Span,
    pub kind: MemoryKind,
}

impl Region {
    const EMPTY: Self = Self {
        span: Span::new(0, 0),
        kind: MemoryKind::Reserved,
    };

    #[must_use]
    pub const fn to_entry(&self) -> MMapEnt {
        MMapEnt::new(self.span.start, self.span.len(), self.kind)
    }
}

/// Maps a UEFI `EFI_MEMORY_TYPE` onto the handoff's memory kinds.
///
/// Boot services code and data, loader code and data, and conventional
/// memory all become free once the kernel runs.
#[must_use]
pub const fn classify_efi(memory_type: u32) -> MemoryKind {
    match memory_type {
        1..=4 | 7 => MemoryKind::Free,
        9 => MemoryKind::AcpiFree,
        10 => MemoryKind::AcpiNvs,
        11 | 12 => MemoryKind::Mmio,
        _ => MemoryKind::Reserved,
    }
}

pub struct MemoryMapBuilder {
    regions: [Region; MMAP_CAPACITY],
    len: usize,
    /// Sorted, disjoint and page aligned.
    reserved: [Span; MAX_RESERVED],
    reserved_len: usize,
    dropped: usize,
}

impl Default for MemoryMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMapBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [Region::EMPTY; MMAP_CAPACITY],
            len: 0,
            reserved: [Span::new(0, 0); MAX_RESERVED],
            reserved_len: 0,
            dropped: 0,
        }
    }

    /// Marks `span` as in use by the loader, grown to whole pages.
    /// Affects ranges pushed afterwards.
    ///
    /// # Errors
    /// [`ResourceError::TooManyReservations`] when the span cannot be tracked.
    pub fn reserve(&mut self, span: Span) -> Result<(), ResourceError> {
        if span.is_empty() {
            return Ok(());
        }
        let mut span = span.page_aligned();

        // Absorb every reservation that overlaps or touches the new one.
        let first = self.reserved[..self.reserved_len].partition_point(|r| r.end < span.start);
        let mut last = first;
        while last < self.reserved_len && self.reserved[last].start <= span.end {
            span.start = span.start.min(self.reserved[last].start);
            span.end = span.end.max(self.reserved[last].end);
            last += 1;
        }

        let absorbed = last - first;
        if absorbed == 0 && self.reserved_len == MAX_RESERVED {
            return Err(ResourceError::TooManyReservations);
        }
        if absorbed != 1 {
            self.reserved.copy_within(last..self.reserved_len, first + 1);
            self.reserved_len = self.reserved_len + 1 - absorbed;
        }
        self.reserved[first] = span;
        Ok(())
    }

    /// Returns `span` to the pool of usable memory, grown to whole pages.
    ///
    /// # Errors
    /// [`ResourceError::TooManyReservations`] if this splits a reservation
    /// and there is no room for the second half.
    pub fn release(&mut self, span: Span) -> Result<(), ResourceError> {
        let span = span.page_aligned();
        let mut i = 0;
        while i < self.reserved_len {
            let r = self.reserved[i];
            if !r.overlaps(&span) {
                i += 1;
                continue;
            }
            let below = Span::new(r.start, span.start);
            let above = Span::new(span.end, r.end);
            match (below.is_empty(), above.is_empty()) {
                (true, true) => {
                    self.reserved.copy_within(i + 1..self.reserved_len, i);
                    self.reserved_len -= 1;
                    continue;
                }
                (false, true) => self.reserved[i] = below,
                (true, false) => self.reserved[i] = above,
                (false, false) => {
                    if self.reserved_len == MAX_RESERVED {
                        return Err(ResourceError::TooManyReservations);
                    }
                    self.reserved.copy_within(i + 1..self.reserved_len, i + 2);
                    self.reserved[i] = below;
                    self.reserved[i + 1] = above;
                    self.reserved_len += 1;
                    i += 1;
                }
            }
            i += 1;
        }
        Ok(())
    }

    #[must_use]
    pub fn reserved(&self) -> &[Span] {
        &self.reserved[..self.reserved_len]
    }

    /// Forgets all regions but keeps the reservations.
    pub const fn clear(&mut self) {
        self.len = 0;
        self.dropped = 0;
    }

    /// Adds a region as reported by the platform. Zero length regions are skipped.
    pub fn push(&mut self, base: u64, length: u64, kind: MemoryKind) {
        if length == 0 {
            return;
        }
        let span = Span::from_len(base, length);
        if !kind.is_free() {
            self.insert(span, kind);
            return;
        }

        let mut cursor = span.start;
        for i in 0..self.reserved_len {
            let r = self.reserved[i];
            if r.end <= cursor {
                continue;
            }
            if r.start >= span.end {
                break;
            }
            if r.start > cursor {
                self.insert(Span::new(cursor, r.start), kind);
            }
            self.insert(
                Span::new(cursor.max(r.start), r.end.min(span.end)),
                MemoryKind::Reserved,
            );
            cursor = r.end;
        }
        if cursor < span.end {
            self.insert(Span::new(cursor, span.end), kind);
        }
    }

    /// Inserts the parts of `span` not yet covered by an earlier region.
    fn insert(&mut self, span: Span, kind: MemoryKind) {
        let mut cursor = span.start;
        while cursor < span.end {
            let index = self.regions[..self.len].partition_point(|r| r.span.end <= cursor);
            let next = self.regions[..self.len].get(index).map(|r| r.span);
            if let Some(next) = next
                && next.start <= cursor
            {
                cursor = next.end;
                continue;
            }
            let piece_end = next.map_or(span.end, |n| n.start.min(span.end));
            self.insert_at(index, Span::new(cursor, piece_end), kind);
            cursor = piece_end;
        }
    }

    fn insert_at(&mut self, index: usize, span: Span, kind: MemoryKind) {
        let joins_prev = index > 0
            && self.regions[index - 1].kind == kind
            && self.regions[index - 1].span.end == span.start;
        let joins_next = index < self.len
            && self.regions[index].kind == kind
            && self.regions[index].span.start == span.end;

        match (joins_prev, joins_next) {
            (true, true) => {
                self.regions[index - 1].span.end = self.regions[index].span.end;
                self.regions.copy_within(index + 1..self.len, index);
                self.len -= 1;
            }
            (true, false) => self.regions[index - 1].span.end = span.end,
            (false, true) => self.regions[index].span.start = span.start,
            (false, false) => {
                if self.len == MMAP_CAPACITY {
                    if self.dropped == 0 {
                        log::warn!(
                            "Memory map full at {MMAP_CAPACITY} entries, dropping {:#x}..{:#x} and anything after",
                            span.start,
                            span.end
                        );
                    }
                    self.dropped += 1;
                    return;
                }
                self.regions.copy_within(index..self.len, index + 1);
                self.regions[index] = Region { span, kind };
                self.len += 1;
            }
        }
    }

    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions[..self.len]
    }

    /// Collects the [`MemoryKind::Mmio`] regions, then `extra`, into `out`.
    /// Whatever does not fit `out` is left out with a warning.
    pub fn device_ranges<'o>(
        &self,
        extra: &[Range<u64>],
        out: &'o mut [Range<u64>],
    ) -> &'o [Range<u64>] {
        let capacity = out.len();
        let mmio = self
            .regions()
            .iter()
            .filter(|r| r.kind == MemoryKind::Mmio)
            .map(|r| r.span.start..r.span.end);
        let mut len = 0;
        for range in mmio.chain(extra.iter().cloned()) {
            let Some(slot) = out.get_mut(len) else {
                log::warn!(
                    "Only {capacity} device ranges fit, {:#x}..{:#x} is mapped as normal memory",
                    range.start,
                    range.end
                );
                break;
            };
            *slot = range;
            len += 1;
        }
        &out[..len]
    }

    /// Regions that did not fit the handoff page.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.dropped
    }

    /// Whether `span` lies entirely inside reported regions of `kind`.
    #[must_use]
    pub fn covers(&self, span: Span, kind: MemoryKind) -> bool {
        let mut cursor = span.start;
        for r in self.regions().iter().filter(|r| r.kind == kind) {
            if r.span.contains(cursor) {
                cursor = r.span.end;
            }
            if cursor >= span.end {
                return true;
            }
        }
        span.is_empty()
    }

    /// Copies the map into the handoff page and sets its size.
    pub fn write_into(&self, page: &mut HandoffPage) {
        for (slot, region) in page.mmap.iter_mut().zip(self.regions()) {
            *slot = region.to_entry();
        }
        page.set_entry_count(self.len);
        log::debug!("Memory map has {} entries", self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MemoryKind::{AcpiNvs, Free, Mmio, Reserved};

    fn spans(builder: &MemoryMapBuilder) -> Vec<(u64, u64, MemoryKind)> {
        builder
            .regions()
            .iter()
            .map(|r| (r.span.start, r.span.end, r.kind))
            .collect()
    }

    #[test]
    fn out_of_order_input_is_sorted_and_coalesced() {
        let mut map = MemoryMapBuilder::new();
        map.push(0x20_0000, 0x10_0000, Free);
        map.push(0x0, 0x9_F000, Free);
        map.push(0x10_0000, 0x10_0000, Free);
        map.push(0xFEC0_0000, 0x1000, Mmio);
        map.push(0x9_F000, 0x6_1000, Reserved);
        map.push(0x5000, 0, Free);

        assert_eq!(
            spans(&map),
            vec![
                (0x0, 0x9_F000, Free),
                (0x9_F000, 0x10_0000, Reserved),
                (0x10_0000, 0x30_0000, Free),
                (0xFEC0_0000, 0xFEC0_1000, Mmio),
            ]
        );
    }

    #[test]
    fn overlapping_input_keeps_first_report() {
        let mut map = MemoryMapBuilder::new();
        map.push(0x1000, 0x3000, AcpiNvs);
        map.push(0x0, 0x8000, Free);

        assert_eq!(
            spans(&map),
            vec![(0x0, 0x1000, Free), (0x1000, 0x4000, AcpiNvs), (0x4000, 0x8000, Free)]
        );
    }

    #[test]
    fn device_ranges_list_mmio_then_extras() {
        let mut map = MemoryMapBuilder::new();
        map.push(0x0, 0x8000, Free);
        map.push(0xFED0_0000, 0x1000, Mmio);
        map.push(0xE000_0000, 0x1000_0000, Mmio);
        map.push(0xF000_0000, 0x1000, Reserved);
        let extra = [0xFEE0_0000..0xFEE0_1000];

        let mut out = [const { 0..0 }; 4];
        assert_eq!(
            map.device_ranges(&extra, &mut out),
            &[
                0xE000_0000..0xF000_0000,
                0xFED0_0000..0xFED0_1000,
                0xFEE0_0000..0xFEE0_1000,
            ]
        );

        let mut small = [const { 0..0 }; 1];
        assert_eq!(map.device_ranges(&extra, &mut small), &[0xE000_0000..0xF000_0000]);
    }

    #[test]
    fn free_memory_is_clipped_by_reservations() {
        let mut map = MemoryMapBuilder::new();
        map.reserve(Span::from_len(0x10_0800, 0x1000)).expect("room");
        map.reserve(Span::from_len(0x40_0000, 0x2000)).expect("room");
        map.push(0x10_0000, 0x30_0000, Free);
        map.push(0x40_0000, 0x2000, Mmio);

        assert_eq!(
            spans(&map),
            vec![
                (0x10_0000, 0x10_2000, Reserved),
                (0x10_2000, 0x40_0000, Free),
                (0x40_0000, 0x40_2000, Mmio),
            ]
        );
        assert!(map.covers(Span::from_len(0x10_0800, 0x1000), Reserved));
        assert!(!map.covers(Span::from_len(0x10_0800, 0x1000), Free));
    }

    #[test]
    fn reservations_merge_and_release_splits() {
        let mut map = MemoryMapBuilder::new();
        map.reserve(Span::new(0x1000, 0x3000)).expect("room");
        map.reserve(Span::new(0x5000, 0x6000)).expect("room");
        map.reserve(Span::new(0x2000, 0x5000)).expect("room");
        assert_eq!(map.reserved(), &[Span::new(0x1000, 0x6000)]);

        map.release(Span::new(0x3000, 0x4000)).expect("room");
        assert_eq!(map.reserved(), &[Span::new(0x1000, 0x3000), Span::new(0x4000, 0x6000)]);

        map.release(Span::new(0x0, 0x10000)).expect("room");
        assert!(map.reserved().is_empty());
    }

    #[test]
    fn reservation_table_is_bounded() {
        let mut map = MemoryMapBuilder::new();
        for i in 0..MAX_RESERVED as u64 {
            map.reserve(Span::from_len(i * 0x10000, 0x1000)).expect("room");
        }
        assert_eq!(
            map.reserve(Span::from_len(0x1000_0000, 0x1000)),
            Err(ResourceError::TooManyReservations)
        );
        // Extending an existing one still works.
        assert!(map.reserve(Span::from_len(0x1000, 0x1000)).is_ok());
    }

    #[test]
    fn overflow_drops_silently() {
        let mut map = MemoryMapBuilder::new();
        for i in 0..(MMAP_CAPACITY as u64 + 10) {
            let kind = if i % 2 == 0 { Free } else { Reserved };
            map.push(i * 0x1000, 0x1000, kind);
        }
        assert_eq!(map.regions().len(), MMAP_CAPACITY);
        assert_eq!(map.dropped(), 10);

        let mut page = Box::new(HandoffPage::new());
        map.write_into(&mut page);
        assert_eq!(page.entry_count(), MMAP_CAPACITY);
        assert_eq!(page.header.size as usize, 4096);
        assert_eq!(page.entries()[1].kind(), Reserved);
        assert_eq!(page.entries()[1].base(), 0x1000);
    }

    #[test]
    fn clear_keeps_reservations() {
        let mut map = MemoryMapBuilder::new();
        map.reserve(Span::from_len(0x2000, 0x1000)).expect("room");
        map.push(0, 0x4000, Free);
        map.clear();
        assert!(map.regions().is_empty());
        map.push(0, 0x4000, Free);
        assert_eq!(spans(&map)[1], (0x2000, 0x3000, Reserved));
    }

    #[test]
    fn efi_types() {
        assert_eq!(classify_efi(7), Free);
        assert_eq!(classify_efi(2), Free);
        assert_eq!(classify_efi(0), Reserved);
        assert_eq!(classify_efi(9), MemoryKind::AcpiFree);
        assert_eq!(classify_efi(10), AcpiNvs);
        assert_eq!(classify_efi(11), Mmio);
        assert_eq!(classify_efi(14), Reserved);
    }
}
