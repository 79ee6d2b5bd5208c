use crate::{ENTRIES_PER_TABLE, FrameAlloc, PagingError, PhysicalAddress};

/// One 4 KiB page table frame.
#[repr(C, align(4096))]
#[derive(Clone)]
pub struct PageFrame {
    entries: [u64; ENTRIES_PER_TABLE],
}

impl PageFrame {
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [0; ENTRIES_PER_TABLE],
        }
    }

    #[inline(always)]
    #[must_use]
    pub const fn entry(&self, index: usize) -> u64 {
        self.entries[index]
    }

    #[inline(always)]
    pub const fn set_entry(&mut self, index: usize, value: u64) {
        self.entries[index] = value;
    }

    fn clear(&mut self) {
        self.entries.fill(0);
    }
}

/// A bump allocator over statically reserved page table frames.
///
/// Frames are identified by their physical address, which is the address the
/// loader sees them at: firmware and bare-metal alike run identity mapped.
/// Only frames that have been handed out can be resolved back into tables.
pub struct FramePool<'p> {
    frames: &'p mut [PageFrame],
    used: usize,
}

impl<'p> FramePool<'p> {
    pub const fn new(frames: &'p mut [PageFrame]) -> Self {
        Self { frames, used: 0 }
    }

    #[must_use]
    pub fn base(&self) -> PhysicalAddress {
        PhysicalAddress::from_ptr(self.frames.as_ptr())
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Bytes covered by the whole backing store, handed out or not.
    #[must_use]
    pub const fn span(&self) -> u64 {
        (self.frames.len() * size_of::<PageFrame>()) as u64
    }

    fn index_of(&self, table: PhysicalAddress) -> Result<usize, PagingError> {
        let foreign = PagingError::ForeignTable(table.as_u64());
        let offset = table
            .as_u64()
            .checked_sub(self.base().as_u64())
            .ok_or(foreign)?;
        if offset % size_of::<PageFrame>() as u64 != 0 {
            return Err(foreign);
        }
        let index = usize::try_from(offset / size_of::<PageFrame>() as u64).map_err(|_| foreign)?;
        if index < self.used { Ok(index) } else { Err(foreign) }
    }

    /// Resolves a table handed out earlier.
    ///
    /// # Errors
    /// [`PagingError::ForeignTable`] for any address that is not an allocated frame.
    pub fn table(&self, table: PhysicalAddress) -> Result<&PageFrame, PagingError> {
        let index = self.index_of(table)?;
        Ok(&self.frames[index])
    }

    /// Resolves a table handed out earlier, for writing.
    ///
    /// # Errors
    /// [`PagingError::ForeignTable`] for any address that is not an allocated frame.
    pub fn table_mut(&mut self, table: PhysicalAddress) -> Result<&mut PageFrame, PagingError> {
        let index = self.index_of(table)?;
        Ok(&mut self.frames[index])
    }
}

impl FrameAlloc for FramePool<'_> {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        let frame = self.frames.get_mut(self.used)?;
        frame.clear();
        let pa = PhysicalAddress::from_ptr(core::ptr::from_ref(frame));
        self.used += 1;
        Some(pa)
    }
}
