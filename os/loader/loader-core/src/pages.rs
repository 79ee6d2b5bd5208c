//! Page granular buffers that live until the kernel takes over.

use crate::error::ResourceError;
use loader_protocol::memory::PAGE_SIZE;

/// Hands out zeroed, page aligned buffers that are never freed.
///
/// UEFI backs this with `AllocatePages`; bare-metal platforms with a fixed
/// arena after the loader image.
pub trait PageSource<'m> {
    /// Claims `count` consecutive pages.
    ///
    /// # Errors
    /// [`ResourceError::OutOfPages`] when the request cannot be satisfied.
    fn claim(&mut self, count: usize) -> Result<&'m mut [u8], ResourceError>;

    /// Claims enough pages to hold `bytes`, returning exactly `bytes` long a slice.
    ///
    /// # Errors
    /// See [`PageSource::claim`].
    fn claim_bytes(&mut self, bytes: usize) -> Result<&'m mut [u8], ResourceError> {
        let buf = self.claim(bytes.div_ceil(PAGE_SIZE).max(1))?;
        Ok(&mut buf[..bytes])
    }
}

/// A bump allocator over one contiguous arena.
pub struct BumpPages<'m> {
    arena: &'m mut [u8],
    claimed_pages: usize,
}

impl<'m> BumpPages<'m> {
    /// Uses `arena` from its first page boundary on.
    #[must_use]
    pub fn new(arena: &'m mut [u8]) -> Self {
        let misalignment = arena.as_ptr() as usize % PAGE_SIZE;
        let skip = if misalignment == 0 {
            0
        } else {
            (PAGE_SIZE - misalignment).min(arena.len())
        };
        let (_, arena) = arena.split_at_mut(skip);
        Self {
            arena,
            claimed_pages: 0,
        }
    }

    /// Pages handed out so far.
    #[must_use]
    pub const fn claimed_pages(&self) -> usize {
        self.claimed_pages
    }

    #[must_use]
    pub const fn remaining_pages(&self) -> usize {
        self.arena.len() / PAGE_SIZE
    }
}

impl<'m> PageSource<'m> for BumpPages<'m> {
    fn claim(&mut self, count: usize) -> Result<&'m mut [u8], ResourceError> {
        let out_of_pages = ResourceError::OutOfPages { requested: count };
        let bytes = count.checked_mul(PAGE_SIZE).ok_or(out_of_pages)?;
        if bytes > self.arena.len() {
            return Err(out_of_pages);
        }
        let arena = core::mem::take(&mut self.arena);
        let (head, tail) = arena.split_at_mut(bytes);
        self.arena = tail;
        self.claimed_pages += count;
        head.fill(0);
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_page_aligned_and_disjoint() {
        let mut backing = vec![0xFFu8; 5 * PAGE_SIZE];
        let mut pages = BumpPages::new(&mut backing);
        let available = pages.remaining_pages();
        assert!(available >= 4);

        let a = pages.claim(1).expect("first");
        let a_addr = a.as_ptr() as usize;
        let b = pages.claim_bytes(PAGE_SIZE + 1).expect("second");
        assert_eq!(b.len(), PAGE_SIZE + 1);
        assert!(b.iter().all(|&x| x == 0));
        assert_eq!(a_addr % PAGE_SIZE, 0);
        assert_eq!(b.as_ptr() as usize, a_addr + PAGE_SIZE);
        assert_eq!(pages.claimed_pages(), 3);

        assert_eq!(
            pages.claim(available).err(),
            Some(ResourceError::OutOfPages { requested: available })
        );
    }
}
