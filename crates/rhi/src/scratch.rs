//! Paged bump allocator for inline command data (uploads, push constants).

use serde::{Deserialize, Serialize};

use crate::error::{RhiError, RhiResult};

/// Location of bytes stored in a [`ScratchAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScratchSlice {
    pub page: u32,
    pub offset: u32,
    pub len: u32,
}

/// Append-only byte pages owned by a command buffer.
///
/// Allocations never move once written; a request larger than the page size gets a
/// dedicated page.
#[derive(Debug)]
pub struct ScratchAllocator {
    pages: Vec<Vec<u8>>,
    page_size: usize,
    allocated: usize,
}

impl ScratchAllocator {
    pub const DEFAULT_PAGE_SIZE: usize = 64 * 1024;

    pub const fn new(page_size: usize) -> Self {
        Self {
            pages: Vec::new(),
            page_size,
            allocated: 0,
        }
    }

    /// Copy `bytes` into scratch memory.
    ///
    /// # Errors
    /// Returns [`RhiError::OutOfMemory`] if the data cannot be addressed by a [`ScratchSlice`].
    pub fn push(&mut self, bytes: &[u8]) -> RhiResult<ScratchSlice> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| RhiError::OutOfMemory(format!("{} byte scratch allocation", bytes.len())))?;
        let fits = self
            .pages
            .last()
            .is_some_and(|page| page.capacity() - page.len() >= bytes.len());
        if !fits {
            self.pages
                .push(Vec::with_capacity(self.page_size.max(bytes.len())));
        }
        let page_index = self.pages.len() - 1;
        let page = &mut self.pages[page_index];
        let offset = page.len();
        page.extend_from_slice(bytes);
        self.allocated += bytes.len();
        Ok(ScratchSlice {
            page: u32::try_from(page_index)
                .map_err(|_| RhiError::OutOfMemory("scratch page count".into()))?,
            offset: u32::try_from(offset)
                .map_err(|_| RhiError::OutOfMemory("scratch page offset".into()))?,
            len,
        })
    }

    /// Bytes previously stored with [`ScratchAllocator::push`].
    pub fn get(&self, slice: ScratchSlice) -> Option<&[u8]> {
        let start = slice.offset as usize;
        self.pages
            .get(slice.page as usize)?
            .get(start..start + slice.len as usize)
    }

    /// Total bytes handed out.
    #[inline]
    pub const fn allocated(&self) -> usize {
        self.allocated
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn reset(&mut self) {
        self.pages.clear();
        self.allocated = 0;
    }
}

impl Default for ScratchAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_allocations_share_a_page() {
        let mut scratch = ScratchAllocator::new(32);
        let first = scratch.push(&[1, 2, 3]).unwrap();
        let second = scratch.push(&[4, 5]).unwrap();
        assert_eq!(first.page, second.page);
        assert_eq!(second.offset, 3);
        assert_eq!(scratch.get(second).unwrap(), &[4, 5]);
    }

    #[test]
    fn oversized_allocation_gets_own_page() {
        let mut scratch = ScratchAllocator::new(4);
        scratch.push(&[0; 3]).unwrap();
        let big = scratch.push(&[9; 10]).unwrap();
        assert_eq!(big.page, 1);
        assert_eq!(scratch.get(big).unwrap().len(), 10);
        assert_eq!(scratch.allocated(), 13);
    }

    #[test]
    fn reset_drops_pages() {
        let mut scratch = ScratchAllocator::default();
        let slice = scratch.push(b"abc").unwrap();
        scratch.reset();
        assert!(scratch.get(slice).is_none());
        assert_eq!(scratch.page_count(), 0);
    }
}
