//! Copy-on-Write memory page implementation.
//!
//! This module provides [`Page`], a 4 KiB page of guest memory with transparent
//! copy-on-write semantics.
//!
//! # CoW Semantics
//!
//! Each page has an immutable backing buffer (shared via `Arc`) and an optional
//! local buffer for modifications. On first write, the backing is copied to
//! the local buffer, and subsequent reads/writes use the local copy. Freshly
//! zeroed pages all share one process-wide zero backing, so mapping a large
//! stack or heap costs nothing until it is touched.
//!
//! # Fork Support
//!
//! When forking, the current state (backing + local) is consolidated into
//! a new shared backing. Both the original and the fork continue from that
//! backing and copy again on their next write.

use std::sync::{Arc, OnceLock};

use crate::emulation::engine::EmulationError;

/// Standard page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Returns the shared all-zero backing buffer.
fn zero_backing() -> Arc<[u8; PAGE_SIZE]> {
    static ZERO: OnceLock<Arc<[u8; PAGE_SIZE]>> = OnceLock::new();
    ZERO.get_or_init(|| Arc::new([0u8; PAGE_SIZE])).clone()
}

/// A memory page with copy-on-write semantics.
///
/// Pages are the fundamental unit of memory management in the emulator.
/// Reads return data from either the local copy (if modified) or the shared
/// backing, while writes create a local copy on first modification.
///
/// A page belongs to exactly one session; all mutation goes through `&mut self`.
///
/// # Example
///
/// ```rust,ignore
/// use droidemu::emulation::Page;
///
/// let mut page = Page::zeroed();
/// page.write(0, &[42])?;
///
/// let mut forked = page.fork();
/// forked.write(0, &[7])?;
/// assert_eq!(page.read_vec(0, 1)?, vec![42]); // original unchanged
/// ```
#[derive(Debug)]
pub struct Page {
    /// Immutable backing data (from parent or initial load).
    backing: Arc<[u8; PAGE_SIZE]>,
    /// Local copy for modifications (created on first write).
    local: Option<Box<[u8; PAGE_SIZE]>>,
}

impl Page {
    /// Creates a new page with the given initial data.
    #[must_use]
    pub fn new(data: [u8; PAGE_SIZE]) -> Self {
        Self {
            backing: Arc::new(data),
            local: None,
        }
    }

    /// Creates a new page initialized with zeros.
    ///
    /// All zeroed pages share a single backing buffer.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            backing: zero_backing(),
            local: None,
        }
    }

    /// Creates a page from a slice, padding with zeros if needed.
    ///
    /// If the slice is shorter than `PAGE_SIZE`, the rest is zero-filled.
    /// If longer, it is truncated.
    #[must_use]
    pub fn from_slice(data: &[u8]) -> Self {
        let mut page_data = [0u8; PAGE_SIZE];
        let copy_len = data.len().min(PAGE_SIZE);
        page_data[..copy_len].copy_from_slice(&data[..copy_len]);
        Self::new(page_data)
    }

    fn check_bounds(offset: usize, size: usize) -> Result<usize, EmulationError> {
        let end = offset.saturating_add(size);
        if end > PAGE_SIZE {
            return Err(EmulationError::PageOutOfBounds {
                offset,
                size,
                page_size: PAGE_SIZE,
            });
        }
        Ok(end)
    }

    /// Returns the current contents of the page.
    #[must_use]
    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        self.local.as_deref().unwrap_or(&self.backing)
    }

    /// Reads a range of bytes into the provided buffer.
    ///
    /// # Arguments
    ///
    /// * `offset` - Starting offset within the page
    /// * `buf` - Buffer to read into
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::PageOutOfBounds`] if `offset + buf.len() > PAGE_SIZE`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), EmulationError> {
        let end = Self::check_bounds(offset, buf.len())?;
        buf.copy_from_slice(&self.data()[offset..end]);
        Ok(())
    }

    /// Reads a range and returns a new Vec.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::PageOutOfBounds`] if `offset + len > PAGE_SIZE`.
    pub fn read_vec(&self, offset: usize, len: usize) -> Result<Vec<u8>, EmulationError> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Writes a range of bytes at the given offset.
    ///
    /// Triggers copy-on-write if no local copy exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::PageOutOfBounds`] if `offset + data.len() > PAGE_SIZE`.
    pub fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), EmulationError> {
        let end = Self::check_bounds(offset, data.len())?;
        let backing = &self.backing;
        let buf = self.local.get_or_insert_with(|| Box::new(**backing));
        buf[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Fills a range with a single byte value.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::PageOutOfBounds`] if `offset + len > PAGE_SIZE`.
    pub fn fill(&mut self, offset: usize, len: usize, value: u8) -> Result<(), EmulationError> {
        let end = Self::check_bounds(offset, len)?;
        let backing = &self.backing;
        let buf = self.local.get_or_insert_with(|| Box::new(**backing));
        buf[offset..end].fill(value);
        Ok(())
    }

    /// Returns `true` if this page has been written since creation or the last fork.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.local.is_some()
    }

    /// Forks this page.
    ///
    /// Any local modifications are first folded into a new shared backing, so
    /// both pages afterwards share the same immutable data and diverge
    /// independently on their next write.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        if let Some(local) = self.local.take() {
            self.backing = Arc::from(local);
        }
        Self {
            backing: Arc::clone(&self.backing),
            local: None,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_page() {
        let page = Page::zeroed();
        assert_eq!(page.read_vec(0, 16).unwrap(), vec![0u8; 16]);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_from_slice_pads() {
        let page = Page::from_slice(&[1, 2, 3]);
        assert_eq!(page.read_vec(0, 5).unwrap(), vec![1, 2, 3, 0, 0]);
    }

    #[test]
    fn test_write_triggers_cow() {
        let mut page = Page::zeroed();
        page.write(10, &[0xAA, 0xBB]).unwrap();
        assert!(page.is_dirty());
        assert_eq!(page.read_vec(10, 2).unwrap(), vec![0xAA, 0xBB]);

        // The shared zero page is untouched
        assert_eq!(Page::zeroed().read_vec(10, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_bounds() {
        let mut page = Page::zeroed();
        assert!(page.write(PAGE_SIZE - 1, &[1, 2]).is_err());
        assert!(page.read_vec(PAGE_SIZE, 1).is_err());
        assert!(page.fill(0, PAGE_SIZE + 1, 0).is_err());
        assert!(page.write(PAGE_SIZE - 2, &[1, 2]).is_ok());
    }

    #[test]
    fn test_fork_isolation() {
        let mut page = Page::zeroed();
        page.write(0, &[42]).unwrap();

        let mut forked = page.fork();
        assert_eq!(forked.read_vec(0, 1).unwrap(), vec![42]);

        forked.write(0, &[7]).unwrap();
        page.write(1, &[9]).unwrap();

        assert_eq!(page.read_vec(0, 2).unwrap(), vec![42, 9]);
        assert_eq!(forked.read_vec(0, 2).unwrap(), vec![7, 0]);
    }
}
