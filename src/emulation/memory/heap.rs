//! Guest heap allocator.
//!
//! This module provides [`GuestHeap`], the allocator behind the guest's `malloc` family
//! and every buffer the JNI bridge hands to emulated code (`GetStringUTFChars`,
//! `Get<T>ArrayElements`, marshalled invocation arguments).
//!
//! The heap only does bookkeeping. The bytes themselves live in a dedicated read/write
//! region of the [`AddressSpace`](super::AddressSpace); callers that need zeroed memory
//! (`calloc`) clear it through the address space.
//!
//! # Allocation Strategy
//!
//! Allocations are 16-byte aligned. Freed blocks go onto a free list keyed by address
//! and are reused first-fit before the bump pointer advances; a reused block that is
//! larger than needed is split. There is no coalescing: the guest workloads this heap
//! serves allocate a few hundred small buffers per invocation.
//!
//! # Memory Limits
//!
//! Allocation fails with [`EmulationError::HeapMemoryLimitExceeded`] once the bump
//! pointer would leave the heap region and no free block fits.

use std::collections::BTreeMap;

use crate::{emulation::engine::EmulationError, Result};

/// Alignment of every allocation.
pub const HEAP_ALIGNMENT: u64 = 16;

/// Bookkeeping for the guest heap region.
///
/// # Example
///
/// ```rust
/// use droidemu::emulation::GuestHeap;
///
/// let mut heap = GuestHeap::new(0x2000_0000, 0x10000);
/// let a = heap.alloc(24)?;
/// let b = heap.alloc(1)?;
/// assert_eq!(a, 0x2000_0000);
/// assert_eq!(b, 0x2000_0020);
///
/// heap.free(a)?;
/// assert_eq!(heap.alloc(16)?, a); // reused
/// # Ok::<(), droidemu::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct GuestHeap {
    /// First address of the heap region.
    base: u64,
    /// Size of the heap region in bytes.
    size: u64,
    /// Next never-used address.
    next: u64,
    /// Live allocations: address to usable size.
    allocations: BTreeMap<u64, u64>,
    /// Freed blocks available for reuse: address to block size.
    free_blocks: BTreeMap<u64, u64>,
    /// Sum of live allocation sizes.
    current_size: usize,
}

impl GuestHeap {
    /// Creates heap bookkeeping for the region `[base, base + size)`.
    ///
    /// # Arguments
    ///
    /// * `base` - First address of the heap region (16-byte aligned)
    /// * `size` - Size of the region in bytes
    #[must_use]
    pub fn new(base: u64, size: u64) -> Self {
        GuestHeap {
            base,
            size,
            next: base,
            allocations: BTreeMap::new(),
            free_blocks: BTreeMap::new(),
            current_size: 0,
        }
    }

    /// Allocates `size` bytes and returns the guest address.
    ///
    /// Zero-sized requests allocate one aligned slot so the result is a unique,
    /// freeable pointer, as bionic's `malloc(0)` does.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::HeapMemoryLimitExceeded`] if the heap is exhausted.
    pub fn alloc(&mut self, size: usize) -> Result<u64> {
        self.alloc_aligned(size, HEAP_ALIGNMENT)
    }

    /// Allocates `size` bytes aligned to `alignment` (a power of two, at least 16).
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::HeapMemoryLimitExceeded`] if the heap is exhausted, or
    /// [`EmulationError::InvalidPointer`] if the alignment is not a power of two.
    pub fn alloc_aligned(&mut self, size: usize, alignment: u64) -> Result<u64> {
        if !alignment.is_power_of_two() {
            return Err(EmulationError::InvalidPointer {
                address: alignment,
                reason: "alignment is not a power of two",
            }
            .into());
        }
        let alignment = alignment.max(HEAP_ALIGNMENT);
        let block = round_up(size.max(1) as u64, HEAP_ALIGNMENT);

        if let Some(address) = self.take_free_block(block, alignment) {
            self.allocations.insert(address, block);
            self.current_size += block as usize;
            return Ok(address);
        }

        let address = round_up(self.next, alignment);
        let end = address.checked_add(block);
        match end {
            Some(end) if end <= self.base + self.size => {
                if address > self.next {
                    self.free_blocks.insert(self.next, address - self.next);
                }
                self.next = end;
                self.allocations.insert(address, block);
                self.current_size += block as usize;
                Ok(address)
            }
            _ => Err(EmulationError::HeapMemoryLimitExceeded {
                current: self.current_size,
                limit: self.size as usize,
            }
            .into()),
        }
    }

    fn take_free_block(&mut self, block: u64, alignment: u64) -> Option<u64> {
        let (&start, &len) = self.free_blocks.iter().find(|(&start, &len)| {
            let aligned = round_up(start, alignment);
            aligned + block <= start + len
        })?;
        self.free_blocks.remove(&start);

        let aligned = round_up(start, alignment);
        if aligned > start {
            self.free_blocks.insert(start, aligned - start);
        }
        let tail = start + len - (aligned + block);
        if tail > 0 {
            self.free_blocks.insert(aligned + block, tail);
        }
        Some(aligned)
    }

    /// Frees the allocation starting at `address` and returns its size.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidPointer`] if `address` is not the start of a
    /// live allocation (including double frees).
    pub fn free(&mut self, address: u64) -> Result<usize> {
        match self.allocations.remove(&address) {
            Some(block) => {
                self.current_size = self.current_size.saturating_sub(block as usize);
                self.free_blocks.insert(address, block);
                Ok(block as usize)
            }
            None => Err(EmulationError::InvalidPointer {
                address,
                reason: "not a valid allocation or already freed",
            }
            .into()),
        }
    }

    /// Returns the usable size of the live allocation starting at `address`.
    #[must_use]
    pub fn allocation_size(&self, address: u64) -> Option<usize> {
        self.allocations.get(&address).map(|&size| size as usize)
    }

    /// Returns `true` if `address` lies inside the heap region.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.base + self.size
    }

    /// Returns the first address of the heap region.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the size of the heap region.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the number of bytes in live allocations.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.current_size
    }

    /// Returns the number of live allocations.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocations.len()
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.next = self.base;
        self.allocations.clear();
        self.free_blocks.clear();
        self.current_size = 0;
    }
}

fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_alignment() {
        let mut heap = GuestHeap::new(0x1000, 0x1000);
        let a = heap.alloc(1).unwrap();
        let b = heap.alloc(17).unwrap();
        let c = heap.alloc(0).unwrap();
        assert_eq!(a, 0x1000);
        assert_eq!(b, 0x1010);
        assert_eq!(c, 0x1030);
        assert_eq!(heap.allocation_count(), 3);
        assert_eq!(heap.allocated_bytes(), 16 + 32 + 16);
    }

    #[test]
    fn test_free_and_reuse() {
        let mut heap = GuestHeap::new(0x1000, 0x1000);
        let a = heap.alloc(64).unwrap();
        let _b = heap.alloc(16).unwrap();
        assert_eq!(heap.free(a).unwrap(), 64);

        // Reuses the front of the freed block and keeps the rest
        let c = heap.alloc(16).unwrap();
        assert_eq!(c, a);
        let d = heap.alloc(32).unwrap();
        assert_eq!(d, a + 16);
    }

    #[test]
    fn test_double_free() {
        let mut heap = GuestHeap::new(0x1000, 0x1000);
        let a = heap.alloc(8).unwrap();
        heap.free(a).unwrap();
        assert!(heap.free(a).is_err());
        assert!(heap.free(0x1234).is_err());
    }

    #[test]
    fn test_limit_exceeded() {
        let mut heap = GuestHeap::new(0x1000, 0x100);
        assert!(heap.alloc(0x100).is_ok());
        let error = heap.alloc(1).unwrap_err();
        assert!(matches!(
            error,
            crate::Error::Emulation(ref e) if matches!(**e, EmulationError::HeapMemoryLimitExceeded { .. })
        ));
    }

    #[test]
    fn test_aligned_alloc() {
        let mut heap = GuestHeap::new(0x1000, 0x1000);
        heap.alloc(16).unwrap();
        let a = heap.alloc_aligned(8, 256).unwrap();
        assert_eq!(a % 256, 0);
        // The skipped gap is reusable
        assert_eq!(heap.alloc(16).unwrap(), 0x1010);
        assert!(heap.alloc_aligned(8, 24).is_err());
    }

    #[test]
    fn test_reset() {
        let mut heap = GuestHeap::new(0x1000, 0x1000);
        heap.alloc(100).unwrap();
        heap.reset();
        assert_eq!(heap.allocation_count(), 0);
        assert_eq!(heap.alloc(1).unwrap(), 0x1000);
        assert!(heap.contains(0x1FFF));
        assert!(!heap.contains(0x2000));
    }
}
