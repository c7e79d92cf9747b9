//! Memory region types for address space management.
//!
//! This module defines [`MemoryRegion`], a contiguous, page-aligned block of guest
//! memory, and [`MemoryProtection`], the permission bits attached to every page.
//!
//! Regions come in a few kinds ([`RegionKind`]):
//!
//! - **Images** - ELF shared objects, with per-segment protection
//! - **Stack** - The single emulated thread's stack
//! - **Heap** - The arena behind `malloc` and the JNI string/array buffers
//! - **Stubs** - Trap trampolines for host functions
//! - **Host data** - JNI function tables, TLS block and data-symbol stubs
//! - **Mapped** - Anything else mapped at runtime (`mmap`, tests)
//!
//! # Copy-on-Write Semantics
//!
//! All memory regions use page-based copy-on-write. Each region is divided into
//! 4KB pages, and writes only copy the specific page being modified. This enables
//! efficient `fork()` operations where parent and child share unmodified pages.
//!
//! # Memory Protection
//!
//! Protection is tracked per page rather than per region, so a single image
//! region can carry a read-execute text segment followed by a read-write data
//! segment, exactly as the ELF program headers describe it.

use bitflags::bitflags;

use crate::emulation::{
    engine::EmulationError,
    memory::page::{Page, PAGE_SIZE},
};

bitflags! {
    /// Memory protection flags for address space regions.
    ///
    /// These flags control what operations emulated code may perform on a page.
    /// For image regions they are derived from the ELF `p_flags` of the segment
    /// covering the page.
    ///
    /// # Common Combinations
    ///
    /// - [`READ_WRITE`](Self::READ_WRITE) - Data segments, heap, stack
    /// - [`READ_EXECUTE`](Self::READ_EXECUTE) - Text segments, stub trampolines
    /// - [`READ`](Self::READ) - `PT_GNU_RELRO` after linking, read-only data
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProtection: u32 {
        /// Region is readable.
        const READ = 0x01;
        /// Region is writable.
        const WRITE = 0x02;
        /// Region is executable.
        const EXECUTE = 0x04;
        /// Read and write access (common for data segments).
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// Read, write, and execute access.
        const READ_WRITE_EXECUTE = Self::READ.bits() | Self::WRITE.bits() | Self::EXECUTE.bits();
        /// Read and execute access (common for code segments).
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self::READ_WRITE
    }
}

impl MemoryProtection {
    /// ELF `PF_X`.
    const PF_X: u32 = 0x1;
    /// ELF `PF_W`.
    const PF_W: u32 = 0x2;
    /// ELF `PF_R`.
    const PF_R: u32 = 0x4;

    /// Converts ELF program header flags (`p_flags`) to protection flags.
    ///
    /// # Arguments
    ///
    /// * `p_flags` - The `PF_R | PF_W | PF_X` bits of a program header
    #[must_use]
    pub fn from_elf(p_flags: u32) -> Self {
        let mut protection = Self::empty();
        if p_flags & Self::PF_R != 0 {
            protection |= Self::READ;
        }
        if p_flags & Self::PF_W != 0 {
            protection |= Self::WRITE;
        }
        if p_flags & Self::PF_X != 0 {
            protection |= Self::EXECUTE;
        }
        protection
    }

    /// Converts `mmap`/`mprotect` `PROT_*` bits to protection flags.
    ///
    /// `PROT_READ = 1`, `PROT_WRITE = 2`, `PROT_EXEC = 4` share the bit layout
    /// of this type.
    #[must_use]
    pub fn from_prot(prot: u64) -> Self {
        Self::from_bits_truncate(u32::try_from(prot & 0x7).unwrap_or(0))
    }
}

impl std::fmt::Display for MemoryProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.contains(Self::READ) { 'r' } else { '-' };
        let w = if self.contains(Self::WRITE) { 'w' } else { '-' };
        let x = if self.contains(Self::EXECUTE) { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// The kind of memory region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// A loaded ELF image.
    Image,
    /// The emulated thread's stack.
    Stack,
    /// The guest heap arena.
    Heap,
    /// Host stub trampolines.
    Stubs,
    /// Host-owned data (JNI tables, TLS, data-symbol stubs).
    HostData,
    /// Generic mapped data.
    Mapped,
}

/// A memory region in the emulated address space.
///
/// Memory regions represent contiguous, page-aligned blocks of memory with a
/// protection per page. They use page-based copy-on-write for efficient
/// forking: unmodified pages are shared between parent and child.
///
/// Region-relative accessors (`read`, `write`) do not check protection. The
/// [`AddressSpace`](super::AddressSpace) performs permission checks before
/// delegating here.
#[derive(Debug)]
pub struct MemoryRegion {
    /// Base virtual address of this region.
    base: u64,
    /// Pages containing the region's data (each page is 4KB).
    pages: Vec<Page>,
    /// Protection of each page.
    protections: Vec<MemoryProtection>,
    /// Human-readable label for debugging.
    label: String,
    /// What the region is used for.
    kind: RegionKind,
}

impl MemoryRegion {
    /// Creates a zero-filled region.
    ///
    /// # Arguments
    ///
    /// * `base` - Page-aligned base address
    /// * `size` - Size in bytes, rounded up to whole pages
    /// * `protection` - Initial protection of every page
    /// * `kind` - What the region is used for
    /// * `label` - Human-readable name for debugging
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidRegion`] if `base` is not page aligned,
    /// `size` is zero, or the region would wrap the address space.
    pub fn new(
        base: u64,
        size: usize,
        protection: MemoryProtection,
        kind: RegionKind,
        label: impl Into<String>,
    ) -> Result<Self, EmulationError> {
        let page_count = Self::validate(base, size)?;
        Ok(Self {
            base,
            pages: (0..page_count).map(|_| Page::zeroed()).collect(),
            protections: vec![protection; page_count],
            label: label.into(),
            kind,
        })
    }

    /// Creates a region initialised from `data`, zero-padded to whole pages.
    ///
    /// # Errors
    ///
    /// Same as [`MemoryRegion::new`].
    pub fn from_data(
        base: u64,
        data: &[u8],
        protection: MemoryProtection,
        kind: RegionKind,
        label: impl Into<String>,
    ) -> Result<Self, EmulationError> {
        let page_count = Self::validate(base, data.len())?;
        let pages = (0..page_count)
            .map(|i| {
                let start = i * PAGE_SIZE;
                let end = (start + PAGE_SIZE).min(data.len());
                Page::from_slice(&data[start..end])
            })
            .collect();
        Ok(Self {
            base,
            pages,
            protections: vec![protection; page_count],
            label: label.into(),
            kind,
        })
    }

    fn validate(base: u64, size: usize) -> Result<usize, EmulationError> {
        let size64 = size as u64;
        if size == 0 {
            return Err(EmulationError::InvalidRegion {
                base,
                size: size64,
                reason: "zero size",
            });
        }
        if base % PAGE_SIZE as u64 != 0 {
            return Err(EmulationError::InvalidRegion {
                base,
                size: size64,
                reason: "base is not page aligned",
            });
        }
        let page_count = size.div_ceil(PAGE_SIZE);
        if base.checked_add((page_count * PAGE_SIZE) as u64).is_none() {
            return Err(EmulationError::InvalidRegion {
                base,
                size: size64,
                reason: "region wraps the address space",
            });
        }
        Ok(page_count)
    }

    /// Returns the base address.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Returns the size in bytes (always a multiple of the page size).
    #[must_use]
    pub fn size(&self) -> usize {
        self.pages.len() * PAGE_SIZE
    }

    /// Returns the first address past the region.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.base + self.size() as u64
    }

    /// Returns `true` if `address` lies within the region.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Returns `true` if `[address, address + len)` lies within the region.
    #[must_use]
    pub fn contains_range(&self, address: u64, len: usize) -> bool {
        address >= self.base
            && address
                .checked_add(len as u64)
                .is_some_and(|end| end <= self.end())
    }

    /// Returns the label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the region kind.
    #[must_use]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Returns the protection of the page containing `address`.
    ///
    /// Returns an empty protection for addresses outside the region.
    #[must_use]
    pub fn protection_at(&self, address: u64) -> MemoryProtection {
        if !self.contains(address) {
            return MemoryProtection::empty();
        }
        let page = ((address - self.base) as usize) / PAGE_SIZE;
        self.protections[page]
    }

    /// Sets the protection of every page overlapping `[address, address + len)`.
    ///
    /// The range is clamped to the region.
    pub fn set_protection(&mut self, address: u64, len: usize, protection: MemoryProtection) {
        if len == 0 {
            return;
        }
        let start = address.max(self.base);
        let end = address.saturating_add(len as u64).min(self.end());
        if start >= end {
            return;
        }
        let first = ((start - self.base) as usize) / PAGE_SIZE;
        let last = ((end - 1 - self.base) as usize) / PAGE_SIZE;
        for prot in &mut self.protections[first..=last] {
            *prot = protection;
        }
    }

    /// Returns `true` if every page of `[address, address + len)` allows `required`.
    ///
    /// The range must lie within the region.
    #[must_use]
    pub fn allows(&self, address: u64, len: usize, required: MemoryProtection) -> bool {
        if len == 0 {
            return true;
        }
        let first = ((address - self.base) as usize) / PAGE_SIZE;
        let last = ((address + len as u64 - 1 - self.base) as usize) / PAGE_SIZE;
        self.protections[first..=last]
            .iter()
            .all(|prot| prot.contains(required))
    }

    /// Returns the first address in `[address, address + len)` whose page does
    /// not allow `required`.
    #[must_use]
    pub fn first_denied(&self, address: u64, len: usize, required: MemoryProtection) -> Option<u64> {
        let mut current = address;
        let end = address + len as u64;
        while current < end {
            if !self.protection_at(current).contains(required) {
                return Some(current);
            }
            current = (current & !(PAGE_SIZE as u64 - 1)) + PAGE_SIZE as u64;
        }
        None
    }

    /// Reads bytes from the region without checking protection.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::RegionNotFound`] if the range leaves the region.
    pub fn read(&self, address: u64, buf: &mut [u8]) -> Result<(), EmulationError> {
        if !self.contains_range(address, buf.len()) {
            return Err(EmulationError::RegionNotFound { address });
        }
        let mut offset = (address - self.base) as usize;
        let mut done = 0;
        while done < buf.len() {
            let page = offset / PAGE_SIZE;
            let in_page = offset % PAGE_SIZE;
            let chunk = (PAGE_SIZE - in_page).min(buf.len() - done);
            self.pages[page].read(in_page, &mut buf[done..done + chunk])?;
            done += chunk;
            offset += chunk;
        }
        Ok(())
    }

    /// Writes bytes into the region without checking protection.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::RegionNotFound`] if the range leaves the region.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<(), EmulationError> {
        if !self.contains_range(address, data.len()) {
            return Err(EmulationError::RegionNotFound { address });
        }
        let mut offset = (address - self.base) as usize;
        let mut done = 0;
        while done < data.len() {
            let page = offset / PAGE_SIZE;
            let in_page = offset % PAGE_SIZE;
            let chunk = (PAGE_SIZE - in_page).min(data.len() - done);
            self.pages[page].write(in_page, &data[done..done + chunk])?;
            done += chunk;
            offset += chunk;
        }
        Ok(())
    }

    /// Fills `[address, address + len)` with `value` without checking protection.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::RegionNotFound`] if the range leaves the region.
    pub fn fill(&mut self, address: u64, len: usize, value: u8) -> Result<(), EmulationError> {
        if !self.contains_range(address, len) {
            return Err(EmulationError::RegionNotFound { address });
        }
        let mut offset = (address - self.base) as usize;
        let mut done = 0;
        while done < len {
            let page = offset / PAGE_SIZE;
            let in_page = offset % PAGE_SIZE;
            let chunk = (PAGE_SIZE - in_page).min(len - done);
            self.pages[page].fill(in_page, chunk, value)?;
            done += chunk;
            offset += chunk;
        }
        Ok(())
    }

    /// Returns the number of pages in the region.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Returns the number of pages written since creation or the last fork.
    #[must_use]
    pub fn modified_page_count(&self) -> usize {
        self.pages.iter().filter(|page| page.is_dirty()).count()
    }

    /// Forks this region, sharing all pages copy-on-write.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        Self {
            base: self.base,
            pages: self.pages.iter_mut().map(Page::fork).collect(),
            protections: self.protections.clone(),
            label: self.label.clone(),
            kind: self.kind,
        }
    }
}
