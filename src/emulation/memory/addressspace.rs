//! Unified address space management for AArch64 emulation.
//!
//! This module provides the [`AddressSpace`] type, the single view of guest memory
//! shared by the loader, the linker, the interpreter and every host stub of a session.
//!
//! # Access Paths
//!
//! There are two ways into guest memory:
//!
//! | Path | Methods | Checks |
//! |------|---------|--------|
//! | Checked | [`read`](AddressSpace::read), [`write`](AddressSpace::write), [`fetch`](AddressSpace::fetch), `read_u*`, `write_u*` | mapping **and** page protection |
//! | Privileged | [`read_privileged`](AddressSpace::read_privileged), [`write_privileged`](AddressSpace::write_privileged) | mapping only |
//!
//! The interpreter and host stubs acting on behalf of emulated code use the checked
//! path, so a guest `memcpy` into a text segment faults just as it would on hardware.
//! The loader and linker use the privileged path to fill read-only segments and
//! patch relocations.
//!
//! # Example
//!
//! ```rust
//! use droidemu::emulation::{AddressSpace, MemoryProtection, RegionKind};
//!
//! let mut space = AddressSpace::new();
//! space.map_at(0x10000, 0x1000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "data")?;
//!
//! space.write_u32(0x10010, 0xDEADBEEF)?;
//! assert_eq!(space.read_u32(0x10010)?, 0xDEADBEEF);
//!
//! // Nothing is mapped at 0x20000
//! assert!(space.read_u32(0x20000).is_err());
//! # Ok::<(), droidemu::Error>(())
//! ```

use std::collections::BTreeMap;

use crate::{
    emulation::{
        engine::{AccessKind, EmulationError, MemoryFault},
        memory::{
            page::PAGE_SIZE,
            region::{MemoryProtection, MemoryRegion, RegionKind},
        },
    },
    Result,
};

/// Default lowest address used for automatic placement.
pub const DEFAULT_MMAP_BASE: u64 = 0x7000_0000_0000;

/// Default upper bound of the emulated address space (48-bit user space).
pub const DEFAULT_ADDRESS_LIMIT: u64 = 0x0000_8000_0000_0000;

/// The emulated address space of one session.
///
/// Regions are kept in an ordered map keyed by base address and never overlap.
/// An empty address space maps nothing; every access faults.
#[derive(Debug)]
pub struct AddressSpace {
    /// Mapped regions keyed by base address.
    regions: BTreeMap<u64, MemoryRegion>,
    /// Lowest address considered by [`AddressSpace::map`].
    mmap_base: u64,
    /// First address past the usable address space.
    limit: u64,
}

impl AddressSpace {
    /// Creates an empty address space with default placement settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_layout(DEFAULT_MMAP_BASE, DEFAULT_ADDRESS_LIMIT)
    }

    /// Creates an empty address space with custom placement settings.
    ///
    /// # Arguments
    ///
    /// * `mmap_base` - Lowest address used for automatic placement
    /// * `limit` - First address past the usable address space
    #[must_use]
    pub fn with_layout(mmap_base: u64, limit: u64) -> Self {
        Self {
            regions: BTreeMap::new(),
            mmap_base,
            limit,
        }
    }

    /// Maps a prepared region at its own base address.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::RegionOverlap`] if the region intersects an existing
    /// mapping, or [`EmulationError::InvalidRegion`] if it ends past the address limit.
    pub fn map_region(&mut self, region: MemoryRegion) -> Result<u64> {
        let base = region.base();
        let size = region.size() as u64;
        if region.end() > self.limit {
            return Err(EmulationError::InvalidRegion {
                base,
                size,
                reason: "region ends past the address space limit",
            }
            .into());
        }
        if self.overlaps(base, size) {
            return Err(EmulationError::RegionOverlap { base, size }.into());
        }
        self.regions.insert(base, region);
        Ok(base)
    }

    /// Maps a zero-filled region at a fixed address.
    ///
    /// # Arguments
    ///
    /// * `base` - Page-aligned base address
    /// * `size` - Size in bytes, rounded up to whole pages
    /// * `protection` - Initial protection of all pages
    /// * `kind` - What the region is used for
    /// * `label` - Human-readable name for debugging
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are invalid or the range is already in use.
    pub fn map_at(
        &mut self,
        base: u64,
        size: usize,
        protection: MemoryProtection,
        kind: RegionKind,
        label: impl Into<String>,
    ) -> Result<u64> {
        let region = MemoryRegion::new(base, size, protection, kind, label)?;
        self.map_region(region)
    }

    /// Maps a zero-filled region at the lowest free address at or above the
    /// placement base.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::AddressSpaceExhausted`] if no gap is large enough.
    pub fn map(
        &mut self,
        size: usize,
        protection: MemoryProtection,
        kind: RegionKind,
        label: impl Into<String>,
    ) -> Result<u64> {
        let base = self
            .find_free(size, self.mmap_base)
            .ok_or(EmulationError::AddressSpaceExhausted { size: size as u64 })?;
        self.map_at(base, size, protection, kind, label)
    }

    /// Finds the lowest page-aligned gap of at least `size` bytes at or above `hint`.
    #[must_use]
    pub fn find_free(&self, size: usize, hint: u64) -> Option<u64> {
        let size = (size.max(1).div_ceil(PAGE_SIZE) * PAGE_SIZE) as u64;
        let mut candidate = align_up(hint, PAGE_SIZE as u64)?;
        for region in self.regions.values() {
            if region.end() <= candidate {
                continue;
            }
            if region.base() >= candidate.checked_add(size)? {
                break;
            }
            candidate = region.end();
        }
        let end = candidate.checked_add(size)?;
        (end <= self.limit).then_some(candidate)
    }

    /// Unmaps the region starting at `base` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::RegionNotFound`] if no region starts at `base`.
    pub fn unmap(&mut self, base: u64) -> Result<MemoryRegion> {
        self.regions
            .remove(&base)
            .ok_or_else(|| EmulationError::RegionNotFound { address: base }.into())
    }

    /// Unmaps every region.
    pub fn clear(&mut self) {
        self.regions.clear();
    }

    /// Changes the protection of every page overlapping `[address, address + len)`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::RegionNotFound`] if any part of the range is unmapped.
    pub fn protect(&mut self, address: u64, len: usize, protection: MemoryProtection) -> Result<()> {
        if let Some(gap) = self.first_unmapped(address, len) {
            return Err(EmulationError::RegionNotFound { address: gap }.into());
        }
        let end = address.saturating_add(len as u64);
        for region in self.regions.values_mut() {
            if region.end() > address && region.base() < end {
                region.set_protection(address, len, protection);
            }
        }
        Ok(())
    }

    /// Returns the region containing `address`.
    #[must_use]
    pub fn region(&self, address: u64) -> Option<&MemoryRegion> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    fn region_mut(&mut self, address: u64) -> Option<&mut MemoryRegion> {
        self.regions
            .range_mut(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.contains(address))
    }

    /// Returns the protection of the page containing `address`, if mapped.
    #[must_use]
    pub fn protection(&self, address: u64) -> Option<MemoryProtection> {
        self.region(address).map(|region| region.protection_at(address))
    }

    /// Returns `true` if `address` is mapped.
    #[must_use]
    pub fn is_mapped(&self, address: u64) -> bool {
        self.region(address).is_some()
    }

    /// Iterates over all regions in address order.
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }

    /// Returns the number of mapped regions.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Returns `true` if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Returns the total number of mapped bytes.
    #[must_use]
    pub fn mapped_size(&self) -> usize {
        self.regions.values().map(MemoryRegion::size).sum()
    }

    fn overlaps(&self, base: u64, size: u64) -> bool {
        let end = base.saturating_add(size);
        if let Some((_, before)) = self.regions.range(..=base).next_back() {
            if before.end() > base {
                return true;
            }
        }
        self.regions
            .range(base..end)
            .next()
            .is_some()
    }

    fn first_unmapped(&self, address: u64, len: usize) -> Option<u64> {
        let end = address.saturating_add(len as u64);
        let mut current = address;
        while current < end {
            match self.region(current) {
                Some(region) => current = region.end(),
                None => return Some(current),
            }
        }
        None
    }

    /// Walks `[address, address + len)` region by region, checking mapping and
    /// (optionally) protection, and calls `f` with each chunk.
    fn walk<F>(&self, address: u64, len: usize, required: Option<(MemoryProtection, AccessKind)>, access: AccessKind, mut f: F) -> std::result::Result<(), MemoryFault>
    where
        F: FnMut(&MemoryRegion, u64, usize, usize),
    {
        let Some(end) = address.checked_add(len as u64) else {
            return Err(MemoryFault::unmapped(address, access));
        };
        let mut current = address;
        let mut done = 0usize;
        while current < end {
            let region = self
                .region(current)
                .ok_or(MemoryFault::unmapped(current, access))?;
            let chunk_end = region.end().min(end);
            let chunk = (chunk_end - current) as usize;
            if let Some((protection, kind)) = required {
                if let Some(denied) = region.first_denied(current, chunk, protection) {
                    return Err(MemoryFault::protection(denied, kind));
                }
            }
            f(region, current, done, chunk);
            done += chunk;
            current = chunk_end;
        }
        Ok(())
    }

    /// Validates that `[address, address + len)` is mapped with `required`.
    fn check(&self, address: u64, len: usize, required: Option<MemoryProtection>, access: AccessKind) -> std::result::Result<(), MemoryFault> {
        self.walk(address, len, required.map(|p| (p, access)), access, |_, _, _, _| {})
    }

    /// Reads guest memory, requiring read permission.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] for the first unmapped or unreadable byte.
    pub fn read(&self, address: u64, buf: &mut [u8]) -> std::result::Result<(), MemoryFault> {
        self.read_with(address, buf, Some(MemoryProtection::READ), AccessKind::Read)
    }

    /// Reads guest memory ignoring protection.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] for the first unmapped byte.
    pub fn read_privileged(&self, address: u64, buf: &mut [u8]) -> std::result::Result<(), MemoryFault> {
        self.read_with(address, buf, None, AccessKind::Read)
    }

    fn read_with(
        &self,
        address: u64,
        buf: &mut [u8],
        required: Option<MemoryProtection>,
        access: AccessKind,
    ) -> std::result::Result<(), MemoryFault> {
        let mut failed = None;
        self.walk(address, buf.len(), required.map(|p| (p, access)), access, |region, at, done, chunk| {
            if region.read(at, &mut buf[done..done + chunk]).is_err() {
                failed = Some(at);
            }
        })?;
        match failed {
            Some(at) => Err(MemoryFault::unmapped(at, access)),
            None => Ok(()),
        }
    }

    /// Writes guest memory, requiring write permission.
    ///
    /// Nothing is written if any part of the range faults.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] for the first unmapped or read-only byte.
    pub fn write(&mut self, address: u64, data: &[u8]) -> std::result::Result<(), MemoryFault> {
        self.write_with(address, data, Some(MemoryProtection::WRITE))
    }

    /// Writes guest memory ignoring protection.
    ///
    /// Used by the loader and linker to fill segments and apply relocations.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] for the first unmapped byte.
    pub fn write_privileged(&mut self, address: u64, data: &[u8]) -> std::result::Result<(), MemoryFault> {
        self.write_with(address, data, None)
    }

    fn write_with(
        &mut self,
        address: u64,
        data: &[u8],
        required: Option<MemoryProtection>,
    ) -> std::result::Result<(), MemoryFault> {
        self.check(address, data.len(), required, AccessKind::Write)?;
        let end = address + data.len() as u64;
        let mut current = address;
        while current < end {
            let region = self
                .region_mut(current)
                .ok_or(MemoryFault::unmapped(current, AccessKind::Write))?;
            let chunk_end = region.end().min(end);
            let offset = (current - address) as usize;
            let chunk = (chunk_end - current) as usize;
            region
                .write(current, &data[offset..offset + chunk])
                .map_err(|_| MemoryFault::unmapped(current, AccessKind::Write))?;
            current = chunk_end;
        }
        Ok(())
    }

    /// Fills guest memory with a byte value, requiring write permission.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] for the first unmapped or read-only byte.
    pub fn fill(&mut self, address: u64, len: usize, value: u8) -> std::result::Result<(), MemoryFault> {
        self.check(address, len, Some(MemoryProtection::WRITE), AccessKind::Write)?;
        let end = address + len as u64;
        let mut current = address;
        while current < end {
            let region = self
                .region_mut(current)
                .ok_or(MemoryFault::unmapped(current, AccessKind::Write))?;
            let chunk_end = region.end().min(end);
            region
                .fill(current, (chunk_end - current) as usize, value)
                .map_err(|_| MemoryFault::unmapped(current, AccessKind::Write))?;
            current = chunk_end;
        }
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dest` with `memmove` semantics.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the source is unreadable or the destination unwritable.
    pub fn copy(&mut self, dest: u64, src: u64, len: usize) -> std::result::Result<(), MemoryFault> {
        let data = self.read_bytes(src, len)?;
        self.write(dest, &data)
    }

    /// Fetches the instruction word at `address`, requiring execute permission.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] with [`AccessKind::Execute`].
    pub fn fetch(&self, address: u64) -> std::result::Result<u32, MemoryFault> {
        let mut buf = [0u8; 4];
        self.read_with(
            address,
            &mut buf,
            Some(MemoryProtection::EXECUTE),
            AccessKind::Execute,
        )?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads `len` bytes into a new vector.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] for the first unmapped or unreadable byte.
    pub fn read_bytes(&self, address: u64, len: usize) -> std::result::Result<Vec<u8>, MemoryFault> {
        let mut buf = vec![0u8; len];
        self.read(address, &mut buf)?;
        Ok(buf)
    }

    /// Reads a NUL-terminated byte string (without the terminator).
    ///
    /// # Arguments
    ///
    /// * `address` - Start of the string
    /// * `max_len` - Maximum number of bytes to scan
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the scan leaves readable memory before
    /// finding the terminator.
    pub fn read_cstring(&self, address: u64, max_len: usize) -> std::result::Result<Vec<u8>, MemoryFault> {
        let mut out = Vec::new();
        let mut current = address;
        while out.len() < max_len {
            // Read up to the end of the current page to avoid faulting past the terminator
            let page_left = PAGE_SIZE - (current as usize % PAGE_SIZE);
            let chunk = page_left.min(max_len - out.len());
            let bytes = self.read_bytes(current, chunk)?;
            if let Some(nul) = bytes.iter().position(|&b| b == 0) {
                out.extend_from_slice(&bytes[..nul]);
                return Ok(out);
            }
            out.extend_from_slice(&bytes);
            current += chunk as u64;
        }
        Ok(out)
    }

    /// Writes `data` followed by a NUL terminator.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the destination is not writable.
    pub fn write_cstring(&mut self, address: u64, data: &[u8]) -> std::result::Result<(), MemoryFault> {
        self.write(address, data)?;
        self.write(address + data.len() as u64, &[0])
    }

    /// Reads a byte.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the address is not readable.
    pub fn read_u8(&self, address: u64) -> std::result::Result<u8, MemoryFault> {
        let mut buf = [0u8; 1];
        self.read(address, &mut buf)?;
        Ok(buf[0])
    }

    /// Reads a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not readable.
    pub fn read_u16(&self, address: u64) -> std::result::Result<u16, MemoryFault> {
        let mut buf = [0u8; 2];
        self.read(address, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Reads a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not readable.
    pub fn read_u32(&self, address: u64) -> std::result::Result<u32, MemoryFault> {
        let mut buf = [0u8; 4];
        self.read(address, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Reads a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not readable.
    pub fn read_u64(&self, address: u64) -> std::result::Result<u64, MemoryFault> {
        let mut buf = [0u8; 8];
        self.read(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a little-endian `u128`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not readable.
    pub fn read_u128(&self, address: u64) -> std::result::Result<u128, MemoryFault> {
        let mut buf = [0u8; 16];
        self.read(address, &mut buf)?;
        Ok(u128::from_le_bytes(buf))
    }

    /// Reads a little-endian value of `size` bytes (1, 2, 4 or 8), zero-extended.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not readable.
    pub fn read_sized(&self, address: u64, size: usize) -> std::result::Result<u64, MemoryFault> {
        let mut buf = [0u8; 8];
        let size = size.min(8);
        self.read(address, &mut buf[..size])?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Writes a byte.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the address is not writable.
    pub fn write_u8(&mut self, address: u64, value: u8) -> std::result::Result<(), MemoryFault> {
        self.write(address, &[value])
    }

    /// Writes a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not writable.
    pub fn write_u16(&mut self, address: u64, value: u16) -> std::result::Result<(), MemoryFault> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not writable.
    pub fn write_u32(&mut self, address: u64, value: u32) -> std::result::Result<(), MemoryFault> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not writable.
    pub fn write_u64(&mut self, address: u64, value: u64) -> std::result::Result<(), MemoryFault> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes a little-endian `u128`.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not writable.
    pub fn write_u128(&mut self, address: u64, value: u128) -> std::result::Result<(), MemoryFault> {
        self.write(address, &value.to_le_bytes())
    }

    /// Writes the low `size` bytes (1, 2, 4 or 8) of `value`, little-endian.
    ///
    /// # Errors
    ///
    /// Returns a [`MemoryFault`] if the range is not writable.
    pub fn write_sized(&mut self, address: u64, size: usize, value: u64) -> std::result::Result<(), MemoryFault> {
        let bytes = value.to_le_bytes();
        self.write(address, &bytes[..size.min(8)])
    }

    /// Forks this address space.
    ///
    /// The fork shares every page copy-on-write with the original; subsequent
    /// writes on either side are invisible to the other.
    #[must_use]
    pub fn fork(&mut self) -> Self {
        Self {
            regions: self
                .regions
                .iter_mut()
                .map(|(base, region)| (*base, region.fork()))
                .collect(),
            mmap_base: self.mmap_base,
            limit: self.limit,
        }
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// Rounds `value` up to a multiple of `align` (a power of two).
///
/// Returns `None` if the result does not fit in a `u64`.
#[must_use]
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// Rounds `value` down to a multiple of `align` (a power of two).
#[must_use]
pub fn align_down(value: u64, align: u64) -> u64 {
    value & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::engine::FaultKind;

    fn space_with_data() -> AddressSpace {
        let mut space = AddressSpace::new();
        space
            .map_at(0x10000, 0x2000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "data")
            .unwrap();
        space
    }

    #[test]
    fn test_address_space_creation() {
        let space = AddressSpace::new();
        assert!(space.is_empty());
        assert_eq!(space.region_count(), 0);
        assert_eq!(space.mapped_size(), 0);
    }

    #[test]
    fn test_map_and_read_data() {
        let mut space = space_with_data();
        space.write(0x10000, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(
            space.read_bytes(0x10000, 4).unwrap(),
            vec![0xDE, 0xAD, 0xBE, 0xEF]
        );
        assert_eq!(space.read_u32(0x10000).unwrap(), 0xEFBE_ADDE);
    }

    #[test]
    fn test_overlap_rejected() {
        let mut space = space_with_data();
        let result = space.map_at(0x11000, 0x1000, MemoryProtection::READ, RegionKind::Mapped, "x");
        assert!(result.is_err());
        let result = space.map_at(0xF000, 0x2000, MemoryProtection::READ, RegionKind::Mapped, "x");
        assert!(result.is_err());
        assert!(space
            .map_at(0x12000, 0x1000, MemoryProtection::READ, RegionKind::Mapped, "x")
            .is_ok());
    }

    #[test]
    fn test_unmapped_access_faults() {
        let space = space_with_data();
        let fault = space.read_u64(0x30000).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Unmapped);
        assert_eq!(fault.address, 0x30000);

        // Straddling the end of the region reports the first unmapped byte
        let fault = space.read_u64(0x11FFC).unwrap_err();
        assert_eq!(fault.address, 0x12000);
    }

    #[test]
    fn test_protection_enforced() {
        let mut space = AddressSpace::new();
        space
            .map_at(0x10000, 0x1000, MemoryProtection::READ_EXECUTE, RegionKind::Image, "text")
            .unwrap();

        let fault = space.write_u32(0x10000, 1).unwrap_err();
        assert_eq!(fault.kind, FaultKind::Protection);
        assert_eq!(fault.access, AccessKind::Write);

        // Privileged writes bypass protection
        space.write_privileged(0x10000, &[1, 0, 0, 0]).unwrap();
        assert_eq!(space.fetch(0x10000).unwrap(), 1);
    }

    #[test]
    fn test_fetch_requires_execute() {
        let space = space_with_data();
        let fault = space.fetch(0x10000).unwrap_err();
        assert_eq!(fault.access, AccessKind::Execute);
        assert_eq!(fault.kind, FaultKind::Protection);
    }

    #[test]
    fn test_failed_write_is_atomic() {
        let mut space = space_with_data();
        assert!(space.write(0x11FFE, &[1, 2, 3, 4]).is_err());
        assert_eq!(space.read_bytes(0x11FFE, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_adjacent_regions_access() {
        let mut space = space_with_data();
        space
            .map_at(0x12000, 0x1000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "next")
            .unwrap();
        space.write_u64(0x11FFC, 0x1122_3344_5566_7788).unwrap();
        assert_eq!(space.read_u64(0x11FFC).unwrap(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_auto_map_finds_gap() {
        let mut space = AddressSpace::with_layout(0x10000, 0x100000);
        let a = space
            .map(0x1000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "a")
            .unwrap();
        let b = space
            .map(0x3000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "b")
            .unwrap();
        assert_eq!(a, 0x10000);
        assert_eq!(b, 0x11000);

        space.unmap(a).unwrap();
        let c = space
            .map(0x1000, MemoryProtection::READ_WRITE, RegionKind::Mapped, "c")
            .unwrap();
        assert_eq!(c, 0x10000);
    }

    #[test]
    fn test_protect() {
        let mut space = space_with_data();
        space.protect(0x11000, 0x1000, MemoryProtection::READ).unwrap();
        assert!(space.write_u8(0x10FFF, 1).is_ok());
        assert!(space.write_u8(0x11000, 1).is_err());
        assert!(space.protect(0x11000, 0x2000, MemoryProtection::READ).is_err());
    }

    #[test]
    fn test_cstring() {
        let mut space = space_with_data();
        space.write_cstring(0x10FFA, b"hello world").unwrap();
        assert_eq!(space.read_cstring(0x10FFA, 64).unwrap(), b"hello world");
        assert_eq!(space.read_cstring(0x10FFA, 5).unwrap(), b"hello");
    }

    #[test]
    fn test_unmap_and_clear() {
        let mut space = space_with_data();
        assert!(space.unmap(0x10001).is_err());
        space.unmap(0x10000).unwrap();
        assert!(space.is_empty());

        let mut space = space_with_data();
        space.clear();
        assert_eq!(space.region_count(), 0);
    }

    #[test]
    fn test_fork_memory_isolation() {
        let mut space = space_with_data();
        space.write_u32(0x10000, 1).unwrap();

        let mut forked = space.fork();
        forked.write_u32(0x10000, 2).unwrap();
        space.write_u32(0x10004, 3).unwrap();

        assert_eq!(space.read_u32(0x10000).unwrap(), 1);
        assert_eq!(forked.read_u32(0x10000).unwrap(), 2);
        assert_eq!(forked.read_u32(0x10004).unwrap(), 0);
    }
}
