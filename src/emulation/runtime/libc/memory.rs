//! Heap allocation, raw memory operations and anonymous mappings.

use crate::{
    emulation::{
        engine::{Fault, TrapAction},
        memory::{align_up, MemoryProtection, PAGE_SIZE},
        runtime::{
            libc::{EINVAL, ENOMEM},
            state::HostContext,
            stubs::StubTableBuilder,
        },
    },
    Error, Result,
};

/// `MAP_ANONYMOUS`
const MAP_ANONYMOUS: u64 = 0x20;

/// `MAP_FAILED`
const MAP_FAILED: u64 = u64::MAX;

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    builder
        .function("malloc", malloc)
        .function("calloc", calloc)
        .function("realloc", realloc)
        .function("free", free)
        .function("posix_memalign", posix_memalign)
        .function("memalign", memalign)
        .function("aligned_alloc", memalign)
        .function("malloc_usable_size", malloc_usable_size)
        .function("_Znwm", operator_new)
        .function("_Znam", operator_new)
        .function("_ZdlPv", free)
        .function("_ZdaPv", free)
        .function("_ZdlPvm", free)
        .function("_ZdaPvm", free)
        .function("memcpy", memcpy)
        .function("memmove", memcpy)
        .function("memset", memset)
        .function("memcmp", memcmp)
        .function("bcmp", memcmp)
        .function("memchr", memchr)
        .function("__memcpy_chk", memcpy_chk)
        .function("__memmove_chk", memcpy_chk)
        .function("__memset_chk", memset_chk)
        .function("mmap", mmap)
        .function("mmap64", mmap)
        .function("munmap", munmap)
        .function("mprotect", mprotect)
}

fn malloc(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let size = ctx.arg_usize(0);
    allocate(ctx, size, 16)
}

fn calloc(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let Some(size) = ctx.arg_usize(0).checked_mul(ctx.arg_usize(1)) else {
        ctx.set_errno(ENOMEM)?;
        return Ok(0.into());
    };
    match ctx.state.heap_mut().alloc(size) {
        Ok(address) => {
            ctx.memory.fill(address, size, 0)?;
            Ok(address.into())
        }
        Err(error) => out_of_memory(ctx, &error),
    }
}

fn realloc(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (old, size) = (ctx.arg(0), ctx.arg_usize(1));
    if old == 0 {
        return allocate(ctx, size, 16);
    }
    if size == 0 {
        ctx.free(old);
        return Ok(0.into());
    }
    let Some(old_size) = ctx.state.heap().allocation_size(old) else {
        return Err(Error::Error(format!("realloc of unknown pointer {old:#x}")));
    };
    if size <= old_size {
        return Ok(old.into());
    }
    let new = match ctx.state.heap_mut().alloc(size) {
        Ok(address) => address,
        Err(error) => return out_of_memory(ctx, &error),
    };
    ctx.memory.copy(new, old, old_size)?;
    ctx.free(old);
    Ok(new.into())
}

fn free(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let address = ctx.arg(0);
    ctx.free(address);
    Ok(0.into())
}

fn posix_memalign(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (out, alignment, size) = (ctx.arg(0), ctx.arg(1), ctx.arg_usize(2));
    if !alignment.is_power_of_two() || alignment % 8 != 0 {
        return Ok((EINVAL as u64).into());
    }
    match ctx.state.heap_mut().alloc_aligned(size, alignment) {
        Ok(address) => {
            ctx.memory.write_u64(out, address)?;
            Ok(0.into())
        }
        Err(_) => Ok((ENOMEM as u64).into()),
    }
}

fn memalign(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (alignment, size) = (ctx.arg(0), ctx.arg_usize(1));
    allocate(ctx, size, alignment)
}

fn malloc_usable_size(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let size = ctx.state.heap().allocation_size(ctx.arg(0)).unwrap_or(0);
    Ok((size as u64).into())
}

fn operator_new(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let size = ctx.arg_usize(0);
    let address = ctx.state.heap_mut().alloc(size)?;
    Ok(address.into())
}

fn memcpy(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (dest, src, len) = (ctx.arg(0), ctx.arg(1), ctx.arg_usize(2));
    ctx.memory.copy(dest, src, len)?;
    Ok(dest.into())
}

fn memset(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (dest, value, len) = (ctx.arg(0), ctx.arg(1) as u8, ctx.arg_usize(2));
    ctx.memory.fill(dest, len, value)?;
    Ok(dest.into())
}

fn memcmp(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let len = ctx.arg_usize(2);
    let a = ctx.memory.read_bytes(ctx.arg(0), len)?;
    let b = ctx.memory.read_bytes(ctx.arg(1), len)?;
    Ok(compare(&a, &b).into())
}

fn memchr(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (start, value, len) = (ctx.arg(0), ctx.arg(1) as u8, ctx.arg_usize(2));
    let bytes = ctx.memory.read_bytes(start, len)?;
    let found = bytes.iter().position(|&b| b == value);
    Ok(found.map_or(0, |offset| start + offset as u64).into())
}

fn memcpy_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    check_object_size(ctx.arg_usize(2), ctx.arg_usize(3), "__memcpy_chk")?;
    memcpy(ctx)
}

fn memset_chk(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    check_object_size(ctx.arg_usize(2), ctx.arg_usize(3), "__memset_chk")?;
    memset(ctx)
}

fn mmap(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (len, prot, flags) = (ctx.arg_usize(1), ctx.arg(2), ctx.arg(3));
    Ok(map_anonymous(ctx, len, prot, flags)?.into())
}

fn munmap(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let address = ctx.arg(0);
    unmap(ctx, address)?;
    Ok(0.into())
}

fn mprotect(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (address, len, prot) = (ctx.arg(0), ctx.arg_usize(1), ctx.arg(2));
    Ok(protect(ctx, address, len, prot)?.into())
}

/// Services an anonymous `mmap` from the heap; returns the address or `MAP_FAILED`.
pub(crate) fn map_anonymous(
    ctx: &mut HostContext<'_>,
    len: usize,
    prot: u64,
    flags: u64,
) -> Result<u64> {
    if flags & MAP_ANONYMOUS == 0 || len == 0 {
        log::debug!("mmap of {len:#x} bytes with flags {flags:#x} refused");
        ctx.set_errno(EINVAL)?;
        return Ok(MAP_FAILED);
    }
    let Some(size) = align_up(len as u64, PAGE_SIZE as u64) else {
        ctx.set_errno(ENOMEM)?;
        return Ok(MAP_FAILED);
    };
    let size = size as usize;
    let address = match ctx.state.heap_mut().alloc_aligned(size, PAGE_SIZE as u64) {
        Ok(address) => address,
        Err(_) => {
            ctx.set_errno(ENOMEM)?;
            return Ok(MAP_FAILED);
        }
    };
    ctx.memory.fill(address, size, 0)?;
    if prot != 3 {
        ctx.memory.protect(address, size, MemoryProtection::from_prot(prot))?;
    }
    Ok(address)
}

/// Releases a mapping made by [`map_anonymous`], restoring its protection.
pub(crate) fn unmap(ctx: &mut HostContext<'_>, address: u64) -> Result<()> {
    if let Some(size) = ctx.state.heap().allocation_size(address) {
        ctx.memory.protect(address, size, MemoryProtection::READ_WRITE)?;
    }
    ctx.free(address);
    Ok(())
}

/// Changes protection of heap pages; returns 0 or -1.
pub(crate) fn protect(ctx: &mut HostContext<'_>, address: u64, len: usize, prot: u64) -> Result<u64> {
    if !ctx.state.heap().contains(address) {
        log::debug!("mprotect outside the heap at {address:#x} ignored");
        return Ok(0);
    }
    let Some(len) = align_up(len as u64, PAGE_SIZE as u64) else {
        ctx.set_errno(EINVAL)?;
        return Ok(u64::MAX);
    };
    if ctx
        .memory
        .protect(address, len as usize, MemoryProtection::from_prot(prot))
        .is_err()
    {
        ctx.set_errno(EINVAL)?;
        return Ok(u64::MAX);
    }
    Ok(0)
}

fn allocate(ctx: &mut HostContext<'_>, size: usize, alignment: u64) -> Result<TrapAction> {
    match ctx.state.heap_mut().alloc_aligned(size, alignment) {
        Ok(address) => Ok(address.into()),
        Err(error) => out_of_memory(ctx, &error),
    }
}

fn out_of_memory(ctx: &mut HostContext<'_>, error: &Error) -> Result<TrapAction> {
    log::debug!("guest allocation failed: {error}");
    ctx.set_errno(ENOMEM)?;
    Ok(0.into())
}

/// Aborts the way bionic's `__fortify_fatal` does when `len` exceeds `object_size`.
pub(super) fn check_object_size(
    len: usize,
    object_size: usize,
    function: &'static str,
) -> Result<()> {
    if len > object_size {
        log::error!("{function}: prevented {len}-byte write into {object_size}-byte buffer");
        return Err(Fault::Exit {
            function,
            status: super::ABORT_STATUS,
        }
        .into());
    }
    Ok(())
}

/// `memcmp`-style comparison: the difference of the first differing bytes.
pub(super) fn compare(a: &[u8], b: &[u8]) -> u64 {
    a.iter()
        .zip(b)
        .find(|(x, y)| x != y)
        .map_or(0, |(x, y)| (i32::from(*x) - i32::from(*y)) as i64 as u64)
}
