//! `libdl`: runtime symbol lookup against the session's resolution table.

use crate::{
    emulation::{
        engine::TrapAction,
        runtime::{
            state::HostContext,
            stubs::{StubTable, StubTableBuilder},
        },
    },
    Result,
};

/// Handle returned by every successful `dlopen`.
const LIBRARY_HANDLE: u64 = 0x00DE_F00D;

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    builder
        .function("dlopen", dlopen)
        .function("android_dlopen_ext", dlopen)
        .function("dlsym", dlsym)
        .function("dlvsym", dlsym)
        .function("dlclose", dlclose)
        .function("dlerror", dlerror)
        .function("dladdr", dladdr)
        .function("dl_iterate_phdr", dl_iterate_phdr)
}

/// Resolves `name` the way the linker would: loaded images, then host stubs,
/// then data stubs.
pub(crate) fn lookup(ctx: &HostContext<'_>, name: &str) -> Option<u64> {
    let state = &*ctx.state;
    state
        .symbols()
        .address(name)
        .or_else(|| {
            state
                .stubs()
                .index_of(name)
                .map(|index| StubTable::trampoline(state.layout().stub_base, index))
        })
        .or_else(|| state.layout().data.get(name).copied())
}

fn dlopen(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let path = ctx.arg(0);
    if path != 0 {
        log::debug!("dlopen({})", ctx.read_string(path)?);
    }
    Ok(LIBRARY_HANDLE.into())
}

fn dlsym(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let name = ctx.read_string(ctx.arg(1))?;
    match lookup(ctx, &name) {
        Some(address) => {
            log::debug!("dlsym({name}) = {address:#x}");
            Ok(address.into())
        }
        None => {
            log::warn!("dlsym({name}) failed");
            ctx.state.dl_error = Some(format!("undefined symbol: {name}"));
            Ok(0.into())
        }
    }
}

fn dlclose(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}

fn dlerror(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    match ctx.state.dl_error.take() {
        Some(message) => Ok(ctx.alloc_cstring(message.as_bytes())?.into()),
        None => Ok(0.into()),
    }
}

fn dladdr(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}

fn dl_iterate_phdr(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}

#[cfg(test)]
mod tests {
    use crate::{
        emulation::runtime::{DispatchTable, StubTable},
        test::TestRuntime,
    };

    #[test]
    fn test_dlsym_finds_stubs_and_data() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let handle = rt.host_int("dlopen", &[0, 0]);
        assert_ne!(handle, 0);

        let malloc = rt.cstring("malloc");
        let index = rt.state.stubs().index_of("malloc").unwrap();
        assert_eq!(
            rt.host_int("dlsym", &[handle, malloc]),
            StubTable::trampoline(rt.state.layout().stub_base, index)
        );

        let guard = rt.cstring("__stack_chk_guard");
        let address = rt.host_int("dlsym", &[handle, guard]);
        assert_eq!(rt.memory.read_u64(address).unwrap(), rt.state.canary());
    }

    #[test]
    fn test_dlerror_reports_once() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let missing = rt.cstring("does_not_exist");
        assert_eq!(rt.host_int("dlsym", &[1, missing]), 0);
        let message = rt.host_int("dlerror", &[]);
        assert_eq!(rt.read_string(message), "undefined symbol: does_not_exist");
        assert_eq!(rt.host_int("dlerror", &[]), 0);
    }
}
