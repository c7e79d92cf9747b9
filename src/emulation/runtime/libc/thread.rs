//! Threads, thread-local keys, C++ runtime support and process termination.
//!
//! The emulated process has exactly one thread. Locks are no-ops and
//! `pthread_create` fails with `EAGAIN`; `pthread_once` runs its initializer
//! by tail-calling it from the trampoline.

use crate::{
    emulation::{
        engine::{Fault, TrapAction},
        runtime::{
            libc::{ABORT_STATUS, EAGAIN, EINVAL, PROCESS_ID},
            state::{ExitHandler, HostContext},
            stubs::StubTableBuilder,
        },
    },
    Error, Result,
};

/// `PTHREAD_KEYS_MAX` in bionic.
const KEYS_MAX: usize = 128;

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    let builder = [
        "pthread_mutex_init",
        "pthread_mutex_destroy",
        "pthread_mutex_lock",
        "pthread_mutex_trylock",
        "pthread_mutex_unlock",
        "pthread_mutexattr_init",
        "pthread_mutexattr_settype",
        "pthread_mutexattr_destroy",
        "pthread_cond_init",
        "pthread_cond_destroy",
        "pthread_cond_wait",
        "pthread_cond_timedwait",
        "pthread_cond_signal",
        "pthread_cond_broadcast",
        "pthread_rwlock_init",
        "pthread_rwlock_destroy",
        "pthread_rwlock_rdlock",
        "pthread_rwlock_wrlock",
        "pthread_rwlock_unlock",
        "pthread_attr_init",
        "pthread_attr_destroy",
        "pthread_attr_setstacksize",
        "pthread_attr_setdetachstate",
        "pthread_detach",
        "pthread_atfork",
        "sched_yield",
        "__cxa_finalize",
        "__cxa_guard_abort",
    ]
    .into_iter()
    .fold(builder, |builder, name| builder.function(name, succeed));

    builder
        .function("pthread_once", pthread_once)
        .function("pthread_create", pthread_create)
        .function("pthread_join", pthread_create)
        .function("pthread_self", pthread_self)
        .function("gettid", gettid)
        .function("pthread_key_create", pthread_key_create)
        .function("pthread_key_delete", pthread_key_delete)
        .function("pthread_getspecific", pthread_getspecific)
        .function("pthread_setspecific", pthread_setspecific)
        .function("__cxa_atexit", cxa_atexit)
        .function("atexit", atexit)
        .function("__cxa_guard_acquire", cxa_guard_acquire)
        .function("__cxa_guard_release", cxa_guard_release)
        .function("__cxa_allocate_exception", cxa_allocate_exception)
        .function("__cxa_throw", cxa_throw)
        .function("__cxa_pure_virtual", cxa_pure_virtual)
        .function("__stack_chk_fail", stack_chk_fail)
        .function("abort", abort)
        .function("exit", exit)
        .function("_exit", exit_immediately)
        .function("raise", raise)
        .function("__errno", errno)
        .function("__errno_location", errno)
}

fn succeed(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}

fn pthread_once(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (control, init) = (ctx.arg(0), ctx.arg(1));
    if ctx.memory.read_u32(control)? != 0 {
        return Ok(0.into());
    }
    ctx.memory.write_u32(control, 1)?;
    ctx.cpu.set_x(0, 0);
    Ok(TrapAction::Jump(init))
}

fn pthread_create(_: &mut HostContext<'_>) -> Result<TrapAction> {
    log::warn!("guest tried to start a thread; refusing with EAGAIN");
    Ok((EAGAIN as u64).into())
}

fn pthread_self(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(ctx.state.layout().tls.into())
}

fn gettid(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(PROCESS_ID.into())
}

fn pthread_key_create(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (out, destructor) = (ctx.arg(0), ctx.arg(1));
    let keys = &mut ctx.state.tls_keys;
    let index = match keys.iter().position(Option::is_none) {
        Some(index) => index,
        None if keys.len() < KEYS_MAX => {
            keys.push(None);
            keys.len() - 1
        }
        None => return Ok((EAGAIN as u64).into()),
    };
    keys[index] = Some(destructor);
    ctx.state.tls_values.remove(&(index as u32));
    ctx.memory.write_u32(out, index as u32)?;
    Ok(0.into())
}

fn pthread_key_delete(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let key = ctx.arg(0) as u32;
    if !matches!(ctx.state.tls_keys.get(key as usize), Some(Some(_))) {
        return Ok((EINVAL as u64).into());
    }
    ctx.state.tls_keys[key as usize] = None;
    ctx.state.tls_values.remove(&key);
    Ok(0.into())
}

fn pthread_getspecific(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let key = ctx.arg(0) as u32;
    Ok(ctx.state.tls_values.get(&key).copied().unwrap_or(0).into())
}

fn pthread_setspecific(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (key, value) = (ctx.arg(0) as u32, ctx.arg(1));
    if !matches!(ctx.state.tls_keys.get(key as usize), Some(Some(_))) {
        return Ok((EINVAL as u64).into());
    }
    ctx.state.tls_values.insert(key, value);
    Ok(0.into())
}

fn cxa_atexit(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let handler = ExitHandler {
        function: ctx.arg(0),
        argument: ctx.arg(1),
        dso: ctx.arg(2),
    };
    ctx.state.exit_handlers.push(handler);
    Ok(0.into())
}

fn atexit(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let handler = ExitHandler {
        function: ctx.arg(0),
        argument: 0,
        dso: 0,
    };
    ctx.state.exit_handlers.push(handler);
    Ok(0.into())
}

fn cxa_guard_acquire(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let initialized = ctx.memory.read_u8(ctx.arg(0))? != 0;
    Ok(u64::from(!initialized).into())
}

fn cxa_guard_release(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    ctx.memory.write_u8(ctx.arg(0), 1)?;
    Ok(0.into())
}

fn cxa_allocate_exception(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let size = ctx.arg_usize(0);
    let address = ctx.alloc(size)?;
    ctx.memory.fill(address, size, 0)?;
    Ok(address.into())
}

fn cxa_throw(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Err(Error::Error(format!(
        "uncaught C++ exception {:#x} (type info {:#x})",
        ctx.arg(0),
        ctx.arg(1)
    )))
}

fn cxa_pure_virtual(_: &mut HostContext<'_>) -> Result<TrapAction> {
    terminate("__cxa_pure_virtual", ABORT_STATUS)
}

fn stack_chk_fail(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    log::error!("stack corruption detected (return address {:#x})", ctx.cpu.lr());
    terminate("__stack_chk_fail", ABORT_STATUS)
}

fn abort(_: &mut HostContext<'_>) -> Result<TrapAction> {
    terminate("abort", ABORT_STATUS)
}

fn exit(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    terminate("exit", i64::from(ctx.arg_i32(0)))
}

fn exit_immediately(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    terminate("_exit", i64::from(ctx.arg_i32(0)))
}

fn raise(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    terminate("raise", 128 + i64::from(ctx.arg_i32(0)))
}

fn errno(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(ctx.state.layout().errno.into())
}

fn terminate(function: &'static str, status: i64) -> Result<TrapAction> {
    log::debug!("guest called {function} with status {status}");
    Ok(TrapAction::Exit(Fault::Exit { function, status }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emulation::runtime::DispatchTable, test::TestRuntime};

    #[test]
    fn test_pthread_once_jumps_once() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let control = rt.alloc(4);
        assert_eq!(
            rt.host("pthread_once", &[control, 0x4000_1234]),
            TrapAction::Jump(0x4000_1234)
        );
        assert_eq!(rt.cpu.x(0), 0);
        assert_eq!(rt.host_int("pthread_once", &[control, 0x4000_1234]), 0);
    }

    #[test]
    fn test_thread_keys() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(8);
        assert_eq!(rt.host_int("pthread_key_create", &[out, 0]), 0);
        let key = u64::from(rt.memory.read_u32(out).unwrap());
        assert_eq!(rt.host_int("pthread_getspecific", &[key]), 0);
        assert_eq!(rt.host_int("pthread_setspecific", &[key, 0xAB]), 0);
        assert_eq!(rt.host_int("pthread_getspecific", &[key]), 0xAB);
        assert_eq!(rt.host_int("pthread_key_delete", &[key]), 0);
        assert_eq!(rt.host_int("pthread_setspecific", &[key, 1]), EINVAL as u64);
        assert_eq!(rt.host_int("pthread_key_create", &[out, 0]), 0);
        assert_eq!(u64::from(rt.memory.read_u32(out).unwrap()), key);
        assert_eq!(rt.host_int("pthread_getspecific", &[key]), 0);
    }

    #[test]
    fn test_guard_and_atexit() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let guard = rt.alloc(8);
        assert_eq!(rt.host_int("__cxa_guard_acquire", &[guard]), 1);
        rt.host_int("__cxa_guard_release", &[guard]);
        assert_eq!(rt.host_int("__cxa_guard_acquire", &[guard]), 0);

        assert_eq!(rt.host_int("__cxa_atexit", &[0x4000_0100, 7, 0x4000_0000]), 0);
        assert_eq!(
            rt.state.exit_handlers(),
            &[ExitHandler {
                function: 0x4000_0100,
                argument: 7,
                dso: 0x4000_0000
            }]
        );
    }

    #[test]
    fn test_termination() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(
            rt.host("abort", &[]),
            TrapAction::Exit(Fault::Exit {
                function: "abort",
                status: ABORT_STATUS
            })
        );
        assert_eq!(
            rt.host("exit", &[3]),
            TrapAction::Exit(Fault::Exit {
                function: "exit",
                status: 3
            })
        );
        assert!(matches!(
            rt.host("__cxa_throw", &[1, 2, 3]),
            TrapAction::Exit(Fault::HostFailure { .. })
        ));
    }

    #[test]
    fn test_errno_and_self() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let errno = rt.host_int("__errno", &[]);
        assert_eq!(errno, rt.state.layout().errno);
        assert_eq!(rt.host_int("pthread_self", &[]), rt.state.layout().tls);
        assert_eq!(rt.host_int("pthread_create", &[0, 0, 0, 0]), EAGAIN as u64);
    }
}
