//! Raw Linux system calls (`SVC #0`, number in `x8`).
//!
//! Results follow the kernel convention: a non-negative value on success,
//! `-errno` on failure. Unknown numbers return `-ENOSYS`.

use crate::{
    emulation::{
        engine::{Fault, TrapAction},
        runtime::{
            libc::{
                liblog::GUEST_TARGET,
                memory::{map_anonymous, protect, unmap},
                sys::{fill_random, write_timespec, write_timeval},
                APP_UID, ENOSYS, PROCESS_ID,
            },
            state::HostContext,
        },
    },
    Result,
};

const WRITE: u64 = 64;
const EXIT: u64 = 93;
const EXIT_GROUP: u64 = 94;
const FUTEX: u64 = 98;
const CLOCK_GETTIME: u64 = 113;
const SCHED_YIELD: u64 = 124;
const RT_SIGACTION: u64 = 134;
const RT_SIGPROCMASK: u64 = 135;
const GETTIMEOFDAY: u64 = 169;
const GETPID: u64 = 172;
const GETPPID: u64 = 173;
const GETUID: u64 = 174;
const GETEUID: u64 = 175;
const GETGID: u64 = 176;
const GETEGID: u64 = 177;
const GETTID: u64 = 178;
const MUNMAP: u64 = 215;
const MMAP: u64 = 222;
const MPROTECT: u64 = 226;
const GETRANDOM: u64 = 278;

/// Services the system call described by the trapping thread's registers.
pub(crate) fn dispatch(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let number = ctx.arg(8);
    let result: i64 = match number {
        GETPID | GETTID => PROCESS_ID as i64,
        GETPPID => 1,
        GETUID | GETEUID | GETGID | GETEGID => APP_UID as i64,
        CLOCK_GETTIME => {
            let out = ctx.arg(1);
            write_timespec(ctx, out)?;
            0
        }
        GETTIMEOFDAY => {
            let out = ctx.arg(0);
            if out != 0 {
                write_timeval(ctx, out)?;
            }
            0
        }
        GETRANDOM => {
            let (address, len) = (ctx.arg(0), ctx.arg_usize(1));
            fill_random(ctx, address, len)?;
            len as i64
        }
        WRITE => {
            let (fd, len) = (ctx.arg(0), ctx.arg_usize(2));
            let bytes = ctx.memory.read_bytes(ctx.arg(1), len)?;
            log::info!(
                target: GUEST_TARGET,
                "fd {fd}: {}",
                String::from_utf8_lossy(&bytes).trim_end()
            );
            len as i64
        }
        EXIT | EXIT_GROUP => {
            let function = if number == EXIT { "exit" } else { "exit_group" };
            return Ok(TrapAction::Exit(Fault::Exit {
                function,
                status: i64::from(ctx.arg_i32(0)),
            }));
        }
        MMAP => {
            let (len, prot, flags) = (ctx.arg_usize(1), ctx.arg(2), ctx.arg(3));
            let address = map_anonymous(ctx, len, prot, flags)?;
            if address == u64::MAX {
                -i64::from(last_errno(ctx)?)
            } else {
                address as i64
            }
        }
        MUNMAP => {
            let address = ctx.arg(0);
            unmap(ctx, address)?;
            0
        }
        MPROTECT => {
            let (address, len, prot) = (ctx.arg(0), ctx.arg_usize(1), ctx.arg(2));
            if protect(ctx, address, len, prot)? == u64::MAX {
                -i64::from(last_errno(ctx)?)
            } else {
                0
            }
        }
        FUTEX | SCHED_YIELD | RT_SIGACTION | RT_SIGPROCMASK => 0,
        _ => {
            log::warn!("unsupported syscall {number} at {:#x}", ctx.cpu.pc);
            -i64::from(ENOSYS)
        }
    };
    Ok((result as u64).into())
}

fn last_errno(ctx: &HostContext<'_>) -> Result<i32> {
    Ok(ctx.memory.read_u32(ctx.state.layout().errno)? as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{emulation::runtime::DispatchTable, test::TestRuntime};

    fn result(action: TrapAction) -> i64 {
        match action {
            TrapAction::Return(crate::emulation::ReturnValue::Int(value)) => value as i64,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_identity_syscalls() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(result(rt.syscall(GETPID, &[])), PROCESS_ID as i64);
        assert_eq!(result(rt.syscall(GETTID, &[])), PROCESS_ID as i64);
        assert_eq!(result(rt.syscall(GETUID, &[])), APP_UID as i64);
    }

    #[test]
    fn test_time_and_random() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(32);
        assert_eq!(result(rt.syscall(CLOCK_GETTIME, &[0, out])), 0);
        assert_eq!(rt.memory.read_u64(out).unwrap(), 1_700_000_000);
        assert_eq!(result(rt.syscall(GETRANDOM, &[out, 32, 0])), 32);
    }

    #[test]
    fn test_write_and_exit() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let text = rt.cstring("hello\n");
        assert_eq!(result(rt.syscall(WRITE, &[1, text, 6])), 6);
        assert_eq!(
            rt.syscall(EXIT_GROUP, &[2]),
            TrapAction::Exit(Fault::Exit {
                function: "exit_group",
                status: 2
            })
        );
    }

    #[test]
    fn test_mmap_family() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let address = result(rt.syscall(MMAP, &[0, 0x2000, 3, 0x22, u64::MAX, 0])) as u64;
        assert_eq!(address % 0x1000, 0);
        assert_eq!(result(rt.syscall(MPROTECT, &[address, 0x1000, 1])), 0);
        assert_eq!(
            rt.memory.protection(address),
            Some(crate::emulation::MemoryProtection::READ)
        );
        assert_eq!(result(rt.syscall(MUNMAP, &[address, 0x2000])), 0);
        assert_eq!(result(rt.syscall(MMAP, &[0, 0x1000, 3, 0x02, 3, 0])), -22);
    }

    #[test]
    fn test_unknown_syscall() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(result(rt.syscall(9999, &[])), -38);
    }
}
