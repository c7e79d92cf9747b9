//! Time, process identity, system configuration, random numbers and
//! system properties.

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::{
    emulation::{
        engine::TrapAction,
        memory::PAGE_SIZE,
        runtime::{
            libc::{APP_UID, EINVAL, PROCESS_ID},
            state::HostContext,
            stubs::StubTableBuilder,
        },
    },
    Result,
};

const SC_CLK_TCK: i32 = 6;
const SC_PAGESIZE: i32 = 39;
const SC_PAGE_SIZE: i32 = 40;
const SC_NPROCESSORS_CONF: i32 = 96;
const SC_NPROCESSORS_ONLN: i32 = 97;

const AT_PAGESZ: u64 = 6;

/// `PROP_VALUE_MAX`
const PROP_VALUE_MAX: usize = 92;

/// Values reported by `__system_property_get`; anything else reads as empty.
const PROPERTIES: &[(&str, &str)] = &[
    ("ro.build.version.sdk", "30"),
    ("ro.build.version.release", "11"),
    ("ro.product.cpu.abi", "arm64-v8a"),
    ("ro.product.manufacturer", "Google"),
    ("ro.product.model", "Pixel 4"),
    ("ro.debuggable", "0"),
    ("ro.secure", "1"),
];

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    builder
        .function("time", time)
        .function("gettimeofday", gettimeofday)
        .function("clock_gettime", clock_gettime)
        .function("getpid", getpid)
        .function("getppid", getppid)
        .function("getuid", getuid)
        .function("geteuid", getuid)
        .function("getgid", getuid)
        .function("getegid", getuid)
        .function("sysconf", sysconf)
        .function("getpagesize", getpagesize)
        .function("getauxval", getauxval)
        .function("rand", rand)
        .function("random", rand)
        .function("lrand48", rand)
        .function("srand", srand)
        .function("srandom", srand)
        .function("srand48", srand)
        .function("arc4random", arc4random)
        .function("arc4random_uniform", arc4random_uniform)
        .function("arc4random_buf", arc4random_buf)
        .function("getrandom", getrandom)
        .function("__system_property_get", system_property_get)
        .function("getenv", getenv)
        .function("setenv", setenv)
        .function("usleep", sleep)
        .function("nanosleep", sleep)
        .function("sleep", sleep)
}

/// Writes the current time as a `struct timespec`.
pub(crate) fn write_timespec(ctx: &mut HostContext<'_>, address: u64) -> Result<()> {
    let now = ctx.state.clock().now();
    ctx.memory.write_u64(address, now.as_secs())?;
    ctx.memory.write_u64(address + 8, u64::from(now.subsec_nanos()))?;
    Ok(())
}

/// Writes the current time as a `struct timeval`.
pub(crate) fn write_timeval(ctx: &mut HostContext<'_>, address: u64) -> Result<()> {
    let now = ctx.state.clock().now();
    ctx.memory.write_u64(address, now.as_secs())?;
    ctx.memory.write_u64(address + 8, u64::from(now.subsec_micros()))?;
    Ok(())
}

/// Fills `len` guest bytes at `address` from the session's random generator.
pub(crate) fn fill_random(ctx: &mut HostContext<'_>, address: u64, len: usize) -> Result<()> {
    let mut bytes = vec![0u8; len];
    ctx.state.rng().fill_bytes(&mut bytes);
    ctx.memory.write(address, &bytes)?;
    Ok(())
}

fn time(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let seconds = ctx.state.clock().now().as_secs();
    let out = ctx.arg(0);
    if out != 0 {
        ctx.memory.write_u64(out, seconds)?;
    }
    Ok(seconds.into())
}

fn gettimeofday(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let out = ctx.arg(0);
    if out != 0 {
        write_timeval(ctx, out)?;
    }
    Ok(0.into())
}

fn clock_gettime(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let out = ctx.arg(1);
    write_timespec(ctx, out)?;
    Ok(0.into())
}

fn getpid(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(PROCESS_ID.into())
}

fn getppid(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(1.into())
}

fn getuid(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(APP_UID.into())
}

fn sysconf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let value = match ctx.arg_i32(0) {
        SC_PAGESIZE | SC_PAGE_SIZE => PAGE_SIZE as u64,
        SC_NPROCESSORS_CONF | SC_NPROCESSORS_ONLN => 8,
        SC_CLK_TCK => 100,
        name => {
            log::debug!("sysconf({name}) is not supported");
            ctx.set_errno(EINVAL)?;
            u64::MAX
        }
    };
    Ok(value.into())
}

fn getpagesize(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok((PAGE_SIZE as u64).into())
}

fn getauxval(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let value = if ctx.arg(0) == AT_PAGESZ {
        PAGE_SIZE as u64
    } else {
        0
    };
    Ok(value.into())
}

fn rand(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let value: u32 = ctx.state.rng().gen_range(0..=i32::MAX as u32);
    Ok(u64::from(value).into())
}

fn srand(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let seed = ctx.arg(0);
    *ctx.state.rng() = StdRng::seed_from_u64(seed);
    Ok(0.into())
}

fn arc4random(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(u64::from(ctx.state.rng().next_u32()).into())
}

fn arc4random_uniform(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let bound = ctx.arg(0) as u32;
    if bound < 2 {
        return Ok(0.into());
    }
    Ok(u64::from(ctx.state.rng().gen_range(0..bound)).into())
}

fn arc4random_buf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (address, len) = (ctx.arg(0), ctx.arg_usize(1));
    fill_random(ctx, address, len)?;
    Ok(0.into())
}

fn getrandom(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (address, len) = (ctx.arg(0), ctx.arg_usize(1));
    fill_random(ctx, address, len)?;
    Ok((len as u64).into())
}

fn system_property_get(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let name = ctx.read_string(ctx.arg(0))?;
    let value = PROPERTIES
        .iter()
        .find(|(key, _)| *key == name)
        .map_or("", |(_, value)| *value);
    let bytes = &value.as_bytes()[..value.len().min(PROP_VALUE_MAX - 1)];
    log::debug!("__system_property_get({name}) = {value:?}");
    ctx.memory.write_cstring(ctx.arg(1), bytes)?;
    Ok((bytes.len() as u64).into())
}

fn getenv(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    log::trace!("getenv({})", ctx.read_string(ctx.arg(0))?);
    Ok(0.into())
}

fn setenv(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}

fn sleep(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}

#[cfg(test)]
mod tests {
    use crate::{emulation::runtime::DispatchTable, test::TestRuntime};

    #[test]
    fn test_fixed_clock() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(16);
        assert_eq!(rt.host_int("time", &[0]), 1_700_000_000);
        assert_eq!(rt.host_int("clock_gettime", &[1, out]), 0);
        assert_eq!(rt.memory.read_u64(out).unwrap(), 1_700_000_000);
        assert_eq!(rt.memory.read_u64(out + 8).unwrap(), 0);
        assert_eq!(rt.host_int("gettimeofday", &[out, 0]), 0);
        assert_eq!(rt.memory.read_u64(out).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_sysconf() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(rt.host_int("sysconf", &[39]), 4096);
        assert_eq!(rt.host_int("sysconf", &[97]), 8);
        assert_eq!(rt.host_int("sysconf", &[12345]), u64::MAX);
        assert_eq!(rt.host_int("getpagesize", &[]), 4096);
    }

    #[test]
    fn test_random_is_reproducible() {
        let mut first = TestRuntime::new(DispatchTable::empty());
        let mut second = TestRuntime::new(DispatchTable::empty());
        let a = first.host_int("arc4random", &[]);
        assert_eq!(a, second.host_int("arc4random", &[]));
        assert!(first.host_int("rand", &[]) <= i32::MAX as u64);
        assert!(first.host_int("arc4random_uniform", &[10]) < 10);

        first.host_int("srand", &[7]);
        second.host_int("srand", &[7]);
        assert_eq!(first.host_int("rand", &[]), second.host_int("rand", &[]));
    }

    #[test]
    fn test_arc4random_buf_fills() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let buffer = rt.alloc(64);
        rt.host_int("arc4random_buf", &[buffer, 64]);
        let bytes = rt.memory.read_bytes(buffer, 64).unwrap();
        assert!(bytes.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_system_property_get() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let name = rt.cstring("ro.build.version.sdk");
        let unknown = rt.cstring("persist.unknown");
        let value = rt.alloc(92);
        assert_eq!(rt.host_int("__system_property_get", &[name, value]), 2);
        assert_eq!(rt.read_string(value), "30");
        assert_eq!(rt.host_int("__system_property_get", &[unknown, value]), 0);
        assert_eq!(rt.read_string(value), "");
    }

    #[test]
    fn test_identity() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(rt.host_int("getpid", &[]), rt.host_int("gettid", &[]));
        assert_eq!(rt.host_int("getuid", &[]), 10_234);
    }
}
