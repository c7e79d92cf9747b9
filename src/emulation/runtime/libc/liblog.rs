//! `liblog` and the stdio output functions.
//!
//! Guest log lines and anything written to `stdout`/`stderr` are forwarded to
//! the `log` facade under the `droidemu::guest` target, so they interleave with
//! the emulator's own diagnostics.

use log::Level;

use crate::{
    emulation::{
        engine::{Fault, TrapAction},
        runtime::{
            libc::{
                format::{format_call, Arguments},
                ABORT_STATUS,
            },
            state::HostContext,
            stubs::StubTableBuilder,
        },
    },
    Result,
};

/// Log target for guest output.
pub const GUEST_TARGET: &str = "droidemu::guest";

pub(super) fn register(builder: StubTableBuilder) -> StubTableBuilder {
    builder
        .function("__android_log_print", android_log_print)
        .function("__android_log_vprint", android_log_vprint)
        .function("__android_log_write", android_log_write)
        .function("__android_log_buf_write", android_log_buf_write)
        .function("__android_log_assert", android_log_assert)
        .function("__android_log_is_loggable", android_log_is_loggable)
        .function("printf", printf)
        .function("vprintf", vprintf)
        .function("fprintf", fprintf)
        .function("vfprintf", vfprintf)
        .function("puts", puts)
        .function("fputs", fputs)
        .function("putchar", putchar)
        .function("fputc", putchar)
        .function("fwrite", fwrite)
        .function("fflush", fflush)
}

/// Maps an Android log priority to a `log` level.
fn level(priority: i32) -> Level {
    match priority {
        ..=2 => Level::Trace,
        3 => Level::Debug,
        4 => Level::Info,
        5 => Level::Warn,
        _ => Level::Error,
    }
}

fn emit(priority: i32, tag: &str, message: &[u8]) {
    let message = String::from_utf8_lossy(message);
    log::log!(target: GUEST_TARGET, level(priority), "{tag}: {}", message.trim_end());
}

fn tag(ctx: &HostContext<'_>, address: u64) -> Result<String> {
    if address == 0 {
        return Ok(String::new());
    }
    ctx.read_string(address)
}

fn android_log_print(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(2), Arguments::Variadic(3))?;
    emit(ctx.arg_i32(0), &tag(ctx, ctx.arg(1))?, &text);
    Ok((text.len() as u64).into())
}

fn android_log_vprint(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(2), Arguments::VaList(3))?;
    emit(ctx.arg_i32(0), &tag(ctx, ctx.arg(1))?, &text);
    Ok((text.len() as u64).into())
}

fn android_log_write(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = ctx.read_cstring(ctx.arg(2))?;
    emit(ctx.arg_i32(0), &tag(ctx, ctx.arg(1))?, &text);
    Ok((text.len() as u64).into())
}

fn android_log_buf_write(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = ctx.read_cstring(ctx.arg(3))?;
    emit(ctx.arg_i32(1), &tag(ctx, ctx.arg(2))?, &text);
    Ok((text.len() as u64).into())
}

fn android_log_assert(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let message = if ctx.arg(2) == 0 {
        b"assertion failed".to_vec()
    } else {
        format_call(ctx, ctx.arg(2), Arguments::Variadic(3))?
    };
    let condition = if ctx.arg(0) == 0 {
        String::new()
    } else {
        ctx.read_string(ctx.arg(0))?
    };
    let tag = tag(ctx, ctx.arg(1))?;
    log::error!(
        target: GUEST_TARGET,
        "{tag}: {} {condition}",
        String::from_utf8_lossy(&message)
    );
    Err(Fault::Exit {
        function: "__android_log_assert",
        status: ABORT_STATUS,
    }
    .into())
}

fn android_log_is_loggable(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(1.into())
}

fn printf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(0), Arguments::Variadic(1))?;
    emit(4, "stdout", &text);
    Ok((text.len() as u64).into())
}

fn vprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(0), Arguments::VaList(1))?;
    emit(4, "stdout", &text);
    Ok((text.len() as u64).into())
}

fn fprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(1), Arguments::Variadic(2))?;
    emit(4, "stdio", &text);
    Ok((text.len() as u64).into())
}

fn vfprintf(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = format_call(ctx, ctx.arg(1), Arguments::VaList(2))?;
    emit(4, "stdio", &text);
    Ok((text.len() as u64).into())
}

fn puts(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = ctx.read_cstring(ctx.arg(0))?;
    emit(4, "stdout", &text);
    Ok(1.into())
}

fn fputs(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let text = ctx.read_cstring(ctx.arg(0))?;
    emit(4, "stdio", &text);
    Ok(1.into())
}

fn putchar(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(u64::from(ctx.arg(0) as u8).into())
}

fn fwrite(ctx: &mut HostContext<'_>) -> Result<TrapAction> {
    let (size, count) = (ctx.arg_usize(1), ctx.arg_usize(2));
    let len = size.saturating_mul(count);
    let bytes = ctx.memory.read_bytes(ctx.arg(0), len)?;
    emit(4, "stdio", &bytes);
    Ok((count as u64).into())
}

fn fflush(_: &mut HostContext<'_>) -> Result<TrapAction> {
    Ok(0.into())
}
