//! End-to-end tests for sessions running synthetic libraries against the host libc.
//!
//! Every library is generated with [`ElfBuilder`] so the tests exercise the
//! complete path from ELF bytes through loading, linking, host stubs and the
//! interpreter without binary fixtures.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use droidemu::{
    assembly::{x, SP},
    emulation::{
        Argument, EmulationConfig, Fault, LimitExceeded, Resolution, Session, SessionBuilder,
        SessionState,
    },
    image::ElfBuilder,
    Error,
};

/// A library calling into libc through its GOT.
///
/// - `length(s)` returns `strlen(s)`
/// - `formatted_length(n)` returns `snprintf(NULL, 0, "value=%d", n)`
/// - `quit(status)` calls `exit(status)`
/// - `crash()` calls `abort()`
/// - `guard()` returns `__stack_chk_guard`
/// - `spin()` never returns
fn libc_image() -> Vec<u8> {
    ElfBuilder::new()
        .soname("liblibc_user.so")
        .data(b"value=%d\0")
        .import("strlen")
        .import("snprintf")
        .import("exit")
        .import("abort")
        .import("__stack_chk_guard")
        .weak_import("__cxa_finalize_optional")
        .got_entry("strlen")
        .got_entry("snprintf")
        .got_entry("exit")
        .got_entry("abort")
        .got_entry("__stack_chk_guard")
        .function("length", |asm, layout| {
            asm.prologue()?;
            layout.call(asm, "strlen")?;
            asm.epilogue()?;
            Ok(())
        })
        .function("formatted_length", |asm, layout| {
            asm.prologue()?
                .mov(x(3), x(0))?
                .mov_imm(x(0), 0)?
                .mov_imm(x(1), 0)?
                .adr_to(x(2), layout.data(0))?;
            layout.call(asm, "snprintf")?;
            asm.epilogue()?;
            Ok(())
        })
        .function("quit", |asm, layout| {
            asm.prologue()?;
            layout.call(asm, "exit")?;
            asm.epilogue()?;
            Ok(())
        })
        .function("crash", |asm, layout| {
            asm.prologue()?;
            layout.call(asm, "abort")?;
            asm.epilogue()?;
            Ok(())
        })
        .function("guard", |asm, layout| {
            asm.adr_to(x(9), layout.got("__stack_chk_guard")?)?
                .ldr(x(9), x(9), 0)?
                .ldr(x(0), x(9), 0)?
                .ret()?;
            Ok(())
        })
        .function("spin", |asm, _| {
            asm.label("again")?.b("again")?;
            Ok(())
        })
        .function("deep", |asm, _| {
            asm.stp_pre(x(29), x(30), SP, -16)?
                .bl("deep")?
                .ldp_post(x(29), x(30), SP, 16)?
                .ret()?;
            Ok(())
        })
        .build()
        .unwrap()
}

fn session() -> Session {
    SessionBuilder::new()
        .library(libc_image())
        .name("liblibc_user.so")
        .config(EmulationConfig::testing())
        .build()
        .unwrap()
}

#[test]
fn test_host_strlen() {
    let mut session = session();
    let length = session
        .invoke("length", &[Argument::Str("droidemu".to_string())])
        .unwrap();
    assert_eq!(length, 8);
    assert_eq!(session.state(), SessionState::Initialized);
}

#[test]
fn test_host_snprintf_measures() {
    let mut session = session();
    let length = session
        .invoke("formatted_length", &[Argument::Int(12345)])
        .unwrap();
    assert_eq!(length, "value=12345".len() as u64);
}

#[test]
fn test_imports_resolve_to_host() {
    let session = session();
    let symbols = session.symbols();
    assert!(matches!(symbols.get("strlen"), Some(Resolution::Stub { .. })));
    assert!(matches!(
        symbols.get("__stack_chk_guard"),
        Some(Resolution::Data { .. })
    ));
    assert_eq!(symbols.get("__cxa_finalize_optional"), Some(&Resolution::Weak));

    let summary = session.summary();
    assert_eq!(summary.name, "liblibc_user.so");
    assert_eq!(summary.images, 1);
    assert_eq!(summary.imports, 6);
}

#[test]
fn test_exit_poisons_session() {
    let mut session = session();
    match session.invoke("quit", &[Argument::Int(3)]) {
        Err(Error::Fault(Fault::Exit { function, status })) => {
            assert_eq!(function, "exit");
            assert_eq!(status, 3);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(session.state(), SessionState::Poisoned);
}

#[test]
fn test_abort_reports_sigabrt_status() {
    let mut session = session();
    let error = session.invoke("crash", &[]).unwrap_err();
    assert!(matches!(
        error,
        Error::Fault(Fault::Exit {
            function: "abort",
            status: 134
        })
    ));
}

#[test]
fn test_stack_guard_is_seeded() {
    let first = session().invoke("guard", &[]).unwrap();
    let second = session().invoke("guard", &[]).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, 0);
    assert_eq!(first & 0xFF, 0);
}

#[test]
fn test_instruction_budget() {
    let mut config = EmulationConfig::testing();
    config.limits.max_instructions = 1_000;
    let mut session = SessionBuilder::new()
        .library(libc_image())
        .config(config)
        .build()
        .unwrap();
    match session.invoke("spin", &[]) {
        Err(Error::Timeout(LimitExceeded::Instructions { limit, .. })) => assert_eq!(limit, 1_000),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(session.invoke("length", &[]), Err(Error::SessionPoisoned)));
}

#[test]
fn test_cancel_flag_stops_guest() {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut session = SessionBuilder::new()
        .library(libc_image())
        .config(EmulationConfig::testing())
        .cancel_flag(Arc::clone(&cancel))
        .build()
        .unwrap();

    cancel.store(true, Ordering::SeqCst);
    let error = session.invoke("spin", &[]).unwrap_err();
    assert!(matches!(
        error,
        Error::Timeout(LimitExceeded::Cancelled { .. })
    ));
}

#[test]
fn test_unbounded_recursion_overflows() {
    let mut session = session();
    let error = session.invoke("deep", &[]).unwrap_err();
    assert!(matches!(error, Error::Fault(Fault::StackOverflow { .. })));
}

#[test]
fn test_rejects_foreign_architecture() {
    let bytes = ElfBuilder::new().machine(62).build().unwrap();
    let error = SessionBuilder::new()
        .library(bytes)
        .config(EmulationConfig::testing())
        .build()
        .unwrap_err();
    assert!(matches!(error, Error::UnsupportedArchitecture { machine: 62 }));
}

#[test]
fn test_unresolved_import_fails_creation() {
    let bytes = ElfBuilder::new()
        .soname("libneedy.so")
        .import("no_such_function_anywhere")
        .build()
        .unwrap();
    let error = SessionBuilder::new()
        .library(bytes)
        .name("libneedy.so")
        .config(EmulationConfig::testing())
        .build()
        .unwrap_err();
    match error {
        Error::UnresolvedSymbol { symbol, image } => {
            assert_eq!(symbol, "no_such_function_anywhere");
            assert_eq!(image, "libneedy.so");
        }
        other => panic!("unexpected {other:?}"),
    }
}

/// `entropy()` folds `time(NULL)`, `rand()`, `arc4random()` and the stack guard
/// into one value.
fn entropy_image() -> Vec<u8> {
    ElfBuilder::new()
        .soname("libentropy.so")
        .import("time")
        .import("rand")
        .import("arc4random")
        .import("__stack_chk_guard")
        .got_entry("time")
        .got_entry("rand")
        .got_entry("arc4random")
        .got_entry("__stack_chk_guard")
        .function("entropy", |asm, layout| {
            asm.prologue()?
                .stp_pre(x(19), x(20), SP, -16)?
                .mov_imm(x(0), 0)?;
            layout.call(asm, "time")?;
            asm.mov(x(19), x(0))?;
            layout.call(asm, "rand")?;
            asm.eor(x(19), x(19), x(0))?;
            layout.call(asm, "arc4random")?;
            asm.eor(x(19), x(19), x(0))?
                .adr_to(x(9), layout.got("__stack_chk_guard")?)?
                .ldr(x(9), x(9), 0)?
                .ldr(x(9), x(9), 0)?
                .eor(x(0), x(19), x(9))?
                .ldp_post(x(19), x(20), SP, 16)?
                .epilogue()?;
            Ok(())
        })
        .build()
        .unwrap()
}

fn entropy_session() -> Session {
    SessionBuilder::new()
        .library(entropy_image())
        .config(EmulationConfig::testing())
        .build()
        .unwrap()
}

#[test]
fn test_runs_are_reproducible() {
    let mut first = entropy_session();
    let mut second = entropy_session();
    let mut fork = first.fork().unwrap();

    let expected = first.invoke("entropy", &[]).unwrap();
    assert_eq!(second.invoke("entropy", &[]).unwrap(), expected);
    assert_eq!(fork.invoke("entropy", &[]).unwrap(), expected);
    assert_eq!(
        first.invoke("entropy", &[]).unwrap(),
        second.invoke("entropy", &[]).unwrap()
    );
}

#[test]
fn test_forks_share_nothing_mutable() {
    let mut parent = session();
    let mut child = parent.fork().unwrap();
    assert!(child.invoke("quit", &[Argument::Int(1)]).is_err());
    assert_eq!(child.state(), SessionState::Poisoned);
    assert_eq!(parent.state(), SessionState::Initialized);
    assert_eq!(
        parent
            .invoke("length", &[Argument::Str("abc".to_string())])
            .unwrap(),
        3
    );
}
