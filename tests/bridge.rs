//! Integration tests for the JNI bridge.
//!
//! The natives below are assembled against the `JNIEnv` function table exactly
//! like compiled code would reach it: load the table from `*env`, load the slot
//! and branch to it. Java callbacks are answered by dispatch tables built in
//! the tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use droidemu::{
    android::{AppProfile, TokenGenerator, AUTH_UTILS_CLASS, GET_TOKEN_DESCRIPTOR},
    assembly::{w, x, Assembler, SP},
    emulation::{
        runtime::{
            method_signature, CallKind, DispatchTable, Handle, JavaValue, JniFunction, MissPolicy,
        },
        EmulationConfig, Fault, Session, SessionBuilder,
    },
    image::ElfBuilder,
    Error, Result,
};

const BRIDGE_CLASS: &str = "com/example/Bridge";
const HOST_CLASS: &str = "com/example/Host";

fn jni_call(asm: &mut Assembler, function: JniFunction) -> Result<()> {
    asm.ldr(x(8), x(0), 0)?
        .ldr(x(8), x(8), (function.index() * 8) as u32)?
        .blr(x(8))?;
    Ok(())
}

/// Emits `CallStaticIntMethod(env, FindClass(host), GetStaticMethodID(name, sig), x20)`
/// with the `JNIEnv*` in `x19`.
fn call_host_static(asm: &mut Assembler, class: u64, name: u64, sig: u64) -> Result<()> {
    asm.mov(x(0), x(19))?.adr_to(x(1), class)?;
    jni_call(asm, JniFunction::FindClass)?;
    asm.mov(x(21), x(0))?
        .mov(x(1), x(21))?
        .mov(x(0), x(19))?
        .adr_to(x(2), name)?
        .adr_to(x(3), sig)?;
    jni_call(asm, JniFunction::GetStaticMethodID)?;
    asm.mov(x(2), x(0))?
        .mov(x(1), x(21))?
        .mov(x(0), x(19))?
        .mov(x(3), x(20))?;
    jni_call(asm, JniFunction::CallStaticIntMethod)?;
    Ok(())
}

/// Natives of `com.example.Bridge`.
///
/// - `twice(I)I` asks `com.example.Host.twice(I)I`
/// - `absent()I` asks `com.example.Host.absent(I)I`, which nobody handles
/// - `length(Ljava/lang/String;)I` returns `GetStringUTFLength`
/// - `label()Ljava/lang/String;` returns `NewStringUTF("bridge")`
/// - `sum(II)I` and `sum(JJ)J` are overloads exported under their long names
/// - `lookup(Ljava/lang/Object;)Lcom/example/Thing;` calls the instance method
///   `lookup()Lcom/example/Thing;` on its argument
fn bridge_image() -> Vec<u8> {
    let strings = [
        HOST_CLASS,
        "twice",
        "(I)I",
        "absent",
        "bridge",
        "lookup",
        "()Lcom/example/Thing;",
    ];
    let mut data = Vec::new();
    let mut at = [0u64; 7];
    for (offset, text) in at.iter_mut().zip(strings) {
        *offset = data.len() as u64;
        data.extend_from_slice(text.as_bytes());
        data.push(0);
    }

    let host_call = move |name: usize| {
        move |asm: &mut Assembler, layout: &droidemu::image::ImageLayout| -> Result<()> {
            asm.prologue()?
                .stp_pre(x(19), x(20), SP, -16)?
                .stp_pre(x(21), x(22), SP, -16)?
                .mov(x(19), x(0))?
                .mov(x(20), x(2))?;
            call_host_static(
                asm,
                layout.data(at[0]),
                layout.data(at[name]),
                layout.data(at[2]),
            )?;
            asm.ldp_post(x(21), x(22), SP, 16)?
                .ldp_post(x(19), x(20), SP, 16)?
                .epilogue()?;
            Ok(())
        }
    };

    ElfBuilder::new()
        .soname("libbridge.so")
        .data(&data)
        .function("Java_com_example_Bridge_twice", host_call(1))
        .function("Java_com_example_Bridge_absent", host_call(3))
        .function("Java_com_example_Bridge_length", |asm, _| {
            asm.prologue()?.mov(x(1), x(2))?;
            jni_call(asm, JniFunction::GetStringUTFLength)?;
            asm.epilogue()?;
            Ok(())
        })
        .function("Java_com_example_Bridge_label", move |asm, layout| {
            asm.prologue()?.adr_to(x(1), layout.data(at[4]))?;
            jni_call(asm, JniFunction::NewStringUTF)?;
            asm.epilogue()?;
            Ok(())
        })
        .function("Java_com_example_Bridge_lookup", move |asm, layout| {
            asm.prologue()?
                .stp_pre(x(19), x(20), SP, -16)?
                .mov(x(19), x(0))?
                .mov(x(20), x(2))?
                .mov(x(1), x(20))?;
            jni_call(asm, JniFunction::GetObjectClass)?;
            asm.mov(x(1), x(0))?
                .mov(x(0), x(19))?
                .adr_to(x(2), layout.data(at[5]))?
                .adr_to(x(3), layout.data(at[6]))?;
            jni_call(asm, JniFunction::GetMethodID)?;
            asm.mov(x(2), x(0))?.mov(x(1), x(20))?.mov(x(0), x(19))?;
            jni_call(asm, JniFunction::CallObjectMethod)?;
            asm.ldp_post(x(19), x(20), SP, 16)?.epilogue()?;
            Ok(())
        })
        .function("Java_com_example_Bridge_sum__II", |asm, _| {
            asm.add(w(0), w(2), w(3))?.ret()?;
            Ok(())
        })
        .function("Java_com_example_Bridge_sum__JJ", |asm, _| {
            asm.add(x(0), x(2), x(3))?.ret()?;
            Ok(())
        })
        .build()
        .unwrap()
}

fn session_with(dispatch: DispatchTable) -> Session {
    SessionBuilder::new()
        .library(bridge_image())
        .config(EmulationConfig::testing())
        .dispatch(dispatch)
        .build()
        .unwrap()
}

#[test]
fn test_static_callback_reaches_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let dispatch = DispatchTable::builder()
        .static_method(method_signature(HOST_CLASS, "twice", "(I)I"), move |ctx| {
            seen.fetch_add(1, Ordering::SeqCst);
            let value = ctx.arg_long(0)?;
            Ok(JavaValue::Int((value * 2) as i32))
        })
        .build();

    let mut session = session_with(dispatch);
    let result = session
        .call_static_native(BRIDGE_CLASS, "twice", "(I)I", &[JavaValue::Int(21)])
        .unwrap();
    assert_eq!(result, JavaValue::Int(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(session.dispatch_misses().is_empty());
}

#[test]
fn test_unhandled_callback_is_recorded() {
    let mut session = session_with(DispatchTable::empty());
    let result = session
        .call_static_native(BRIDGE_CLASS, "absent", "(I)I", &[JavaValue::Int(5)])
        .unwrap();
    assert_eq!(result, JavaValue::Int(0));

    let misses = session.dispatch_misses();
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0].kind, CallKind::CallStaticMethod);
    assert_eq!(misses[0].signature, "com/example/Host->absent(I)I");
}

fn lookup_unhandled(policy: MissPolicy) -> (Session, JavaValue) {
    let mut session = SessionBuilder::new()
        .library(bridge_image())
        .config(EmulationConfig::testing().with_miss_policy(policy))
        .build()
        .unwrap();
    let receiver = session.runtime_mut().objects_mut().new_instance(HOST_CLASS);
    let result = session
        .call_static_native(
            BRIDGE_CLASS,
            "lookup",
            "(Ljava/lang/Object;)Lcom/example/Thing;",
            &[JavaValue::Object(receiver)],
        )
        .unwrap();
    (session, result)
}

#[test]
fn test_unhandled_object_call_returns_empty_instance() {
    let (session, result) = lookup_unhandled(MissPolicy::EmptyInstance);
    let JavaValue::Object(handle) = result else {
        panic!("expected a reference, got {result:?}");
    };
    assert!(!handle.is_null());
    assert_eq!(
        session.runtime().objects().class_of(handle).unwrap(),
        "com/example/Thing"
    );

    let misses = session.dispatch_misses();
    assert_eq!(misses.len(), 1);
    assert_eq!(misses[0].kind, CallKind::CallMethod);
    assert_eq!(
        misses[0].signature,
        "com/example/Host->lookup()Lcom/example/Thing;"
    );
}

#[test]
fn test_unhandled_object_call_returns_null() {
    let (session, result) = lookup_unhandled(MissPolicy::Null);
    assert_eq!(result, JavaValue::Object(Handle::NULL));
    assert_eq!(session.dispatch_misses().len(), 1);
    assert_eq!(session.dispatch_misses()[0].kind, CallKind::CallMethod);
}

#[test]
fn test_failing_handler_poisons_session() {
    let dispatch = DispatchTable::builder()
        .static_method(method_signature(HOST_CLASS, "twice", "(I)I"), |_| {
            Err(Error::Error("host refused".to_string()))
        })
        .build();

    let mut session = session_with(dispatch);
    let error = session
        .call_static_native(BRIDGE_CLASS, "twice", "(I)I", &[JavaValue::Int(1)])
        .unwrap_err();
    assert!(matches!(error, Error::Fault(Fault::HostFailure { .. })));
    assert!(matches!(
        session.call_static_native(BRIDGE_CLASS, "twice", "(I)I", &[JavaValue::Int(1)]),
        Err(Error::SessionPoisoned)
    ));
}

#[test]
fn test_strings_cross_the_bridge() {
    let mut session = session_with(DispatchTable::empty());
    let text = session.runtime_mut().objects_mut().new_string("h\u{e9}llo");
    let length = session
        .call_static_native(
            BRIDGE_CLASS,
            "length",
            "(Ljava/lang/String;)I",
            &[JavaValue::Object(text)],
        )
        .unwrap();
    assert_eq!(length, JavaValue::Int(6));

    let label = session
        .call_static_native(BRIDGE_CLASS, "label", "()Ljava/lang/String;", &[])
        .unwrap();
    let JavaValue::Object(handle) = label else {
        panic!("expected a reference, got {label:?}");
    };
    assert_eq!(session.runtime().objects().string(handle).unwrap(), "bridge");
}

#[test]
fn test_overloads_use_long_names() {
    let mut session = session_with(DispatchTable::empty());
    let int_sum = session
        .call_static_native(
            BRIDGE_CLASS,
            "sum",
            "(II)I",
            &[JavaValue::Int(-5), JavaValue::Int(12)],
        )
        .unwrap();
    assert_eq!(int_sum, JavaValue::Int(7));

    let long_sum = session
        .call_static_native(
            "com.example.Bridge",
            "sum",
            "(JJ)J",
            &[JavaValue::Long(1 << 40), JavaValue::Long(2)],
        )
        .unwrap();
    assert_eq!(long_sum, JavaValue::Long((1 << 40) + 2));

    let missing = session
        .call_static_native(BRIDGE_CLASS, "sum", "(FF)F", &[
            JavaValue::Float(1.0),
            JavaValue::Float(2.0),
        ])
        .unwrap_err();
    assert!(matches!(missing, Error::SymbolNotFound(_)));
}

/// A `getToken` native that hands back its device identifier.
fn echo_auth_image() -> Vec<u8> {
    ElfBuilder::new()
        .soname("libauth.so")
        .function("Java_com_coolapk_market_util_AuthUtils_getToken", |asm, _| {
            asm.mov(x(0), x(3))?.ret()?;
            Ok(())
        })
        .build()
        .unwrap()
}

#[test]
fn test_token_generator_marshals_device_id() {
    let builder = SessionBuilder::new()
        .library(echo_auth_image())
        .config(EmulationConfig::testing());
    let generator = TokenGenerator::with_builder(builder, AppProfile::default(), 2).unwrap();
    for device in ["first-device", "second-device", "\u{4e2d}\u{6587}"] {
        assert_eq!(generator.generate_token(device).unwrap(), device);
    }
    assert!(generator.pool().live() <= 2);
}

#[test]
fn test_token_native_descriptor() {
    let mut session = SessionBuilder::new()
        .library(echo_auth_image())
        .config(EmulationConfig::testing())
        .build()
        .unwrap();
    let context = session
        .runtime_mut()
        .objects_mut()
        .new_instance("android/content/Context");
    let device = session.runtime_mut().objects_mut().new_string("abc");
    let token = session
        .call_static_native(
            AUTH_UTILS_CLASS,
            "getToken",
            GET_TOKEN_DESCRIPTOR,
            &[JavaValue::Object(context), JavaValue::Object(device)],
        )
        .unwrap();
    assert_eq!(token, JavaValue::Object(device));
}
