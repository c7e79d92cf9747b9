//! Synthetic shared objects exercising the loader, the linker and the JNI bridge.

use crate::{
    assembly::{d, w, x, Assembler, Cond, SP},
    emulation::runtime::{InvokeFunction, JniFunction, JNI_VERSION_1_6},
    image::{ElfBuilder, ImageLayout},
    Result,
};

/// Base address every test image is loaded at.
pub const IMAGE_BASE: u64 = 0x4000_0000;

/// Value [`jni_scenario_image`]'s `call_unregistered` returns when the callback
/// produced zero.
pub const UNREGISTERED_MARKER: u64 = 0x5AFE;

/// Class whose natives [`jni_scenario_image`] registers from `JNI_OnLoad`.
pub const REGISTERED_CLASS: &str = "com/example/Registered";

/// Emits an indirect call through the `JNIEnv*` in `x0`.
pub fn jni_call(asm: &mut Assembler, function: JniFunction) -> Result<()> {
    asm.ldr(x(8), x(0), 0)?
        .ldr(x(8), x(8), (function.index() * 8) as u32)?
        .blr(x(8))?;
    Ok(())
}

/// Emits an indirect call through the `JavaVM*` in `x0`.
pub fn invoke_call(asm: &mut Assembler, function: InvokeFunction) -> Result<()> {
    asm.ldr(x(8), x(0), 0)?
        .ldr(x(8), x(8), (function.index() * 8) as u32)?
        .blr(x(8))?;
    Ok(())
}

/// A library exporting one function that returns `value`.
pub fn ret_const_image(name: &str, value: u64) -> Vec<u8> {
    ElfBuilder::new()
        .soname("libtest.so")
        .function(name, move |asm, _| {
            asm.mov_imm(x(0), value)?.ret()?;
            Ok(())
        })
        .build()
        .unwrap()
}

/// A library with an initializer and exports that fault or never return.
///
/// - `init_flag` (in `DT_INIT_ARRAY`) stores 1 into the first data word
/// - `read_flag` returns that word
/// - `bump(n)` adds `n` to the second data word and returns the new value
/// - `null_deref` loads from address zero
/// - `spin` loops forever
/// - `sum10(a..j)` returns the sum of ten integer arguments
/// - `scale(x: f64, k: f64)` returns `x * k` in `d0`
pub fn control_image() -> Vec<u8> {
    ElfBuilder::new()
        .soname("libcontrol.so")
        .data(&[0u8; 16])
        .function("init_flag", |asm, layout| {
            asm.adr_to(x(9), layout.data(0))?
                .mov_imm(x(10), 1)?
                .str(x(10), x(9), 0)?
                .ret()?;
            Ok(())
        })
        .function("read_flag", |asm, layout| {
            asm.adr_to(x(9), layout.data(0))?.ldr(x(0), x(9), 0)?.ret()?;
            Ok(())
        })
        .function("bump", |asm, layout| {
            asm.adr_to(x(9), layout.data(8))?
                .ldr(x(10), x(9), 0)?
                .add(x(0), x(10), x(0))?
                .str(x(0), x(9), 0)?
                .ret()?;
            Ok(())
        })
        .function("null_deref", |asm, _| {
            asm.mov_imm(x(0), 0)?.ldr(x(0), x(0), 0)?.ret()?;
            Ok(())
        })
        .function("spin", |asm, _| {
            asm.label("spin_loop")?.b("spin_loop")?;
            Ok(())
        })
        .function("sum10", |asm, _| {
            for n in 1..8 {
                asm.add(x(0), x(0), x(n))?;
            }
            asm.ldr(x(9), SP, 0)?
                .add(x(0), x(0), x(9))?
                .ldr(x(9), SP, 8)?
                .add(x(0), x(0), x(9))?
                .ret()?;
            Ok(())
        })
        .function("scale", |asm, _| {
            asm.fmul(d(0), d(0), d(1))?.ret()?;
            Ok(())
        })
        .init_array(&["init_flag"])
        .build()
        .unwrap()
}

/// Packs `names` as NUL-terminated strings and returns their data offsets.
fn strings<const N: usize>(names: [&str; N]) -> (Vec<u8>, [u64; N]) {
    let mut data = Vec::new();
    let mut offsets = [0u64; N];
    for (offset, name) in offsets.iter_mut().zip(names) {
        *offset = data.len() as u64;
        data.extend_from_slice(name.as_bytes());
        data.push(0);
    }
    (data, offsets)
}

/// A library driving the JNI bridge.
///
/// - `JNI_OnLoad` obtains the `JNIEnv*` through `GetEnv` and registers
///   `echo(Ljava/lang/String;)Ljava/lang/String;` on [`REGISTERED_CLASS`]
/// - `Java_com_example_Native_add(II)I` adds its two `jint` arguments
/// - `read_version_code(env)` allocates an `android/content/pm/PackageInfo`
///   and returns its `versionCode` field
/// - `call_unregistered(env)` calls `com/example/Missing.lookup()I` and returns
///   [`UNREGISTERED_MARKER`] when the answer is zero
/// - `new_string(env, chars)` returns `NewStringUTF(chars)`
pub fn jni_scenario_image() -> Vec<u8> {
    let (data, at) = strings([
        REGISTERED_CLASS,
        "echo",
        "(Ljava/lang/String;)Ljava/lang/String;",
        "android/content/pm/PackageInfo",
        "versionCode",
        "I",
        "com/example/Missing",
        "lookup",
        "()I",
    ]);

    ElfBuilder::new()
        .soname("libscenario.so")
        .data(&data)
        .function("JNI_OnLoad", move |asm, layout| {
            on_load_registering(asm, layout, at[0], at[1], at[2], "echo_impl")
        })
        .function("echo_impl", |asm, _| {
            asm.mov(x(0), x(2))?.ret()?;
            Ok(())
        })
        .function("Java_com_example_Native_add", |asm, _| {
            asm.add(w(0), w(2), w(3))?.ret()?;
            Ok(())
        })
        .function("read_version_code", move |asm, layout| {
            let str_at = |n: usize| layout.data(at[n]);
            asm.prologue()?.stp_pre(x(19), x(20), SP, -16)?.stp_pre(x(21), x(22), SP, -16)?;
            asm.mov(x(19), x(0))?.adr_to(x(1), str_at(3))?;
            jni_call(asm, JniFunction::FindClass)?;
            asm.mov(x(20), x(0))?.mov(x(1), x(20))?.mov(x(0), x(19))?;
            jni_call(asm, JniFunction::AllocObject)?;
            asm.mov(x(21), x(0))?
                .mov(x(0), x(19))?
                .mov(x(1), x(20))?
                .adr_to(x(2), str_at(4))?
                .adr_to(x(3), str_at(5))?;
            jni_call(asm, JniFunction::GetFieldID)?;
            asm.mov(x(2), x(0))?.mov(x(1), x(21))?.mov(x(0), x(19))?;
            jni_call(asm, JniFunction::GetIntField)?;
            asm.ldp_post(x(21), x(22), SP, 16)?
                .ldp_post(x(19), x(20), SP, 16)?
                .epilogue()?;
            Ok(())
        })
        .function("call_unregistered", move |asm, layout| {
            let str_at = |n: usize| layout.data(at[n]);
            asm.prologue()?.stp_pre(x(19), x(20), SP, -16)?;
            asm.mov(x(19), x(0))?.adr_to(x(1), str_at(6))?;
            jni_call(asm, JniFunction::FindClass)?;
            asm.mov(x(20), x(0))?
                .mov(x(1), x(20))?
                .mov(x(0), x(19))?
                .adr_to(x(2), str_at(7))?
                .adr_to(x(3), str_at(8))?;
            jni_call(asm, JniFunction::GetStaticMethodID)?;
            asm.mov(x(2), x(0))?.mov(x(1), x(20))?.mov(x(0), x(19))?;
            jni_call(asm, JniFunction::CallStaticIntMethod)?;
            asm.mov_imm(x(9), UNREGISTERED_MARKER)?
                .cmp_imm(w(0), 0)?
                .csel(x(0), x(9), x(0), Cond::Eq)?
                .ldp_post(x(19), x(20), SP, 16)?
                .epilogue()?;
            Ok(())
        })
        .function("new_string", |asm, _| {
            asm.prologue()?;
            jni_call(asm, JniFunction::NewStringUTF)?;
            asm.epilogue()?;
            Ok(())
        })
        .build()
        .unwrap()
}

/// A stand-in for the signing library.
///
/// `JNI_OnLoad` registers `getToken(Landroid/content/Context;Ljava/lang/String;)Ljava/lang/String;`
/// on `com/coolapk/market/util/AuthUtils`. The native asks the context for its
/// package name and returns it.
pub fn auth_image() -> Vec<u8> {
    let (data, at) = strings([
        "com/coolapk/market/util/AuthUtils",
        "getToken",
        "(Landroid/content/Context;Ljava/lang/String;)Ljava/lang/String;",
        "getPackageName",
        "()Ljava/lang/String;",
    ]);

    ElfBuilder::new()
        .soname("libauth.so")
        .data(&data)
        .function("JNI_OnLoad", move |asm, layout| {
            on_load_registering(asm, layout, at[0], at[1], at[2], "get_token_impl")
        })
        .function("get_token_impl", move |asm, layout| {
            let str_at = |n: usize| layout.data(at[n]);
            asm.prologue()?.stp_pre(x(19), x(20), SP, -16)?;
            asm.mov(x(19), x(0))?.mov(x(20), x(2))?.mov(x(1), x(20))?;
            jni_call(asm, JniFunction::GetObjectClass)?;
            asm.mov(x(1), x(0))?
                .mov(x(0), x(19))?
                .adr_to(x(2), str_at(3))?
                .adr_to(x(3), str_at(4))?;
            jni_call(asm, JniFunction::GetMethodID)?;
            asm.mov(x(2), x(0))?.mov(x(1), x(20))?.mov(x(0), x(19))?;
            jni_call(asm, JniFunction::CallObjectMethod)?;
            asm.ldp_post(x(19), x(20), SP, 16)?.epilogue()?;
            Ok(())
        })
        .build()
        .unwrap()
}

/// A signing stand-in that allocates scratch strings.
///
/// The exported `getToken` creates `"first"` and `"second"` with
/// `NewStringUTF` and returns the second one.
pub fn scratch_auth_image() -> Vec<u8> {
    let (data, at) = strings(["first", "second"]);

    ElfBuilder::new()
        .soname("libauth.so")
        .data(&data)
        .function("Java_com_coolapk_market_util_AuthUtils_getToken", move |asm, layout| {
            asm.prologue()?.stp_pre(x(19), x(20), SP, -16)?;
            asm.mov(x(19), x(0))?.adr_to(x(1), layout.data(at[0]))?;
            jni_call(asm, JniFunction::NewStringUTF)?;
            asm.mov(x(0), x(19))?.adr_to(x(1), layout.data(at[1]))?;
            jni_call(asm, JniFunction::NewStringUTF)?;
            asm.ldp_post(x(19), x(20), SP, 16)?.epilogue()?;
            Ok(())
        })
        .build()
        .unwrap()
}

fn on_load_registering(
    asm: &mut Assembler,
    layout: &ImageLayout,
    class: u64,
    name: u64,
    signature: u64,
    target: &str,
) -> Result<()> {
    asm.prologue()?
        .stp_pre(x(19), x(20), SP, -16)?
        .sub_imm(SP, SP, 32)?;
    asm.add_imm(x(1), SP, 0)?
        .mov_imm(x(2), u64::from(JNI_VERSION_1_6))?;
    invoke_call(asm, InvokeFunction::GetEnv)?;
    asm.ldr(x(19), SP, 0)?
        .mov(x(0), x(19))?
        .adr_to(x(1), layout.data(class))?;
    jni_call(asm, JniFunction::FindClass)?;
    asm.mov(x(20), x(0))?
        .adr_to(x(9), layout.data(name))?
        .str(x(9), SP, 0)?
        .adr_to(x(9), layout.data(signature))?
        .str(x(9), SP, 8)?
        .adr(x(9), target)?
        .str(x(9), SP, 16)?
        .mov(x(0), x(19))?
        .mov(x(1), x(20))?
        .add_imm(x(2), SP, 0)?
        .mov_imm(x(3), 1)?;
    jni_call(asm, JniFunction::RegisterNatives)?;
    asm.mov_imm(x(0), u64::from(JNI_VERSION_1_6))?
        .add_imm(SP, SP, 32)?
        .ldp_post(x(19), x(20), SP, 16)?
        .epilogue()?;
    Ok(())
}
