//! `JNIEnv` function implementations.
//!
//! Each JNI table slot traps into [`call`] with the live register file: `x0` is the
//! `JNIEnv*` and the remaining arguments follow AAPCS64. The typed families are
//! handled generically through [`Family`]; everything else is matched by name.
//!
//! Java-level failures the real VM reports by throwing (bad array index, unknown
//! member descriptor) raise a pending exception and return null or zero. Host-level
//! failures (stale handles, unreadable guest memory) are errors and end the run.

use widestring::U16Str;

use crate::{
    emulation::{
        engine::{Cpu, Fault, ReturnValue, TrapAction},
        memory::AddressSpace,
        runtime::{
            args::ArgReader,
            classes::{Member, MemberKind},
            descriptor::{PrimitiveKind, TypeDescriptor},
            dispatch::CallKind,
            jni::functions::{
                ArgStyle, Family, JniFunction, JNI_ABORT, JNI_COMMIT, JNI_ERR, JNI_LOCAL_REF_TYPE,
                JNI_OK, JNI_VERSION_1_6,
            },
            mutf8,
            objects::{Handle, JavaValue, OBJECT_CLASS},
            state::HostContext,
        },
    },
    Error, Result,
};

const NATIVE_METHOD_SIZE: u64 = 24;

const ARRAY_INDEX_EXCEPTION: &str = "java/lang/ArrayIndexOutOfBoundsException";
const STRING_INDEX_EXCEPTION: &str = "java/lang/StringIndexOutOfBoundsException";
const NEGATIVE_SIZE_EXCEPTION: &str = "java/lang/NegativeArraySizeException";
const DIRECT_BUFFER_CLASS: &str = "java/nio/DirectByteBuffer";

/// Services the JNI function `function`.
///
/// # Errors
///
/// Fails on stale handles, unknown member IDs and unreadable guest memory.
pub(crate) fn call(ctx: &mut HostContext<'_>, function: JniFunction) -> Result<TrapAction> {
    if let Some(family) = function.family() {
        return typed(ctx, family).map(TrapAction::Return);
    }

    use JniFunction as F;
    let value = match function {
        F::GetVersion => int(u64::from(JNI_VERSION_1_6)),
        F::DefineClass => {
            let name = optional_string(ctx, ctx.arg(1))?.unwrap_or_else(|| OBJECT_CLASS.to_string());
            object(ctx.state.objects_mut().class_handle(&class_path(&name)))
        }
        F::FindClass => {
            let name = ctx.read_string(ctx.arg(1))?;
            object(ctx.state.objects_mut().class_handle(&class_path(&name)))
        }
        F::FromReflectedMethod | F::FromReflectedField => {
            log::debug!("{} is not supported", function.name());
            int(0)
        }
        F::ToReflectedMethod => object(ctx.state.objects_mut().new_instance("java/lang/reflect/Method")),
        F::ToReflectedField => object(ctx.state.objects_mut().new_instance("java/lang/reflect/Field")),
        F::GetSuperclass => {
            let class = ctx.state.objects().class_name(handle(ctx, 1))?;
            if class == OBJECT_CLASS {
                int(0)
            } else {
                object(ctx.state.objects_mut().class_handle(OBJECT_CLASS))
            }
        }
        F::IsAssignableFrom => {
            let objects = ctx.state.objects();
            let from = objects.class_name(handle(ctx, 1))?;
            let to = objects.class_name(handle(ctx, 2))?;
            boolean(from == to || to == OBJECT_CLASS)
        }
        F::Throw => {
            ctx.state.set_pending_exception(handle(ctx, 1));
            status(JNI_OK)
        }
        F::ThrowNew => {
            let class = ctx.state.objects().class_name(handle(ctx, 1))?.to_string();
            let message = optional_string(ctx, ctx.arg(2))?;
            ctx.state.throw_new(&class, message.as_deref());
            status(JNI_OK)
        }
        F::ExceptionOccurred => object(ctx.state.pending_exception()),
        F::ExceptionDescribe => {
            let pending = ctx.state.pending_exception();
            if !pending.is_null() {
                log::debug!("pending exception: {}", ctx.state.describe(pending));
            }
            ReturnValue::Void
        }
        F::ExceptionClear => {
            ctx.state.take_pending_exception();
            ReturnValue::Void
        }
        F::ExceptionCheck => boolean(!ctx.state.pending_exception().is_null()),
        F::FatalError => {
            let message = optional_string(ctx, ctx.arg(1))?.unwrap_or_default();
            log::error!("FatalError from guest: {message}");
            return Ok(TrapAction::Exit(Fault::Exit {
                function: "FatalError",
                status: 134,
            }));
        }
        F::PushLocalFrame | F::EnsureLocalCapacity | F::MonitorEnter | F::MonitorExit => {
            status(JNI_OK)
        }
        F::PopLocalFrame | F::NewLocalRef => int(ctx.arg(1)),
        F::NewGlobalRef | F::NewWeakGlobalRef => {
            // Globals outlive the call that created them.
            let h = handle(ctx, 1);
            ctx.state.objects_mut().pin(h);
            int(ctx.arg(1))
        }
        F::DeleteGlobalRef | F::DeleteWeakGlobalRef => {
            let h = handle(ctx, 1);
            ctx.state.objects_mut().unpin(h);
            ReturnValue::Void
        }
        F::DeleteLocalRef => ReturnValue::Void,
        F::IsSameObject => boolean(ctx.arg(1) == ctx.arg(2)),
        F::AllocObject => {
            let class = ctx.state.objects().class_name(handle(ctx, 1))?.to_string();
            let id = ctx
                .state
                .classes_mut()
                .member_id(MemberKind::Method, false, &class, "<init>", "()V")?;
            let member = ctx.state.classes().member(id)?.clone();
            let ret = TypeDescriptor::Object(class);
            let value = ctx
                .state
                .dispatch(CallKind::NewObject, Handle::NULL, &member, &[], &ret)?;
            to_return(value)
        }
        F::GetObjectClass => {
            let class = ctx.state.objects().class_of(handle(ctx, 1))?;
            object(ctx.state.objects_mut().class_handle(&class))
        }
        F::IsInstanceOf => {
            let class = ctx.state.objects().class_name(handle(ctx, 2))?.to_string();
            boolean(ctx.state.objects().is_instance_of(handle(ctx, 1), &class)?)
        }
        F::GetMethodID => member_id(ctx, MemberKind::Method, false)?,
        F::GetStaticMethodID => member_id(ctx, MemberKind::Method, true)?,
        F::GetFieldID => member_id(ctx, MemberKind::Field, false)?,
        F::GetStaticFieldID => member_id(ctx, MemberKind::Field, true)?,
        F::NewString => {
            let (address, len) = (ctx.arg(1), ctx.arg_usize(2));
            let bytes = ctx.memory.read_bytes(address, len * 2)?;
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let text = U16Str::from_slice(&units).to_string_lossy();
            object(ctx.state.objects_mut().new_string(text))
        }
        F::GetStringLength => int(utf16(ctx, handle(ctx, 1))?.len() as u64),
        F::GetStringChars | F::GetStringCritical => {
            let units = utf16(ctx, handle(ctx, 1))?;
            let mut bytes: Vec<u8> = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
            bytes.extend_from_slice(&[0, 0]);
            let is_copy = ctx.arg(2);
            let address = ctx.alloc_bytes(&bytes)?;
            set_is_copy(ctx, is_copy)?;
            int(address)
        }
        F::ReleaseStringChars | F::ReleaseStringUTFChars | F::ReleaseStringCritical => {
            let chars = ctx.arg(2);
            ctx.free(chars);
            ReturnValue::Void
        }
        F::NewStringUTF => {
            let address = ctx.arg(1);
            if address == 0 {
                int(0)
            } else {
                let bytes = ctx.read_cstring(address)?;
                let text = mutf8::decode(&bytes).unwrap_or_else(|| {
                    log::debug!("NewStringUTF with malformed modified UTF-8 at {address:#x}");
                    String::from_utf8_lossy(&bytes).into_owned()
                });
                object(ctx.state.objects_mut().new_string(text))
            }
        }
        F::GetStringUTFLength => {
            let text = ctx.state.objects().string(handle(ctx, 1))?;
            int(mutf8::encoded_len(text) as u64)
        }
        F::GetStringUTFChars => {
            let encoded = mutf8::encode(ctx.state.objects().string(handle(ctx, 1))?);
            let is_copy = ctx.arg(2);
            let address = ctx.alloc_cstring(&encoded)?;
            set_is_copy(ctx, is_copy)?;
            int(address)
        }
        F::GetStringRegion => {
            let units = utf16(ctx, handle(ctx, 1))?;
            match region(ctx.arg_i32(2), ctx.arg_i32(3), units.len()) {
                Some(range) => {
                    let bytes: Vec<u8> = units[range]
                        .iter()
                        .flat_map(|unit| unit.to_le_bytes())
                        .collect();
                    ctx.memory.write(ctx.arg(4), &bytes)?;
                }
                None => {
                    ctx.state.throw_new(STRING_INDEX_EXCEPTION, None);
                }
            }
            ReturnValue::Void
        }
        F::GetStringUTFRegion => {
            let units = utf16(ctx, handle(ctx, 1))?;
            match region(ctx.arg_i32(2), ctx.arg_i32(3), units.len()) {
                Some(range) => {
                    let text = U16Str::from_slice(&units[range]).to_string_lossy();
                    ctx.memory.write_cstring(ctx.arg(4), &mutf8::encode(&text))?;
                }
                None => {
                    ctx.state.throw_new(STRING_INDEX_EXCEPTION, None);
                }
            }
            ReturnValue::Void
        }
        F::GetArrayLength => int(ctx.state.objects().array_length(handle(ctx, 1))? as u64),
        F::NewObjectArray => {
            let len = ctx.arg_i32(1);
            if len < 0 {
                ctx.state.throw_new(NEGATIVE_SIZE_EXCEPTION, None);
                int(0)
            } else {
                let element_class = ctx.state.objects().class_name(handle(ctx, 2))?.to_string();
                let elements = vec![handle(ctx, 3); len as usize];
                object(
                    ctx.state
                        .objects_mut()
                        .new_object_array(element_class, elements),
                )
            }
        }
        F::GetObjectArrayElement => {
            let index = usize::try_from(ctx.arg_i32(2)).ok();
            let elements = ctx.state.objects().object_array(handle(ctx, 1))?;
            match index.and_then(|i| elements.get(i).copied()) {
                Some(element) => object(element),
                None => {
                    ctx.state.throw_new(ARRAY_INDEX_EXCEPTION, None);
                    int(0)
                }
            }
        }
        F::SetObjectArrayElement => {
            let value = handle(ctx, 3);
            let index = usize::try_from(ctx.arg_i32(2)).ok();
            let array = handle(ctx, 1);
            let elements = ctx.state.objects_mut().object_array_mut(array)?;
            let stored = match index.and_then(|i| elements.get_mut(i)) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            };
            if !stored {
                ctx.state.throw_new(ARRAY_INDEX_EXCEPTION, None);
            }
            ReturnValue::Void
        }
        F::GetPrimitiveArrayCritical => array_elements(ctx)?,
        F::ReleasePrimitiveArrayCritical => release_array_elements(ctx)?,
        F::RegisterNatives => register_natives(ctx)?,
        F::UnregisterNatives => {
            let class = ctx.state.objects().class_name(handle(ctx, 1))?.to_string();
            ctx.state.unregister_natives(&class);
            status(JNI_OK)
        }
        F::GetJavaVM => {
            let java_vm = ctx.state.java_vm();
            ctx.memory.write_u64(ctx.arg(1), java_vm)?;
            status(JNI_OK)
        }
        F::NewDirectByteBuffer => {
            let (address, capacity) = (ctx.arg(1), ctx.arg(2) as i64);
            let buffer = ctx.state.objects_mut().new_instance(DIRECT_BUFFER_CLASS);
            let instance = ctx.state.objects_mut().instance_mut(buffer)?;
            instance
                .fields
                .insert("address".to_string(), JavaValue::Long(address as i64));
            instance
                .fields
                .insert("capacity".to_string(), JavaValue::Long(capacity));
            object(buffer)
        }
        F::GetDirectBufferAddress => int(buffer_field(ctx, "address").unwrap_or(0) as u64),
        F::GetDirectBufferCapacity => int(buffer_field(ctx, "capacity").unwrap_or(-1) as u64),
        F::GetObjectRefType => {
            if handle(ctx, 1).is_null() {
                int(0)
            } else {
                int(JNI_LOCAL_REF_TYPE)
            }
        }
        F::GetModule => object(ctx.state.objects_mut().new_instance("java/lang/Module")),
        _ => {
            return Err(Error::Error(format!(
                "JNI function {} has no implementation",
                function.name()
            )))
        }
    };
    Ok(TrapAction::Return(value))
}

fn typed(ctx: &mut HostContext<'_>, family: Family) -> Result<ReturnValue> {
    let receiver = handle(ctx, 1);
    Ok(match family {
        Family::NewObject(style) => {
            let member = method(ctx, ctx.arg(2))?;
            let params = member.method_descriptor()?.params;
            let args = read_args(ctx, style, 3, &params)?;
            let ret = TypeDescriptor::Object(member.class.clone());
            let value = ctx
                .state
                .dispatch(CallKind::NewObject, Handle::NULL, &member, &args, &ret)?;
            to_return(value)
        }
        Family::CallMethod(_, style) => {
            let id = ctx.arg(2);
            invoke(ctx, CallKind::CallMethod, receiver, id, 3, style)?
        }
        Family::CallNonvirtualMethod(_, style) => {
            let id = ctx.arg(3);
            invoke(ctx, CallKind::CallMethod, receiver, id, 4, style)?
        }
        Family::CallStaticMethod(_, style) => {
            let id = ctx.arg(2);
            invoke(ctx, CallKind::CallStaticMethod, Handle::NULL, id, 3, style)?
        }
        Family::GetField(_) => get_field(ctx, CallKind::GetField, receiver)?,
        Family::GetStaticField(_) => get_field(ctx, CallKind::GetStaticField, Handle::NULL)?,
        Family::SetField(_) => set_field(ctx, CallKind::SetField, receiver)?,
        Family::SetStaticField(_) => set_field(ctx, CallKind::SetStaticField, Handle::NULL)?,
        Family::NewArray(kind) => {
            let len = ctx.arg_i32(1);
            if len < 0 {
                ctx.state.throw_new(NEGATIVE_SIZE_EXCEPTION, None);
                int(0)
            } else {
                let bytes = vec![0u8; len as usize * kind.size()];
                object(ctx.state.objects_mut().new_primitive_array(kind, bytes))
            }
        }
        Family::GetArrayElements(_) => array_elements(ctx)?,
        Family::ReleaseArrayElements(_) => release_array_elements(ctx)?,
        Family::GetArrayRegion(_) => {
            let (kind, bytes) = ctx.state.objects().primitive_array(receiver)?;
            let size = kind.size();
            let slice = region(ctx.arg_i32(2), ctx.arg_i32(3), bytes.len() / size)
                .map(|range| bytes[range.start * size..range.end * size].to_vec());
            match slice {
                Some(slice) => {
                    let buffer = ctx.arg(4);
                    ctx.memory.write(buffer, &slice)?;
                }
                None => {
                    ctx.state.throw_new(ARRAY_INDEX_EXCEPTION, None);
                }
            }
            ReturnValue::Void
        }
        Family::SetArrayRegion(_) => {
            let (kind, bytes) = ctx.state.objects().primitive_array(receiver)?;
            let size = kind.size();
            let count = bytes.len() / size;
            match region(ctx.arg_i32(2), ctx.arg_i32(3), count) {
                Some(range) => {
                    let source = ctx
                        .memory
                        .read_bytes(ctx.arg(4), (range.end - range.start) * size)?;
                    let (_, bytes) = ctx.state.objects_mut().primitive_array_mut(receiver)?;
                    bytes[range.start * size..range.end * size].copy_from_slice(&source);
                }
                None => {
                    ctx.state.throw_new(ARRAY_INDEX_EXCEPTION, None);
                }
            }
            ReturnValue::Void
        }
    })
}

fn invoke(
    ctx: &mut HostContext<'_>,
    kind: CallKind,
    this: Handle,
    id: u64,
    first_gpr: u8,
    style: ArgStyle,
) -> Result<ReturnValue> {
    let member = method(ctx, id)?;
    let descriptor = member.method_descriptor()?;
    let args = read_args(ctx, style, first_gpr, &descriptor.params)?;
    let value = ctx
        .state
        .dispatch(kind, this, &member, &args, &descriptor.ret)?;
    Ok(to_return(value))
}

fn get_field(ctx: &mut HostContext<'_>, kind: CallKind, this: Handle) -> Result<ReturnValue> {
    let member = ctx.state.classes().member(ctx.arg(2))?.clone();
    let ty = member.field_type()?;
    let value = ctx.state.dispatch(kind, this, &member, &[], &ty)?;
    Ok(to_return(value))
}

fn set_field(ctx: &mut HostContext<'_>, kind: CallKind, this: Handle) -> Result<ReturnValue> {
    let member = ctx.state.classes().member(ctx.arg(2))?.clone();
    let ty = member.field_type()?;
    let value = match ty.primitive() {
        Some(PrimitiveKind::Float) => JavaValue::Float(ctx.cpu.s(0)),
        Some(PrimitiveKind::Double) => JavaValue::Double(ctx.cpu.d(0)),
        _ => JavaValue::from_raw(&ty, ctx.arg(3)),
    };
    ctx.state
        .dispatch(kind, this, &member, &[value], &TypeDescriptor::Void)?;
    Ok(ReturnValue::Void)
}

fn member_id(ctx: &mut HostContext<'_>, kind: MemberKind, is_static: bool) -> Result<ReturnValue> {
    let class = ctx.state.objects().class_name(handle(ctx, 1))?.to_string();
    let name = ctx.read_string(ctx.arg(2))?;
    let descriptor = ctx.read_string(ctx.arg(3))?;
    match ctx
        .state
        .classes_mut()
        .member_id(kind, is_static, &class, &name, &descriptor)
    {
        Ok(id) => Ok(int(id)),
        Err(Error::Emulation(error)) => {
            let exception = match kind {
                MemberKind::Method => "java/lang/NoSuchMethodError",
                MemberKind::Field => "java/lang/NoSuchFieldError",
            };
            ctx.state.throw_new(exception, Some(&error.to_string()));
            Ok(int(0))
        }
        Err(error) => Err(error),
    }
}

fn method(ctx: &HostContext<'_>, id: u64) -> Result<Member> {
    Ok(ctx.state.classes().member(id)?.clone())
}

fn read_args(
    ctx: &HostContext<'_>,
    style: ArgStyle,
    first_gpr: u8,
    params: &[TypeDescriptor],
) -> Result<Vec<JavaValue>> {
    let cpu: &Cpu = ctx.cpu;
    let memory: &AddressSpace = ctx.memory;
    let mut reader = match style {
        ArgStyle::Variadic => ArgReader::variadic(cpu, memory, first_gpr),
        ArgStyle::VaList => ArgReader::va_list(cpu, memory, cpu.x(first_gpr))?,
        ArgStyle::Array => ArgReader::values(cpu, memory, cpu.x(first_gpr)),
    };
    Ok(reader.read_all(params)?)
}

/// `Get<Type>ArrayElements(env, array, isCopy)`: a heap copy of the elements.
fn array_elements(ctx: &mut HostContext<'_>) -> Result<ReturnValue> {
    let (_, bytes) = ctx.state.objects().primitive_array(handle(ctx, 1))?;
    let bytes = bytes.to_vec();
    let is_copy = ctx.arg(2);
    let address = ctx.alloc_bytes(&bytes)?;
    set_is_copy(ctx, is_copy)?;
    Ok(int(address))
}

/// `Release<Type>ArrayElements(env, array, elems, mode)`.
fn release_array_elements(ctx: &mut HostContext<'_>) -> Result<ReturnValue> {
    let (array, elements, mode) = (handle(ctx, 1), ctx.arg(2), ctx.arg(3) & 0xFFFF_FFFF);
    if mode != JNI_ABORT {
        let len = ctx.state.objects().primitive_array(array)?.1.len();
        let source = ctx.memory.read_bytes(elements, len)?;
        let (_, bytes) = ctx.state.objects_mut().primitive_array_mut(array)?;
        bytes.copy_from_slice(&source);
    }
    if mode != JNI_COMMIT {
        ctx.free(elements);
    }
    Ok(ReturnValue::Void)
}

fn register_natives(ctx: &mut HostContext<'_>) -> Result<ReturnValue> {
    let class = ctx.state.objects().class_name(handle(ctx, 1))?.to_string();
    let (methods, count) = (ctx.arg(2), ctx.arg_i32(3));
    if count < 0 {
        return Ok(status(JNI_ERR));
    }
    for index in 0..count as u64 {
        let entry = methods + index * NATIVE_METHOD_SIZE;
        let name = ctx.read_string(ctx.memory.read_u64(entry)?)?;
        let signature = ctx.read_string(ctx.memory.read_u64(entry + 8)?)?;
        let address = ctx.memory.read_u64(entry + 16)?;
        ctx.state.register_native(&class, &name, &signature, address);
    }
    Ok(status(JNI_OK))
}

fn buffer_field(ctx: &HostContext<'_>, field: &str) -> Option<i64> {
    ctx.state
        .objects()
        .instance(handle(ctx, 1))
        .ok()
        .and_then(|instance| instance.fields.get(field).copied())
        .and_then(JavaValue::as_long)
}

fn utf16(ctx: &HostContext<'_>, string: Handle) -> Result<Vec<u16>> {
    Ok(ctx.state.objects().string(string)?.encode_utf16().collect())
}

fn optional_string(ctx: &HostContext<'_>, address: u64) -> Result<Option<String>> {
    if address == 0 {
        return Ok(None);
    }
    ctx.read_string(address).map(Some)
}

fn set_is_copy(ctx: &mut HostContext<'_>, address: u64) -> Result<()> {
    if address != 0 {
        ctx.memory.write_u8(address, 1)?;
    }
    Ok(())
}

/// Validates `[start, start + len)` against `count` elements.
fn region(start: i32, len: i32, count: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(start).ok()?;
    let len = usize::try_from(len).ok()?;
    let end = start.checked_add(len)?;
    (end <= count).then_some(start..end)
}

/// Accepts both `a/b/C` and `La/b/C;`, and dotted names.
fn class_path(name: &str) -> String {
    let name = name
        .strip_prefix('L')
        .and_then(|inner| inner.strip_suffix(';'))
        .unwrap_or(name);
    name.replace('.', "/")
}

fn handle(ctx: &HostContext<'_>, n: u8) -> Handle {
    Handle::new(ctx.arg(n))
}

fn to_return(value: JavaValue) -> ReturnValue {
    match value {
        JavaValue::Void => ReturnValue::Void,
        JavaValue::Float(value) => ReturnValue::Float(value),
        JavaValue::Double(value) => ReturnValue::Double(value),
        other => ReturnValue::Int(other.to_bits()),
    }
}

fn int(value: u64) -> ReturnValue {
    ReturnValue::Int(value)
}

fn boolean(value: bool) -> ReturnValue {
    ReturnValue::Int(u64::from(value))
}

fn status(value: i32) -> ReturnValue {
    ReturnValue::Int(value as i64 as u64)
}

fn object(handle: Handle) -> ReturnValue {
    ReturnValue::Int(handle.raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        emulation::runtime::{dispatch::DispatchTable, objects::STRING_CLASS},
        test::TestRuntime,
    };

    fn returned(action: TrapAction) -> u64 {
        match action {
            TrapAction::Return(ReturnValue::Int(value)) => value,
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_get_version_and_find_class() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert_eq!(
            returned(rt.jni(JniFunction::GetVersion, &[])),
            u64::from(JNI_VERSION_1_6)
        );

        let name = rt.cstring("com/coolapk/market/util/AuthUtils");
        let class = Handle::new(returned(rt.jni(JniFunction::FindClass, &[name])));
        assert_eq!(
            rt.state.objects().class_name(class).unwrap(),
            "com/coolapk/market/util/AuthUtils"
        );
        let dotted = rt.cstring("com.coolapk.market.util.AuthUtils");
        assert_eq!(
            Handle::new(returned(rt.jni(JniFunction::FindClass, &[dotted]))),
            class
        );
    }

    #[test]
    fn test_strings() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let text = rt.cstring("h\u{e9}llo");
        let string = returned(rt.jni(JniFunction::NewStringUTF, &[text]));
        assert_eq!(rt.state.string(Handle::new(string)).unwrap(), Some("h\u{e9}llo"));
        assert_eq!(returned(rt.jni(JniFunction::GetStringLength, &[string])), 5);
        assert_eq!(returned(rt.jni(JniFunction::GetStringUTFLength, &[string])), 6);

        let is_copy = rt.alloc(8);
        let chars = returned(rt.jni(JniFunction::GetStringUTFChars, &[string, is_copy]));
        assert_eq!(rt.memory.read_cstring(chars, 64).unwrap(), "h\u{e9}llo".as_bytes());
        assert_eq!(rt.memory.read_u8(is_copy).unwrap(), 1);
        let live = rt.state.heap().allocation_count();
        rt.jni(JniFunction::ReleaseStringUTFChars, &[string, chars]);
        assert_eq!(rt.state.heap().allocation_count(), live - 1);

        assert_eq!(returned(rt.jni(JniFunction::NewStringUTF, &[0])), 0);
    }

    #[test]
    fn test_string_region_out_of_range_throws() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let string = rt.state.objects_mut().new_string("abc").raw();
        let buffer = rt.alloc(16);
        rt.jni(JniFunction::GetStringRegion, &[string, 1, 2, buffer]);
        assert_eq!(rt.memory.read_u32(buffer).unwrap(), 0x0063_0062);
        assert!(rt.state.pending_exception().is_null());

        rt.jni(JniFunction::GetStringRegion, &[string, 2, 5, buffer]);
        assert!(!rt.state.pending_exception().is_null());
        assert_eq!(returned(rt.jni(JniFunction::ExceptionCheck, &[])), 1);
        rt.jni(JniFunction::ExceptionClear, &[]);
        assert_eq!(returned(rt.jni(JniFunction::ExceptionCheck, &[])), 0);
    }

    #[test]
    fn test_byte_array_elements_round_trip() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let array = returned(rt.jni(JniFunction::NewByteArray, &[4]));
        assert_eq!(returned(rt.jni(JniFunction::GetArrayLength, &[array])), 4);

        let elements = returned(rt.jni(JniFunction::GetByteArrayElements, &[array, 0]));
        rt.memory.write(elements, &[1, 2, 3, 4]).unwrap();
        rt.jni(JniFunction::ReleaseByteArrayElements, &[array, elements, 0]);
        assert_eq!(
            rt.state.objects().byte_array(Handle::new(array)).unwrap(),
            &[1, 2, 3, 4]
        );

        // JNI_ABORT discards the changes
        let elements = returned(rt.jni(JniFunction::GetByteArrayElements, &[array, 0]));
        rt.memory.write(elements, &[9, 9, 9, 9]).unwrap();
        rt.jni(JniFunction::ReleaseByteArrayElements, &[array, elements, JNI_ABORT]);
        assert_eq!(
            rt.state.objects().byte_array(Handle::new(array)).unwrap(),
            &[1, 2, 3, 4]
        );
    }

    #[test]
    fn test_array_regions() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let array = returned(rt.jni(JniFunction::NewIntArray, &[3]));
        let buffer = rt.alloc(16);
        rt.memory.write_u32(buffer, 7).unwrap();
        rt.memory.write_u32(buffer + 4, 8).unwrap();
        rt.jni(JniFunction::SetIntArrayRegion, &[array, 1, 2, buffer]);

        let out = rt.alloc(16);
        rt.jni(JniFunction::GetIntArrayRegion, &[array, 0, 3, out]);
        assert_eq!(rt.memory.read_u32(out).unwrap(), 0);
        assert_eq!(rt.memory.read_u32(out + 4).unwrap(), 7);
        assert_eq!(rt.memory.read_u32(out + 8).unwrap(), 8);

        rt.jni(JniFunction::GetIntArrayRegion, &[array, 2, 2, out]);
        let exception = rt.state.pending_exception();
        assert_eq!(
            rt.state.objects().class_of(exception).unwrap(),
            ARRAY_INDEX_EXCEPTION
        );
    }

    #[test]
    fn test_object_arrays() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let class = rt.state.objects_mut().class_handle(STRING_CLASS).raw();
        let initial = rt.state.objects_mut().new_string("x").raw();
        let array = returned(rt.jni(JniFunction::NewObjectArray, &[2, class, initial]));
        assert_eq!(
            returned(rt.jni(JniFunction::GetObjectArrayElement, &[array, 1])),
            initial
        );
        rt.jni(JniFunction::SetObjectArrayElement, &[array, 0, 0]);
        assert_eq!(returned(rt.jni(JniFunction::GetObjectArrayElement, &[array, 0])), 0);
        assert_eq!(returned(rt.jni(JniFunction::GetObjectArrayElement, &[array, 5])), 0);
        assert!(!rt.state.pending_exception().is_null());
    }

    #[test]
    fn test_call_method_dispatch() {
        let table = DispatchTable::builder()
            .method("a/B->add(II)I", |ctx| {
                Ok(JavaValue::Int(ctx.arg(0)?.as_int().unwrap_or(0) + ctx.arg(1)?.as_int().unwrap_or(0)))
            })
            .build();
        let mut rt = TestRuntime::new(table);
        let class = rt.state.objects_mut().class_handle("a/B").raw();
        let name = rt.cstring("add");
        let sig = rt.cstring("(II)I");
        let id = returned(rt.jni(JniFunction::GetMethodID, &[class, name, sig]));
        let this = rt.state.objects_mut().new_instance("a/B").raw();

        assert_eq!(returned(rt.jni(JniFunction::CallIntMethod, &[this, id, 2, 3])), 5);

        let values = rt.alloc(16);
        rt.memory.write_u64(values, 10).unwrap();
        rt.memory.write_u64(values + 8, 20).unwrap();
        assert_eq!(returned(rt.jni(JniFunction::CallIntMethodA, &[this, id, values])), 30);
        assert!(rt.state.dispatch_misses().is_empty());
    }

    #[test]
    fn test_call_miss_records_signature() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let class = rt.state.objects_mut().class_handle("a/B").raw();
        let name = rt.cstring("name");
        let sig = rt.cstring("()Ljava/lang/String;");
        let id = returned(rt.jni(JniFunction::GetStaticMethodID, &[class, name, sig]));
        let result = returned(rt.jni(JniFunction::CallStaticObjectMethod, &[class, id]));
        assert_eq!(rt.state.string(Handle::new(result)).unwrap(), Some(""));
        assert_eq!(rt.state.dispatch_misses().len(), 1);
        assert_eq!(rt.state.dispatch_misses()[0].kind, CallKind::CallStaticMethod);
    }

    #[test]
    fn test_bad_descriptor_throws() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let class = rt.state.objects_mut().class_handle("a/B").raw();
        let name = rt.cstring("f");
        let sig = rt.cstring("(Q)V");
        assert_eq!(returned(rt.jni(JniFunction::GetMethodID, &[class, name, sig])), 0);
        let exception = rt.state.pending_exception();
        assert_eq!(
            rt.state.objects().class_of(exception).unwrap(),
            "java/lang/NoSuchMethodError"
        );

        rt.jni(JniFunction::ExceptionClear, &[]);
        let void = rt.cstring("V");
        assert_eq!(returned(rt.jni(JniFunction::GetFieldID, &[class, name, void])), 0);
        let exception = rt.state.pending_exception();
        assert_eq!(
            rt.state.objects().class_of(exception).unwrap(),
            "java/lang/NoSuchFieldError"
        );
    }

    #[test]
    fn test_fields_store_without_handlers() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let class = rt.state.objects_mut().class_handle("a/B").raw();
        let name = rt.cstring("count");
        let sig = rt.cstring("I");
        let id = returned(rt.jni(JniFunction::GetFieldID, &[class, name, sig]));
        let this = rt.state.objects_mut().new_instance("a/B").raw();
        rt.jni(JniFunction::SetIntField, &[this, id, 41]);
        assert_eq!(returned(rt.jni(JniFunction::GetIntField, &[this, id])), 41);
    }

    #[test]
    fn test_register_natives() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let class = rt.state.objects_mut().class_handle("a/B").raw();
        let name = rt.cstring("getToken");
        let sig = rt.cstring("(Landroid/content/Context;)Ljava/lang/String;");
        let table = rt.alloc(24);
        rt.memory.write_u64(table, name).unwrap();
        rt.memory.write_u64(table + 8, sig).unwrap();
        rt.memory.write_u64(table + 16, 0x4000_1234).unwrap();
        assert_eq!(returned(rt.jni(JniFunction::RegisterNatives, &[class, table, 1])), 0);
        assert_eq!(
            rt.state
                .native("a/B", "getToken", "(Landroid/content/Context;)Ljava/lang/String;"),
            Some(0x4000_1234)
        );
    }

    #[test]
    fn test_java_vm_and_refs() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let out = rt.alloc(8);
        assert_eq!(returned(rt.jni(JniFunction::GetJavaVM, &[out])), 0);
        assert_eq!(rt.memory.read_u64(out).unwrap(), rt.state.java_vm());
        assert_eq!(returned(rt.jni(JniFunction::NewGlobalRef, &[17])), 17);
        assert_eq!(returned(rt.jni(JniFunction::IsSameObject, &[3, 3])), 1);
        assert_eq!(returned(rt.jni(JniFunction::GetObjectRefType, &[0])), 0);
    }

    #[test]
    fn test_global_refs_survive_release() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let mark = rt.state.objects().watermark();
        let kept = rt.state.objects_mut().new_string("cached");
        let scratch = rt.state.objects_mut().new_string("scratch");
        rt.jni(JniFunction::NewGlobalRef, &[kept.raw()]);
        assert!(rt.state.objects().is_pinned(kept));

        assert_eq!(rt.state.objects_mut().release_since(mark), 1);
        assert!(rt.state.objects().contains(kept));
        assert!(!rt.state.objects().contains(scratch));

        rt.jni(JniFunction::DeleteGlobalRef, &[kept.raw()]);
        assert_eq!(rt.state.objects_mut().release_since(mark), 1);
        assert!(!rt.state.objects().contains(kept));
    }

    #[test]
    fn test_fatal_error_exits() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        let message = rt.cstring("bad");
        assert_eq!(
            rt.jni(JniFunction::FatalError, &[message]),
            TrapAction::Exit(Fault::Exit {
                function: "FatalError",
                status: 134
            })
        );
    }

    #[test]
    fn test_stale_handle_is_host_failure() {
        let mut rt = TestRuntime::new(DispatchTable::empty());
        assert!(matches!(
            rt.jni(JniFunction::GetStringLength, &[0xdead]),
            TrapAction::Exit(Fault::HostFailure { .. })
        ));
    }
}
