//! JNI function table layout.
//!
//! [`JniFunction`] enumerates the 234 slots of `JNINativeInterface` in table
//! order, so `function as usize` is the slot index native code calls through.
//! The typed families (`Call<Type>Method{,V,A}`, `Get<Type>Field`, ...) are laid
//! out in regular runs; [`JniFunction::family`] recovers the family, the value
//! type and the argument style from the index instead of listing every member.
//!
//! [`InvokeFunction`] does the same for the 8-slot `JNIInvokeInterface` behind
//! `JavaVM*`.

use strum::{EnumCount, FromRepr, IntoStaticStr};

use crate::emulation::runtime::descriptor::PrimitiveKind;

/// `JNI_VERSION_1_6`, reported by `GetVersion` and accepted by `GetEnv`.
pub const JNI_VERSION_1_6: u32 = 0x0001_0006;

/// `JNI_OK`
pub const JNI_OK: i32 = 0;

/// `JNI_ERR`
pub const JNI_ERR: i32 = -1;

/// `JNI_EVERSION`
pub const JNI_EVERSION: i32 = -3;

/// `JNI_COMMIT`: copy back but keep the buffer.
pub const JNI_COMMIT: u64 = 1;

/// `JNI_ABORT`: free the buffer without copying back.
pub const JNI_ABORT: u64 = 2;

/// `JNILocalRefType`
pub const JNI_LOCAL_REF_TYPE: u64 = 1;

/// A slot of `JNINativeInterface`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromRepr, IntoStaticStr, EnumCount)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum JniFunction {
    Reserved0 = 0,
    Reserved1,
    Reserved2,
    Reserved3,
    GetVersion,
    DefineClass,
    FindClass,
    FromReflectedMethod,
    FromReflectedField,
    ToReflectedMethod,
    GetSuperclass,
    IsAssignableFrom,
    ToReflectedField,
    Throw,
    ThrowNew,
    ExceptionOccurred,
    ExceptionDescribe,
    ExceptionClear,
    FatalError,
    PushLocalFrame,
    PopLocalFrame,
    NewGlobalRef,
    DeleteGlobalRef,
    DeleteLocalRef,
    IsSameObject,
    NewLocalRef,
    EnsureLocalCapacity,
    AllocObject,
    NewObject,
    NewObjectV,
    NewObjectA,
    GetObjectClass,
    IsInstanceOf,
    GetMethodID,
    CallObjectMethod,
    CallObjectMethodV,
    CallObjectMethodA,
    CallBooleanMethod,
    CallBooleanMethodV,
    CallBooleanMethodA,
    CallByteMethod,
    CallByteMethodV,
    CallByteMethodA,
    CallCharMethod,
    CallCharMethodV,
    CallCharMethodA,
    CallShortMethod,
    CallShortMethodV,
    CallShortMethodA,
    CallIntMethod,
    CallIntMethodV,
    CallIntMethodA,
    CallLongMethod,
    CallLongMethodV,
    CallLongMethodA,
    CallFloatMethod,
    CallFloatMethodV,
    CallFloatMethodA,
    CallDoubleMethod,
    CallDoubleMethodV,
    CallDoubleMethodA,
    CallVoidMethod,
    CallVoidMethodV,
    CallVoidMethodA,
    CallNonvirtualObjectMethod,
    CallNonvirtualObjectMethodV,
    CallNonvirtualObjectMethodA,
    CallNonvirtualBooleanMethod,
    CallNonvirtualBooleanMethodV,
    CallNonvirtualBooleanMethodA,
    CallNonvirtualByteMethod,
    CallNonvirtualByteMethodV,
    CallNonvirtualByteMethodA,
    CallNonvirtualCharMethod,
    CallNonvirtualCharMethodV,
    CallNonvirtualCharMethodA,
    CallNonvirtualShortMethod,
    CallNonvirtualShortMethodV,
    CallNonvirtualShortMethodA,
    CallNonvirtualIntMethod,
    CallNonvirtualIntMethodV,
    CallNonvirtualIntMethodA,
    CallNonvirtualLongMethod,
    CallNonvirtualLongMethodV,
    CallNonvirtualLongMethodA,
    CallNonvirtualFloatMethod,
    CallNonvirtualFloatMethodV,
    CallNonvirtualFloatMethodA,
    CallNonvirtualDoubleMethod,
    CallNonvirtualDoubleMethodV,
    CallNonvirtualDoubleMethodA,
    CallNonvirtualVoidMethod,
    CallNonvirtualVoidMethodV,
    CallNonvirtualVoidMethodA,
    GetFieldID,
    GetObjectField,
    GetBooleanField,
    GetByteField,
    GetCharField,
    GetShortField,
    GetIntField,
    GetLongField,
    GetFloatField,
    GetDoubleField,
    SetObjectField,
    SetBooleanField,
    SetByteField,
    SetCharField,
    SetShortField,
    SetIntField,
    SetLongField,
    SetFloatField,
    SetDoubleField,
    GetStaticMethodID,
    CallStaticObjectMethod,
    CallStaticObjectMethodV,
    CallStaticObjectMethodA,
    CallStaticBooleanMethod,
    CallStaticBooleanMethodV,
    CallStaticBooleanMethodA,
    CallStaticByteMethod,
    CallStaticByteMethodV,
    CallStaticByteMethodA,
    CallStaticCharMethod,
    CallStaticCharMethodV,
    CallStaticCharMethodA,
    CallStaticShortMethod,
    CallStaticShortMethodV,
    CallStaticShortMethodA,
    CallStaticIntMethod,
    CallStaticIntMethodV,
    CallStaticIntMethodA,
    CallStaticLongMethod,
    CallStaticLongMethodV,
    CallStaticLongMethodA,
    CallStaticFloatMethod,
    CallStaticFloatMethodV,
    CallStaticFloatMethodA,
    CallStaticDoubleMethod,
    CallStaticDoubleMethodV,
    CallStaticDoubleMethodA,
    CallStaticVoidMethod,
    CallStaticVoidMethodV,
    CallStaticVoidMethodA,
    GetStaticFieldID,
    GetStaticObjectField,
    GetStaticBooleanField,
    GetStaticByteField,
    GetStaticCharField,
    GetStaticShortField,
    GetStaticIntField,
    GetStaticLongField,
    GetStaticFloatField,
    GetStaticDoubleField,
    SetStaticObjectField,
    SetStaticBooleanField,
    SetStaticByteField,
    SetStaticCharField,
    SetStaticShortField,
    SetStaticIntField,
    SetStaticLongField,
    SetStaticFloatField,
    SetStaticDoubleField,
    NewString,
    GetStringLength,
    GetStringChars,
    ReleaseStringChars,
    NewStringUTF,
    GetStringUTFLength,
    GetStringUTFChars,
    ReleaseStringUTFChars,
    GetArrayLength,
    NewObjectArray,
    GetObjectArrayElement,
    SetObjectArrayElement,
    NewBooleanArray,
    NewByteArray,
    NewCharArray,
    NewShortArray,
    NewIntArray,
    NewLongArray,
    NewFloatArray,
    NewDoubleArray,
    GetBooleanArrayElements,
    GetByteArrayElements,
    GetCharArrayElements,
    GetShortArrayElements,
    GetIntArrayElements,
    GetLongArrayElements,
    GetFloatArrayElements,
    GetDoubleArrayElements,
    ReleaseBooleanArrayElements,
    ReleaseByteArrayElements,
    ReleaseCharArrayElements,
    ReleaseShortArrayElements,
    ReleaseIntArrayElements,
    ReleaseLongArrayElements,
    ReleaseFloatArrayElements,
    ReleaseDoubleArrayElements,
    GetBooleanArrayRegion,
    GetByteArrayRegion,
    GetCharArrayRegion,
    GetShortArrayRegion,
    GetIntArrayRegion,
    GetLongArrayRegion,
    GetFloatArrayRegion,
    GetDoubleArrayRegion,
    SetBooleanArrayRegion,
    SetByteArrayRegion,
    SetCharArrayRegion,
    SetShortArrayRegion,
    SetIntArrayRegion,
    SetLongArrayRegion,
    SetFloatArrayRegion,
    SetDoubleArrayRegion,
    RegisterNatives,
    UnregisterNatives,
    MonitorEnter,
    MonitorExit,
    GetJavaVM,
    GetStringRegion,
    GetStringUTFRegion,
    GetPrimitiveArrayCritical,
    ReleasePrimitiveArrayCritical,
    GetStringCritical,
    ReleaseStringCritical,
    NewWeakGlobalRef,
    DeleteWeakGlobalRef,
    ExceptionCheck,
    NewDirectByteBuffer,
    GetDirectBufferAddress,
    GetDirectBufferCapacity,
    GetObjectRefType,
    GetModule,
}

/// How the trailing Java arguments of a call are passed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgStyle {
    /// C variadic arguments (`CallIntMethod(env, obj, id, ...)`).
    Variadic,
    /// A `va_list` (`CallIntMethodV`).
    VaList,
    /// A `jvalue[]` (`CallIntMethodA`).
    Array,
}

/// The Java type a typed JNI function deals in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `jobject`
    Object,
    /// A primitive.
    Primitive(PrimitiveKind),
    /// `void`
    Void,
}

/// Families of typed JNI functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Family {
    /// `NewObject{,V,A}`
    NewObject(ArgStyle),
    /// `Call<Type>Method{,V,A}`
    CallMethod(ValueType, ArgStyle),
    /// `CallNonvirtual<Type>Method{,V,A}`
    CallNonvirtualMethod(ValueType, ArgStyle),
    /// `CallStatic<Type>Method{,V,A}`
    CallStaticMethod(ValueType, ArgStyle),
    /// `Get<Type>Field`
    GetField(ValueType),
    /// `Set<Type>Field`
    SetField(ValueType),
    /// `GetStatic<Type>Field`
    GetStaticField(ValueType),
    /// `SetStatic<Type>Field`
    SetStaticField(ValueType),
    /// `New<Type>Array`
    NewArray(PrimitiveKind),
    /// `Get<Type>ArrayElements`
    GetArrayElements(PrimitiveKind),
    /// `Release<Type>ArrayElements`
    ReleaseArrayElements(PrimitiveKind),
    /// `Get<Type>ArrayRegion`
    GetArrayRegion(PrimitiveKind),
    /// `Set<Type>ArrayRegion`
    SetArrayRegion(PrimitiveKind),
}

const PRIMITIVES: [PrimitiveKind; 8] = [
    PrimitiveKind::Boolean,
    PrimitiveKind::Byte,
    PrimitiveKind::Char,
    PrimitiveKind::Short,
    PrimitiveKind::Int,
    PrimitiveKind::Long,
    PrimitiveKind::Float,
    PrimitiveKind::Double,
];

const STYLES: [ArgStyle; 3] = [ArgStyle::Variadic, ArgStyle::VaList, ArgStyle::Array];

/// Value types in family order: object, the eight primitives, then void.
fn value_type(index: u16) -> ValueType {
    match index {
        0 => ValueType::Object,
        1..=8 => ValueType::Primitive(PRIMITIVES[usize::from(index - 1)]),
        _ => ValueType::Void,
    }
}

impl JniFunction {
    /// Looks up the function at a table slot.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        u16::try_from(index).ok().and_then(Self::from_repr)
    }

    /// The table slot of this function.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The JNI name of this function.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for the four reserved slots, which hold null.
    #[must_use]
    pub fn is_reserved(self) -> bool {
        (self as u16) < JniFunction::GetVersion as u16
    }

    /// Classifies a typed function; `None` for the untyped ones.
    #[must_use]
    pub fn family(self) -> Option<Family> {
        let i = self as u16;
        let call = |base: u16| (value_type((i - base) / 3), STYLES[usize::from((i - base) % 3)]);
        let prim = |base: u16| PRIMITIVES[usize::from(i - base)];
        Some(match i {
            28..=30 => Family::NewObject(STYLES[usize::from(i - 28)]),
            34..=63 => {
                let (ty, style) = call(34);
                Family::CallMethod(ty, style)
            }
            64..=93 => {
                let (ty, style) = call(64);
                Family::CallNonvirtualMethod(ty, style)
            }
            95..=103 => Family::GetField(value_type(i - 95)),
            104..=112 => Family::SetField(value_type(i - 104)),
            114..=143 => {
                let (ty, style) = call(114);
                Family::CallStaticMethod(ty, style)
            }
            145..=153 => Family::GetStaticField(value_type(i - 145)),
            154..=162 => Family::SetStaticField(value_type(i - 154)),
            175..=182 => Family::NewArray(prim(175)),
            183..=190 => Family::GetArrayElements(prim(183)),
            191..=198 => Family::ReleaseArrayElements(prim(191)),
            199..=206 => Family::GetArrayRegion(prim(199)),
            207..=214 => Family::SetArrayRegion(prim(207)),
            _ => return None,
        })
    }
}

/// A slot of `JNIInvokeInterface`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromRepr, IntoStaticStr, EnumCount)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum InvokeFunction {
    Reserved0 = 0,
    Reserved1,
    Reserved2,
    DestroyJavaVM,
    AttachCurrentThread,
    DetachCurrentThread,
    GetEnv,
    AttachCurrentThreadAsDaemon,
}

impl InvokeFunction {
    /// Looks up the function at a table slot.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        u16::try_from(index).ok().and_then(Self::from_repr)
    }

    /// Slot index within `JNIInvokeInterface`.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The JNI name of this function.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for the three reserved slots.
    #[must_use]
    pub fn is_reserved(self) -> bool {
        (self as u16) < InvokeFunction::DestroyJavaVM as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_sizes() {
        assert_eq!(JniFunction::COUNT, 234);
        assert_eq!(InvokeFunction::COUNT, 8);
        assert_eq!(JniFunction::from_index(233), Some(JniFunction::GetModule));
        assert_eq!(JniFunction::from_index(234), None);
    }

    #[test]
    fn test_well_known_slots() {
        assert_eq!(JniFunction::GetVersion.index(), 4);
        assert_eq!(JniFunction::FindClass.index(), 6);
        assert_eq!(JniFunction::GetMethodID.index(), 33);
        assert_eq!(JniFunction::CallObjectMethod.index(), 34);
        assert_eq!(JniFunction::GetFieldID.index(), 94);
        assert_eq!(JniFunction::GetIntField.index(), 100);
        assert_eq!(JniFunction::GetStaticMethodID.index(), 113);
        assert_eq!(JniFunction::NewStringUTF.index(), 167);
        assert_eq!(JniFunction::GetStringUTFChars.index(), 169);
        assert_eq!(JniFunction::GetArrayLength.index(), 171);
        assert_eq!(JniFunction::RegisterNatives.index(), 215);
        assert_eq!(JniFunction::GetJavaVM.index(), 219);
        assert_eq!(JniFunction::ExceptionCheck.index(), 228);
        assert_eq!(InvokeFunction::GetEnv as usize, 6);
    }

    #[test]
    fn test_families() {
        assert_eq!(
            JniFunction::CallObjectMethod.family(),
            Some(Family::CallMethod(ValueType::Object, ArgStyle::Variadic))
        );
        assert_eq!(
            JniFunction::CallIntMethodV.family(),
            Some(Family::CallMethod(
                ValueType::Primitive(PrimitiveKind::Int),
                ArgStyle::VaList
            ))
        );
        assert_eq!(
            JniFunction::CallStaticVoidMethodA.family(),
            Some(Family::CallStaticMethod(ValueType::Void, ArgStyle::Array))
        );
        assert_eq!(
            JniFunction::CallNonvirtualDoubleMethod.family(),
            Some(Family::CallNonvirtualMethod(
                ValueType::Primitive(PrimitiveKind::Double),
                ArgStyle::Variadic
            ))
        );
        assert_eq!(
            JniFunction::GetIntField.family(),
            Some(Family::GetField(ValueType::Primitive(PrimitiveKind::Int)))
        );
        assert_eq!(
            JniFunction::SetStaticObjectField.family(),
            Some(Family::SetStaticField(ValueType::Object))
        );
        assert_eq!(
            JniFunction::NewByteArray.family(),
            Some(Family::NewArray(PrimitiveKind::Byte))
        );
        assert_eq!(
            JniFunction::ReleaseDoubleArrayElements.family(),
            Some(Family::ReleaseArrayElements(PrimitiveKind::Double))
        );
        assert_eq!(
            JniFunction::NewObjectA.family(),
            Some(Family::NewObject(ArgStyle::Array))
        );
        assert_eq!(JniFunction::FindClass.family(), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(JniFunction::GetStringUTFChars.name(), "GetStringUTFChars");
        assert!(JniFunction::Reserved3.is_reserved());
        assert!(!JniFunction::GetVersion.is_reserved());
        assert_eq!(InvokeFunction::GetEnv.name(), "GetEnv");
        assert!(InvokeFunction::Reserved2.is_reserved());
    }
}
