//! Dispatch handlers for the Android framework calls a signing library makes.
//!
//! Libraries that authenticate their host application typically walk
//! `Context -> PackageManager -> PackageInfo -> Signature` and hash the
//! certificate. Every step of that walk is answered here from an [`AppProfile`].
//!
//! # Handled Signatures
//!
//! | Class | Members |
//! |-------|---------|
//! | `android/content/Context` | `getPackageName`, `getPackageManager`, `getApplicationContext` |
//! | `android/content/pm/PackageManager` | `getPackageInfo(String, int)` |
//! | `android/content/pm/PackageInfo` | `versionCode`, `versionName`, `packageName`, `signatures`, `signingInfo`, `getVersionCode`, `getLongVersionCode` |
//! | `android/content/pm/SigningInfo` | `getApkContentsSigners`, `getSigningCertificateHistory` |
//! | `android/content/pm/Signature` | `<init>([B)`, `<init>(String)`, `toCharsString`, `toByteArray`, `hashCode`, `equals` |
//! | `java/security/MessageDigest` | `getInstance`, `update`, `digest`, `reset`, `getAlgorithm` |
//! | `java/lang/String` | `<init>([B)`, `<init>([BString)`, `getBytes`, `getBytes(String)` |
//!
//! `MessageDigest` supports `MD5` and `SHA-1`; its pending input lives in the
//! instance payload.

use std::sync::Arc;

use md5::{Digest, Md5};
use sha1::Sha1;

use crate::{
    android::profile::{java_array_hash, AppProfile},
    emulation::runtime::{CallContext, DispatchTable, DispatchTableBuilder, Handle, JavaValue},
    Error, Result,
};

/// Class path of `android.content.Context`.
pub const CONTEXT_CLASS: &str = "android/content/Context";
/// Class path of `android.content.pm.PackageManager`.
pub const PACKAGE_MANAGER_CLASS: &str = "android/content/pm/PackageManager";
/// Class path of `android.content.pm.PackageInfo`.
pub const PACKAGE_INFO_CLASS: &str = "android/content/pm/PackageInfo";
/// Class path of `android.content.pm.SigningInfo`.
pub const SIGNING_INFO_CLASS: &str = "android/content/pm/SigningInfo";
/// Class path of `android.content.pm.Signature`.
pub const SIGNATURE_CLASS: &str = "android/content/pm/Signature";
/// Class path of `java.security.MessageDigest`.
pub const MESSAGE_DIGEST_CLASS: &str = "java/security/MessageDigest";

const ALGORITHM_FIELD: &str = "algorithm";

/// Builds a dispatch table answering framework calls from `profile`.
///
/// # Example
///
/// ```rust
/// use droidemu::android::{dispatch_table, AppProfile};
/// use droidemu::emulation::runtime::CallKind;
///
/// let table = dispatch_table(&AppProfile::default());
/// assert!(table.contains(CallKind::GetField, "android/content/pm/PackageInfo->versionCode:I"));
/// ```
#[must_use]
pub fn dispatch_table(profile: &AppProfile) -> DispatchTable {
    register(DispatchTable::builder(), Arc::new(profile.clone())).build()
}

/// Adds every framework handler to `builder`.
#[must_use]
pub fn register(builder: DispatchTableBuilder, profile: Arc<AppProfile>) -> DispatchTableBuilder {
    let builder = register_context(builder, &profile);
    let builder = register_package_info(builder, &profile);
    let builder = register_signature(builder, &profile);
    let builder = register_message_digest(builder);
    register_string(builder)
}

fn register_context(builder: DispatchTableBuilder, profile: &Arc<AppProfile>) -> DispatchTableBuilder {
    let package = Arc::clone(profile);
    builder
        .method(
            "android/content/Context->getPackageName()Ljava/lang/String;",
            move |ctx| Ok(ctx.new_string(package.package_name.as_str())),
        )
        .method(
            "android/content/Context->getPackageManager()Landroid/content/pm/PackageManager;",
            |ctx| Ok(JavaValue::Object(ctx.objects.new_instance(PACKAGE_MANAGER_CLASS))),
        )
        .method(
            "android/content/Context->getApplicationContext()Landroid/content/Context;",
            |ctx| Ok(JavaValue::Object(ctx.this)),
        )
        .method(
            "android/content/pm/PackageManager->getPackageInfo(Ljava/lang/String;I)Landroid/content/pm/PackageInfo;",
            |ctx| {
                log::debug!("getPackageInfo({:?}, {:#x})", ctx.arg_string(0).ok(), ctx.arg_long(1).unwrap_or(0));
                Ok(JavaValue::Object(ctx.objects.new_instance(PACKAGE_INFO_CLASS)))
            },
        )
}

fn register_package_info(
    builder: DispatchTableBuilder,
    profile: &Arc<AppProfile>,
) -> DispatchTableBuilder {
    let code = profile.version_code;
    let name = Arc::clone(profile);
    let package = Arc::clone(profile);
    let signatures = Arc::clone(profile);
    let signers = Arc::clone(profile);
    let history = Arc::clone(profile);

    builder
        .field("android/content/pm/PackageInfo->versionCode:I", move |_| {
            Ok(JavaValue::Int(code))
        })
        .method("android/content/pm/PackageInfo->getVersionCode()I", move |_| {
            Ok(JavaValue::Int(code))
        })
        .method("android/content/pm/PackageInfo->getLongVersionCode()J", move |_| {
            Ok(JavaValue::Long(i64::from(code)))
        })
        .field(
            "android/content/pm/PackageInfo->versionName:Ljava/lang/String;",
            move |ctx| Ok(ctx.new_string(name.version_name.as_str())),
        )
        .field(
            "android/content/pm/PackageInfo->packageName:Ljava/lang/String;",
            move |ctx| Ok(ctx.new_string(package.package_name.as_str())),
        )
        .field(
            "android/content/pm/PackageInfo->signatures:[Landroid/content/pm/Signature;",
            move |ctx| Ok(signature_array(ctx, &signatures)),
        )
        .field(
            "android/content/pm/PackageInfo->signingInfo:Landroid/content/pm/SigningInfo;",
            |ctx| Ok(JavaValue::Object(ctx.objects.new_instance(SIGNING_INFO_CLASS))),
        )
        .method(
            "android/content/pm/SigningInfo->getApkContentsSigners()[Landroid/content/pm/Signature;",
            move |ctx| Ok(signature_array(ctx, &signers)),
        )
        .method(
            "android/content/pm/SigningInfo->getSigningCertificateHistory()[Landroid/content/pm/Signature;",
            move |ctx| Ok(signature_array(ctx, &history)),
        )
}

fn register_signature(builder: DispatchTableBuilder, profile: &Arc<AppProfile>) -> DispatchTableBuilder {
    let chars = Arc::clone(profile);
    let bytes = Arc::clone(profile);
    let hash = Arc::clone(profile);
    let equals = Arc::clone(profile);

    builder
        .constructor("android/content/pm/Signature-><init>([B)V", |ctx| {
            let certificate = ctx.objects.byte_array(ctx.arg_handle(0)?)?.to_vec();
            Ok(JavaValue::Object(
                ctx.objects.new_instance_with_payload(SIGNATURE_CLASS, certificate),
            ))
        })
        .constructor("android/content/pm/Signature-><init>(Ljava/lang/String;)V", |ctx| {
            let text = ctx.arg_string(0)?;
            let certificate = hex::decode(&text)
                .map_err(|error| Error::Error(format!("Signature(\"{text}\"): {error}")))?;
            Ok(JavaValue::Object(
                ctx.objects.new_instance_with_payload(SIGNATURE_CLASS, certificate),
            ))
        })
        .method(
            "android/content/pm/Signature->toCharsString()Ljava/lang/String;",
            move |ctx| {
                let text = hex::encode(signature_bytes(ctx, ctx.this, &chars));
                Ok(ctx.new_string(text))
            },
        )
        .method("android/content/pm/Signature->toByteArray()[B", move |ctx| {
            let certificate = signature_bytes(ctx, ctx.this, &bytes);
            Ok(ctx.new_byte_array(certificate))
        })
        .method("android/content/pm/Signature->hashCode()I", move |ctx| {
            Ok(JavaValue::Int(java_array_hash(&signature_bytes(ctx, ctx.this, &hash))))
        })
        .method(
            "android/content/pm/Signature->equals(Ljava/lang/Object;)Z",
            move |ctx| {
                let other = ctx.arg_handle(0)?;
                if !ctx.objects.is_instance_of(other, SIGNATURE_CLASS).unwrap_or(false) {
                    return Ok(JavaValue::Boolean(false));
                }
                let same = signature_bytes(ctx, ctx.this, &equals)
                    == signature_bytes(ctx, other, &equals);
                Ok(JavaValue::Boolean(same))
            },
        )
}

/// The certificate carried by a `Signature` instance, or the profile's when the
/// instance was created without one.
fn signature_bytes(ctx: &CallContext<'_>, signature: Handle, profile: &AppProfile) -> Vec<u8> {
    match ctx.objects.instance(signature) {
        Ok(instance) if !instance.payload.is_empty() => instance.payload.clone(),
        _ => profile.signing_certificate.clone(),
    }
}

fn signature_array(ctx: &mut CallContext<'_>, profile: &AppProfile) -> JavaValue {
    let signature = ctx
        .objects
        .new_instance_with_payload(SIGNATURE_CLASS, profile.signing_certificate.clone());
    JavaValue::Object(ctx.objects.new_object_array(SIGNATURE_CLASS, vec![signature]))
}

/// Hash algorithms behind `MessageDigest.getInstance`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DigestAlgorithm {
    Md5,
    Sha1,
}

impl DigestAlgorithm {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MD5" => Some(DigestAlgorithm::Md5),
            "SHA-1" | "SHA1" | "SHA" => Some(DigestAlgorithm::Sha1),
            _ => None,
        }
    }

    fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(DigestAlgorithm::Md5),
            1 => Some(DigestAlgorithm::Sha1),
            _ => None,
        }
    }

    fn id(self) -> i32 {
        match self {
            DigestAlgorithm::Md5 => 0,
            DigestAlgorithm::Sha1 => 1,
        }
    }

    fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::Md5 => Md5::digest(data).to_vec(),
            DigestAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        }
    }
}

fn digest_algorithm(ctx: &CallContext<'_>) -> Result<DigestAlgorithm> {
    let instance = ctx.objects.instance(ctx.this)?;
    instance
        .fields
        .get(ALGORITHM_FIELD)
        .and_then(|value| value.as_int())
        .and_then(DigestAlgorithm::from_id)
        .ok_or_else(|| Error::Error(format!("{} is not a MessageDigest", ctx.this)))
}

fn digest_update(ctx: &mut CallContext<'_>, offset: usize, length: Option<usize>) -> Result<()> {
    let data = ctx.objects.byte_array(ctx.arg_handle(0)?)?;
    let end = match length {
        Some(length) => offset.checked_add(length),
        None => Some(data.len()),
    };
    let chunk = end
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| Error::Error(format!("MessageDigest.update range {offset}+{length:?} out of bounds")))?
        .to_vec();
    ctx.objects.instance_mut(ctx.this)?.payload.extend_from_slice(&chunk);
    Ok(())
}

fn digest_finish(ctx: &mut CallContext<'_>) -> Result<JavaValue> {
    let algorithm = digest_algorithm(ctx)?;
    let input = std::mem::take(&mut ctx.objects.instance_mut(ctx.this)?.payload);
    let output = algorithm.digest(&input);
    Ok(ctx.new_byte_array(output))
}

fn register_message_digest(builder: DispatchTableBuilder) -> DispatchTableBuilder {
    builder
        .static_method(
            "java/security/MessageDigest->getInstance(Ljava/lang/String;)Ljava/security/MessageDigest;",
            |ctx| {
                let name = ctx.arg_string(0)?;
                let algorithm = DigestAlgorithm::from_name(&name).ok_or_else(|| {
                    Error::Error(format!("MessageDigest algorithm {name} is not available"))
                })?;
                let digest = ctx.objects.new_instance(MESSAGE_DIGEST_CLASS);
                ctx.objects
                    .instance_mut(digest)?
                    .fields
                    .insert(ALGORITHM_FIELD.to_string(), JavaValue::Int(algorithm.id()));
                Ok(JavaValue::Object(digest))
            },
        )
        .method("java/security/MessageDigest->update([B)V", |ctx| {
            digest_update(ctx, 0, None)?;
            Ok(JavaValue::Void)
        })
        .method("java/security/MessageDigest->update([BII)V", |ctx| {
            let offset = usize::try_from(ctx.arg_long(1)?).unwrap_or(usize::MAX);
            let length = usize::try_from(ctx.arg_long(2)?).unwrap_or(usize::MAX);
            digest_update(ctx, offset, Some(length))?;
            Ok(JavaValue::Void)
        })
        .method("java/security/MessageDigest->update(B)V", |ctx| {
            let byte = ctx.arg_long(0)? as u8;
            ctx.objects.instance_mut(ctx.this)?.payload.push(byte);
            Ok(JavaValue::Void)
        })
        .method("java/security/MessageDigest->digest()[B", digest_finish)
        .method("java/security/MessageDigest->digest([B)[B", |ctx| {
            digest_update(ctx, 0, None)?;
            digest_finish(ctx)
        })
        .method("java/security/MessageDigest->reset()V", |ctx| {
            ctx.objects.instance_mut(ctx.this)?.payload.clear();
            Ok(JavaValue::Void)
        })
        .method(
            "java/security/MessageDigest->getAlgorithm()Ljava/lang/String;",
            |ctx| {
                let algorithm = digest_algorithm(ctx)?;
                Ok(ctx.new_string(algorithm.name()))
            },
        )
}

fn register_string(builder: DispatchTableBuilder) -> DispatchTableBuilder {
    fn from_bytes(ctx: &mut CallContext<'_>) -> Result<JavaValue> {
        let bytes = ctx.objects.byte_array(ctx.arg_handle(0)?)?;
        let text = String::from_utf8_lossy(bytes).into_owned();
        Ok(ctx.new_string(text))
    }

    fn to_bytes(ctx: &mut CallContext<'_>) -> Result<JavaValue> {
        let bytes = ctx.objects.string(ctx.this)?.as_bytes().to_vec();
        Ok(ctx.new_byte_array(bytes))
    }

    builder
        .constructor("java/lang/String-><init>([B)V", from_bytes)
        .constructor("java/lang/String-><init>([BLjava/lang/String;)V", from_bytes)
        .method("java/lang/String->getBytes()[B", to_bytes)
        .method("java/lang/String->getBytes(Ljava/lang/String;)[B", to_bytes)
}
