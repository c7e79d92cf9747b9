//! Signature-keyed dispatch of Java callbacks.
//!
//! Every call native code makes back into Java (`Call<Type>Method`,
//! `Get<Type>Field`, `NewObject`, ...) is reduced to a [`CallKind`] and an exact
//! textual signature:
//!
//! - methods: `android/content/pm/PackageManager->getPackageInfo(Ljava/lang/String;I)Landroid/content/pm/PackageInfo;`
//! - fields: `android/content/pm/PackageInfo->versionName:Ljava/lang/String;`
//!
//! The pair is looked up in an immutable [`DispatchTable`]. A hit runs the
//! registered [`Handler`]; a miss is recorded as a [`DispatchMiss`] and answered
//! according to the session's [`MissPolicy`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use droidemu::emulation::runtime::{CallKind, DispatchTable, JavaValue};
//!
//! let table = DispatchTable::builder()
//!     .field("android/content/pm/PackageInfo->versionCode:I", |_| Ok(JavaValue::Int(42)))
//!     .method(
//!         "android/content/Context->getPackageName()Ljava/lang/String;",
//!         |ctx| Ok(JavaValue::Object(ctx.objects.new_string("com.example"))),
//!     )
//!     .build();
//!
//! assert!(table.contains(CallKind::GetField, "android/content/pm/PackageInfo->versionCode:I"));
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    emulation::{
        runtime::objects::{Handle, JavaValue, ObjectTable},
        EmulationError,
    },
    Result,
};

/// The shape of a Java callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `Get<Type>Field`
    GetField,
    /// `Set<Type>Field`
    SetField,
    /// `GetStatic<Type>Field`
    GetStaticField,
    /// `SetStatic<Type>Field`
    SetStaticField,
    /// `Call<Type>Method` and `CallNonvirtual<Type>Method`
    CallMethod,
    /// `CallStatic<Type>Method`
    CallStaticMethod,
    /// `NewObject` and `AllocObject`, keyed by the `<init>` signature.
    NewObject,
}

impl CallKind {
    /// Returns `true` for the four field kinds.
    #[must_use]
    pub fn is_field(self) -> bool {
        matches!(
            self,
            CallKind::GetField
                | CallKind::SetField
                | CallKind::GetStaticField
                | CallKind::SetStaticField
        )
    }

    /// Returns `true` for kinds without a receiver.
    #[must_use]
    pub fn is_static(self) -> bool {
        matches!(
            self,
            CallKind::GetStaticField | CallKind::SetStaticField | CallKind::CallStaticMethod
        )
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallKind::GetField => "GetField",
            CallKind::SetField => "SetField",
            CallKind::GetStaticField => "GetStaticField",
            CallKind::SetStaticField => "SetStaticField",
            CallKind::CallMethod => "CallMethod",
            CallKind::CallStaticMethod => "CallStaticMethod",
            CallKind::NewObject => "NewObject",
        };
        f.write_str(name)
    }
}

/// Builds a method signature `Class->name(Args)Ret`.
#[must_use]
pub fn method_signature(class: &str, name: &str, descriptor: &str) -> String {
    format!("{class}->{name}{descriptor}")
}

/// Builds a field signature `Class->name:Type`.
#[must_use]
pub fn field_signature(class: &str, name: &str, descriptor: &str) -> String {
    format!("{class}->{name}:{descriptor}")
}

/// Everything a handler knows about the intercepted call.
pub struct CallContext<'a> {
    /// The receiver; [`Handle::NULL`] for static calls and constructors.
    pub this: Handle,
    /// JNI class path the member ID was obtained from.
    pub class: &'a str,
    /// The exact signature that matched.
    pub signature: &'a str,
    /// Decoded arguments. For `Set*Field` this is the single new value.
    pub args: &'a [JavaValue],
    /// The session's objects.
    pub objects: &'a mut ObjectTable,
}

impl CallContext<'_> {
    /// Returns argument `index`.
    ///
    /// # Errors
    ///
    /// Fails with [`EmulationError::IndexOutOfBounds`] if the call has fewer arguments.
    pub fn arg(&self, index: usize) -> Result<JavaValue> {
        self.args.get(index).copied().ok_or_else(|| {
            EmulationError::IndexOutOfBounds {
                index,
                length: self.args.len(),
            }
            .into()
        })
    }

    /// Returns reference argument `index`.
    ///
    /// # Errors
    ///
    /// Fails if the argument is missing or not a reference.
    pub fn arg_handle(&self, index: usize) -> Result<Handle> {
        match self.arg(index)? {
            JavaValue::Object(handle) => Ok(handle),
            other => Err(crate::Error::Error(format!(
                "argument {index} of {} is {other:?}, not a reference",
                self.signature
            ))),
        }
    }

    /// Returns string argument `index` as an owned Rust string.
    ///
    /// # Errors
    ///
    /// Fails if the argument is missing or not a `java.lang.String`.
    pub fn arg_string(&self, index: usize) -> Result<String> {
        let handle = self.arg_handle(index)?;
        Ok(self.objects.string(handle)?.to_string())
    }

    /// Returns integral argument `index` widened to `i64`.
    ///
    /// # Errors
    ///
    /// Fails if the argument is missing or not integral.
    pub fn arg_long(&self, index: usize) -> Result<i64> {
        self.arg(index)?.as_long().ok_or_else(|| {
            crate::Error::Error(format!("argument {index} of {} is not integral", self.signature))
        })
    }

    /// Creates a string and returns it as a reference value.
    pub fn new_string(&mut self, value: impl Into<String>) -> JavaValue {
        JavaValue::Object(self.objects.new_string(value))
    }

    /// Creates a `byte[]` and returns it as a reference value.
    pub fn new_byte_array(&mut self, bytes: impl Into<Vec<u8>>) -> JavaValue {
        JavaValue::Object(self.objects.new_byte_array(bytes))
    }
}

/// A callback implementation.
///
/// Handlers are plain closures shared between sessions; any per-session state
/// lives in the [`ObjectTable`] they receive.
pub type Handler = Arc<dyn Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync>;

/// An immutable map from `(CallKind, signature)` to [`Handler`].
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<(CallKind, String), Handler>,
}

impl DispatchTable {
    /// Starts building a table.
    #[must_use]
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::new()
    }

    /// A table without handlers; every call is a miss.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Looks up the handler for a call.
    #[must_use]
    pub fn get(&self, kind: CallKind, signature: &str) -> Option<&Handler> {
        self.handlers.get(&(kind, signature.to_string()))
    }

    /// Returns `true` if a handler is registered for the call.
    #[must_use]
    pub fn contains(&self, kind: CallKind, signature: &str) -> bool {
        self.get(kind, signature).is_some()
    }

    /// Iterates over all registered keys.
    pub fn keys(&self) -> impl Iterator<Item = (CallKind, &str)> {
        self.handlers.keys().map(|(kind, sig)| (*kind, sig.as_str()))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .handlers
            .keys()
            .map(|(kind, sig)| format!("{kind} {sig}"))
            .collect();
        keys.sort();
        f.debug_struct("DispatchTable").field("handlers", &keys).finish()
    }
}

/// Fluent construction of a [`DispatchTable`].
///
/// Registering the same key twice keeps the later handler.
#[derive(Default)]
pub struct DispatchTableBuilder {
    handlers: HashMap<(CallKind, String), Handler>,
}

impl DispatchTableBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an arbitrary call kind.
    #[must_use]
    pub fn on<F>(mut self, kind: CallKind, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync + 'static,
    {
        self.handlers
            .insert((kind, signature.into()), Arc::new(handler));
        self
    }

    /// Registers an instance method (`CallKind::CallMethod`).
    #[must_use]
    pub fn method<F>(self, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync + 'static,
    {
        self.on(CallKind::CallMethod, signature, handler)
    }

    /// Registers a static method (`CallKind::CallStaticMethod`).
    #[must_use]
    pub fn static_method<F>(self, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync + 'static,
    {
        self.on(CallKind::CallStaticMethod, signature, handler)
    }

    /// Registers an instance field read (`CallKind::GetField`).
    #[must_use]
    pub fn field<F>(self, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync + 'static,
    {
        self.on(CallKind::GetField, signature, handler)
    }

    /// Registers a static field read (`CallKind::GetStaticField`).
    #[must_use]
    pub fn static_field<F>(self, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync + 'static,
    {
        self.on(CallKind::GetStaticField, signature, handler)
    }

    /// Registers a constructor (`CallKind::NewObject`), keyed by `Class-><init>(Args)V`.
    #[must_use]
    pub fn constructor<F>(self, signature: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CallContext<'_>) -> Result<JavaValue> + Send + Sync + 'static,
    {
        self.on(CallKind::NewObject, signature, handler)
    }

    /// Copies every handler of `table` into this builder.
    #[must_use]
    pub fn merge(mut self, table: &DispatchTable) -> Self {
        for (key, handler) in &table.handlers {
            self.handlers.insert(key.clone(), Arc::clone(handler));
        }
        self
    }

    /// Freezes the table.
    #[must_use]
    pub fn build(self) -> DispatchTable {
        DispatchTable {
            handlers: self.handlers,
        }
    }
}

/// A callback the dispatch table had no handler for.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DispatchMiss {
    /// The kind of callback.
    pub kind: CallKind,
    /// Its exact signature.
    pub signature: String,
}

impl fmt::Display for DispatchMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.signature)
    }
}

/// How unanswered callbacks returning an object are answered.
///
/// Primitive results are zero under both policies. A field read on an
/// instance whose field was previously set returns the stored value first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Return an empty object of the declared type: `""` for strings, an empty
    /// array for arrays and a field-less instance otherwise.
    #[default]
    EmptyInstance,
    /// Return null.
    Null,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        assert_eq!(
            method_signature("android/content/Context", "getPackageName", "()Ljava/lang/String;"),
            "android/content/Context->getPackageName()Ljava/lang/String;"
        );
        assert_eq!(
            field_signature("android/content/pm/PackageInfo", "versionCode", "I"),
            "android/content/pm/PackageInfo->versionCode:I"
        );
    }

    #[test]
    fn test_builder_and_lookup() {
        let table = DispatchTable::builder()
            .field("a/B->x:I", |_| Ok(JavaValue::Int(1)))
            .method("a/B->f()I", |_| Ok(JavaValue::Int(2)))
            .build();

        assert_eq!(table.len(), 2);
        assert!(table.contains(CallKind::GetField, "a/B->x:I"));
        assert!(!table.contains(CallKind::GetStaticField, "a/B->x:I"));
        assert!(!table.contains(CallKind::CallMethod, "a/B->g()I"));
    }

    #[test]
    fn test_handler_uses_context() {
        let table = DispatchTable::builder()
            .method("a/B->echo(Ljava/lang/String;)Ljava/lang/String;", |ctx| {
                let text = ctx.arg_string(0)?;
                Ok(ctx.new_string(text.to_uppercase()))
            })
            .build();

        let mut objects = ObjectTable::new();
        let input = objects.new_string("abc");
        let args = [JavaValue::Object(input)];
        let signature = "a/B->echo(Ljava/lang/String;)Ljava/lang/String;";
        let handler = table.get(CallKind::CallMethod, signature).unwrap().clone();
        let mut ctx = CallContext {
            this: Handle::NULL,
            class: "a/B",
            signature,
            args: &args,
            objects: &mut objects,
        };
        let result = handler(&mut ctx).unwrap();
        assert_eq!(objects.string(result.as_handle().unwrap()).unwrap(), "ABC");
    }

    #[test]
    fn test_merge_overrides() {
        let base = DispatchTable::builder()
            .field("a/B->x:I", |_| Ok(JavaValue::Int(1)))
            .build();
        let table = DispatchTable::builder()
            .merge(&base)
            .field("a/B->x:I", |_| Ok(JavaValue::Int(2)))
            .build();
        assert_eq!(table.len(), 1);

        let mut objects = ObjectTable::new();
        let handler = table.get(CallKind::GetField, "a/B->x:I").unwrap().clone();
        let mut ctx = CallContext {
            this: Handle::NULL,
            class: "a/B",
            signature: "a/B->x:I",
            args: &[],
            objects: &mut objects,
        };
        assert_eq!(handler(&mut ctx).unwrap(), JavaValue::Int(2));
    }

    #[test]
    fn test_missing_argument() {
        let mut objects = ObjectTable::new();
        let ctx = CallContext {
            this: Handle::NULL,
            class: "a/B",
            signature: "a/B->f(I)V",
            args: &[],
            objects: &mut objects,
        };
        assert!(ctx.arg(0).is_err());
        assert!(ctx.arg_long(0).is_err());
    }
}
