//! Synthetic Java objects.
//!
//! Native code only ever sees opaque handles. The [`ObjectTable`] maps each
//! [`Handle`] to an [`ObjectValue`] that the bridge and the dispatch handlers
//! inspect and create. No class hierarchy is modelled: an object knows the name
//! of its class and nothing else.
//!
//! Handles are allocated monotonically and never reused within a session, so a
//! stale handle can never alias a newer object.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    emulation::{
        runtime::descriptor::{PrimitiveKind, TypeDescriptor},
        EmulationError,
    },
    Result,
};

/// Class path of `java.lang.String`.
pub const STRING_CLASS: &str = "java/lang/String";

/// Class path of `java.lang.Object`.
pub const OBJECT_CLASS: &str = "java/lang/Object";

/// Class path of `java.lang.Class`.
pub const CLASS_CLASS: &str = "java/lang/Class";

/// An opaque reference handed to native code as `jobject`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// The null reference.
    pub const NULL: Handle = Handle(0);

    /// Wraps a raw value read from a guest register.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Handle(raw)
    }

    /// The raw value passed to guest code.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` for [`Handle::NULL`].
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A Java value as seen by JNI: a primitive or a reference.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum JavaValue {
    /// No value (`void` methods).
    Void,
    /// `boolean`
    Boolean(bool),
    /// `byte`
    Byte(i8),
    /// `char` (a UTF-16 code unit)
    Char(u16),
    /// `short`
    Short(i16),
    /// `int`
    Int(i32),
    /// `long`
    Long(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// A reference, possibly null.
    Object(Handle),
}

impl JavaValue {
    /// The zero value of a type: `0`, `false`, `0.0` or null.
    #[must_use]
    pub fn zero(ty: &TypeDescriptor) -> Self {
        match ty {
            TypeDescriptor::Void => JavaValue::Void,
            TypeDescriptor::Primitive(kind) => JavaValue::from_bits(*kind, 0),
            TypeDescriptor::Object(_) | TypeDescriptor::Array(_) => JavaValue::Object(Handle::NULL),
        }
    }

    /// Interprets raw bits (a register or a `jvalue` slot) as a value of `kind`.
    ///
    /// Floating-point values are taken from the low bits as IEEE-754 patterns.
    #[must_use]
    pub fn from_bits(kind: PrimitiveKind, bits: u64) -> Self {
        match kind {
            PrimitiveKind::Boolean => JavaValue::Boolean(bits as u8 != 0),
            PrimitiveKind::Byte => JavaValue::Byte(bits as i8),
            PrimitiveKind::Char => JavaValue::Char(bits as u16),
            PrimitiveKind::Short => JavaValue::Short(bits as i16),
            PrimitiveKind::Int => JavaValue::Int(bits as i32),
            PrimitiveKind::Long => JavaValue::Long(bits as i64),
            PrimitiveKind::Float => JavaValue::Float(f32::from_bits(bits as u32)),
            PrimitiveKind::Double => JavaValue::Double(f64::from_bits(bits)),
        }
    }

    /// Interprets raw bits as a value of the given type.
    #[must_use]
    pub fn from_raw(ty: &TypeDescriptor, bits: u64) -> Self {
        match ty {
            TypeDescriptor::Void => JavaValue::Void,
            TypeDescriptor::Primitive(kind) => JavaValue::from_bits(*kind, bits),
            TypeDescriptor::Object(_) | TypeDescriptor::Array(_) => {
                JavaValue::Object(Handle::new(bits))
            }
        }
    }

    /// The value as it appears in a general-purpose register.
    ///
    /// Signed types are sign-extended, `char` and `boolean` zero-extended, and
    /// floating-point values are returned as their bit pattern.
    #[must_use]
    pub fn to_bits(self) -> u64 {
        match self {
            JavaValue::Void => 0,
            JavaValue::Boolean(v) => u64::from(v),
            JavaValue::Byte(v) => v as i64 as u64,
            JavaValue::Char(v) => u64::from(v),
            JavaValue::Short(v) => v as i64 as u64,
            JavaValue::Int(v) => v as i64 as u64,
            JavaValue::Long(v) => v as u64,
            JavaValue::Float(v) => u64::from(v.to_bits()),
            JavaValue::Double(v) => v.to_bits(),
            JavaValue::Object(handle) => handle.raw(),
        }
    }

    /// Returns `true` for `float` and `double` values.
    #[must_use]
    pub fn is_floating(self) -> bool {
        matches!(self, JavaValue::Float(_) | JavaValue::Double(_))
    }

    /// Returns the handle of a reference value.
    #[must_use]
    pub fn as_handle(self) -> Option<Handle> {
        match self {
            JavaValue::Object(handle) => Some(handle),
            _ => None,
        }
    }

    /// Returns an integral value widened to `i64`.
    #[must_use]
    pub fn as_long(self) -> Option<i64> {
        match self {
            JavaValue::Boolean(v) => Some(i64::from(v)),
            JavaValue::Byte(v) => Some(i64::from(v)),
            JavaValue::Char(v) => Some(i64::from(v)),
            JavaValue::Short(v) => Some(i64::from(v)),
            JavaValue::Int(v) => Some(i64::from(v)),
            JavaValue::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `int` values.
    #[must_use]
    pub fn as_int(self) -> Option<i32> {
        match self {
            JavaValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Class path of the box type (`java/lang/Integer` for `int`).
    #[must_use]
    pub fn box_class(self) -> &'static str {
        match self {
            JavaValue::Boolean(_) => "java/lang/Boolean",
            JavaValue::Byte(_) => "java/lang/Byte",
            JavaValue::Char(_) => "java/lang/Character",
            JavaValue::Short(_) => "java/lang/Short",
            JavaValue::Int(_) => "java/lang/Integer",
            JavaValue::Long(_) => "java/lang/Long",
            JavaValue::Float(_) => "java/lang/Float",
            JavaValue::Double(_) => "java/lang/Double",
            JavaValue::Void | JavaValue::Object(_) => OBJECT_CLASS,
        }
    }
}

impl From<bool> for JavaValue {
    fn from(value: bool) -> Self {
        JavaValue::Boolean(value)
    }
}

impl From<i32> for JavaValue {
    fn from(value: i32) -> Self {
        JavaValue::Int(value)
    }
}

impl From<i64> for JavaValue {
    fn from(value: i64) -> Self {
        JavaValue::Long(value)
    }
}

impl From<Handle> for JavaValue {
    fn from(value: Handle) -> Self {
        JavaValue::Object(value)
    }
}

/// An instance of an arbitrary class.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instance {
    /// JNI class path.
    pub class: String,
    /// Opaque data supplied at construction, such as certificate bytes.
    pub payload: Vec<u8>,
    /// Named fields written by `Set<Type>Field` or by dispatch handlers.
    pub fields: HashMap<String, JavaValue>,
}

/// The contents behind a [`Handle`].
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectValue {
    /// An opaque record.
    Instance(Instance),
    /// A `java.lang.String`.
    String(String),
    /// An array of primitives, stored little-endian.
    PrimitiveArray {
        /// Element type.
        kind: PrimitiveKind,
        /// Raw element bytes.
        bytes: Vec<u8>,
    },
    /// An array of references.
    ObjectArray {
        /// Class path of the element type.
        element_class: String,
        /// Elements; null entries are [`Handle::NULL`].
        elements: Vec<Handle>,
    },
    /// A `java.lang.Class`, holding the class path it stands for.
    Class(String),
    /// A boxed primitive such as `java.lang.Integer`.
    Boxed(JavaValue),
}

impl ObjectValue {
    /// The class path `GetObjectClass` reports.
    #[must_use]
    pub fn class_name(&self) -> String {
        match self {
            ObjectValue::Instance(instance) => instance.class.clone(),
            ObjectValue::String(_) => STRING_CLASS.to_string(),
            ObjectValue::PrimitiveArray { kind, .. } => format!("[{}", kind.descriptor()),
            ObjectValue::ObjectArray { element_class, .. } => {
                if element_class.starts_with('[') {
                    format!("[{element_class}")
                } else {
                    format!("[L{element_class};")
                }
            }
            ObjectValue::Class(_) => CLASS_CLASS.to_string(),
            ObjectValue::Boxed(value) => value.box_class().to_string(),
        }
    }
}

/// The per-session arena of synthetic objects.
#[derive(Clone, Debug)]
pub struct ObjectTable {
    objects: HashMap<Handle, ObjectValue>,
    classes: HashMap<String, Handle>,
    globals: HashSet<Handle>,
    next: u64,
}

impl ObjectTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        ObjectTable {
            objects: HashMap::new(),
            classes: HashMap::new(),
            globals: HashSet::new(),
            next: 1,
        }
    }

    /// Stores a value and returns its new handle.
    pub fn insert(&mut self, value: ObjectValue) -> Handle {
        let handle = Handle(self.next);
        self.next += 1;
        self.objects.insert(handle, value);
        handle
    }

    /// Returns the value behind a handle.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidHandle`] for null or unknown handles.
    pub fn get(&self, handle: Handle) -> Result<&ObjectValue> {
        self.objects
            .get(&handle)
            .ok_or_else(|| EmulationError::InvalidHandle { handle: handle.raw() }.into())
    }

    /// Returns the value behind a handle mutably.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidHandle`] for null or unknown handles.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut ObjectValue> {
        self.objects
            .get_mut(&handle)
            .ok_or_else(|| EmulationError::InvalidHandle { handle: handle.raw() }.into())
    }

    /// Drops one object and returns its value. Class handles stay cached.
    pub fn remove(&mut self, handle: Handle) -> Option<ObjectValue> {
        self.globals.remove(&handle);
        self.objects.remove(&handle)
    }

    /// The handle the next allocation will receive.
    ///
    /// Pass it to [`ObjectTable::release_since`] to drop everything allocated
    /// in between.
    #[must_use]
    pub fn watermark(&self) -> Handle {
        Handle(self.next)
    }

    /// Drops every object allocated at or after `mark` and returns how many
    /// were dropped.
    ///
    /// Class objects and global references survive, since native code may
    /// cache them across calls.
    pub fn release_since(&mut self, mark: Handle) -> usize {
        let before = self.objects.len();
        let classes = &self.classes;
        let globals = &self.globals;
        self.objects.retain(|&handle, value| {
            handle < mark
                || globals.contains(&handle)
                || matches!(value, ObjectValue::Class(name) if classes.get(name) == Some(&handle))
        });
        before - self.objects.len()
    }

    /// Marks a handle as a global reference. Unknown handles are ignored.
    pub fn pin(&mut self, handle: Handle) {
        if self.objects.contains_key(&handle) {
            self.globals.insert(handle);
        }
    }

    /// Clears the global-reference mark of a handle.
    pub fn unpin(&mut self, handle: Handle) {
        self.globals.remove(&handle);
    }

    /// Returns `true` if the handle is a live global reference.
    #[must_use]
    pub fn is_pinned(&self, handle: Handle) -> bool {
        self.globals.contains(&handle)
    }

    /// Returns `true` if the handle names a live object.
    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.objects.contains_key(&handle)
    }

    /// Creates a `java.lang.String`.
    pub fn new_string(&mut self, value: impl Into<String>) -> Handle {
        self.insert(ObjectValue::String(value.into()))
    }

    /// Creates an empty instance of `class`.
    pub fn new_instance(&mut self, class: impl Into<String>) -> Handle {
        self.new_instance_with_payload(class, Vec::new())
    }

    /// Creates an instance of `class` carrying `payload`.
    pub fn new_instance_with_payload(&mut self, class: impl Into<String>, payload: Vec<u8>) -> Handle {
        self.insert(ObjectValue::Instance(Instance {
            class: class.into(),
            payload,
            fields: HashMap::new(),
        }))
    }

    /// Creates a `byte[]`.
    pub fn new_byte_array(&mut self, bytes: impl Into<Vec<u8>>) -> Handle {
        self.new_primitive_array(PrimitiveKind::Byte, bytes.into())
    }

    /// Creates a primitive array from raw little-endian element bytes.
    pub fn new_primitive_array(&mut self, kind: PrimitiveKind, bytes: Vec<u8>) -> Handle {
        self.insert(ObjectValue::PrimitiveArray { kind, bytes })
    }

    /// Creates an array of references.
    pub fn new_object_array(&mut self, element_class: impl Into<String>, elements: Vec<Handle>) -> Handle {
        self.insert(ObjectValue::ObjectArray {
            element_class: element_class.into(),
            elements,
        })
    }

    /// Boxes a primitive.
    pub fn new_boxed(&mut self, value: JavaValue) -> Handle {
        self.insert(ObjectValue::Boxed(value))
    }

    /// Returns the `java.lang.Class` handle for a class path, creating it once.
    pub fn class_handle(&mut self, name: &str) -> Handle {
        if let Some(&handle) = self.classes.get(name) {
            return handle;
        }
        let handle = self.insert(ObjectValue::Class(name.to_string()));
        self.classes.insert(name.to_string(), handle);
        handle
    }

    /// Returns the class path a `java.lang.Class` handle stands for.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not a class object.
    pub fn class_name(&self, handle: Handle) -> Result<&str> {
        match self.get(handle)? {
            ObjectValue::Class(name) => Ok(name),
            _ => Err(mismatch(handle, "class")),
        }
    }

    /// Returns the class path of the object behind `handle`.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    pub fn class_of(&self, handle: Handle) -> Result<String> {
        Ok(self.get(handle)?.class_name())
    }

    /// Returns the contents of a string object.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not a string.
    pub fn string(&self, handle: Handle) -> Result<&str> {
        match self.get(handle)? {
            ObjectValue::String(value) => Ok(value),
            _ => Err(mismatch(handle, "string")),
        }
    }

    /// Returns an instance record.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not an instance.
    pub fn instance(&self, handle: Handle) -> Result<&Instance> {
        match self.get(handle)? {
            ObjectValue::Instance(instance) => Ok(instance),
            _ => Err(mismatch(handle, "instance")),
        }
    }

    /// Returns an instance record mutably.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not an instance.
    pub fn instance_mut(&mut self, handle: Handle) -> Result<&mut Instance> {
        match self.get_mut(handle)? {
            ObjectValue::Instance(instance) => Ok(instance),
            _ => Err(mismatch(handle, "instance")),
        }
    }

    /// Returns the element type and bytes of a primitive array.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not a primitive array.
    pub fn primitive_array(&self, handle: Handle) -> Result<(PrimitiveKind, &[u8])> {
        match self.get(handle)? {
            ObjectValue::PrimitiveArray { kind, bytes } => Ok((*kind, bytes)),
            _ => Err(mismatch(handle, "primitive array")),
        }
    }

    /// Returns the bytes of a primitive array mutably.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not a primitive array.
    pub fn primitive_array_mut(&mut self, handle: Handle) -> Result<(PrimitiveKind, &mut Vec<u8>)> {
        match self.get_mut(handle)? {
            ObjectValue::PrimitiveArray { kind, bytes } => Ok((*kind, bytes)),
            _ => Err(mismatch(handle, "primitive array")),
        }
    }

    /// Returns the contents of a `byte[]`.
    ///
    /// # Errors
    ///
    /// Fails if the handle is not a `byte[]`.
    pub fn byte_array(&self, handle: Handle) -> Result<&[u8]> {
        match self.primitive_array(handle)? {
            (PrimitiveKind::Byte | PrimitiveKind::Boolean, bytes) => Ok(bytes),
            _ => Err(mismatch(handle, "byte array")),
        }
    }

    /// Returns the elements of an object array.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not an object array.
    pub fn object_array(&self, handle: Handle) -> Result<&[Handle]> {
        match self.get(handle)? {
            ObjectValue::ObjectArray { elements, .. } => Ok(elements),
            _ => Err(mismatch(handle, "object array")),
        }
    }

    /// Returns the elements of an object array mutably.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not an object array.
    pub fn object_array_mut(&mut self, handle: Handle) -> Result<&mut Vec<Handle>> {
        match self.get_mut(handle)? {
            ObjectValue::ObjectArray { elements, .. } => Ok(elements),
            _ => Err(mismatch(handle, "object array")),
        }
    }

    /// Returns the element count of any array.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown or not an array.
    pub fn array_length(&self, handle: Handle) -> Result<usize> {
        match self.get(handle)? {
            ObjectValue::PrimitiveArray { kind, bytes } => Ok(bytes.len() / kind.size()),
            ObjectValue::ObjectArray { elements, .. } => Ok(elements.len()),
            _ => Err(mismatch(handle, "array")),
        }
    }

    /// Checks whether an object can be treated as `class`.
    ///
    /// Classes are compared by name; `java/lang/Object` matches everything.
    ///
    /// # Errors
    ///
    /// Fails if the handle is unknown.
    pub fn is_instance_of(&self, handle: Handle, class: &str) -> Result<bool> {
        if handle.is_null() {
            return Ok(true);
        }
        Ok(class == OBJECT_CLASS || self.class_of(handle)? == class)
    }

    /// Creates the value used for an unanswered call returning `ty`.
    ///
    /// Strings are empty, arrays have no elements, other classes are empty
    /// instances and primitives are zero.
    pub fn empty_value(&mut self, ty: &TypeDescriptor) -> JavaValue {
        match ty {
            TypeDescriptor::Object(class) if class == STRING_CLASS => {
                JavaValue::Object(self.new_string(""))
            }
            TypeDescriptor::Object(class) => JavaValue::Object(self.new_instance(class.as_str())),
            TypeDescriptor::Array(element) => {
                let handle = match element.as_ref() {
                    TypeDescriptor::Primitive(kind) => self.new_primitive_array(*kind, Vec::new()),
                    other => self.new_object_array(other.class_name(), Vec::new()),
                };
                JavaValue::Object(handle)
            }
            other => JavaValue::zero(other),
        }
    }

    /// Number of live objects, including class objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` if no objects exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Drops every object. Handle numbering continues where it left off.
    pub fn clear(&mut self) {
        self.objects.clear();
        self.classes.clear();
        self.globals.clear();
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

fn mismatch(handle: Handle, expected: &'static str) -> crate::Error {
    EmulationError::ObjectTypeMismatch {
        handle: handle.raw(),
        expected,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_drops_one_object() {
        let mut table = ObjectTable::new();
        let a = table.new_string("a");
        let b = table.new_string("b");
        assert_eq!(table.remove(a), Some(ObjectValue::String("a".to_string())));
        assert!(!table.contains(a));
        assert!(table.contains(b));
        assert_eq!(table.remove(a), None);
    }

    #[test]
    fn test_release_since_keeps_older_objects_and_classes() {
        let mut table = ObjectTable::new();
        let old = table.new_string("old");
        let mark = table.watermark();
        let class = table.class_handle("a/B");
        let array = table.new_byte_array(vec![1, 2, 3]);
        let text = table.new_string("new");

        assert_eq!(table.release_since(mark), 2);
        assert!(table.contains(old));
        assert!(table.contains(class));
        assert!(!table.contains(array));
        assert!(!table.contains(text));
        assert_eq!(table.class_handle("a/B"), class);
        assert!(table.watermark() > text);
    }

    #[test]
    fn test_handles_are_monotonic() {
        let mut table = ObjectTable::new();
        let a = table.new_string("a");
        let b = table.new_string("b");
        assert!(b > a);
        assert!(!a.is_null());

        table.clear();
        let c = table.new_string("c");
        assert!(c > b);
        assert!(table.get(a).is_err());
    }

    #[test]
    fn test_class_handles_are_stable() {
        let mut table = ObjectTable::new();
        let first = table.class_handle("android/content/Context");
        let second = table.class_handle("android/content/Context");
        assert_eq!(first, second);
        assert_eq!(table.class_name(first).unwrap(), "android/content/Context");
        assert_eq!(table.class_of(first).unwrap(), CLASS_CLASS);
    }

    #[test]
    fn test_class_names() {
        let mut table = ObjectTable::new();
        let bytes = table.new_byte_array(vec![1, 2, 3]);
        assert_eq!(table.class_of(bytes).unwrap(), "[B");
        assert_eq!(table.array_length(bytes).unwrap(), 3);

        let sig = table.new_instance("android/content/pm/Signature");
        let sigs = table.new_object_array("android/content/pm/Signature", vec![sig]);
        assert_eq!(
            table.class_of(sigs).unwrap(),
            "[Landroid/content/pm/Signature;"
        );

        let boxed = table.new_boxed(JavaValue::Int(5));
        assert_eq!(table.class_of(boxed).unwrap(), "java/lang/Integer");
    }

    #[test]
    fn test_type_mismatch() {
        let mut table = ObjectTable::new();
        let s = table.new_string("x");
        assert!(table.instance(s).is_err());
        assert!(table.array_length(s).is_err());
        assert!(table.string(Handle::NULL).is_err());
    }

    #[test]
    fn test_is_instance_of() {
        let mut table = ObjectTable::new();
        let s = table.new_string("x");
        assert!(table.is_instance_of(s, STRING_CLASS).unwrap());
        assert!(table.is_instance_of(s, OBJECT_CLASS).unwrap());
        assert!(!table.is_instance_of(s, "android/content/Context").unwrap());
        assert!(table.is_instance_of(Handle::NULL, STRING_CLASS).unwrap());
    }

    #[test]
    fn test_empty_values() {
        let mut table = ObjectTable::new();
        let value = table.empty_value(&TypeDescriptor::Object(STRING_CLASS.into()));
        assert_eq!(table.string(value.as_handle().unwrap()).unwrap(), "");

        let value = table.empty_value(&TypeDescriptor::parse("[I").unwrap());
        assert_eq!(table.array_length(value.as_handle().unwrap()).unwrap(), 0);

        let value = table.empty_value(&TypeDescriptor::parse("Landroid/content/pm/PackageInfo;").unwrap());
        let instance = table.instance(value.as_handle().unwrap()).unwrap();
        assert_eq!(instance.class, "android/content/pm/PackageInfo");

        assert_eq!(
            table.empty_value(&TypeDescriptor::Primitive(PrimitiveKind::Long)),
            JavaValue::Long(0)
        );
    }

    #[test]
    fn test_value_bits() {
        assert_eq!(JavaValue::Int(-1).to_bits(), u64::MAX);
        assert_eq!(JavaValue::Char(0xFFFF).to_bits(), 0xFFFF);
        assert_eq!(
            JavaValue::from_bits(PrimitiveKind::Float, u64::from(1.5f32.to_bits())),
            JavaValue::Float(1.5)
        );
        assert_eq!(
            JavaValue::from_raw(&TypeDescriptor::parse("[B").unwrap(), 7),
            JavaValue::Object(Handle::new(7))
        );
    }
}
