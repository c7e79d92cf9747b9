//! JNI type and method descriptors.
//!
//! Descriptors are the textual type encoding JNI uses for `GetMethodID`,
//! `GetFieldID` and `RegisterNatives`: `I` for `int`, `Ljava/lang/String;` for a
//! class, `[B` for `byte[]` and `(Ljava/lang/String;I)V` for a method. The bridge
//! parses them to decode call arguments and to pick a return register.

use std::fmt;

use crate::{emulation::EmulationError, Result};

/// A primitive Java type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// `boolean` (`Z`)
    Boolean,
    /// `byte` (`B`)
    Byte,
    /// `char` (`C`)
    Char,
    /// `short` (`S`)
    Short,
    /// `int` (`I`)
    Int,
    /// `long` (`J`)
    Long,
    /// `float` (`F`)
    Float,
    /// `double` (`D`)
    Double,
}

impl PrimitiveKind {
    /// Size of one element in bytes.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::Byte => 1,
            PrimitiveKind::Char | PrimitiveKind::Short => 2,
            PrimitiveKind::Int | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::Double => 8,
        }
    }

    /// The one-letter descriptor.
    #[must_use]
    pub fn descriptor(self) -> char {
        match self {
            PrimitiveKind::Boolean => 'Z',
            PrimitiveKind::Byte => 'B',
            PrimitiveKind::Char => 'C',
            PrimitiveKind::Short => 'S',
            PrimitiveKind::Int => 'I',
            PrimitiveKind::Long => 'J',
            PrimitiveKind::Float => 'F',
            PrimitiveKind::Double => 'D',
        }
    }

    /// Returns `true` for `float` and `double`.
    #[must_use]
    pub fn is_floating(self) -> bool {
        matches!(self, PrimitiveKind::Float | PrimitiveKind::Double)
    }

    fn from_descriptor(c: u8) -> Option<Self> {
        Some(match c {
            b'Z' => PrimitiveKind::Boolean,
            b'B' => PrimitiveKind::Byte,
            b'C' => PrimitiveKind::Char,
            b'S' => PrimitiveKind::Short,
            b'I' => PrimitiveKind::Int,
            b'J' => PrimitiveKind::Long,
            b'F' => PrimitiveKind::Float,
            b'D' => PrimitiveKind::Double,
            _ => return None,
        })
    }
}

/// A parsed field or return type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// `V`, only valid as a return type.
    Void,
    /// A primitive type.
    Primitive(PrimitiveKind),
    /// `Lpath/to/Class;`, holding the JNI class path.
    Object(String),
    /// `[T`
    Array(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    /// Parses a complete field descriptor such as `I` or `[Ljava/lang/String;`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidDescriptor`] if the text is not exactly one
    /// well-formed type.
    pub fn parse(text: &str) -> Result<Self> {
        let (descriptor, rest) = parse_type(text.as_bytes(), false).ok_or_else(|| invalid(text))?;
        if !rest.is_empty() {
            return Err(invalid(text));
        }
        Ok(descriptor)
    }

    /// Returns the primitive kind, if this is a primitive.
    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            TypeDescriptor::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Returns `true` for class and array types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeDescriptor::Object(_) | TypeDescriptor::Array(_))
    }

    /// Returns `true` for `float` and `double`.
    #[must_use]
    pub fn is_floating(&self) -> bool {
        self.primitive().is_some_and(PrimitiveKind::is_floating)
    }

    /// The name `FindClass` and `GetObjectClass` use for this type:
    /// `java/lang/String` for classes and the full descriptor (`[B`) for arrays.
    #[must_use]
    pub fn class_name(&self) -> String {
        match self {
            TypeDescriptor::Object(name) => name.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Void => write!(f, "V"),
            TypeDescriptor::Primitive(kind) => write!(f, "{}", kind.descriptor()),
            TypeDescriptor::Object(name) => write!(f, "L{name};"),
            TypeDescriptor::Array(element) => write!(f, "[{element}"),
        }
    }
}

/// A parsed method descriptor `(Params)Return`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Parameter types in declaration order.
    pub params: Vec<TypeDescriptor>,
    /// Return type, possibly [`TypeDescriptor::Void`].
    pub ret: TypeDescriptor,
}

impl MethodDescriptor {
    /// Parses a method descriptor such as `(Ljava/lang/String;I)V`.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidDescriptor`] on malformed input.
    pub fn parse(text: &str) -> Result<Self> {
        let bytes = text.as_bytes();
        let Some(mut rest) = bytes.strip_prefix(b"(") else {
            return Err(invalid(text));
        };
        let mut params = Vec::new();
        loop {
            match rest.first() {
                Some(b')') => {
                    rest = &rest[1..];
                    break;
                }
                Some(_) => {
                    let (param, tail) = parse_type(rest, false).ok_or_else(|| invalid(text))?;
                    params.push(param);
                    rest = tail;
                }
                None => return Err(invalid(text)),
            }
        }
        let (ret, tail) = parse_type(rest, true).ok_or_else(|| invalid(text))?;
        if !tail.is_empty() {
            return Err(invalid(text));
        }
        Ok(MethodDescriptor { params, ret })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.ret)
    }
}

fn parse_type(bytes: &[u8], allow_void: bool) -> Option<(TypeDescriptor, &[u8])> {
    let (&first, rest) = bytes.split_first()?;
    match first {
        b'V' if allow_void => Some((TypeDescriptor::Void, rest)),
        b'L' => {
            let end = rest.iter().position(|&b| b == b';')?;
            if end == 0 {
                return None;
            }
            let name = std::str::from_utf8(&rest[..end]).ok()?;
            Some((TypeDescriptor::Object(name.to_string()), &rest[end + 1..]))
        }
        b'[' => {
            let (element, tail) = parse_type(rest, false)?;
            Some((TypeDescriptor::Array(Box::new(element)), tail))
        }
        other => PrimitiveKind::from_descriptor(other).map(|kind| (TypeDescriptor::Primitive(kind), rest)),
    }
}

fn invalid(text: &str) -> crate::Error {
    EmulationError::InvalidDescriptor {
        descriptor: text.to_string(),
    }
    .into()
}
