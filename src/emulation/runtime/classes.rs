//! Class descriptors and JNI member IDs.
//!
//! Native code identifies methods and fields through opaque `jmethodID` and
//! `jfieldID` values obtained from `GetMethodID`, `GetFieldID` and their static
//! variants. The [`ClassRegistry`] hands out one stable ID per member and
//! remembers which class, name and descriptor it stands for, so later calls can
//! be turned back into a dispatch signature.
//!
//! The registry also carries [`ClassDescriptor`]s derived from the dispatch
//! table. They describe which members have handlers; members outside that set
//! still receive IDs, and calls through them become dispatch misses.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    emulation::{
        runtime::{
            descriptor::{MethodDescriptor, TypeDescriptor},
            dispatch::{field_signature, method_signature, DispatchTable},
        },
        EmulationError,
    },
    Result,
};

/// First member ID handed out.
const MEMBER_ID_BASE: u64 = 0x0010_0000;

/// Distance between consecutive member IDs.
const MEMBER_ID_STRIDE: u64 = 8;

/// Whether a member is a method or a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A method or constructor.
    Method,
    /// A field.
    Field,
}

/// What a member ID stands for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// Method or field.
    pub kind: MemberKind,
    /// Declaring class path, as passed to `Get*ID`.
    pub class: String,
    /// Member name (`<init>` for constructors).
    pub name: String,
    /// Method or field descriptor.
    pub descriptor: String,
    /// Obtained through a `GetStatic*ID` function.
    pub is_static: bool,
}

impl Member {
    /// The dispatch signature of this member.
    #[must_use]
    pub fn signature(&self) -> String {
        match self.kind {
            MemberKind::Method => method_signature(&self.class, &self.name, &self.descriptor),
            MemberKind::Field => field_signature(&self.class, &self.name, &self.descriptor),
        }
    }

    /// The parsed method descriptor.
    ///
    /// # Errors
    ///
    /// Fails for fields and malformed descriptors.
    pub fn method_descriptor(&self) -> Result<MethodDescriptor> {
        match self.kind {
            MemberKind::Method => MethodDescriptor::parse(&self.descriptor),
            MemberKind::Field => Err(EmulationError::InvalidDescriptor {
                descriptor: self.descriptor.clone(),
            }
            .into()),
        }
    }

    /// The parsed field type.
    ///
    /// # Errors
    ///
    /// Fails for methods and malformed descriptors.
    pub fn field_type(&self) -> Result<TypeDescriptor> {
        match self.kind {
            MemberKind::Field => TypeDescriptor::parse(&self.descriptor),
            MemberKind::Method => Err(EmulationError::InvalidDescriptor {
                descriptor: self.descriptor.clone(),
            }
            .into()),
        }
    }
}

/// The members of one class that have dispatch handlers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassDescriptor {
    /// JNI class path.
    pub name: String,
    /// Field name to field type.
    pub fields: BTreeMap<String, TypeDescriptor>,
    /// Method `name(Args)Ret` strings, constructors included.
    pub methods: BTreeSet<String>,
}

impl ClassDescriptor {
    /// Derives one descriptor per class from the signatures in `table`.
    ///
    /// Signatures that do not parse are skipped.
    #[must_use]
    pub fn from_dispatch(table: &DispatchTable) -> HashMap<String, ClassDescriptor> {
        let mut classes: HashMap<String, ClassDescriptor> = HashMap::new();
        for (kind, signature) in table.keys() {
            let Some((class, member)) = signature.split_once("->") else {
                continue;
            };
            let entry = classes
                .entry(class.to_string())
                .or_insert_with(|| ClassDescriptor {
                    name: class.to_string(),
                    ..ClassDescriptor::default()
                });
            if kind.is_field() {
                if let Some((name, ty)) = member.split_once(':') {
                    if let Ok(ty) = TypeDescriptor::parse(ty) {
                        entry.fields.insert(name.to_string(), ty);
                    }
                }
            } else if let Some(start) = member.find('(') {
                if MethodDescriptor::parse(&member[start..]).is_ok() {
                    entry.methods.insert(member.to_string());
                }
            }
        }
        classes
    }

    /// Returns `true` if a handler exists for `name` with `descriptor`.
    #[must_use]
    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.methods.contains(&format!("{name}{descriptor}"))
    }
}

/// Per-session member IDs plus the shared class descriptors.
#[derive(Clone, Debug)]
pub struct ClassRegistry {
    descriptors: Arc<HashMap<String, ClassDescriptor>>,
    members: Vec<Member>,
    ids: HashMap<(MemberKind, bool, String), u64>,
}

impl ClassRegistry {
    /// Creates a registry over the given descriptors.
    #[must_use]
    pub fn new(descriptors: Arc<HashMap<String, ClassDescriptor>>) -> Self {
        ClassRegistry {
            descriptors,
            members: Vec::new(),
            ids: HashMap::new(),
        }
    }

    /// Returns the ID for a member, allocating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidDescriptor`] if the descriptor does not
    /// parse for the member kind.
    pub fn member_id(
        &mut self,
        kind: MemberKind,
        is_static: bool,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u64> {
        let member = Member {
            kind,
            class: class.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static,
        };
        match kind {
            MemberKind::Method => {
                member.method_descriptor()?;
            }
            MemberKind::Field => {
                member.field_type()?;
            }
        }

        let key = (kind, is_static, member.signature());
        if let Some(&id) = self.ids.get(&key) {
            return Ok(id);
        }

        if !self.is_known(&member) {
            log::debug!("member without handler requested: {}", key.2);
        }
        let id = MEMBER_ID_BASE + self.members.len() as u64 * MEMBER_ID_STRIDE;
        self.members.push(member);
        self.ids.insert(key, id);
        Ok(id)
    }

    /// Returns the member an ID stands for.
    ///
    /// # Errors
    ///
    /// Returns [`EmulationError::InvalidMemberId`] for IDs this registry never issued.
    pub fn member(&self, id: u64) -> Result<&Member> {
        id.checked_sub(MEMBER_ID_BASE)
            .filter(|offset| offset % MEMBER_ID_STRIDE == 0)
            .and_then(|offset| self.members.get((offset / MEMBER_ID_STRIDE) as usize))
            .ok_or_else(|| EmulationError::InvalidMemberId { id }.into())
    }

    /// Returns the descriptor of a class that has handlers.
    #[must_use]
    pub fn descriptor(&self, class: &str) -> Option<&ClassDescriptor> {
        self.descriptors.get(class)
    }

    /// Number of member IDs issued.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    fn is_known(&self, member: &Member) -> bool {
        let Some(class) = self.descriptors.get(&member.class) else {
            return false;
        };
        match member.kind {
            MemberKind::Method => class.has_method(&member.name, &member.descriptor),
            MemberKind::Field => class.fields.contains_key(&member.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::runtime::objects::JavaValue;

    fn registry() -> ClassRegistry {
        let table = DispatchTable::builder()
            .field("android/content/pm/PackageInfo->versionCode:I", |_| Ok(JavaValue::Int(1)))
            .method("android/content/Context->getPackageName()Ljava/lang/String;", |_| {
                Ok(JavaValue::Void)
            })
            .build();
        ClassRegistry::new(Arc::new(ClassDescriptor::from_dispatch(&table)))
    }

    #[test]
    fn test_descriptors_from_dispatch() {
        let registry = registry();
        let info = registry.descriptor("android/content/pm/PackageInfo").unwrap();
        assert_eq!(
            info.fields.get("versionCode"),
            Some(&TypeDescriptor::parse("I").unwrap())
        );
        let context = registry.descriptor("android/content/Context").unwrap();
        assert!(context.has_method("getPackageName", "()Ljava/lang/String;"));
        assert!(registry.descriptor("java/lang/Object").is_none());
    }

    #[test]
    fn test_member_ids_are_stable() {
        let mut registry = registry();
        let a = registry
            .member_id(MemberKind::Field, false, "android/content/pm/PackageInfo", "versionCode", "I")
            .unwrap();
        let b = registry
            .member_id(MemberKind::Field, false, "android/content/pm/PackageInfo", "versionCode", "I")
            .unwrap();
        let c = registry
            .member_id(MemberKind::Field, true, "android/content/pm/PackageInfo", "versionCode", "I")
            .unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.member_count(), 2);

        let member = registry.member(a).unwrap();
        assert_eq!(member.signature(), "android/content/pm/PackageInfo->versionCode:I");
        assert!(!member.is_static);
    }

    #[test]
    fn test_invalid_members() {
        let mut registry = registry();
        assert!(registry
            .member_id(MemberKind::Method, false, "a/B", "f", "(I")
            .is_err());
        assert!(registry
            .member_id(MemberKind::Field, false, "a/B", "f", "V")
            .is_err());
        assert!(registry.member(0).is_err());
        assert!(registry.member(MEMBER_ID_BASE).is_err());
        assert!(registry.member(MEMBER_ID_BASE + 1).is_err());
    }

    #[test]
    fn test_method_descriptor_of_member() {
        let mut registry = registry();
        let id = registry
            .member_id(MemberKind::Method, false, "a/B", "f", "(IJ)V")
            .unwrap();
        let descriptor = registry.member(id).unwrap().method_descriptor().unwrap();
        assert_eq!(descriptor.params.len(), 2);
        assert!(registry.member(id).unwrap().field_type().is_err());
    }
}
