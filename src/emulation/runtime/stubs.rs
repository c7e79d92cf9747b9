//! Host stub table.
//!
//! Every host function the guest can reach has a slot in the [`StubTable`]. Slot `n`
//! is backed by an 8-byte trampoline at `stub_base + 8 * n`:
//!
//! ```text
//! svc #(n + 1)
//! ret
//! ```
//!
//! Imports naming a [`StubKind::Host`] entry resolve to its trampoline. JNI
//! function table slots and `JavaVM` invoke slots point at trampolines too, but
//! those entries are never visible to the linker.
//!
//! Data stubs (`__stack_chk_guard`, `__sF`, `environ`, ...) are not code: the
//! linker resolves them to storage carved out of the host data region.

use std::{collections::HashMap, fmt};

use strum::EnumCount;

use crate::{
    emulation::{
        engine::TrapAction,
        memory::{AddressSpace, MemoryProtection, RegionKind, PAGE_SIZE},
        runtime::{
            jni::{InvokeFunction, JniFunction},
            libc,
            state::HostContext,
        },
    },
    Result,
};

/// Size of one trampoline in bytes.
pub const TRAMPOLINE_SIZE: u64 = 8;

const SVC: u32 = 0xD400_0001;
const RET: u32 = 0xD65F_03C0;

/// A host function reachable through a trampoline.
pub type HostFn = fn(&mut HostContext<'_>) -> Result<TrapAction>;

/// What a stub slot does when its trampoline traps.
#[derive(Clone, Copy)]
pub enum StubKind {
    /// A libc-level function resolvable by name.
    Host(HostFn),
    /// A `JNIEnv` function table entry.
    Jni(JniFunction),
    /// A `JavaVM` invoke interface entry.
    Invoke(InvokeFunction),
}

impl fmt::Debug for StubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubKind::Host(_) => f.write_str("Host"),
            StubKind::Jni(function) => write!(f, "Jni({})", function.name()),
            StubKind::Invoke(function) => write!(f, "Invoke({})", function.name()),
        }
    }
}

/// One slot of the stub table.
#[derive(Clone, Debug)]
pub struct Stub {
    /// Name used in logs and for linking host functions.
    pub name: String,
    /// Behaviour of the slot.
    pub kind: StubKind,
}

/// Initial contents of a data stub.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataContents {
    /// `len` zero bytes.
    Zeroed(usize),
    /// The stack protector canary.
    StackGuard,
    /// A pointer to an empty, null-terminated pointer array.
    EmptyList,
    /// A pointer to a NUL-terminated string.
    String(&'static str),
}

impl DataContents {
    /// Bytes reserved for the symbol itself.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            DataContents::Zeroed(len) => *len,
            DataContents::StackGuard | DataContents::EmptyList | DataContents::String(_) => 8,
        }
    }
}

/// A data symbol provided by the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataStub {
    /// Symbol name.
    pub name: String,
    /// Initial contents.
    pub contents: DataContents,
}

/// The registered host stubs, shared by every session of a pool.
#[derive(Clone, Debug)]
pub struct StubTable {
    stubs: Vec<Stub>,
    by_name: HashMap<String, usize>,
    data: Vec<DataStub>,
    jni_base: usize,
    invoke_base: usize,
}

impl StubTable {
    /// Starts an empty table.
    #[must_use]
    pub fn builder() -> StubTableBuilder {
        StubTableBuilder::default()
    }

    /// The libc subset, data symbols and JNI tables every session needs.
    #[must_use]
    pub fn standard() -> Self {
        StubTableBuilder::standard().build()
    }

    /// Number of slots, JNI and invoke slots included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    /// Returns `true` if the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    /// Returns slot `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Stub> {
        self.stubs.get(index)
    }

    /// Returns the slot of the host function `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Returns the data stub `name`.
    #[must_use]
    pub fn data(&self, name: &str) -> Option<&DataStub> {
        self.data.iter().find(|stub| stub.name == name)
    }

    /// All data stubs in registration order.
    #[must_use]
    pub fn data_stubs(&self) -> &[DataStub] {
        &self.data
    }

    /// Names of the linkable host functions.
    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Slot of a JNI function.
    #[must_use]
    pub fn jni_slot(&self, function: JniFunction) -> usize {
        self.jni_base + function.index()
    }

    /// Slot of an invoke interface function.
    #[must_use]
    pub fn invoke_slot(&self, function: InvokeFunction) -> usize {
        self.invoke_base + function.index()
    }

    /// Address of the trampoline for slot `index`.
    #[must_use]
    pub fn trampoline(base: u64, index: usize) -> u64 {
        base + index as u64 * TRAMPOLINE_SIZE
    }

    /// Bytes of the region holding every trampoline.
    #[must_use]
    pub fn code_size(&self) -> usize {
        (self.stubs.len() * TRAMPOLINE_SIZE as usize)
            .div_ceil(PAGE_SIZE)
            .max(1)
            * PAGE_SIZE
    }

    /// Maps the trampoline region at `base` and fills it.
    ///
    /// # Errors
    ///
    /// Fails if the region overlaps an existing mapping.
    pub fn install(&self, memory: &mut AddressSpace, base: u64) -> Result<()> {
        memory.map_at(
            base,
            self.code_size(),
            MemoryProtection::READ_EXECUTE,
            RegionKind::Stubs,
            "stubs",
        )?;
        let mut code = Vec::with_capacity(self.stubs.len() * TRAMPOLINE_SIZE as usize);
        for index in 0..self.stubs.len() {
            code.extend_from_slice(&trampoline_code(index).to_le_bytes());
        }
        memory.write_privileged(base, &code)?;
        Ok(())
    }
}

impl Default for StubTable {
    fn default() -> Self {
        StubTable::standard()
    }
}

/// The two instructions of the trampoline for slot `index`, packed little-endian.
#[must_use]
pub fn trampoline_code(index: usize) -> u64 {
    let imm = ((index + 1) as u32 & 0xFFFF) << 5;
    u64::from(SVC | imm) | (u64::from(RET) << 32)
}

/// Incremental construction of a [`StubTable`].
#[derive(Clone, Default)]
pub struct StubTableBuilder {
    functions: Vec<(String, HostFn)>,
    data: Vec<DataStub>,
}

impl StubTableBuilder {
    /// A builder pre-populated with the standard libc subset and data symbols.
    #[must_use]
    pub fn standard() -> Self {
        libc::register(StubTableBuilder::default())
    }

    /// Adds or replaces the host function `name`.
    #[must_use]
    pub fn function(mut self, name: impl Into<String>, function: HostFn) -> Self {
        let name = name.into();
        self.functions.retain(|(existing, _)| *existing != name);
        self.functions.push((name, function));
        self
    }

    /// Adds or replaces the data symbol `name`.
    #[must_use]
    pub fn data(mut self, name: impl Into<String>, contents: DataContents) -> Self {
        let name = name.into();
        self.data.retain(|stub| stub.name != name);
        self.data.push(DataStub { name, contents });
        self
    }

    /// Removes a host function or data symbol.
    #[must_use]
    pub fn remove(mut self, name: &str) -> Self {
        self.functions.retain(|(existing, _)| existing != name);
        self.data.retain(|stub| stub.name != name);
        self
    }

    /// Number of host functions registered so far.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Lays out the slots: host functions, then the JNI table, then the invoke table.
    #[must_use]
    pub fn build(self) -> StubTable {
        let mut stubs = Vec::with_capacity(
            self.functions.len() + JniFunction::COUNT + InvokeFunction::COUNT,
        );
        let mut by_name = HashMap::with_capacity(self.functions.len());
        for (name, function) in self.functions {
            by_name.insert(name.clone(), stubs.len());
            stubs.push(Stub {
                name,
                kind: StubKind::Host(function),
            });
        }

        let jni_base = stubs.len();
        for index in 0..JniFunction::COUNT {
            if let Some(function) = JniFunction::from_index(index) {
                stubs.push(Stub {
                    name: format!("JNIEnv::{}", function.name()),
                    kind: StubKind::Jni(function),
                });
            }
        }

        let invoke_base = stubs.len();
        for index in 0..InvokeFunction::COUNT {
            if let Some(function) = InvokeFunction::from_index(index) {
                stubs.push(Stub {
                    name: format!("JavaVM::{}", function.name()),
                    kind: StubKind::Invoke(function),
                });
            }
        }

        StubTable {
            stubs,
            by_name,
            data: self.data,
            jni_base,
            invoke_base,
        }
    }
}

impl fmt::Debug for StubTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StubTableBuilder")
            .field("functions", &self.functions.len())
            .field("data", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::engine::decode;

    fn nop(_: &mut HostContext<'_>) -> Result<TrapAction> {
        Ok(TrapAction::from(0))
    }

    #[test]
    fn test_trampoline_encoding() {
        let code = trampoline_code(0);
        assert_eq!(code as u32, 0xD400_0021);
        assert_eq!((code >> 32) as u32, RET);
        assert_eq!(trampoline_code(9) as u32, 0xD400_0141);
        assert!(decode(trampoline_code(41) as u32).is_some());
    }

    #[test]
    fn test_layout() {
        let table = StubTable::builder()
            .function("one", nop)
            .function("two", nop)
            .build();
        assert_eq!(table.index_of("one"), Some(0));
        assert_eq!(table.index_of("two"), Some(1));
        assert_eq!(table.jni_slot(JniFunction::from_index(0).unwrap()), 2);
        assert_eq!(table.len(), 2 + JniFunction::COUNT + InvokeFunction::COUNT);
        assert_eq!(
            table.invoke_slot(InvokeFunction::from_index(0).unwrap()),
            2 + JniFunction::COUNT
        );
        assert!(table.index_of("JNIEnv::GetVersion").is_none());
    }

    #[test]
    fn test_replace_and_remove() {
        let builder = StubTable::builder()
            .function("one", nop)
            .function("one", nop)
            .data("__sF", DataContents::Zeroed(0x98 * 3));
        assert_eq!(builder.function_count(), 1);
        let table = builder.remove("__sF").build();
        assert!(table.data("__sF").is_none());
        assert_eq!(table.host_names().count(), 1);
    }

    #[test]
    fn test_standard_table() {
        let table = StubTable::standard();
        for name in ["malloc", "free", "memcpy", "strlen", "pthread_once", "__stack_chk_fail"] {
            assert!(table.index_of(name).is_some(), "{name}");
        }
        assert!(table.data("__stack_chk_guard").is_some());
        assert_eq!(table.code_size() % PAGE_SIZE, 0);
    }

    #[test]
    fn test_install() -> Result<()> {
        let table = StubTable::builder().function("one", nop).build();
        let mut memory = AddressSpace::new();
        table.install(&mut memory, 0x7000_0000)?;
        assert_eq!(memory.fetch(0x7000_0000)?, 0xD400_0021);
        assert_eq!(memory.fetch(0x7000_0004)?, RET);
        assert_eq!(
            memory.protection(0x7000_0000),
            Some(MemoryProtection::READ_EXECUTE)
        );
        Ok(())
    }
}
