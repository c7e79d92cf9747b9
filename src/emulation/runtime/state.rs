//! Per-session runtime state.
//!
//! This module provides [`RuntimeState`], the host side of one emulated process. It
//! owns everything the guest can observe through host stubs and the JNI bridge, and
//! it is the [`TrapHandler`] the controller forwards every `SVC` to.
//!
//! # Overview
//!
//! ```text
//! +---------------------+
//! | EmulationController |  <- Executes AArch64 code
//! +----------+----------+
//!            | SVC #n
//!            v
//! +----------+----------+
//! |    RuntimeState     |  <- Routes traps to host functions
//! +----------+----------+
//!            |
//!    +-------+--------+-----------+
//!    |       |        |           |
//!    v       v        v           v
//!  libc   syscalls  JNIEnv     JavaVM
//! ```
//!
//! # Host Data Layout
//!
//! [`RuntimeState::new`] maps the trampoline region and the host data region and
//! lays out the latter as follows (see [`HostLayout`]):
//!
//! | Item | Size |
//! |------|------|
//! | `JNINativeInterface` function table | 234 pointers |
//! | `JNIEnv` word pointing at the table | 8 bytes |
//! | `JNIInvokeInterface` table | 8 pointers |
//! | `JavaVM` word pointing at the invoke table | 8 bytes |
//! | Thread-local storage block (`TPIDR_EL0`) | 64 slots |
//! | `errno` | 8 bytes |
//! | Data stubs | as registered |
//!
//! Reserved table slots hold null. TLS slot 5 (`tpidr + 0x28`) holds the stack
//! protector canary, where bionic's inline stack checks read it.
//!
//! # Forking
//!
//! `RuntimeState` is `Clone`: the immutable tables are shared through [`Arc`], the
//! mutable state is copied. A fork of a session clones its runtime state and forks
//! its address space, so both sides see identical handles, natives and heap
//! bookkeeping.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use strum::EnumCount;

use crate::{
    emulation::{
        engine::{Cpu, EmulationError, Fault, TrapAction, TrapHandler},
        linker::ResolutionTable,
        memory::{align_up, AddressSpace, GuestHeap, MemoryProtection, RegionKind},
        process::{EmulationConfig, TracingConfig},
        runtime::{
            classes::{ClassDescriptor, ClassRegistry, Member},
            clock::ClockSource,
            descriptor::TypeDescriptor,
            dispatch::{CallContext, CallKind, DispatchMiss, DispatchTable, MissPolicy},
            jni,
            objects::{Handle, JavaValue, ObjectTable, ObjectValue},
            stubs::{DataContents, StubKind, StubTable},
            syscall,
        },
    },
    Error, Result,
};

/// Number of 8-byte slots in the thread-local storage block.
pub const TLS_SLOTS: usize = 64;

/// Byte offset of the stack protector canary from `TPIDR_EL0`.
pub const TLS_STACK_GUARD_OFFSET: u64 = 0x28;

/// Longest C string a host function reads from guest memory.
pub const MAX_STRING_LEN: usize = 1 << 20;

/// Addresses of the host-owned structures in guest memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostLayout {
    /// First trampoline.
    pub stub_base: u64,
    /// `JNINativeInterface` function table.
    pub jni_table: u64,
    /// The `JNIEnv*` handed to native methods.
    pub jni_env: u64,
    /// `JNIInvokeInterface` table.
    pub invoke_table: u64,
    /// The `JavaVM*` handed to `JNI_OnLoad`.
    pub java_vm: u64,
    /// Thread pointer loaded into `TPIDR_EL0`.
    pub tls: u64,
    /// Storage behind `__errno()`.
    pub errno: u64,
    /// Data stub symbol addresses.
    pub data: HashMap<String, u64>,
}

/// A function registered with `__cxa_atexit` or `atexit`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitHandler {
    /// Function address.
    pub function: u64,
    /// Argument passed to it.
    pub argument: u64,
    /// Owning DSO handle.
    pub dso: u64,
}

/// Everything a host function can touch while servicing one trap.
pub struct HostContext<'a> {
    /// The trapping thread's registers.
    pub cpu: &'a mut Cpu,
    /// Guest memory.
    pub memory: &'a mut AddressSpace,
    /// Session state.
    pub state: &'a mut RuntimeState,
}

impl HostContext<'_> {
    /// Integer argument register `n`.
    #[must_use]
    pub fn arg(&self, n: u8) -> u64 {
        self.cpu.x(n)
    }

    /// Argument register `n` as a C `int`.
    #[must_use]
    pub fn arg_i32(&self, n: u8) -> i32 {
        self.cpu.x(n) as u32 as i32
    }

    /// Argument register `n` as a `size_t`.
    #[must_use]
    pub fn arg_usize(&self, n: u8) -> usize {
        self.cpu.x(n) as usize
    }

    /// Reads a NUL-terminated string without the terminator.
    ///
    /// # Errors
    ///
    /// Fails with a memory fault if the string runs into unreadable memory, or
    /// with [`EmulationError::InvalidPointer`] for null.
    pub fn read_cstring(&self, address: u64) -> Result<Vec<u8>> {
        if address == 0 {
            return Err(EmulationError::InvalidPointer {
                address,
                reason: "null string pointer",
            }
            .into());
        }
        Ok(self.memory.read_cstring(address, MAX_STRING_LEN)?)
    }

    /// Reads a NUL-terminated string, replacing invalid UTF-8.
    ///
    /// # Errors
    ///
    /// See [`read_cstring`](Self::read_cstring).
    pub fn read_string(&self, address: u64) -> Result<String> {
        let bytes = self.read_cstring(address)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Allocates `size` bytes on the guest heap.
    ///
    /// # Errors
    ///
    /// Fails when the heap is exhausted.
    pub fn alloc(&mut self, size: usize) -> Result<u64> {
        self.state.heap.alloc(size)
    }

    /// Copies `bytes` into a fresh heap buffer.
    ///
    /// # Errors
    ///
    /// Fails when the heap is exhausted.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<u64> {
        let address = self.state.heap.alloc(bytes.len())?;
        self.memory.write(address, bytes)?;
        Ok(address)
    }

    /// Copies `bytes` plus a NUL terminator into a fresh heap buffer.
    ///
    /// # Errors
    ///
    /// Fails when the heap is exhausted.
    pub fn alloc_cstring(&mut self, bytes: &[u8]) -> Result<u64> {
        let address = self.state.heap.alloc(bytes.len() + 1)?;
        self.memory.write_cstring(address, bytes)?;
        Ok(address)
    }

    /// Frees a heap buffer, logging instead of failing on foreign pointers.
    pub fn free(&mut self, address: u64) {
        if address == 0 {
            return;
        }
        if let Err(error) = self.state.heap.free(address) {
            log::debug!("ignoring free of {address:#x}: {error}");
        }
    }

    /// Sets the thread's `errno`.
    ///
    /// # Errors
    ///
    /// Fails if the host data region was unmapped.
    pub fn set_errno(&mut self, value: i32) -> Result<()> {
        self.memory.write_u32(self.state.layout.errno, value as u32)?;
        Ok(())
    }
}

/// Host side of one emulated process.
#[derive(Clone, Debug)]
pub struct RuntimeState {
    stubs: Arc<StubTable>,
    dispatch: Arc<DispatchTable>,
    classes: ClassRegistry,
    objects: ObjectTable,
    heap: GuestHeap,
    layout: HostLayout,
    symbols: Arc<ResolutionTable>,
    tracing: TracingConfig,
    miss_policy: MissPolicy,
    clock: ClockSource,
    rng: StdRng,
    canary: u64,

    natives: BTreeMap<String, u64>,
    static_fields: HashMap<String, JavaValue>,
    pending_exception: Handle,
    misses: Vec<DispatchMiss>,

    pub(crate) tls_keys: Vec<Option<u64>>,
    pub(crate) tls_values: HashMap<u32, u64>,
    pub(crate) exit_handlers: Vec<ExitHandler>,
    pub(crate) dl_error: Option<String>,
}

impl RuntimeState {
    /// Creates the runtime state for a new session and maps its host regions.
    ///
    /// Maps the trampolines at `config.memory.stub_base`, the host data region and
    /// the guest heap, then fills in the JNI tables, TLS and data stubs.
    ///
    /// # Errors
    ///
    /// Fails if a region overlaps an existing mapping or the host data region is
    /// too small for the tables.
    pub fn new(
        config: &EmulationConfig,
        stubs: Arc<StubTable>,
        dispatch: Arc<DispatchTable>,
        memory: &mut AddressSpace,
    ) -> Result<Self> {
        let layout_config = &config.memory;
        let mut rng = StdRng::seed_from_u64(config.rng_seed);
        let canary = rng.gen::<u64>() & !0xFF;

        stubs.install(memory, layout_config.stub_base)?;
        memory.map_at(
            layout_config.host_data_base,
            layout_config.host_data_size,
            MemoryProtection::READ_WRITE,
            RegionKind::HostData,
            "host-data",
        )?;
        memory.map_at(
            layout_config.heap_base,
            layout_config.heap_size,
            MemoryProtection::READ_WRITE,
            RegionKind::Heap,
            "heap",
        )?;

        let layout = write_host_data(
            memory,
            &stubs,
            layout_config.stub_base,
            layout_config.host_data_base,
            layout_config.host_data_size,
            canary,
        )?;

        let descriptors = Arc::new(ClassDescriptor::from_dispatch(&dispatch));
        Ok(RuntimeState {
            stubs,
            dispatch,
            classes: ClassRegistry::new(descriptors),
            objects: ObjectTable::new(),
            heap: GuestHeap::new(layout_config.heap_base, layout_config.heap_size as u64),
            layout,
            symbols: Arc::new(ResolutionTable::default()),
            tracing: config.tracing.clone(),
            miss_policy: config.miss_policy,
            clock: config.clock.clone(),
            rng,
            canary,
            natives: BTreeMap::new(),
            static_fields: HashMap::new(),
            pending_exception: Handle::NULL,
            misses: Vec::new(),
            tls_keys: Vec::new(),
            tls_values: HashMap::new(),
            exit_handlers: Vec::new(),
            dl_error: None,
        })
    }

    /// Points `TPIDR_EL0` at the TLS block.
    pub fn prepare_thread(&self, cpu: &mut Cpu) {
        cpu.tpidr_el0 = self.layout.tls;
    }

    /// Addresses of the host-owned structures.
    #[must_use]
    pub fn layout(&self) -> &HostLayout {
        &self.layout
    }

    /// The `JNIEnv*` value.
    #[must_use]
    pub fn jni_env(&self) -> u64 {
        self.layout.jni_env
    }

    /// The `JavaVM*` value.
    #[must_use]
    pub fn java_vm(&self) -> u64 {
        self.layout.java_vm
    }

    /// The stack protector canary.
    #[must_use]
    pub fn canary(&self) -> u64 {
        self.canary
    }

    /// The registered stubs.
    #[must_use]
    pub fn stubs(&self) -> &Arc<StubTable> {
        &self.stubs
    }

    /// The session's objects.
    #[must_use]
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// Mutable access to the session's objects.
    pub fn objects_mut(&mut self) -> &mut ObjectTable {
        &mut self.objects
    }

    /// Member IDs handed out so far.
    #[must_use]
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub(crate) fn classes_mut(&mut self) -> &mut ClassRegistry {
        &mut self.classes
    }

    /// Heap bookkeeping.
    #[must_use]
    pub fn heap(&self) -> &GuestHeap {
        &self.heap
    }

    /// Mutable heap bookkeeping.
    pub fn heap_mut(&mut self) -> &mut GuestHeap {
        &mut self.heap
    }

    /// Installs the symbol table `dlsym` consults.
    pub fn set_symbols(&mut self, symbols: Arc<ResolutionTable>) {
        self.symbols = symbols;
    }

    /// The symbol table `dlsym` consults.
    #[must_use]
    pub fn symbols(&self) -> &ResolutionTable {
        &self.symbols
    }

    /// The configured tracing switches.
    #[must_use]
    pub fn tracing(&self) -> &TracingConfig {
        &self.tracing
    }

    /// The session clock.
    #[must_use]
    pub fn clock(&self) -> &ClockSource {
        &self.clock
    }

    /// The session RNG.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Native methods registered through `RegisterNatives`, keyed `class.name(sig)`.
    #[must_use]
    pub fn natives(&self) -> &BTreeMap<String, u64> {
        &self.natives
    }

    /// Looks up a native registered for `class.name(sig)`.
    #[must_use]
    pub fn native(&self, class: &str, name: &str, signature: &str) -> Option<u64> {
        self.natives.get(&native_key(class, name, signature)).copied()
    }

    pub(crate) fn register_native(&mut self, class: &str, name: &str, signature: &str, address: u64) {
        let key = native_key(class, name, signature);
        log::debug!("registered native {key} at {address:#x}");
        self.natives.insert(key, address);
    }

    pub(crate) fn unregister_natives(&mut self, class: &str) -> usize {
        let prefix = format!("{class}.");
        let before = self.natives.len();
        self.natives.retain(|key, _| !key.starts_with(&prefix));
        before - self.natives.len()
    }

    /// The exception raised by guest code and not yet cleared.
    #[must_use]
    pub fn pending_exception(&self) -> Handle {
        self.pending_exception
    }

    pub(crate) fn set_pending_exception(&mut self, exception: Handle) {
        self.pending_exception = exception;
    }

    /// Takes and clears the pending exception.
    pub fn take_pending_exception(&mut self) -> Handle {
        std::mem::replace(&mut self.pending_exception, Handle::NULL)
    }

    /// Raises an exception of `class` carrying `message`.
    pub(crate) fn throw_new(&mut self, class: &str, message: Option<&str>) -> Handle {
        let exception = self.objects.new_instance(class);
        if let Some(message) = message {
            let text = self.objects.new_string(message);
            if let Ok(instance) = self.objects.instance_mut(exception) {
                instance
                    .fields
                    .insert("message".to_string(), JavaValue::Object(text));
            }
        }
        log::debug!("guest exception raised: {class}");
        self.pending_exception = exception;
        exception
    }

    /// Callbacks that had no handler, in the order they happened.
    #[must_use]
    pub fn dispatch_misses(&self) -> &[DispatchMiss] {
        &self.misses
    }

    /// Forgets recorded dispatch misses.
    pub fn clear_dispatch_misses(&mut self) {
        self.misses.clear();
    }

    /// Functions registered with `atexit`, in registration order.
    #[must_use]
    pub fn exit_handlers(&self) -> &[ExitHandler] {
        &self.exit_handlers
    }

    /// Answers a Java callback through the dispatch table.
    ///
    /// Without a handler the call is recorded as a [`DispatchMiss`], logged at
    /// `warn` and answered with a default: stored field values for field reads, a
    /// store for field writes, an empty instance for constructors, and the
    /// [`MissPolicy`] default otherwise.
    ///
    /// # Errors
    ///
    /// Propagates handler failures.
    pub fn dispatch(
        &mut self,
        kind: CallKind,
        this: Handle,
        member: &Member,
        args: &[JavaValue],
        ret: &TypeDescriptor,
    ) -> Result<JavaValue> {
        let signature = member.signature();
        if self.tracing.trace_jni {
            log::trace!("{kind} {signature} this={this} args={args:?}");
        }

        if let Some(handler) = self.dispatch.get(kind, &signature).cloned() {
            let mut context = CallContext {
                this,
                class: &member.class,
                signature: &signature,
                args,
                objects: &mut self.objects,
            };
            return handler(&mut context);
        }

        log::warn!("no handler for {kind} {signature}");
        let fallback = self.miss_default(kind, this, member, &signature, args, ret)?;
        self.misses.push(DispatchMiss { kind, signature });
        Ok(fallback)
    }

    fn miss_default(
        &mut self,
        kind: CallKind,
        this: Handle,
        member: &Member,
        signature: &str,
        args: &[JavaValue],
        ret: &TypeDescriptor,
    ) -> Result<JavaValue> {
        match kind {
            CallKind::GetField => {
                if let Ok(instance) = self.objects.instance(this) {
                    if let Some(value) = instance.fields.get(&member.name) {
                        return Ok(*value);
                    }
                }
            }
            CallKind::SetField => {
                if let (Some(value), Ok(instance)) = (args.first(), self.objects.instance_mut(this)) {
                    instance.fields.insert(member.name.clone(), *value);
                }
                return Ok(JavaValue::Void);
            }
            CallKind::GetStaticField => {
                if let Some(value) = self.static_fields.get(signature) {
                    return Ok(*value);
                }
            }
            CallKind::SetStaticField => {
                if let Some(value) = args.first() {
                    self.static_fields.insert(signature.to_string(), *value);
                }
                return Ok(JavaValue::Void);
            }
            CallKind::NewObject => {
                return Ok(JavaValue::Object(self.objects.new_instance(member.class.as_str())));
            }
            CallKind::CallMethod | CallKind::CallStaticMethod => {}
        }

        Ok(match self.miss_policy {
            MissPolicy::EmptyInstance => self.objects.empty_value(ret),
            MissPolicy::Null => JavaValue::zero(ret),
        })
    }

    /// Returns the string behind `handle`, or `None` for null.
    ///
    /// # Errors
    ///
    /// Fails if the handle is stale or not a string.
    pub fn string(&self, handle: Handle) -> Result<Option<&str>> {
        if handle.is_null() {
            return Ok(None);
        }
        self.objects.string(handle).map(Some)
    }

    /// Returns a displayable summary of an object, for logs.
    #[must_use]
    pub fn describe(&self, handle: Handle) -> String {
        match self.objects.get(handle) {
            Ok(ObjectValue::String(text)) => format!("{text:?}"),
            Ok(value) => format!("{} {handle}", value.class_name()),
            Err(_) => format!("{handle}"),
        }
    }
}

impl TrapHandler for RuntimeState {
    fn handle_trap(&mut self, number: u16, cpu: &mut Cpu, memory: &mut AddressSpace) -> TrapAction {
        let address = cpu.pc;
        if number == 0 {
            let call = cpu.x(8);
            let mut context = HostContext {
                cpu,
                memory,
                state: self,
            };
            return into_action(syscall::dispatch(&mut context), || format!("syscall {call}"));
        }

        let stubs = Arc::clone(&self.stubs);
        let Some(stub) = stubs.get(usize::from(number) - 1) else {
            return TrapAction::Exit(Fault::UnknownTrap { address, number });
        };
        if self.tracing.trace_traps {
            log::trace!("trap {} from {:#x}", stub.name, cpu.lr());
        }

        let mut context = HostContext {
            cpu,
            memory,
            state: self,
        };
        let result = match stub.kind {
            StubKind::Host(function) => function(&mut context),
            StubKind::Jni(function) => jni::env::call(&mut context, function),
            StubKind::Invoke(function) => jni::vm::call(&mut context, function),
        };
        into_action(result, || stub.name.clone())
    }
}

fn into_action(result: Result<TrapAction>, function: impl FnOnce() -> String) -> TrapAction {
    match result {
        Ok(action) => action,
        Err(Error::Fault(fault)) => TrapAction::Exit(fault),
        Err(error) => {
            let function = function();
            log::debug!("host function {function} failed: {error}");
            TrapAction::Exit(Fault::HostFailure {
                function,
                message: error.to_string(),
            })
        }
    }
}

fn native_key(class: &str, name: &str, signature: &str) -> String {
    format!("{class}.{name}{signature}")
}

struct Cursor {
    next: u64,
    end: u64,
    base: u64,
    size: usize,
}

impl Cursor {
    fn take(&mut self, size: usize, align: u64) -> Result<u64> {
        let end = align_up(self.next, align)
            .and_then(|address| Some((address, address.checked_add(size as u64)?)));
        let Some((address, end)) = end.filter(|&(_, end)| end <= self.end) else {
            return Err(EmulationError::InvalidRegion {
                base: self.base,
                size: self.size as u64,
                reason: "host data region too small",
            }
            .into());
        };
        self.next = end;
        Ok(address)
    }
}

fn write_host_data(
    memory: &mut AddressSpace,
    stubs: &StubTable,
    stub_base: u64,
    base: u64,
    size: usize,
    canary: u64,
) -> Result<HostLayout> {
    let mut cursor = Cursor {
        next: base,
        end: base + size as u64,
        base,
        size,
    };

    let jni_table = cursor.take(jni::JniFunction::COUNT * 8, 16)?;
    for index in 0..jni::JniFunction::COUNT {
        let Some(function) = jni::JniFunction::from_index(index) else {
            continue;
        };
        let target = if function.is_reserved() {
            0
        } else {
            StubTable::trampoline(stub_base, stubs.jni_slot(function))
        };
        memory.write_u64(jni_table + index as u64 * 8, target)?;
    }
    let jni_env = cursor.take(8, 8)?;
    memory.write_u64(jni_env, jni_table)?;

    let invoke_table = cursor.take(jni::InvokeFunction::COUNT * 8, 16)?;
    for index in 0..jni::InvokeFunction::COUNT {
        let Some(function) = jni::InvokeFunction::from_index(index) else {
            continue;
        };
        let target = if function.is_reserved() {
            0
        } else {
            StubTable::trampoline(stub_base, stubs.invoke_slot(function))
        };
        memory.write_u64(invoke_table + index as u64 * 8, target)?;
    }
    let java_vm = cursor.take(8, 8)?;
    memory.write_u64(java_vm, invoke_table)?;

    let tls = cursor.take(TLS_SLOTS * 8, 64)?;
    memory.write_u64(tls, tls)?;
    memory.write_u64(tls + TLS_STACK_GUARD_OFFSET, canary)?;

    let errno = cursor.take(8, 8)?;

    let mut data = HashMap::with_capacity(stubs.data_stubs().len());
    for stub in stubs.data_stubs() {
        let address = cursor.take(stub.contents.size(), 16)?;
        match &stub.contents {
            DataContents::Zeroed(_) => {}
            DataContents::StackGuard => memory.write_u64(address, canary)?,
            DataContents::EmptyList => {
                let list = cursor.take(8, 8)?;
                memory.write_u64(address, list)?;
            }
            DataContents::String(text) => {
                let string = cursor.take(text.len() + 1, 8)?;
                memory.write_cstring(string, text.as_bytes())?;
                memory.write_u64(address, string)?;
            }
        }
        data.insert(stub.name.clone(), address);
    }

    Ok(HostLayout {
        stub_base,
        jni_table,
        jni_env,
        invoke_table,
        java_vm,
        tls,
        errno,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulation::{
        runtime::{
            classes::MemberKind,
            descriptor::PrimitiveKind,
            jni::{InvokeFunction, JniFunction},
        },
        EmulationConfig,
    };

    fn state_with(dispatch: DispatchTable, policy: MissPolicy) -> (RuntimeState, AddressSpace) {
        let mut memory = AddressSpace::new();
        let config = EmulationConfig::testing().with_miss_policy(policy);
        let state = RuntimeState::new(
            &config,
            Arc::new(StubTable::standard()),
            Arc::new(dispatch),
            &mut memory,
        )
        .unwrap();
        (state, memory)
    }

    fn member(state: &mut RuntimeState, kind: MemberKind, class: &str, name: &str, desc: &str) -> Member {
        let id = state
            .classes_mut()
            .member_id(kind, false, class, name, desc)
            .unwrap();
        state.classes().member(id).unwrap().clone()
    }

    #[test]
    fn test_host_layout() {
        let (state, memory) = state_with(DispatchTable::empty(), MissPolicy::default());
        let layout = state.layout();
        assert_eq!(memory.read_u64(layout.jni_env).unwrap(), layout.jni_table);
        assert_eq!(memory.read_u64(layout.java_vm).unwrap(), layout.invoke_table);

        // Reserved slots are null, the rest point at trampolines
        assert_eq!(memory.read_u64(layout.jni_table).unwrap(), 0);
        let get_version = memory.read_u64(layout.jni_table + 4 * 8).unwrap();
        assert_eq!(
            get_version,
            StubTable::trampoline(layout.stub_base, state.stubs().jni_slot(JniFunction::GetVersion))
        );
        assert_eq!(memory.read_u64(layout.invoke_table).unwrap(), 0);
        let get_env = memory.read_u64(layout.invoke_table + 6 * 8).unwrap();
        assert_eq!(
            get_env,
            StubTable::trampoline(layout.stub_base, state.stubs().invoke_slot(InvokeFunction::GetEnv))
        );

        assert_eq!(
            memory.read_u64(layout.tls + TLS_STACK_GUARD_OFFSET).unwrap(),
            state.canary()
        );
        let guard = layout.data["__stack_chk_guard"];
        assert_eq!(memory.read_u64(guard).unwrap(), state.canary());
        assert_eq!(state.canary() & 0xFF, 0);
    }

    #[test]
    fn test_canary_follows_seed() {
        let (a, _) = state_with(DispatchTable::empty(), MissPolicy::default());
        let (b, _) = state_with(DispatchTable::empty(), MissPolicy::default());
        assert_eq!(a.canary(), b.canary());
    }

    #[test]
    fn test_dispatch_handler() {
        let table = DispatchTable::builder()
            .method("a/B->name()Ljava/lang/String;", |ctx| Ok(ctx.new_string("n")))
            .build();
        let (mut state, _) = state_with(table, MissPolicy::default());
        let member = member(&mut state, MemberKind::Method, "a/B", "name", "()Ljava/lang/String;");
        let ret = TypeDescriptor::Object("java/lang/String".into());
        let value = state
            .dispatch(CallKind::CallMethod, Handle::NULL, &member, &[], &ret)
            .unwrap();
        let handle = value.as_handle().unwrap();
        assert_eq!(state.string(handle).unwrap(), Some("n"));
        assert!(state.dispatch_misses().is_empty());
    }

    #[test]
    fn test_dispatch_miss_policies() {
        let ret = TypeDescriptor::Object("java/lang/String".into());

        let (mut state, _) = state_with(DispatchTable::empty(), MissPolicy::EmptyInstance);
        let m = member(&mut state, MemberKind::Method, "a/B", "name", "()Ljava/lang/String;");
        let value = state
            .dispatch(CallKind::CallMethod, Handle::NULL, &m, &[], &ret)
            .unwrap();
        assert_eq!(state.string(value.as_handle().unwrap()).unwrap(), Some(""));
        assert_eq!(state.dispatch_misses().len(), 1);
        assert_eq!(
            state.dispatch_misses()[0].signature,
            "a/B->name()Ljava/lang/String;"
        );

        let (mut state, _) = state_with(DispatchTable::empty(), MissPolicy::Null);
        let m = member(&mut state, MemberKind::Method, "a/B", "name", "()Ljava/lang/String;");
        let value = state
            .dispatch(CallKind::CallMethod, Handle::NULL, &m, &[], &ret)
            .unwrap();
        assert_eq!(value, JavaValue::Object(Handle::NULL));

        let int = TypeDescriptor::Primitive(PrimitiveKind::Int);
        let m = member(&mut state, MemberKind::Method, "a/B", "count", "()I");
        let value = state
            .dispatch(CallKind::CallMethod, Handle::NULL, &m, &[], &int)
            .unwrap();
        assert_eq!(value, JavaValue::Int(0));
    }

    #[test]
    fn test_field_store_on_miss() {
        let (mut state, _) = state_with(DispatchTable::empty(), MissPolicy::default());
        let object = state.objects_mut().new_instance("a/B");
        let field = member(&mut state, MemberKind::Field, "a/B", "count", "I");
        let int = TypeDescriptor::Primitive(PrimitiveKind::Int);

        state
            .dispatch(CallKind::SetField, object, &field, &[JavaValue::Int(7)], &TypeDescriptor::Void)
            .unwrap();
        let value = state
            .dispatch(CallKind::GetField, object, &field, &[], &int)
            .unwrap();
        assert_eq!(value, JavaValue::Int(7));
        assert_eq!(state.dispatch_misses().len(), 2);
    }

    #[test]
    fn test_natives() {
        let (mut state, _) = state_with(DispatchTable::empty(), MissPolicy::default());
        state.register_native("a/B", "f", "()V", 0x1000);
        state.register_native("a/B", "g", "(I)I", 0x2000);
        state.register_native("a/C", "f", "()V", 0x3000);
        assert_eq!(state.native("a/B", "g", "(I)I"), Some(0x2000));
        assert_eq!(state.unregister_natives("a/B"), 2);
        assert_eq!(state.natives().len(), 1);
    }

    #[test]
    fn test_throw_new() {
        let (mut state, _) = state_with(DispatchTable::empty(), MissPolicy::default());
        let exception = state.throw_new("java/lang/IllegalStateException", Some("boom"));
        assert_eq!(state.pending_exception(), exception);
        assert_eq!(state.take_pending_exception(), exception);
        assert!(state.pending_exception().is_null());
    }
}
