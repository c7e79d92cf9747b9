//! Emulation session - main entry point for calling into a native library.
//!
//! This module provides [`Session`], the orchestrator that owns one instance of
//! every emulation component: the address space, the loaded images, the
//! resolution table, the register file, the controller and the host runtime
//! with its JNI object table.
//!
//! # Lifecycle
//!
//! ```text
//! open ──> Created ──initialize──> Initialized ──close──> Closed
//!                                      │
//!                                fault / limit
//!                                      v
//!                                   Poisoned
//! ```
//!
//! A session is used by one caller at a time; every operation that runs guest
//! code takes `&mut self`. Concurrent callers share sessions through a
//! [`SessionPool`](super::SessionPool).
//!
//! # Example
//!
//! ```rust,no_run
//! use droidemu::emulation::{Argument, EmulationConfig, Session};
//!
//! # fn main() -> droidemu::Result<()> {
//! let bytes = std::fs::read("libnative.so")?;
//! let mut session = Session::open(&bytes, EmulationConfig::token())?;
//! session.initialize()?;
//! let sum = session.invoke("add", &[Argument::Int(2), Argument::Int(40)])?;
//! assert_eq!(sum, 42);
//! # Ok(())
//! # }
//! ```

use std::{
    fmt,
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use crate::{
    emulation::{
        engine::{EmulationController, ExecutionStats, RunOutcome},
        linker::{HostSymbols, Linker, ResolutionTable},
        loader::{ElfLoader, ElfLoaderConfig, LoadedImage},
        memory::{AddressSpace, MemoryProtection, RegionKind},
        process::{
            argument::{marshal, release, Argument},
            EmulationConfig, SessionBuilder,
        },
        runtime::{
            DispatchMiss, DispatchTable, JavaValue, MethodDescriptor, PrimitiveKind, RuntimeState,
            StubTable, TypeDescriptor,
        },
        Cpu,
    },
    Error, Result,
};

/// Lifecycle state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::Display)]
pub enum SessionState {
    /// Loaded and linked; initializers have not run.
    Created,
    /// Initializers and `JNI_OnLoad` completed.
    Initialized,
    /// A run faulted or exceeded a limit; the guest state is unusable.
    Poisoned,
    /// Closed; every region is unmapped.
    Closed,
}

/// One isolated instance of a loaded library and its emulated environment.
///
/// `Session` drives the library through its lifecycle: [`open`](Self::open)
/// loads and links, [`initialize`](Self::initialize) runs constructors and
/// `JNI_OnLoad`, [`invoke`](Self::invoke) and
/// [`call_static_native`](Self::call_static_native) call exports, and
/// [`close`](Self::close) tears everything down.
///
/// # Components
///
/// - **Address Space**: stack, heap, trampolines, host data and the image
/// - **Runtime State**: JNI tables and objects, libc state, registered natives
/// - **Controller**: limits, cancellation and the interpreter
///
/// # Failure Handling
///
/// A fault or an exceeded limit aborts the current call, returns
/// [`Error::Fault`] or [`Error::Timeout`] and poisons the session. Later calls
/// fail with [`Error::SessionPoisoned`]; the session should be dropped.
pub struct Session {
    /// Name for logs, usually the library file name.
    name: String,

    /// Configuration (immutable after creation).
    config: Arc<EmulationConfig>,

    /// Guest memory.
    memory: AddressSpace,

    /// Register file, reset before every call.
    cpu: Cpu,

    /// Limits, cancellation and the interpreter.
    controller: EmulationController,

    /// Host-side runtime: JNI, libc, objects, heap.
    runtime: RuntimeState,

    /// Loaded images in load order.
    images: Vec<LoadedImage>,

    /// Linker output, shared with the runtime for `dlsym`.
    symbols: Arc<ResolutionTable>,

    /// Lifecycle state.
    state: SessionState,

    /// Completed guest calls, including initializers.
    invocations: u64,

    /// Instructions executed across all calls.
    instructions: u64,
}

impl Session {
    /// Loads `bytes` into a new session with no Java callback handlers.
    ///
    /// Every JNI callback is answered by the configured
    /// [`MissPolicy`](crate::emulation::runtime::MissPolicy). Use
    /// [`SessionBuilder`](super::SessionBuilder) to install a dispatch table.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] or [`Error::UnsupportedArchitecture`] for a bad image
    /// - [`Error::UnresolvedSymbol`] if an import has no provider
    pub fn open(bytes: &[u8], config: EmulationConfig) -> Result<Self> {
        Self::create(
            "library.so",
            bytes,
            config,
            Arc::new(StubTable::standard()),
            Arc::new(DispatchTable::empty()),
        )
    }

    /// Memory-maps the library at `path` and opens it like [`open`](Self::open).
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be read, plus every error
    /// of [`open`](Self::open).
    pub fn open_file(path: impl AsRef<Path>, config: EmulationConfig) -> Result<Self> {
        SessionBuilder::new()
            .library_file(path.as_ref())
            .config(config)
            .without_initialize()
            .build()
    }

    /// Maps the host regions and the stack, then loads and links `bytes`.
    pub(super) fn create(
        name: &str,
        bytes: &[u8],
        config: EmulationConfig,
        stubs: Arc<StubTable>,
        dispatch: Arc<DispatchTable>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let mut memory = AddressSpace::new();
        let mut runtime = RuntimeState::new(&config, stubs, dispatch, &mut memory)?;
        map_stack(&config, &mut memory)?;

        let mut loader_config =
            ElfLoaderConfig::new().with_max_image_size(config.memory.max_image_size);
        if let Some(base) = config.memory.image_base {
            loader_config = loader_config.with_base_address(base);
        }
        let image = ElfLoader::with_config(loader_config).load(bytes, &mut memory, name)?;

        let table = Linker::new().link(
            &[&image],
            &HostSymbols::from_runtime(&runtime),
            &mut memory,
        )?;
        let symbols = Arc::new(table);
        runtime.set_symbols(Arc::clone(&symbols));

        log::debug!(
            "session {name}: image at {:#x}, {} regions, {} symbols resolved",
            image.base,
            memory.region_count(),
            symbols.len()
        );

        Ok(Session {
            name: name.to_string(),
            controller: EmulationController::new(config.limits.clone(), config.tracing.clone()),
            config,
            memory,
            cpu: Cpu::new(),
            runtime,
            images: vec![image],
            symbols,
            state: SessionState::Created,
            invocations: 0,
            instructions: 0,
        })
    }

    /// Returns the session name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the configuration the session was created with.
    pub fn config(&self) -> &EmulationConfig {
        &self.config
    }

    /// Returns the loaded images in load order.
    pub fn images(&self) -> &[LoadedImage] {
        &self.images
    }

    /// Returns the library the session was opened with.
    pub fn primary_image(&self) -> Option<&LoadedImage> {
        self.images.first()
    }

    /// Returns the linker's resolution table.
    pub fn symbols(&self) -> &ResolutionTable {
        &self.symbols
    }

    /// Returns the address of an exported or resolved symbol.
    pub fn symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols.address(name)
    }

    /// Returns the guest address space.
    pub fn memory(&self) -> &AddressSpace {
        &self.memory
    }

    /// Returns the guest address space for direct modification.
    pub fn memory_mut(&mut self) -> &mut AddressSpace {
        &mut self.memory
    }

    /// Returns the register file as the last call left it.
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Returns the host runtime state.
    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Returns the host runtime state for creating objects or inspecting natives.
    pub fn runtime_mut(&mut self) -> &mut RuntimeState {
        &mut self.runtime
    }

    /// Statistics of the most recent call.
    pub fn last_stats(&self) -> &ExecutionStats {
        self.controller.stats()
    }

    /// Address of the `JNIEnv*` passed to natives.
    pub fn jni_env(&self) -> u64 {
        self.runtime.jni_env()
    }

    /// Address of the `JavaVM*` passed to `JNI_OnLoad`.
    pub fn java_vm(&self) -> u64 {
        self.runtime.java_vm()
    }

    /// Java callbacks that had no handler, in the order they happened.
    pub fn dispatch_misses(&self) -> &[DispatchMiss] {
        self.runtime.dispatch_misses()
    }

    /// Installs or removes the cancellation flag checked before every instruction.
    pub fn set_cancel_flag(&mut self, flag: Option<Arc<AtomicBool>>) {
        self.controller.set_cancel_flag(flag);
    }

    /// Runs every image's `DT_INIT` and `DT_INIT_ARRAY` entries, then
    /// `JNI_OnLoad(vm, NULL)` when it is exported.
    ///
    /// Calling this on an initialized session does nothing.
    ///
    /// # Errors
    ///
    /// - [`Error::Fault`] or [`Error::Timeout`] if an initializer fails; the
    ///   session is poisoned
    /// - [`Error::SessionPoisoned`] or [`Error::SessionClosed`] for an unusable session
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            SessionState::Created => {}
            SessionState::Initialized => return Ok(()),
            SessionState::Poisoned => return Err(Error::SessionPoisoned),
            SessionState::Closed => return Err(Error::SessionClosed),
        }

        let mut initializers = Vec::new();
        for image in &self.images {
            initializers.extend(image.init_functions(&self.memory)?);
        }
        for function in initializers {
            log::debug!("{}: running initializer {function:#x}", self.name);
            self.run(function, &[])?;
        }

        if let Some(on_load) = self.symbol_address("JNI_OnLoad") {
            let vm = self.runtime.java_vm();
            let version = self.run(on_load, &[Argument::Pointer(vm), Argument::Pointer(0)])?;
            log::debug!("{}: JNI_OnLoad returned {:#x}", self.name, version as u32);
        }

        self.state = SessionState::Initialized;
        Ok(())
    }

    /// Calls the function `symbol` with `args` and returns `x0`.
    ///
    /// Floating-point results stay in `v0`; read them through [`cpu`](Self::cpu).
    ///
    /// # Errors
    ///
    /// - [`Error::SymbolNotFound`] if nothing is known under `symbol`; the
    ///   session stays usable
    /// - [`Error::Fault`] or [`Error::Timeout`] if the call fails; the session is
    ///   poisoned
    /// - [`Error::NotInitialized`], [`Error::SessionPoisoned`] or
    ///   [`Error::SessionClosed`] for a session in the wrong state
    pub fn invoke(&mut self, symbol: &str, args: &[Argument]) -> Result<u64> {
        self.ensure_ready()?;
        let address = self
            .symbol_address(symbol)
            .ok_or_else(|| Error::SymbolNotFound(symbol.to_string()))?;
        self.run(address, args)
    }

    /// Calls the static native `class.method` with JNI conventions.
    ///
    /// The function is found among natives registered with `RegisterNatives`
    /// first, then as a `Java_<class>_<method>` export (short form, then the
    /// overloaded form with the mangled argument signature). It receives
    /// `(JNIEnv*, jclass, args...)` and its result is converted according to the
    /// return type of `descriptor`.
    ///
    /// # Errors
    ///
    /// - [`Error::SymbolNotFound`] if no native is registered or exported
    /// - [`Error::Emulation`] for a malformed descriptor
    /// - [`Error::Error`] for an argument count that does not match it
    /// - Every error of [`invoke`](Self::invoke)
    pub fn call_static_native(
        &mut self,
        class: &str,
        method: &str,
        descriptor: &str,
        args: &[JavaValue],
    ) -> Result<JavaValue> {
        self.ensure_ready()?;
        let parsed = MethodDescriptor::parse(descriptor)?;
        if parsed.params.len() != args.len() {
            return Err(Error::Error(format!(
                "{method}{descriptor} takes {} arguments, {} given",
                parsed.params.len(),
                args.len()
            )));
        }

        let class = class.replace('.', "/");
        let address = self
            .runtime
            .native(&class, method, descriptor)
            .or_else(|| self.symbol_address(&jni_short_name(&class, method)))
            .or_else(|| self.symbol_address(&jni_long_name(&class, method, descriptor)))
            .ok_or_else(|| Error::SymbolNotFound(format!("{class}.{method}{descriptor}")))?;

        let jclass = self.runtime.objects_mut().class_handle(&class);
        let mut marshalled = vec![
            Argument::Pointer(self.runtime.jni_env()),
            Argument::Pointer(jclass.raw()),
        ];
        marshalled.extend(args.iter().copied().map(Argument::from));

        let raw = self.run(address, &marshalled)?;
        let bits = match parsed.ret {
            TypeDescriptor::Primitive(PrimitiveKind::Float) => u64::from(self.cpu.s(0).to_bits()),
            TypeDescriptor::Primitive(PrimitiveKind::Double) => self.cpu.d(0).to_bits(),
            _ => raw,
        };

        let pending = self.runtime.pending_exception();
        if !pending.is_null() {
            log::warn!(
                "{class}.{method} returned with pending exception {}",
                self.runtime.describe(pending)
            );
        }
        Ok(JavaValue::from_raw(&parsed.ret, bits))
    }

    /// Forks an initialized session.
    ///
    /// The fork shares every memory page copy-on-write and starts with a copy of
    /// the runtime state, so it behaves exactly like the original would from this
    /// point on, without re-running initialization. Writes on either side are
    /// invisible to the other.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`], [`Error::SessionPoisoned`] or
    ///   [`Error::SessionClosed`] unless the session is initialized
    pub fn fork(&mut self) -> Result<Self> {
        self.ensure_ready()?;
        let mut controller =
            EmulationController::new(self.config.limits.clone(), self.config.tracing.clone());
        controller.set_cancel_flag(self.controller.cancel_flag().cloned());

        Ok(Self {
            // Same name, shared configuration
            name: self.name.clone(),
            config: Arc::clone(&self.config),
            // CoW pages
            memory: self.memory.fork(),
            cpu: Cpu::new(),
            controller,
            // Objects, heap bookkeeping and natives are copied
            runtime: self.runtime.clone(),
            images: self.images.clone(),
            symbols: Arc::clone(&self.symbols),
            state: self.state,
            invocations: 0,
            instructions: 0,
        })
    }

    /// Unmaps every region and releases every object.
    ///
    /// Closing twice is harmless.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        log::debug!(
            "closing session {} after {} calls, {} instructions",
            self.name,
            self.invocations,
            self.instructions
        );
        self.memory.clear();
        self.runtime.objects_mut().clear();
        self.runtime.clear_dispatch_misses();
        self.images.clear();
        self.state = SessionState::Closed;
    }

    /// Returns a snapshot of the session's key figures.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            name: self.name.clone(),
            state: self.state,
            images: self.images.len(),
            regions: self.memory.region_count(),
            exports: self.images.iter().map(|image| image.exports.len()).sum(),
            imports: self.images.iter().map(|image| image.imports.len()).sum(),
            natives: self.runtime.natives().len(),
            objects: self.runtime.objects().len(),
            dispatch_misses: self.runtime.dispatch_misses().len(),
            invocations: self.invocations,
            instructions: self.instructions,
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Initialized => Ok(()),
            SessionState::Created => Err(Error::NotInitialized),
            SessionState::Poisoned => Err(Error::SessionPoisoned),
            SessionState::Closed => Err(Error::SessionClosed),
        }
    }

    /// Runs guest code at `address` from a fresh frame and poisons the session
    /// on failure.
    fn run(&mut self, address: u64, args: &[Argument]) -> Result<u64> {
        self.cpu.reset();
        self.cpu.sp = self.config.memory.stack_top();
        self.cpu.set_lr(0);
        self.runtime.prepare_thread(&mut self.cpu);

        let marshalled = marshal(args, &mut self.cpu, &mut self.memory, &mut self.runtime)?;
        let outcome = self
            .controller
            .run(&mut self.cpu, &mut self.memory, &mut self.runtime, address);
        release(marshalled, &mut self.runtime);

        self.invocations += 1;
        self.instructions += self.controller.stats().instructions_executed;

        match outcome {
            RunOutcome::Returned(value) => Ok(value),
            RunOutcome::Faulted(fault) => {
                log::debug!("{}: call at {address:#x} faulted: {fault}", self.name);
                self.state = SessionState::Poisoned;
                Err(Error::Fault(fault))
            }
            RunOutcome::LimitReached(limit) => {
                log::debug!("{}: call at {address:#x} stopped: {limit}", self.name);
                self.state = SessionState::Poisoned;
                Err(Error::Timeout(limit))
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("images", &self.images.len())
            .field("regions", &self.memory.region_count())
            .field("invocations", &self.invocations)
            .field("instructions", &self.instructions)
            .finish()
    }
}

/// Summary snapshot of a [`Session`].
///
/// Lightweight and cloneable; used for logs and the command line `info` output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    /// Session name.
    pub name: String,

    /// Lifecycle state.
    pub state: SessionState,

    /// Number of loaded images.
    pub images: usize,

    /// Number of mapped regions.
    pub regions: usize,

    /// Exported symbols across all images.
    pub exports: usize,

    /// Imported symbols across all images.
    pub imports: usize,

    /// Natives registered through `RegisterNatives`.
    pub natives: usize,

    /// Live JNI objects.
    pub objects: usize,

    /// Recorded dispatch misses.
    pub dispatch_misses: usize,

    /// Completed guest calls, including initializers.
    pub invocations: u64,

    /// Instructions executed across all calls.
    pub instructions: u64,
}

/// Maps the stack and verifies that nothing occupies the guard gap below it.
fn map_stack(config: &EmulationConfig, memory: &mut AddressSpace) -> Result<()> {
    let layout = &config.memory;
    let guard_low = layout.stack_base.saturating_sub(layout.stack_guard_size as u64);
    if let Some(region) = memory
        .regions()
        .find(|region| region.base() < layout.stack_base && region.end() > guard_low)
    {
        return Err(Error::Error(format!(
            "region {} at {:#x} overlaps the stack guard gap",
            region.label(),
            region.base()
        )));
    }
    memory.map_at(
        layout.stack_base,
        layout.stack_size,
        MemoryProtection::READ_WRITE,
        RegionKind::Stack,
        "stack",
    )?;
    Ok(())
}

/// Escapes `text` for a JNI symbol name.
fn jni_mangle(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '/' | '.' => out.push('_'),
            '_' => out.push_str("_1"),
            ';' => out.push_str("_2"),
            '[' => out.push_str("_3"),
            c if c.is_ascii_alphanumeric() => out.push(c),
            c => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("_0{unit:04x}"));
                }
            }
        }
    }
    out
}

/// `Java_<class>_<method>`.
fn jni_short_name(class: &str, method: &str) -> String {
    format!("Java_{}_{}", jni_mangle(class), jni_mangle(method))
}

/// `Java_<class>_<method>__<args>`, the name of an overloaded native.
fn jni_long_name(class: &str, method: &str, descriptor: &str) -> String {
    let params = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map_or("", |(params, _)| params);
    format!("{}__{}", jni_short_name(class, method), jni_mangle(params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{control_image, jni_scenario_image, ret_const_image, REGISTERED_CLASS};

    fn initialized(bytes: &[u8]) -> Session {
        let mut session = Session::open(bytes, EmulationConfig::testing()).unwrap();
        session.initialize().unwrap();
        session
    }

    #[test]
    fn test_invoke_returns_value() {
        let mut session = initialized(&ret_const_image("answer", 42));
        assert_eq!(session.state(), SessionState::Initialized);
        assert_eq!(session.invoke("answer", &[]).unwrap(), 42);
        assert_eq!(session.summary().invocations, 1);
    }

    #[test]
    fn test_invoke_requires_initialize() {
        let mut session =
            Session::open(&ret_const_image("answer", 1), EmulationConfig::testing()).unwrap();
        assert!(matches!(session.invoke("answer", &[]), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_unknown_symbol_keeps_session() {
        let mut session = initialized(&ret_const_image("answer", 7));
        let error = session.invoke("question", &[]).unwrap_err();
        assert!(matches!(error, Error::SymbolNotFound(name) if name == "question"));
        assert_eq!(session.invoke("answer", &[]).unwrap(), 7);
    }

    #[test]
    fn test_initializers_run_once() {
        let mut session = initialized(&control_image());
        assert_eq!(session.invoke("read_flag", &[]).unwrap(), 1);
        session.initialize().unwrap();
        assert_eq!(session.summary().invocations, 2);
    }

    #[test]
    fn test_fault_poisons() {
        let mut session = initialized(&control_image());
        let error = session.invoke("null_deref", &[]).unwrap_err();
        assert!(matches!(error, Error::Fault(_)));
        assert_eq!(session.state(), SessionState::Poisoned);
        assert!(matches!(
            session.invoke("read_flag", &[]),
            Err(Error::SessionPoisoned)
        ));
    }

    #[test]
    fn test_limit_poisons() {
        let mut session = initialized(&control_image());
        assert!(matches!(session.invoke("spin", &[]), Err(Error::Timeout(_))));
        assert!(matches!(session.invoke("read_flag", &[]), Err(Error::SessionPoisoned)));
    }

    #[test]
    fn test_stack_and_float_arguments() {
        let mut session = initialized(&control_image());
        let args: Vec<Argument> = (1..=10).map(Argument::Int).collect();
        assert_eq!(session.invoke("sum10", &args).unwrap(), 55);
        session
            .invoke("scale", &[Argument::Double(1.5), Argument::Double(4.0)])
            .unwrap();
        assert_eq!(session.cpu().d(0), 6.0);
    }

    #[test]
    fn test_close_unmaps_everything() {
        let mut session = initialized(&ret_const_image("answer", 1));
        assert!(session.memory().region_count() > 0);
        session.close();
        assert!(session.memory().is_empty());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.invoke("answer", &[]), Err(Error::SessionClosed)));
        session.close();
    }

    #[test]
    fn test_fork_isolates_writes() {
        let mut session = initialized(&control_image());
        assert_eq!(session.invoke("bump", &[Argument::Int(5)]).unwrap(), 5);
        let mut fork = session.fork().unwrap();
        assert_eq!(fork.invoke("bump", &[Argument::Int(1)]).unwrap(), 6);
        assert_eq!(fork.invoke("bump", &[Argument::Int(1)]).unwrap(), 7);
        assert_eq!(session.invoke("bump", &[Argument::Int(10)]).unwrap(), 15);
    }

    #[test]
    fn test_call_registered_native() {
        let mut session = initialized(&jni_scenario_image());
        let echo_sig = "(Ljava/lang/String;)Ljava/lang/String;";
        assert!(session.runtime().native(REGISTERED_CLASS, "echo", echo_sig).is_some());

        let input = session.runtime_mut().objects_mut().new_string("hello");
        let result = session
            .call_static_native(REGISTERED_CLASS, "echo", echo_sig, &[JavaValue::Object(input)])
            .unwrap();
        assert_eq!(result, JavaValue::Object(input));
    }

    #[test]
    fn test_call_exported_native() {
        let mut session = initialized(&jni_scenario_image());
        let result = session
            .call_static_native(
                "com.example.Native",
                "add",
                "(II)I",
                &[JavaValue::Int(-2), JavaValue::Int(44)],
            )
            .unwrap();
        assert_eq!(result, JavaValue::Int(42));

        let error = session
            .call_static_native("com/example/Native", "sub", "(II)I", &[JavaValue::Int(1), JavaValue::Int(1)])
            .unwrap_err();
        assert!(matches!(error, Error::SymbolNotFound(_)));
        assert!(session
            .call_static_native("com/example/Native", "add", "(II)I", &[JavaValue::Int(1)])
            .is_err());
    }

    #[test]
    fn test_jni_names() {
        assert_eq!(
            jni_short_name("com/coolapk/market/util/AuthUtils", "getToken"),
            "Java_com_coolapk_market_util_AuthUtils_getToken"
        );
        assert_eq!(jni_short_name("a/b_c", "d"), "Java_a_b_1c_d");
        assert_eq!(
            jni_long_name("a/B", "f", "(I[BLjava/lang/String;)V"),
            "Java_a_B_f__I_3BLjava_lang_String_2"
        );
        assert_eq!(jni_mangle("\u{e9}"), "_000e9");
    }
}
