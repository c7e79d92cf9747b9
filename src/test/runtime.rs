use std::sync::Arc;

use crate::emulation::{
    runtime::{
        DispatchTable, InvokeFunction, JniFunction, RuntimeState, StubTable,
    },
    AddressSpace, Cpu, EmulationConfig, MemoryProtection, RegionKind, TrapAction, TrapHandler,
};

/// A runtime with its host regions mapped and a stack, for calling host
/// functions directly through the trap handler.
pub struct TestRuntime {
    pub cpu: Cpu,
    pub memory: AddressSpace,
    pub state: RuntimeState,
}

impl TestRuntime {
    pub fn new(dispatch: DispatchTable) -> Self {
        Self::with_config(EmulationConfig::testing(), StubTable::standard(), dispatch)
    }

    pub fn with_config(config: EmulationConfig, stubs: StubTable, dispatch: DispatchTable) -> Self {
        let mut memory = AddressSpace::new();
        let state = RuntimeState::new(&config, Arc::new(stubs), Arc::new(dispatch), &mut memory)
            .unwrap();
        memory
            .map_at(
                config.memory.stack_base,
                config.memory.stack_size,
                MemoryProtection::READ_WRITE,
                RegionKind::Stack,
                "stack",
            )
            .unwrap();
        let mut cpu = Cpu::new();
        cpu.sp = config.memory.stack_top();
        state.prepare_thread(&mut cpu);
        TestRuntime { cpu, memory, state }
    }

    pub fn alloc(&mut self, size: usize) -> u64 {
        let address = self.state.heap_mut().alloc(size).unwrap();
        self.memory.fill(address, size, 0).unwrap();
        address
    }

    pub fn cstring(&mut self, text: &str) -> u64 {
        let address = self.state.heap_mut().alloc(text.len() + 1).unwrap();
        self.memory.write_cstring(address, text.as_bytes()).unwrap();
        address
    }

    pub fn read_string(&self, address: u64) -> String {
        String::from_utf8(self.memory.read_cstring(address, 4096).unwrap()).unwrap()
    }

    /// Traps into stub slot `slot` with `x0..` set to `args`.
    pub fn trap(&mut self, slot: usize, args: &[u64]) -> TrapAction {
        for (n, value) in args.iter().enumerate() {
            self.cpu.set_x(n as u8, *value);
        }
        let base = self.state.layout().stub_base;
        self.cpu.pc = StubTable::trampoline(base, slot);
        self.state
            .handle_trap(slot as u16 + 1, &mut self.cpu, &mut self.memory)
    }

    /// Calls a host function by name.
    pub fn host(&mut self, name: &str, args: &[u64]) -> TrapAction {
        let slot = self.state.stubs().index_of(name).unwrap();
        self.trap(slot, args)
    }

    /// Calls a host function and returns its integer result.
    pub fn host_int(&mut self, name: &str, args: &[u64]) -> u64 {
        match self.host(name, args) {
            TrapAction::Return(crate::emulation::ReturnValue::Int(value)) => value,
            other => panic!("{name} returned {other:?}"),
        }
    }

    /// Calls a JNI function with `x0` set to the `JNIEnv*`.
    pub fn jni(&mut self, function: JniFunction, args: &[u64]) -> TrapAction {
        let mut all = vec![self.state.jni_env()];
        all.extend_from_slice(args);
        let slot = self.state.stubs().jni_slot(function);
        self.trap(slot, &all)
    }

    /// Calls an invoke interface function with `x0` set to the `JavaVM*`.
    pub fn invoke(&mut self, function: InvokeFunction, args: &[u64]) -> TrapAction {
        let mut all = vec![self.state.java_vm()];
        all.extend_from_slice(args);
        let slot = self.state.stubs().invoke_slot(function);
        self.trap(slot, &all)
    }

    /// Issues `SVC #0` with `x8 = number`.
    pub fn syscall(&mut self, number: u64, args: &[u64]) -> TrapAction {
        for (n, value) in args.iter().enumerate() {
            self.cpu.set_x(n as u8, *value);
        }
        self.cpu.set_x(8, number);
        self.state.handle_trap(0, &mut self.cpu, &mut self.memory)
    }
}
