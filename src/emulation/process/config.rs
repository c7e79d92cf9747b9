//! Emulation configuration types.
//!
//! This module provides the configuration for an emulation session, allowing
//! control over execution limits, the guest memory layout, determinism and
//! tracing options.
//!
//! # Overview
//!
//! Configuration is organized into several interconnected structures:
//!
//! - [`EmulationConfig`] - Top-level configuration container
//! - [`EmulationLimits`] - Execution limits (instructions, call depth, wall clock)
//! - [`MemoryConfig`] - Guest address space layout
//! - [`TracingConfig`] - Logging and tracing options
//!
//! # Configuration Presets
//!
//! For common use cases, [`EmulationConfig`] provides preset configurations:
//!
//! - [`EmulationConfig::token()`] - Production settings for request signing
//! - [`EmulationConfig::testing()`] - Deterministic, tightly bounded settings
//!
//! # Example
//!
//! ```rust,no_run
//! use droidemu::emulation::{EmulationConfig, EmulationLimits};
//!
//! // Use a preset
//! let config = EmulationConfig::token();
//!
//! // Or customize
//! let config = EmulationConfig {
//!     limits: EmulationLimits::new()
//!         .with_max_instructions(10_000_000)
//!         .with_timeout_ms(5_000),
//!     rng_seed: 7,
//!     ..Default::default()
//! };
//! ```

use std::time::Duration;

use crate::emulation::{
    loader::DEFAULT_MAX_IMAGE_SIZE,
    runtime::{ClockSource, MissPolicy},
};

/// Complete emulation configuration for one session.
///
/// `EmulationConfig` is the top-level configuration container. It aggregates
/// sub-configurations for limits, memory layout and tracing, and carries the
/// knobs that make a session deterministic: the clock and the RNG seed.
///
/// # Default Configuration
///
/// The default configuration provides reasonable settings for general use:
/// - 50 million instruction limit
/// - 4096 call depth limit
/// - 30 second timeout
/// - Wall clock time, RNG seed 0
/// - Dispatch misses answered with empty instances
///
/// # Presets
///
/// - [`token()`](Self::token) - For production signing
/// - [`testing()`](Self::testing) - For reproducible tests
///
/// # Example
///
/// ```rust,no_run
/// use droidemu::emulation::{ClockSource, EmulationConfig};
/// use std::time::Duration;
///
/// let config = EmulationConfig {
///     clock: ClockSource::Fixed(Duration::from_secs(1_700_000_000)),
///     ..EmulationConfig::token()
/// };
/// ```
#[derive(Clone, Debug)]
pub struct EmulationConfig {
    /// Execution limits controlling resource usage.
    pub limits: EmulationLimits,

    /// Guest address space layout.
    pub memory: MemoryConfig,

    /// Logging switches.
    pub tracing: TracingConfig,

    /// Source of `time`, `gettimeofday` and `clock_gettime`.
    ///
    /// [`ClockSource::Fixed`] makes every time query return the same instant.
    pub clock: ClockSource,

    /// Seed for the session RNG backing `rand`, `arc4random` and `getrandom`.
    ///
    /// The stack protector canary is drawn from the same RNG, so a fixed seed and
    /// a fixed clock make repeated sessions bit-for-bit identical.
    pub rng_seed: u64,

    /// Default result for JNI calls without a registered handler.
    pub miss_policy: MissPolicy,
}

/// Execution limits for safe emulation.
///
/// These limits prevent runaway guest code from consuming unbounded resources.
/// All limits are checked before each instruction fetch.
///
/// # Default Values
///
/// | Limit | Default Value |
/// |-------|---------------|
/// | `max_instructions` | 50,000,000 |
/// | `max_call_depth` | 4096 |
/// | `timeout_ms` | 30,000 (30 seconds) |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmulationLimits {
    /// Maximum instructions to execute per run.
    ///
    /// Set to 0 for unlimited execution. When exceeded, the run stops with
    /// [`LimitExceeded::Instructions`](crate::emulation::LimitExceeded::Instructions).
    pub max_instructions: u64,

    /// Maximum depth of the guest call stack.
    ///
    /// Set to 0 for unlimited depth. Exceeding it raises
    /// [`Fault::StackOverflow`](crate::emulation::Fault::StackOverflow).
    pub max_call_depth: usize,

    /// Wall-clock timeout in milliseconds.
    ///
    /// Set to 0 for no timeout.
    pub timeout_ms: u64,
}

/// Guest address space layout.
///
/// Every region is placed at a fixed base so guest pointers are stable across
/// sessions, which keeps runs reproducible. The stack grows down from
/// `stack_base + stack_size`; `stack_guard_size` bytes below `stack_base` are kept
/// unmapped so overflows fault instead of corrupting the heap.
///
/// # Default Values
///
/// | Setting | Default Value |
/// |---------|---------------|
/// | `image_base` | `0x4000_0000` |
/// | `stub_base` | `0x1000_0000` |
/// | `host_data_base` | `0x1100_0000` |
/// | `host_data_size` | 1 MB |
/// | `heap_base` | `0x2000_0000` |
/// | `heap_size` | 32 MB |
/// | `stack_base` | `0x7EF0_0000` |
/// | `stack_size` | 1 MB |
/// | `stack_guard_size` | 64 KB |
/// | `max_image_size` | 256 MB |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Load address of the first image.
    ///
    /// `None` places images at the lowest free address above the mmap base.
    /// Further images are always placed automatically.
    pub image_base: Option<u64>,

    /// Base of the executable trap trampoline region.
    pub stub_base: u64,

    /// Base of the host data region (JNI tables, TLS, data symbols).
    pub host_data_base: u64,

    /// Size of the host data region in bytes.
    pub host_data_size: usize,

    /// Base of the guest heap.
    pub heap_base: u64,

    /// Size of the guest heap in bytes.
    pub heap_size: usize,

    /// Lowest address of the stack.
    pub stack_base: u64,

    /// Size of the stack in bytes.
    pub stack_size: usize,

    /// Unmapped gap kept below the stack.
    pub stack_guard_size: usize,

    /// Largest span of `PT_LOAD` segments an image may reserve.
    pub max_image_size: usize,
}

/// Tracing configuration for debugging and analysis.
///
/// All output goes through the `log` facade; nothing is buffered in memory.
///
/// # Tracing Categories
///
/// - `trace_instructions`: Very High (one `trace` line per instruction)
/// - `trace_calls`: Medium (one line per `BL`/`BLR` and run boundary)
/// - `trace_traps`: Medium (one line per host stub or syscall)
/// - `trace_jni`: Low (one line per JNI callback with its signature)
///
/// # Default Values
///
/// Every category is disabled by default. Dispatch misses are logged at `warn`
/// regardless of these switches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TracingConfig {
    /// Log individual instruction execution.
    ///
    /// Records address, raw word and the decoded instruction.
    pub trace_instructions: bool,

    /// Log guest calls and the start and end of every run.
    pub trace_calls: bool,

    /// Log host stub invocations and syscalls with their return values.
    pub trace_traps: bool,

    /// Log JNI callbacks with their computed signature.
    pub trace_jni: bool,
}

impl Default for EmulationConfig {
    /// Creates a default emulation configuration.
    ///
    /// See the struct documentation for default values.
    fn default() -> Self {
        Self {
            limits: EmulationLimits::default(),
            memory: MemoryConfig::default(),
            tracing: TracingConfig::default(),
            clock: ClockSource::System,
            rng_seed: 0,
            miss_policy: MissPolicy::EmptyInstance,
        }
    }
}

impl Default for EmulationLimits {
    /// Creates default execution limits.
    ///
    /// See the struct documentation for default values.
    fn default() -> Self {
        Self {
            max_instructions: 50_000_000,
            max_call_depth: 4096,
            timeout_ms: 30_000, // 30 seconds
        }
    }
}

impl Default for MemoryConfig {
    /// Creates the default guest layout.
    fn default() -> Self {
        Self {
            image_base: Some(0x4000_0000),
            stub_base: 0x1000_0000,
            host_data_base: 0x1100_0000,
            host_data_size: 1024 * 1024,
            heap_base: 0x2000_0000,
            heap_size: 32 * 1024 * 1024, // 32 MB
            stack_base: 0x7EF0_0000,
            stack_size: 1024 * 1024,
            stack_guard_size: 64 * 1024,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
        }
    }
}

impl MemoryConfig {
    /// Initial stack pointer: the top of the stack region.
    #[must_use]
    pub fn stack_top(&self) -> u64 {
        self.stack_base + self.stack_size as u64
    }
}

impl TracingConfig {
    /// Enables every tracing category.
    #[must_use]
    pub fn full() -> Self {
        Self {
            trace_instructions: true,
            trace_calls: true,
            trace_traps: true,
            trace_jni: true,
        }
    }

    /// Traces calls, traps and JNI callbacks but not individual instructions.
    #[must_use]
    pub fn calls() -> Self {
        Self {
            trace_instructions: false,
            ..Self::full()
        }
    }

    /// Checks if any tracing is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.trace_instructions || self.trace_calls || self.trace_traps || self.trace_jni
    }
}

/// Preset configurations for common use cases.
impl EmulationConfig {
    /// Creates the configuration used for production token generation.
    ///
    /// # Settings
    ///
    /// - **Instruction limit**: 50 million
    /// - **Timeout**: 10 seconds
    /// - **Clock**: System time
    /// - **Misses**: Empty instances, matching a permissive managed runtime
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use droidemu::emulation::{EmulationConfig, SessionBuilder};
    ///
    /// # fn main() -> droidemu::Result<()> {
    /// let session = SessionBuilder::new()
    ///     .library_file("libauth.so")
    ///     .config(EmulationConfig::token())
    ///     .build()?;
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn token() -> Self {
        Self {
            limits: EmulationLimits::new()
                .with_max_instructions(50_000_000)
                .with_timeout_ms(10_000),
            ..Self::default()
        }
    }

    /// Creates a deterministic configuration for tests.
    ///
    /// # Settings
    ///
    /// - **Instruction limit**: 1 million
    /// - **Call depth**: 256
    /// - **Timeout**: 5 seconds
    /// - **Clock**: Fixed at 2023-11-14 22:13:20 UTC
    /// - **RNG seed**: `0x5EED`
    #[must_use]
    pub fn testing() -> Self {
        Self {
            limits: EmulationLimits::new()
                .with_max_instructions(1_000_000)
                .with_max_call_depth(256)
                .with_timeout_ms(5_000),
            clock: ClockSource::Fixed(Duration::from_secs(1_700_000_000)),
            rng_seed: 0x5EED,
            ..Self::default()
        }
    }

    /// Sets the execution limits.
    #[must_use]
    pub fn with_limits(mut self, limits: EmulationLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the memory layout.
    #[must_use]
    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    /// Sets the tracing options.
    #[must_use]
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Sets the clock source.
    #[must_use]
    pub fn with_clock(mut self, clock: ClockSource) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the RNG seed.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Sets the dispatch miss policy.
    #[must_use]
    pub fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }
}

/// Builder methods for [`EmulationLimits`].
impl EmulationLimits {
    /// Creates new limits with default values.
    ///
    /// Equivalent to [`EmulationLimits::default()`]. Use the `with_*` methods
    /// to customize individual limits.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use droidemu::emulation::EmulationLimits;
    ///
    /// let limits = EmulationLimits::new()
    ///     .with_max_instructions(5_000_000)
    ///     .with_timeout_ms(30_000);
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates limits with every check disabled.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            max_instructions: 0,
            max_call_depth: 0,
            timeout_ms: 0,
        }
    }

    /// Sets the maximum instruction count.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum instructions to execute (0 for unlimited)
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_instructions(mut self, max: u64) -> Self {
        self.max_instructions = max;
        self
    }

    /// Sets the maximum call stack depth.
    ///
    /// # Arguments
    ///
    /// * `max` - Maximum nested guest calls (0 for unlimited)
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    /// Sets the execution timeout in milliseconds.
    ///
    /// # Arguments
    ///
    /// * `ms` - Timeout in milliseconds (0 for no timeout)
    ///
    /// # Returns
    ///
    /// Returns `self` for method chaining.
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmulationConfig::default();
        assert_eq!(config.limits.max_instructions, 50_000_000);
        assert_eq!(config.miss_policy, MissPolicy::EmptyInstance);
        assert_eq!(config.clock, ClockSource::System);
        assert_eq!(config.memory.image_base, Some(0x4000_0000));
    }

    #[test]
    fn test_token_preset() {
        let config = EmulationConfig::token();
        assert_eq!(config.limits.timeout_ms, 10_000);
        assert!(!config.tracing.trace_instructions);
    }

    #[test]
    fn test_testing_preset() {
        let config = EmulationConfig::testing();
        assert_eq!(config.limits.max_instructions, 1_000_000);
        assert_eq!(config.limits.max_call_depth, 256);
        assert_eq!(
            config.clock,
            ClockSource::Fixed(Duration::from_secs(1_700_000_000))
        );
        assert_eq!(config.rng_seed, 0x5EED);
    }

    #[test]
    fn test_limits_builder() {
        let limits = EmulationLimits::new()
            .with_max_instructions(5000)
            .with_max_call_depth(50)
            .with_timeout_ms(30_000);

        assert_eq!(limits.max_instructions, 5000);
        assert_eq!(limits.max_call_depth, 50);
        assert_eq!(limits.timeout_ms, 30_000);
        assert_eq!(EmulationLimits::unlimited().max_instructions, 0);
    }

    #[test]
    fn test_memory_layout() {
        let memory = MemoryConfig::default();
        assert_eq!(memory.stack_top(), 0x7F00_0000);
        assert!(memory.heap_base + memory.heap_size as u64 <= memory.stack_base);
        assert!(memory.stub_base < memory.host_data_base);
    }

    #[test]
    fn test_tracing_presets() {
        assert!(!TracingConfig::default().is_enabled());
        assert!(TracingConfig::full().trace_instructions);
        let calls = TracingConfig::calls();
        assert!(!calls.trace_instructions);
        assert!(calls.trace_traps);
    }
}
