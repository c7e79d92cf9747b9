//! Per-run counters and the budget check performed before every fetch.
//!
//! A run is bounded three ways: an instruction budget, a wall-clock budget and
//! an optional cancellation flag shared with other threads. Call depth is bounded
//! separately by the controller's call stack and surfaces as
//! [`Fault::StackOverflow`](super::Fault::StackOverflow), not as a
//! [`LimitExceeded`].
//!
//! Reading the clock on every instruction would dominate a tight guest loop, so
//! the wall clock is sampled once per [`CLOCK_SAMPLE_INTERVAL`] instructions.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use crate::emulation::process::EmulationLimits;

/// Instructions executed between two wall-clock samples.
pub const CLOCK_SAMPLE_INTERVAL: u64 = 4096;

/// Counters for the current run.
#[derive(Clone, Debug, Default)]
pub struct ExecutionStats {
    /// Instructions retired, including the `SVC` of every trap.
    pub instructions_executed: u64,

    /// Host stubs and syscalls serviced.
    pub traps_serviced: u64,

    /// Deepest guest call stack seen.
    pub max_call_depth: usize,

    started: Option<Instant>,
}

impl ExecutionStats {
    /// Fresh counters with no start time.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the wall clock.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Counts one retired instruction.
    pub fn record_instruction(&mut self) {
        self.instructions_executed += 1;
    }

    /// Counts one serviced trap.
    pub fn record_trap(&mut self) {
        self.traps_serviced += 1;
    }

    /// Raises the call-depth high-water mark.
    pub fn observe_call_depth(&mut self, depth: usize) {
        if depth > self.max_call_depth {
            self.max_call_depth = depth;
        }
    }

    /// Wall-clock time since [`start`](Self::start).
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.started.map(|started| started.elapsed())
    }

    /// Returns the budget this run has overrun, if any.
    ///
    /// Cancellation is reported first so that a stuck guest stops promptly
    /// even with generous budgets. A zero budget means unlimited.
    #[must_use]
    pub fn check_limits(
        &self,
        limits: &EmulationLimits,
        cancel: Option<&AtomicBool>,
    ) -> Option<LimitExceeded> {
        let executed = self.instructions_executed;

        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Some(LimitExceeded::Cancelled { executed });
        }

        if limits.max_instructions != 0 && executed >= limits.max_instructions {
            return Some(LimitExceeded::Instructions {
                executed,
                limit: limits.max_instructions,
            });
        }

        if limits.timeout_ms == 0 || executed % CLOCK_SAMPLE_INTERVAL != 0 {
            return None;
        }
        let limit = Duration::from_millis(limits.timeout_ms);
        match self.elapsed() {
            Some(elapsed) if elapsed >= limit => Some(LimitExceeded::Timeout { elapsed, limit }),
            _ => None,
        }
    }

    /// Clears every counter and the start time.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The budget a run overran.
#[derive(Clone, Debug, PartialEq)]
pub enum LimitExceeded {
    /// The instruction budget ran out.
    Instructions {
        /// Instructions retired.
        executed: u64,
        /// Configured budget.
        limit: u64,
    },

    /// The wall-clock budget ran out.
    Timeout {
        /// Time spent in the run.
        elapsed: Duration,
        /// Configured budget.
        limit: Duration,
    },

    /// The cancellation flag was raised by another thread.
    Cancelled {
        /// Instructions retired before the flag was seen.
        executed: u64,
    },
}

impl fmt::Display for LimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitExceeded::Instructions { executed, limit } => {
                write!(f, "instruction limit exceeded: {executed} (limit: {limit})")
            }
            LimitExceeded::Timeout { elapsed, limit } => {
                write!(f, "timeout exceeded: {elapsed:?} (limit: {limit:?})")
            }
            LimitExceeded::Cancelled { executed } => {
                write!(f, "cancelled after {executed} instructions")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let mut stats = ExecutionStats::new();
        assert!(stats.elapsed().is_none());

        for _ in 0..3 {
            stats.record_instruction();
        }
        stats.record_trap();
        stats.observe_call_depth(5);
        stats.observe_call_depth(2);

        assert_eq!(stats.instructions_executed, 3);
        assert_eq!(stats.traps_serviced, 1);
        assert_eq!(stats.max_call_depth, 5);
    }

    #[test]
    fn test_instruction_budget() {
        let limits = EmulationLimits::default().with_max_instructions(2);
        let mut stats = ExecutionStats::new();
        stats.start();
        stats.record_instruction();
        assert!(stats.check_limits(&limits, None).is_none());

        stats.record_instruction();
        assert_eq!(
            stats.check_limits(&limits, None),
            Some(LimitExceeded::Instructions {
                executed: 2,
                limit: 2
            })
        );
    }

    #[test]
    fn test_zero_means_unlimited() {
        let limits = EmulationLimits::default()
            .with_max_instructions(0)
            .with_timeout_ms(0);
        let stats = ExecutionStats {
            instructions_executed: u64::MAX - 1,
            ..ExecutionStats::default()
        };
        assert!(stats.check_limits(&limits, None).is_none());
    }

    #[test]
    fn test_cancellation_reported_first() {
        let limits = EmulationLimits::default().with_max_instructions(1);
        let stats = ExecutionStats {
            instructions_executed: 10,
            ..ExecutionStats::default()
        };
        let flag = AtomicBool::new(true);
        assert_eq!(
            stats.check_limits(&limits, Some(&flag)),
            Some(LimitExceeded::Cancelled { executed: 10 })
        );
    }

    #[test]
    fn test_clock_sampled_on_interval() {
        let limits = EmulationLimits::default().with_timeout_ms(1);
        let mut stats = ExecutionStats::new();
        stats.start();
        std::thread::sleep(Duration::from_millis(5));

        stats.instructions_executed = CLOCK_SAMPLE_INTERVAL + 1;
        assert!(stats.check_limits(&limits, None).is_none());

        stats.instructions_executed = CLOCK_SAMPLE_INTERVAL * 2;
        assert!(matches!(
            stats.check_limits(&limits, None),
            Some(LimitExceeded::Timeout { .. })
        ));
    }

    #[test]
    fn test_reset() {
        let mut stats = ExecutionStats::new();
        stats.start();
        stats.record_instruction();
        stats.record_trap();
        stats.observe_call_depth(4);
        stats.reset();

        assert_eq!(stats.instructions_executed, 0);
        assert_eq!(stats.traps_serviced, 0);
        assert_eq!(stats.max_call_depth, 0);
        assert!(stats.elapsed().is_none());
    }

    #[test]
    fn test_display() {
        let limit = LimitExceeded::Cancelled { executed: 7 };
        assert_eq!(limit.to_string(), "cancelled after 7 instructions");
    }
}
