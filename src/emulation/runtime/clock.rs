//! Time source for guest-visible clocks.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Where `time`, `gettimeofday` and `clock_gettime` read the current time from.
///
/// A [`ClockSource::Fixed`] clock together with a fixed RNG seed makes every
/// invocation fully reproducible.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum ClockSource {
    /// The host's wall clock.
    #[default]
    System,
    /// A constant offset from the Unix epoch.
    Fixed(Duration),
}

impl ClockSource {
    /// Returns the current time as an offset from the Unix epoch.
    #[must_use]
    pub fn now(&self) -> Duration {
        match self {
            ClockSource::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            ClockSource::Fixed(offset) => *offset,
        }
    }

    /// Returns `true` for [`ClockSource::Fixed`].
    #[must_use]
    pub fn is_fixed(&self) -> bool {
        matches!(self, ClockSource::Fixed(_))
    }
}
