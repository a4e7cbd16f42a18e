//! Absolute time stamps
//!
//! All deadlines in the system are absolute microsecond counts since boot.
//! Relative delays are converted exactly once, at the call site, so repeated
//! re-arming never accumulates drift.

use core::fmt;
use crate::{CoreError, CoreResult};

/// Microseconds since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AbsoluteTime(u64);

impl AbsoluteTime {
    /// Boot time; always in the past
    pub const NIL: Self = Self(0);

    /// A time that is never reached
    pub const AT_THE_END_OF_TIME: Self = Self(u64::MAX);

    /// Create a time stamp from microseconds since boot
    pub const fn from_micros(us: u64) -> Self {
        Self(us)
    }

    /// Raw microseconds since boot
    pub const fn as_micros(self) -> u64 {
        self.0
    }

    /// Whether this is [`AbsoluteTime::NIL`]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// Whether this is [`AbsoluteTime::AT_THE_END_OF_TIME`]
    pub const fn is_at_the_end_of_time(self) -> bool {
        self.0 == u64::MAX
    }

    /// This time delayed by `us`, saturating at the end of time
    pub const fn delayed_by_us(self, us: u64) -> Self {
        Self(self.0.saturating_add(us))
    }

    /// This time delayed by `ms`, saturating at the end of time
    pub const fn delayed_by_ms(self, ms: u32) -> Self {
        self.delayed_by_us(ms as u64 * 1000)
    }

    /// Checked variant of [`AbsoluteTime::delayed_by_us`]
    pub fn checked_delay_us(self, us: u64) -> CoreResult<Self> {
        self.0.checked_add(us).map(Self).ok_or(CoreError::TimeOverflow)
    }

    /// Signed microseconds from `self` to `later`
    pub const fn diff_us(self, later: AbsoluteTime) -> i64 {
        if later.0 >= self.0 {
            let delta = later.0 - self.0;
            if delta > i64::MAX as u64 { i64::MAX } else { delta as i64 }
        } else {
            let delta = self.0 - later.0;
            if delta > i64::MAX as u64 { i64::MIN } else { -(delta as i64) }
        }
    }

    /// Whether this deadline has passed at `now`
    pub const fn is_reached(self, now: AbsoluteTime) -> bool {
        now.0 >= self.0
    }

    /// The earlier of two times
    pub fn min(self, other: AbsoluteTime) -> AbsoluteTime {
        if other.0 < self.0 { other } else { self }
    }
}

impl fmt::Display for AbsoluteTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_at_the_end_of_time() {
            write!(f, "t:never")
        } else {
            write!(f, "t:{}us", self.0)
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for AbsoluteTime {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "t:{}us", self.0);
    }
}

/// Build a deadline from a relative delay
#[macro_export]
macro_rules! deadline {
    ($now:expr, $value:literal ms) => {
        $crate::AbsoluteTime::delayed_by_ms($now, $value)
    };
    ($now:expr, $value:literal us) => {
        $crate::AbsoluteTime::delayed_by_us($now, $value)
    };
}
