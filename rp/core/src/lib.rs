#![no_std]
#![forbid(unsafe_code)]

//! # RP Core
//!
//! Vocabulary shared by the hardware layer and the async context: processor
//! core identities, absolute time stamps and the error type for invalid core
//! or time arguments.

#[cfg(feature = "std")]
extern crate std;

use core::fmt;

pub mod cores;
pub mod time;

pub use cores::*;
pub use time::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type used by the core vocabulary
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building core vocabulary values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// Core number outside `0..NUM_CORES`
    InvalidCore(u8),
    /// Time arithmetic overflowed the 64-bit microsecond counter
    TimeOverflow,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidCore(num) => write!(f, "invalid core number {}", num),
            CoreError::TimeOverflow => write!(f, "time arithmetic overflow"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CoreError {}

#[cfg(feature = "defmt")]
impl defmt::Format for CoreError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            CoreError::InvalidCore(num) => defmt::write!(fmt, "InvalidCore({})", num),
            CoreError::TimeOverflow => defmt::write!(fmt, "TimeOverflow"),
        }
    }
}
