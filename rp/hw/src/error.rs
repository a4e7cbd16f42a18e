//! Recoverable hardware-resource errors.
//!
//! Integration mistakes (double claims, conflicting handlers) are fatal and
//! panic at the call site; only outcomes a caller can reasonably act on are
//! reported through [`HwError`].

use rp_core::CoreId;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwError {
    #[error("interrupt number {0} out of range")]
    InvalidIrq(u8),
    #[error("interrupt {0} is not a user interrupt")]
    NotUserIrq(u8),
    #[error("user interrupt index {0} out of range")]
    InvalidUserIrqIndex(u8),
    #[error("spin lock number {0} out of range")]
    InvalidSpinLock(u8),
    #[error("no unclaimed spin lock available")]
    NoFreeSpinLock,
    #[error("no unclaimed user interrupt available on {0}")]
    NoFreeUserIrq(CoreId),
    #[error("thread is not bound to a core")]
    Unbound,
}

pub type HwResult<T> = Result<T, HwError>;

#[cfg(feature = "defmt")]
impl defmt::Format for HwError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::InvalidIrq(num) => defmt::write!(fmt, "InvalidIrq({})", num),
            Self::NotUserIrq(num) => defmt::write!(fmt, "NotUserIrq({})", num),
            Self::InvalidUserIrqIndex(n) => defmt::write!(fmt, "InvalidUserIrqIndex({})", n),
            Self::InvalidSpinLock(num) => defmt::write!(fmt, "InvalidSpinLock({})", num),
            Self::NoFreeSpinLock => defmt::write!(fmt, "NoFreeSpinLock"),
            Self::NoFreeUserIrq(core) => defmt::write!(fmt, "NoFreeUserIrq({})", core),
            Self::Unbound => defmt::write!(fmt, "Unbound"),
        }
    }
}
