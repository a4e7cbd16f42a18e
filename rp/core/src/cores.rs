//! Processor core identities

use core::fmt;
use crate::{CoreError, CoreResult};

/// Number of processor cores on the chip
pub const NUM_CORES: usize = 2;

/// One of the two processor cores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoreId {
    Core0,
    Core1,
}

impl CoreId {
    /// All cores in index order
    pub const ALL: [CoreId; NUM_CORES] = [CoreId::Core0, CoreId::Core1];

    /// Build a core id from its number
    pub const fn new(num: u8) -> CoreResult<Self> {
        match num {
            0 => Ok(CoreId::Core0),
            1 => Ok(CoreId::Core1),
            other => Err(CoreError::InvalidCore(other)),
        }
    }

    /// Raw core number
    pub const fn num(self) -> u8 {
        match self {
            CoreId::Core0 => 0,
            CoreId::Core1 => 1,
        }
    }

    /// Index into per-core tables
    pub const fn index(self) -> usize {
        self.num() as usize
    }

    /// The other core
    pub const fn other(self) -> Self {
        match self {
            CoreId::Core0 => CoreId::Core1,
            CoreId::Core1 => CoreId::Core0,
        }
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.num())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CoreId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "core{}", self.num());
    }
}
