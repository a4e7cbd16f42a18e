//! Atomic register access through address aliases.
//!
//! Every peripheral register on the chip is visible at four addresses. A
//! write to the plain address replaces the register; a write to one of the
//! alias addresses applies a single bus-atomic read-modify-write instead:
//!
//! | alias          | offset   | effect              |
//! |----------------|----------|---------------------|
//! | [`Alias::Xor`]   | `0x1000` | `reg ^= value`      |
//! | [`Alias::Set`]   | `0x2000` | `reg \|= value`     |
//! | [`Alias::Clear`] | `0x3000` | `reg &= !value`     |
//!
//! Aliased writes are atomic per bit with respect to other bus masters,
//! including the other core. [`Register::write_masked_disjoint`] is built on
//! one of them but reads first, so it is not atomic as a whole.

use core::sync::atomic::{AtomicU32, Ordering};

/// Offset of the atomic XOR alias
pub const REG_ALIAS_XOR_BITS: usize = 0x1 << 12;
/// Offset of the atomic bitmask-set alias
pub const REG_ALIAS_SET_BITS: usize = 0x2 << 12;
/// Offset of the atomic bitmask-clear alias
pub const REG_ALIAS_CLR_BITS: usize = 0x3 << 12;
/// Address bits used to select an alias
pub const REG_ALIAS_MASK: usize = 0x3 << 12;

/// Lowest address that supports aliased access
pub const PERIPH_BASE: usize = 0x4000_0000;

/// The four views of a register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Alias {
    ReadWrite,
    Xor,
    Set,
    Clear,
}

impl Alias {
    /// Address offset selecting this alias
    pub const fn offset(self) -> usize {
        match self {
            Alias::ReadWrite => 0,
            Alias::Xor => REG_ALIAS_XOR_BITS,
            Alias::Set => REG_ALIAS_SET_BITS,
            Alias::Clear => REG_ALIAS_CLR_BITS,
        }
    }

    /// Split a bus address into its base register address and alias
    pub const fn decode(addr: usize) -> (usize, Alias) {
        let alias = match (addr & REG_ALIAS_MASK) >> 12 {
            0 => Alias::ReadWrite,
            1 => Alias::Xor,
            2 => Alias::Set,
            _ => Alias::Clear,
        };
        (addr & !REG_ALIAS_MASK, alias)
    }
}

/// Address of `alias` for the register at `addr`
///
/// With the `param-assertions` feature the base address is checked: it must
/// be a peripheral address and must not already carry alias bits.
#[inline]
pub fn alias_address(addr: usize, alias: Alias) -> usize {
    #[cfg(feature = "param-assertions")]
    {
        assert!(
            addr >= PERIPH_BASE,
            "address {:#x} does not support aliased access",
            addr
        );
        assert!(
            addr & REG_ALIAS_MASK == 0,
            "address {:#x} is already an alias",
            addr
        );
    }
    addr | alias.offset()
}

/// A 32-bit register with aliased write access
pub trait Register {
    /// Base (read/write) address of the register
    fn address(&self) -> usize;

    fn read(&self) -> u32;

    /// Write `value` through the given alias
    fn write_alias(&self, alias: Alias, value: u32);

    fn write(&self, value: u32) {
        self.write_alias(Alias::ReadWrite, value);
    }

    /// Atomically set the bits in `mask`
    fn set_bits(&self, mask: u32) {
        self.write_alias(Alias::Set, mask);
    }

    /// Atomically clear the bits in `mask`
    fn clear_bits(&self, mask: u32) {
        self.write_alias(Alias::Clear, mask);
    }

    /// Atomically flip the bits in `mask`
    fn xor_bits(&self, mask: u32) {
        self.write_alias(Alias::Xor, mask);
    }

    /// Replace the bits selected by `mask` with the corresponding bits of `values`
    ///
    /// Reads the register, then flips only the selected bits that differ
    /// through the XOR alias. Bits outside `mask` are never written, but a
    /// concurrent writer of the *same* bits between the read and the flip is
    /// not detected: callers must ensure no one else writes those bits.
    fn write_masked_disjoint(&self, values: u32, mask: u32) {
        self.xor_bits((self.read() ^ values) & mask);
    }
}

/// A memory-mapped register on the real bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioRegister {
    addr: usize,
}

impl MmioRegister {
    /// # Safety
    ///
    /// `addr` must be the base address of a readable, writable 32-bit
    /// peripheral register that supports the alias views.
    pub const unsafe fn new(addr: usize) -> Self {
        Self { addr }
    }
}

impl Register for MmioRegister {
    fn address(&self) -> usize {
        self.addr
    }

    fn read(&self) -> u32 {
        // SAFETY: `new` requires a valid register address.
        unsafe { core::ptr::read_volatile(self.addr as *const u32) }
    }

    fn write_alias(&self, alias: Alias, value: u32) {
        let target = alias_address(self.addr, alias);
        // SAFETY: every alias of a valid register is itself a valid address.
        unsafe { core::ptr::write_volatile(target as *mut u32, value) }
    }
}

/// A register simulated in memory, decoding aliased writes like the bus fabric
#[derive(Debug)]
pub struct SimRegister {
    addr: usize,
    value: AtomicU32,
}

impl SimRegister {
    pub const fn new(addr: usize, reset: u32) -> Self {
        Self {
            addr,
            value: AtomicU32::new(reset),
        }
    }

    /// Apply a bus write to `target`, which must be one of this register's aliases
    pub fn bus_write(&self, target: usize, value: u32) {
        let (base, alias) = Alias::decode(target);
        assert_eq!(base, self.addr, "bus write to {:#x} misses register", target);
        match alias {
            Alias::ReadWrite => self.value.store(value, Ordering::SeqCst),
            Alias::Xor => {
                self.value.fetch_xor(value, Ordering::SeqCst);
            }
            Alias::Set => {
                self.value.fetch_or(value, Ordering::SeqCst);
            }
            Alias::Clear => {
                self.value.fetch_and(!value, Ordering::SeqCst);
            }
        }
    }
}

impl Register for SimRegister {
    fn address(&self) -> usize {
        self.addr
    }

    fn read(&self) -> u32 {
        self.value.load(Ordering::SeqCst)
    }

    fn write_alias(&self, alias: Alias, value: u32) {
        self.bus_write(alias_address(self.addr, alias), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REG: usize = 0x4001_4004;

    #[test]
    fn test_alias_offsets() {
        assert_eq!(alias_address(REG, Alias::ReadWrite), REG);
        assert_eq!(alias_address(REG, Alias::Xor), REG + 0x1000);
        assert_eq!(alias_address(REG, Alias::Set), REG + 0x2000);
        assert_eq!(alias_address(REG, Alias::Clear), REG + 0x3000);
    }

    #[test]
    fn test_decode_recovers_alias() {
        assert_eq!(Alias::decode(REG + 0x3000), (REG, Alias::Clear));
        assert_eq!(Alias::decode(REG), (REG, Alias::ReadWrite));
    }

    #[test]
    fn test_bit_operations() {
        let reg = SimRegister::new(REG, 0b1010);
        reg.set_bits(0b0101);
        assert_eq!(reg.read(), 0b1111);
        reg.clear_bits(0b0011);
        assert_eq!(reg.read(), 0b1100);
        reg.xor_bits(0b0110);
        assert_eq!(reg.read(), 0b1010);
        reg.write(0xdead_beef);
        assert_eq!(reg.read(), 0xdead_beef);
    }

    #[test]
    fn test_write_masked_disjoint_leaves_other_bits() {
        let reg = SimRegister::new(REG, 0xFF00_00F0);
        reg.write_masked_disjoint(0x0000_0005, 0x0000_000F);
        assert_eq!(reg.read(), 0xFF00_00F5);
        reg.write_masked_disjoint(0x0000_0000, 0x0000_00F0);
        assert_eq!(reg.read(), 0xFF00_0005);
    }

    #[cfg(feature = "param-assertions")]
    #[test]
    #[should_panic(expected = "already an alias")]
    fn test_alias_of_alias_is_rejected() {
        alias_address(REG + 0x2000, Alias::Set);
    }

    #[cfg(feature = "param-assertions")]
    #[test]
    #[should_panic(expected = "does not support aliased access")]
    fn test_non_peripheral_address_is_rejected() {
        alias_address(0x2000_0000, Alias::Set);
    }
}
