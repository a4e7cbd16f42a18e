//! Cooperative claim registries.
//!
//! A claim registry records which numbered hardware resources (spin locks,
//! user interrupt lines) have been handed out, so independent subsystems do
//! not silently share one. It does not police *use* of a resource, only its
//! allocation. Claiming a number twice is an integration error and panics.

use core::cell::Cell;
use core::ops::RangeInclusive;
use critical_section::Mutex;

/// Bitmap of claimed resource numbers
pub struct ClaimRegistry {
    name: &'static str,
    width: u8,
    bits: Mutex<Cell<u32>>,
}

impl ClaimRegistry {
    /// Create an empty registry for `width` resources (at most 32)
    pub const fn new(name: &'static str, width: u8) -> Self {
        assert!(width as u32 <= u32::BITS, "claim registry wider than 32 bits");
        Self {
            name,
            width,
            bits: Mutex::new(Cell::new(0)),
        }
    }

    /// Number of resources tracked
    pub const fn width(&self) -> u8 {
        self.width
    }

    /// Claim `num`; panics if it is already claimed
    pub fn claim(&self, num: u8) {
        self.check(num);
        self.claim_mask(1 << num);
    }

    /// Claim every number set in `mask`; panics if any of them is already claimed
    pub fn claim_mask(&self, mask: u32) {
        critical_section::with(|cs| {
            let bits = self.bits.borrow(cs);
            let taken = bits.get() & mask;
            if taken != 0 {
                panic!(
                    "{} {} already claimed",
                    self.name,
                    taken.trailing_zeros()
                );
            }
            bits.set(bits.get() | mask);
        });
        log::debug!("{}: claimed mask {:#010x}", self.name, mask);
    }

    /// Release the claim on `num`
    pub fn unclaim(&self, num: u8) {
        self.check(num);
        critical_section::with(|cs| {
            let bits = self.bits.borrow(cs);
            bits.set(bits.get() & !(1 << num));
        });
        log::debug!("{}: unclaimed {}", self.name, num);
    }

    /// Whether `num` is currently claimed
    pub fn is_claimed(&self, num: u8) -> bool {
        self.check(num);
        critical_section::with(|cs| self.bits.borrow(cs).get() & (1 << num) != 0)
    }

    /// Claim the lowest unclaimed number in `range`
    pub fn claim_unused_in(&self, range: RangeInclusive<u8>) -> Option<u8> {
        let claimed = critical_section::with(|cs| {
            let bits = self.bits.borrow(cs);
            let current = bits.get();
            let free = range.clone().find(|num| current & (1 << num) == 0)?;
            bits.set(current | (1 << free));
            Some(free)
        });
        if let Some(num) = claimed {
            log::debug!("{}: claimed unused {}", self.name, num);
        }
        claimed
    }

    /// Bitmap of all claimed numbers
    pub fn claimed_mask(&self) -> u32 {
        critical_section::with(|cs| self.bits.borrow(cs).get())
    }

    /// Forget every claim
    pub fn reset(&self) {
        critical_section::with(|cs| self.bits.borrow(cs).set(0));
    }

    fn check(&self, num: u8) {
        assert!(
            num < self.width,
            "{} number {} out of range 0..{}",
            self.name,
            num,
            self.width
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_unclaim() {
        let registry = ClaimRegistry::new("spin lock", 32);
        assert!(!registry.is_claimed(5));
        registry.claim(5);
        assert!(registry.is_claimed(5));
        registry.unclaim(5);
        assert!(!registry.is_claimed(5));
    }

    #[test]
    #[should_panic(expected = "spin lock 7 already claimed")]
    fn test_double_claim_is_fatal() {
        let registry = ClaimRegistry::new("spin lock", 32);
        registry.claim(7);
        registry.claim(7);
    }

    #[test]
    #[should_panic(expected = "already claimed")]
    fn test_mask_overlap_is_fatal() {
        let registry = ClaimRegistry::new("spin lock", 32);
        registry.claim_mask(0b0110);
        registry.claim_mask(0b1100);
    }

    #[test]
    fn test_claim_unused_in_range() {
        let registry = ClaimRegistry::new("user irq", 6);
        registry.claim(0);
        assert_eq!(registry.claim_unused_in(0..=1), Some(1));
        assert_eq!(registry.claim_unused_in(0..=1), None);
        assert_eq!(registry.claimed_mask(), 0b11);
    }

    #[test]
    fn test_reset_forgets_claims() {
        let registry = ClaimRegistry::new("user irq", 6);
        registry.claim_mask(0b111111);
        registry.reset();
        assert_eq!(registry.claimed_mask(), 0);
    }
}
