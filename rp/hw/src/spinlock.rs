//! Hardware spin locks.
//!
//! The chip has 32 spin locks. Reading lock *n* claims it and returns
//! non-zero if it was free, or returns zero if it was already held; writing
//! any value releases it. Each lock is shared by both cores and all
//! interrupt contexts, so a lock is only ever taken with interrupts
//! disabled on the acquiring core unless the caller knows better.
//!
//! Numbers are divided into fixed roles:
//!
//! | numbers  | use                                               |
//! |----------|---------------------------------------------------|
//! | 0..=13   | reserved for SDK subsystems (some named below)    |
//! | 14, 15   | reserved for an operating system                  |
//! | 16..=23  | striped, handed out round robin, may be shared    |
//! | 24..=31  | exclusive, handed out through the claim registry  |
//!
//! A lock is not recursive. Acquiring a lock already held by the same core
//! deadlocks, so recursion has to be layered on top (see the async context).

use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::claim::ClaimRegistry;
use crate::cpu::InterruptState;
use crate::error::{HwError, HwResult};
use crate::platform::Platform;

pub const NUM_SPIN_LOCKS: u8 = 32;

pub const SPINLOCK_ID_IRQ: u8 = 9;
pub const SPINLOCK_ID_TIMER: u8 = 10;
pub const SPINLOCK_ID_HARDWARE_CLAIM: u8 = 11;
pub const SPINLOCK_ID_RAND: u8 = 12;
pub const SPINLOCK_ID_OS1: u8 = 14;
pub const SPINLOCK_ID_OS2: u8 = 15;
pub const SPINLOCK_ID_STRIPED_FIRST: u8 = 16;
pub const SPINLOCK_ID_STRIPED_LAST: u8 = 23;
pub const SPINLOCK_ID_CLAIM_FREE_FIRST: u8 = 24;
pub const SPINLOCK_ID_CLAIM_FREE_LAST: u8 = 31;

const STRIPED_COUNT: u8 = SPINLOCK_ID_STRIPED_LAST - SPINLOCK_ID_STRIPED_FIRST + 1;

/// The lock bank, with its status bitmap and claim registry
pub struct SpinLockBank {
    locked: AtomicU32,
    claims: ClaimRegistry,
    next_striped: AtomicU8,
}

impl SpinLockBank {
    pub const fn new() -> Self {
        Self {
            locked: AtomicU32::new(0),
            claims: ClaimRegistry::new("spin lock", NUM_SPIN_LOCKS),
            next_striped: AtomicU8::new(0),
        }
    }

    /// Read lock `num`: claims it and returns true if it was free
    fn try_claim(&self, num: u8) -> bool {
        let bit = 1 << num;
        self.locked.fetch_or(bit, Ordering::Acquire) & bit == 0
    }

    /// Write lock `num`: releases it
    fn release(&self, num: u8) {
        self.locked.fetch_and(!(1 << num), Ordering::Release);
    }

    /// Bitmap of locks currently held
    pub fn status(&self) -> u32 {
        self.locked.load(Ordering::Acquire)
    }

    /// Release every lock
    ///
    /// Only safe while nothing else uses the bank, such as during start-up.
    pub fn reset(&self) {
        self.locked.store(0, Ordering::Release);
    }

    /// Next striped lock number, cycling through the striped range
    pub fn next_striped_num(&self) -> u8 {
        let n = self.next_striped.fetch_add(1, Ordering::Relaxed) % STRIPED_COUNT;
        SPINLOCK_ID_STRIPED_FIRST + n
    }

    pub fn claim(&self, num: u8) {
        self.claims.claim(num);
    }

    pub fn claim_mask(&self, mask: u32) {
        self.claims.claim_mask(mask);
    }

    pub fn unclaim(&self, num: u8) {
        self.claims.unclaim(num);
    }

    pub fn is_claimed(&self, num: u8) -> bool {
        self.claims.is_claimed(num)
    }

    /// Claim a free lock from the claim-free range
    pub fn claim_unused(&self) -> HwResult<u8> {
        self.claims
            .claim_unused_in(SPINLOCK_ID_CLAIM_FREE_FIRST..=SPINLOCK_ID_CLAIM_FREE_LAST)
            .ok_or(HwError::NoFreeSpinLock)
    }

    /// Claim a free lock from the claim-free range; running out is fatal
    pub fn claim_unused_required(&self) -> u8 {
        match self.claim_unused() {
            Ok(num) => num,
            Err(err) => panic!("{}", err),
        }
    }
}

impl Default for SpinLockBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle on one lock of a platform's bank
#[derive(Clone, Copy)]
pub struct SpinLock<'a> {
    platform: &'a Platform,
    num: u8,
}

impl<'a> SpinLock<'a> {
    pub(crate) fn new(platform: &'a Platform, num: u8) -> HwResult<Self> {
        if num < NUM_SPIN_LOCKS {
            Ok(Self { platform, num })
        } else {
            Err(HwError::InvalidSpinLock(num))
        }
    }

    pub fn num(&self) -> u8 {
        self.num
    }

    /// Try once to take the lock, without touching interrupts
    pub fn try_acquire_unsafe(&self) -> bool {
        self.platform.spin_locks().try_claim(self.num)
    }

    /// Spin until the lock is taken, without touching interrupts
    ///
    /// The caller must make sure nothing on this core that also takes the
    /// lock can run before it is released.
    pub fn acquire_unsafe(&self) {
        let mut backoff = Backoff::new();
        while !self.try_acquire_unsafe() {
            backoff.snooze();
        }
    }

    pub fn release_unsafe(&self) {
        self.platform.spin_locks().release(self.num);
    }

    /// Disable interrupts on this core, then take the lock
    pub fn acquire(&self) -> InterruptState {
        let state = self.platform.save_and_disable_interrupts();
        self.acquire_unsafe();
        state
    }

    /// Release the lock, then restore the saved interrupt state
    pub fn release(&self, state: InterruptState) {
        self.release_unsafe();
        self.platform.restore_interrupts(state);
    }

    pub fn is_locked(&self) -> bool {
        self.platform.spin_locks().status() & (1 << self.num) != 0
    }
}

impl core::fmt::Debug for SpinLock<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SpinLock")
            .field("num", &self.num)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Exponential spin, then yield the thread
struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    fn new() -> Self {
        Self { step: 0 }
    }

    fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1 << self.step) {
                core::hint::spin_loop();
            }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_claims_write_releases() {
        let bank = SpinLockBank::new();
        assert!(bank.try_claim(3));
        assert!(!bank.try_claim(3));
        assert_eq!(bank.status(), 1 << 3);
        bank.release(3);
        assert!(bank.try_claim(3));
        bank.reset();
        assert_eq!(bank.status(), 0);
    }

    #[test]
    fn test_striped_round_robin() {
        let bank = SpinLockBank::new();
        let nums: Vec<u8> = (0..9).map(|_| bank.next_striped_num()).collect();
        assert_eq!(nums, [16, 17, 18, 19, 20, 21, 22, 23, 16]);
    }

    #[test]
    fn test_claim_unused_exhausts_claim_free_range() {
        let bank = SpinLockBank::new();
        bank.claim(SPINLOCK_ID_CLAIM_FREE_FIRST);
        let mut claimed = Vec::new();
        while let Ok(num) = bank.claim_unused() {
            claimed.push(num);
        }
        assert_eq!(claimed, (25..=31).collect::<Vec<u8>>());
        assert_eq!(bank.claim_unused(), Err(HwError::NoFreeSpinLock));
    }

    #[test]
    #[should_panic(expected = "no unclaimed spin lock available")]
    fn test_claim_unused_required_is_fatal_when_exhausted() {
        let bank = SpinLockBank::new();
        bank.claim_mask(0xff00_0000);
        bank.claim_unused_required();
    }
}
