//! Counting semaphore for signalling between cores and interrupt handlers.
//!
//! Releasing never blocks and may be done from an interrupt handler or the
//! other core. A blocked acquirer sleeps on the event line, taking its own
//! core's interrupts while it waits, so a release made by one of its own
//! handlers is seen.

use core::sync::atomic::{AtomicU32, Ordering};

use rp_core::AbsoluteTime;

use crate::platform::Platform;

pub struct Semaphore<'p> {
    platform: &'p Platform,
    permits: AtomicU32,
    max_permits: u32,
}

impl<'p> Semaphore<'p> {
    /// Create a semaphore holding `initial` of at most `max_permits` permits
    pub fn new(platform: &'p Platform, initial: u32, max_permits: u32) -> Self {
        assert!(
            initial <= max_permits,
            "semaphore initial permits {} exceed maximum {}",
            initial,
            max_permits
        );
        Self {
            platform,
            permits: AtomicU32::new(initial),
            max_permits,
        }
    }

    /// Binary semaphore, initially empty
    pub fn binary(platform: &'p Platform) -> Self {
        Self::new(platform, 0, 1)
    }

    pub fn available(&self) -> u32 {
        self.permits.load(Ordering::Acquire)
    }

    pub fn max_permits(&self) -> u32 {
        self.max_permits
    }

    /// Take a permit if one is available
    pub fn try_acquire(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |permits| {
                permits.checked_sub(1)
            })
            .is_ok()
    }

    /// Return a permit
    ///
    /// Returns false, and changes nothing, if the semaphore is already full.
    pub fn release(&self) -> bool {
        let released = self
            .permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |permits| {
                (permits < self.max_permits).then_some(permits + 1)
            })
            .is_ok();
        if released {
            self.platform.sev();
        }
        released
    }

    /// Set the permit count, waking any waiter
    pub fn reset(&self, permits: u32) {
        assert!(permits <= self.max_permits, "semaphore reset beyond maximum");
        self.permits.store(permits, Ordering::Release);
        self.platform.sev();
    }

    /// Wait for a permit for as long as it takes
    pub fn acquire_blocking(&self) {
        self.acquire_block_until(AbsoluteTime::AT_THE_END_OF_TIME);
    }

    /// Wait for a permit until `until`; returns whether one was taken
    pub fn acquire_block_until(&self, until: AbsoluteTime) -> bool {
        loop {
            let seen = self.platform.event_generation();
            if self.try_acquire() {
                return true;
            }
            if until.is_reached(self.platform.now()) {
                return false;
            }
            self.platform.wait_for_event_since(seen, until);
        }
    }

    /// Wait for a permit for at most `ms` milliseconds
    pub fn acquire_timeout_ms(&self, ms: u32) -> bool {
        self.acquire_block_until(self.platform.now().delayed_by_ms(ms))
    }
}

impl core::fmt::Debug for Semaphore<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Semaphore")
            .field("permits", &self.available())
            .field("max_permits", &self.max_permits)
            .finish()
    }
}
