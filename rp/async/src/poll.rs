//! Polled context.
//!
//! Nothing runs unless the application calls [`AsyncContext::poll`] (or
//! waits through [`AsyncContext::wait_for_work_until`] and then polls).
//! Everything happens on the one core that created the context, so the lock
//! is bookkeeping only and the context is not usable from the other core.

use core::sync::atomic::{AtomicU32, Ordering};
use std::boxed::Box;

use rp_core::AbsoluteTime;
use rp_hw::Platform;

use crate::context::{AsyncContext, ContextCore, ContextFlags};
use crate::sync_call::SyncFn;
use crate::worker::PendingWorker;

pub struct PollContext {
    core: ContextCore,
    lock_depth: AtomicU32,
}

impl PollContext {
    /// Create a polled context bound to the calling core
    pub fn init(platform: &'static Platform) -> &'static PollContext {
        let core_num = platform.core_num();
        let context = Box::leak(Box::new(PollContext {
            core: ContextCore::new(
                platform,
                core_num,
                ContextFlags::POLLED | ContextFlags::CALLBACK_FROM_NON_IRQ,
            ),
            lock_depth: AtomicU32::new(0),
        }));
        log::debug!("poll context {} up on {}", context.core.id(), core_num);
        context
    }

    /// Current lock nesting depth
    pub fn lock_depth(&self) -> u32 {
        self.lock_depth.load(Ordering::Acquire)
    }
}

impl AsyncContext for PollContext {
    fn base(&self) -> &ContextCore {
        &self.core
    }

    fn acquire_lock_blocking(&self) {
        self.core.assert_own_core("acquire_lock_blocking");
        self.lock_depth.fetch_add(1, Ordering::AcqRel);
    }

    fn release_lock(&self) {
        self.core.assert_own_core("release_lock");
        assert!(self.lock_depth() > 0, "poll context lock released while not held");
        self.lock_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn lock_check(&self) {
        assert!(self.lock_depth() > 0, "poll context lock not held");
    }

    fn execute_sync(&self, func: SyncFn<'_>) -> u32 {
        self.core.assert_own_core("execute_sync");
        assert!(
            self.lock_depth() == 0,
            "execute_sync called while holding the context lock"
        );
        self.acquire_lock_blocking();
        let result = func();
        self.release_lock();
        result
    }

    fn set_work_pending(&self, worker: &'static PendingWorker) {
        self.core.set_work_pending(worker);
    }

    fn poll(&self) {
        self.core.assert_own_core("poll");
        if self.core.is_deinitialized() {
            return;
        }
        assert!(self.lock_depth() == 0, "poll called from inside a callback");
        let platform = self.core.platform();
        if self.core.needs_servicing(platform.now()) {
            self.acquire_lock_blocking();
            self.core.execute_once(self);
            self.release_lock();
        }
    }

    fn wait_until(&self, until: AbsoluteTime) {
        self.core.assert_own_core("wait_until");
        self.core.platform().sleep_until(until);
    }

    fn wait_for_work_until(&self, until: AbsoluteTime) {
        self.core.assert_own_core("wait_for_work_until");
        let platform = self.core.platform();
        if self.core.needs_servicing(platform.now()) {
            return;
        }
        let deadline = until.min(self.core.next_time());
        self.core.work_needed().acquire_block_until(deadline);
    }

    fn deinit(&self) {
        self.core.assert_own_core("deinit");
        assert!(self.lock_depth() == 0, "deinit called from inside a callback");
        if self.core.mark_deinitialized() {
            self.core.detach_all();
            log::debug!("poll context {} down", self.core.id());
        }
    }
}
