//! Hand-off of synchronous calls to a context's own core.
//!
//! A caller on a foreign core or thread parks a borrowed closure in the
//! port, wakes the context, and blocks until the context has run the
//! closure under its lock at the start of a dispatch pass.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use parking_lot::{Condvar, Mutex};
use rp_hw::Platform;

/// A closure to run on the context's core
pub type SyncFn<'a> = &'a mut (dyn FnMut() -> u32 + Send + 'a);

#[derive(Default)]
struct Slot {
    func: Option<SyncFn<'static>>,
    result: Option<u32>,
}

pub(crate) struct SyncPort {
    callers: Mutex<()>,
    slot: Mutex<Slot>,
    done: Condvar,
    requested: AtomicBool,
}

impl SyncPort {
    pub(crate) fn new() -> Self {
        Self {
            callers: Mutex::new(()),
            slot: Mutex::new(Slot::default()),
            done: Condvar::new(),
            requested: AtomicBool::new(false),
        }
    }

    /// Whether a call is waiting to be run
    pub(crate) fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Run `func` through the port, calling `wake` to get it serviced
    ///
    /// Blocks until the context has run `func`. While waiting, interrupts of
    /// the caller's own core (if it is bound to one) keep being taken.
    pub(crate) fn call(&self, platform: &Platform, func: SyncFn<'_>, wake: impl Fn()) -> u32 {
        let _serial = self.callers.lock();
        // SAFETY: the erased borrow is taken back out of the slot by
        // `service` before the result is posted, and this function does not
        // return until the result is posted, so the closure is never used
        // after the borrow ends.
        let func: SyncFn<'static> = unsafe { core::mem::transmute::<SyncFn<'_>, SyncFn<'static>>(func) };
        {
            let mut slot = self.slot.lock();
            slot.func = Some(func);
            slot.result = None;
        }
        self.requested.store(true, Ordering::Release);
        wake();

        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = slot.result.take() {
                return result;
            }
            let timed_out = self
                .done
                .wait_for(&mut slot, Duration::from_millis(1))
                .timed_out();
            if timed_out {
                parking_lot::MutexGuard::unlocked(&mut slot, || platform.service_interrupts());
            }
        }
    }

    /// Run the waiting call, if any; the caller holds the context lock
    pub(crate) fn service(&self) {
        if !self.requested.swap(false, Ordering::AcqRel) {
            return;
        }
        let func = self.slot.lock().func.take();
        if let Some(func) = func {
            let result = func();
            self.slot.lock().result = Some(result);
            self.done.notify_all();
        }
    }
}
