//! Core binding, interrupt state and the event line.
//!
//! A thread stands in for a core once it is bound with [`bind_core`]. Code on
//! a bound thread may take that core's interrupts; unbound threads (the alarm
//! thread, for example) can only reach a core from the outside.

use core::cell::Cell;
use core::marker::PhantomData;
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use rp_core::CoreId;
use std::time::Instant;

use crate::error::{HwError, HwResult};

std::thread_local! {
    static BOUND_CORE: Cell<Option<CoreId>> = const { Cell::new(None) };
}

/// The core the calling thread is bound to, if any
pub fn current_core() -> Option<CoreId> {
    BOUND_CORE.with(Cell::get)
}

/// The core the calling thread is bound to
///
/// Panics on an unbound thread.
pub fn core_num() -> CoreId {
    match current_core() {
        Some(core) => core,
        None => panic!("thread is not bound to a core"),
    }
}

/// The core the calling thread is bound to, or [`HwError::Unbound`]
pub fn try_core_num() -> HwResult<CoreId> {
    current_core().ok_or(HwError::Unbound)
}

/// Bind the calling thread to `core` until the returned guard is dropped
pub fn bind_core(core: CoreId) -> CoreBinding {
    let previous = BOUND_CORE.with(|bound| bound.replace(Some(core)));
    log::trace!("thread bound to {}", core);
    CoreBinding {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the previous binding of the thread on drop
#[must_use = "the binding ends when the guard is dropped"]
pub struct CoreBinding {
    previous: Option<CoreId>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CoreBinding {
    fn drop(&mut self) {
        BOUND_CORE.with(|bound| bound.set(self.previous));
    }
}

/// Interrupt-enable state saved by `save_and_disable_interrupts`
#[must_use = "pass the state back to restore_interrupts"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptState {
    pub(crate) enabled: bool,
}

impl InterruptState {
    /// Whether interrupts were enabled when the state was saved
    pub fn were_enabled(&self) -> bool {
        self.enabled
    }
}

/// The SEV/WFE event line shared by both cores
///
/// Events are counted rather than latched in a single flag: a waiter
/// samples [`EventLine::generation`] before checking its wake condition and
/// then waits for the count to move, so a `sev` in between is never lost.
pub struct EventLine {
    generation: Mutex<u64>,
    signal: Condvar,
}

impl EventLine {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            signal: Condvar::new(),
        }
    }

    /// Signal an event to every waiter
    pub fn sev(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.signal.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wait until an event newer than `seen` arrives or `timeout` passes
    ///
    /// Returns whether an event arrived.
    pub fn wait_since(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        while *generation == seen {
            if self.signal.wait_until(&mut generation, deadline).timed_out() {
                return *generation != seen;
            }
        }
        true
    }
}

impl Default for EventLine {
    fn default() -> Self {
        Self::new()
    }
}
