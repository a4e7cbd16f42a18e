//! The context contract shared by every backend.
//!
//! A context gives its workers a single logical thread of execution on one
//! core. [`ContextCore`] holds the state all backends share (worker lists,
//! next wake time, the sync-call port) and runs dispatch passes;
//! [`AsyncContext`] is the interface collaborators program against.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use rp_core::{AbsoluteTime, CoreId};
use rp_hw::{Platform, Semaphore};

use crate::sync_call::{SyncFn, SyncPort};
use crate::worker::{Linked, PendingWorker, TimedWorker, WorkerList};

bitflags! {
    /// What kind of execution environment callbacks run in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        /// Callbacks may run from thread mode
        const CALLBACK_FROM_NON_IRQ = 0x1;
        /// Callbacks may run from an interrupt handler
        const CALLBACK_FROM_IRQ = 0x2;
        /// Callbacks only run when the application polls
        const POLLED = 0x4;
    }
}

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// State and dispatch logic shared by all backends
pub struct ContextCore {
    id: usize,
    platform: &'static Platform,
    core_num: CoreId,
    flags: ContextFlags,
    pending: spin::Mutex<WorkerList<PendingWorker>>,
    timed: spin::Mutex<WorkerList<TimedWorker>>,
    next_time: AtomicU64,
    deinitialized: AtomicBool,
    work_needed: Semaphore<'static>,
    sync: SyncPort,
}

impl ContextCore {
    pub fn new(platform: &'static Platform, core_num: CoreId, flags: ContextFlags) -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            platform,
            core_num,
            flags,
            pending: spin::Mutex::new(WorkerList::new()),
            timed: spin::Mutex::new(WorkerList::new()),
            next_time: AtomicU64::new(AbsoluteTime::AT_THE_END_OF_TIME.as_micros()),
            deinitialized: AtomicBool::new(false),
            work_needed: Semaphore::binary(platform),
            sync: SyncPort::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn platform(&self) -> &'static Platform {
        self.platform
    }

    pub fn core_num(&self) -> CoreId {
        self.core_num
    }

    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Earliest deadline among the timed workers
    pub fn next_time(&self) -> AbsoluteTime {
        AbsoluteTime::from_micros(self.next_time.load(Ordering::Acquire))
    }

    pub fn is_deinitialized(&self) -> bool {
        self.deinitialized.load(Ordering::Acquire)
    }

    /// Mark the context dead; returns false if it already was
    pub(crate) fn mark_deinitialized(&self) -> bool {
        !self.deinitialized.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn work_needed(&self) -> &Semaphore<'static> {
        &self.work_needed
    }

    pub(crate) fn sync_port(&self) -> &SyncPort {
        &self.sync
    }

    /// Whether the calling thread runs on this context's core
    pub fn on_own_core(&self) -> bool {
        rp_hw::current_core() == Some(self.core_num)
    }

    pub(crate) fn assert_own_core(&self, what: &str) {
        assert!(
            self.on_own_core(),
            "{} must be called on {}, the context's core",
            what,
            self.core_num
        );
    }

    // ---- registration; callers hold the context lock ------------------------

    pub fn add_pending_worker(&self, worker: &'static PendingWorker) -> bool {
        if let Err(owner) = worker.link().claim(self.id) {
            if owner != self.id {
                log::warn!("context {}: pending worker belongs to context {}", self.id, owner);
            }
            return false;
        }
        self.pending.lock().push_front(worker);
        true
    }

    pub fn remove_pending_worker(&self, worker: &'static PendingWorker) -> bool {
        if worker.link().owner() != self.id {
            return false;
        }
        let removed = self.pending.lock().remove(worker);
        if removed {
            worker.link().release();
        }
        removed
    }

    pub fn add_timed_worker(&self, worker: &'static TimedWorker, at: AbsoluteTime) -> bool {
        if let Err(owner) = worker.link().claim(self.id) {
            if owner != self.id {
                log::warn!("context {}: timed worker belongs to context {}", self.id, owner);
            }
            return false;
        }
        worker.set_next_time(at);
        self.timed.lock().push_front(worker);
        self.next_time.fetch_min(at.as_micros(), Ordering::AcqRel);
        true
    }

    pub fn remove_timed_worker(&self, worker: &'static TimedWorker) -> bool {
        if worker.link().owner() != self.id {
            return false;
        }
        let removed = self.timed.lock().remove(worker);
        if removed {
            worker.link().release();
            self.refresh_next_time();
        }
        removed
    }

    /// Mark `worker` pending; safe from any core and from interrupt handlers
    pub fn set_work_pending(&self, worker: &'static PendingWorker) {
        worker.mark_pending();
        self.work_needed.release();
    }

    /// Release every registered worker
    pub(crate) fn detach_all(&self) {
        self.pending.lock().drain(|worker| worker.link().release());
        self.timed.lock().drain(|worker| worker.link().release());
        self.next_time
            .store(AbsoluteTime::AT_THE_END_OF_TIME.as_micros(), Ordering::Release);
    }

    // ---- dispatch; callers hold the context lock on the context's core ------

    /// Whether some worker is marked pending or a sync call is waiting
    pub fn has_pending_work(&self) -> bool {
        if self.sync.is_requested() {
            return true;
        }
        self.pending
            .lock()
            .iter()
            .any(|worker| worker.link().owner() == self.id && worker.is_pending())
    }

    /// Whether a dispatch pass at `now` would have something to do
    pub fn needs_servicing(&self, now: AbsoluteTime) -> bool {
        self.has_pending_work() || self.next_time().is_reached(now)
    }

    /// Run one dispatch pass
    ///
    /// A waiting sync call runs first, then every pending worker whose flag
    /// was set when the pass began (the flag is cleared before the callback,
    /// so a worker marking itself again runs on the next pass), then every timed worker whose
    /// deadline has passed, earliest first, each detached just before its
    /// callback runs.
    pub fn execute_once(&self, context: &dyn AsyncContext) {
        log::trace!("context {}: dispatch pass", self.id);
        self.sync.service();

        // callbacks may relink the list, so the pass works from a snapshot
        let marked: Vec<&'static PendingWorker> = self
            .pending
            .lock()
            .iter()
            .filter(|worker| worker.is_pending())
            .collect();
        for worker in marked {
            if worker.link().owner() == self.id && worker.take_pending() {
                worker.run(context);
            }
        }

        while let Some(worker) = self.take_elapsed_timed_worker(self.platform.now()) {
            worker.run(context);
        }
        self.refresh_next_time();
    }

    fn take_elapsed_timed_worker(&self, now: AbsoluteTime) -> Option<&'static TimedWorker> {
        let mut timed = self.timed.lock();
        let worker = timed
            .iter()
            .filter(|worker| worker.next_time().is_reached(now))
            .min_by_key(|worker| worker.next_time())?;
        timed.remove(worker);
        worker.link().release();
        Some(worker)
    }

    fn refresh_next_time(&self) {
        let timed = self.timed.lock();
        let next = timed
            .iter()
            .map(|worker| worker.next_time())
            .min()
            .unwrap_or(AbsoluteTime::AT_THE_END_OF_TIME);
        self.next_time.store(next.as_micros(), Ordering::Release);
    }
}

/// A single logical thread of execution for non-reentrant code
///
/// Collaborators register workers and mark them pending; the context runs
/// their callbacks one at a time, always on its own core, under its lock.
/// Code outside the callbacks takes the lock to exclude them.
///
/// Only [`AsyncContext::set_work_pending`] may be called from interrupt
/// handlers; hand interrupt code a [`Notifier`] rather than the context.
pub trait AsyncContext: Sync {
    /// Shared state of the context
    fn base(&self) -> &ContextCore;

    /// Take the context lock; nests for the same owner
    fn acquire_lock_blocking(&self);

    /// Release the context lock
    ///
    /// The outermost release runs work deferred while the lock was held.
    fn release_lock(&self);

    /// Panic unless the caller holds the lock
    fn lock_check(&self);

    /// Run `func` on the context's core under its lock and return its result
    ///
    /// Must not be called while holding the lock.
    fn execute_sync(&self, func: SyncFn<'_>) -> u32;

    /// Mark `worker` as having work; callable from anywhere
    fn set_work_pending(&self, worker: &'static PendingWorker);

    /// Run a dispatch pass, for backends that need to be driven
    fn poll(&self) {}

    /// Sleep until `until`; never from inside a callback
    fn wait_until(&self, until: AbsoluteTime);

    /// Sleep until `until` or until there is work; never from inside a callback
    fn wait_for_work_until(&self, until: AbsoluteTime);

    /// Tear the context down; no callback runs after this returns
    fn deinit(&self);

    fn platform(&self) -> &'static Platform {
        self.base().platform()
    }

    fn core_num(&self) -> CoreId {
        self.base().core_num()
    }

    fn flags(&self) -> ContextFlags {
        self.base().flags()
    }

    fn is_deinitialized(&self) -> bool {
        self.base().is_deinitialized()
    }

    /// Register a pending worker; false if it is already registered
    fn add_pending_worker(&self, worker: &'static PendingWorker) -> bool {
        self.acquire_lock_blocking();
        let added = self.base().add_pending_worker(worker);
        self.release_lock();
        added
    }

    /// Unregister a pending worker; false if it was not registered here
    fn remove_pending_worker(&self, worker: &'static PendingWorker) -> bool {
        self.acquire_lock_blocking();
        let removed = self.base().remove_pending_worker(worker);
        self.release_lock();
        removed
    }

    /// Register a timed worker to fire at `at`; false if already registered
    fn add_timed_worker(&self, worker: &'static TimedWorker, at: AbsoluteTime) -> bool {
        self.acquire_lock_blocking();
        let added = self.base().add_timed_worker(worker, at);
        self.release_lock();
        added
    }

    /// Register a timed worker to fire `ms` milliseconds from now
    fn add_timed_worker_in_ms(&self, worker: &'static TimedWorker, ms: u32) -> bool {
        let at = self.platform().now().delayed_by_ms(ms);
        self.add_timed_worker(worker, at)
    }

    fn remove_timed_worker(&self, worker: &'static TimedWorker) -> bool {
        self.acquire_lock_blocking();
        let removed = self.base().remove_timed_worker(worker);
        self.release_lock();
        removed
    }

    fn wait_for_work_ms(&self, ms: u32) {
        let until = self.platform().now().delayed_by_ms(ms);
        self.wait_for_work_until(until);
    }
}

/// Convenience layer over [`AsyncContext::execute_sync`]
pub trait AsyncContextExt: AsyncContext {
    /// Run `f` on the context's core under its lock, returning any result
    fn execute_sync_with<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let mut f = Some(f);
        let mut result = None;
        self.execute_sync(&mut || {
            if let Some(f) = f.take() {
                result = Some(f());
            }
            0
        });
        match result {
            Some(result) => result,
            None => panic!("synchronous call did not run"),
        }
    }
}

impl<C: AsyncContext + ?Sized> AsyncContextExt for C {}

/// The part of a context that interrupt handlers may use
#[derive(Clone, Copy)]
pub struct Notifier {
    context: &'static dyn AsyncContext,
}

impl Notifier {
    pub fn new(context: &'static dyn AsyncContext) -> Self {
        Self { context }
    }

    /// Mark `worker` as having work
    pub fn set_work_pending(&self, worker: &'static PendingWorker) {
        self.context.set_work_pending(worker);
    }

    pub fn core_num(&self) -> CoreId {
        self.context.core_num()
    }
}

impl core::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Notifier")
            .field("context", &self.context.base().id())
            .finish()
    }
}
