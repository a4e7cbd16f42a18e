//! Workers and the intrusive lists that link them into a context.
//!
//! Workers are owned by the code that registers them, usually as `static`
//! items, and must outlive their registration; a context never allocates
//! or frees one. Each worker carries its own link and the id of the context
//! it is registered with, so a worker can belong to at most one context at
//! a time.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use rp_core::AbsoluteTime;

use crate::context::AsyncContext;

/// Callback of a pending worker
pub type PendingWorkFn = dyn Fn(&dyn AsyncContext, &'static PendingWorker) + Send + Sync;

/// Callback of a timed worker
pub type TimedWorkFn = dyn Fn(&dyn AsyncContext, &'static TimedWorker) + Send + Sync;

const UNOWNED: usize = 0;

/// Link field and registration owner of a worker
pub(crate) struct Link<T: 'static> {
    owner: AtomicUsize,
    next: spin::Mutex<Option<&'static T>>,
}

impl<T: 'static> Link<T> {
    const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(UNOWNED),
            next: spin::Mutex::new(None),
        }
    }

    pub(crate) fn owner(&self) -> usize {
        self.owner.load(Ordering::Acquire)
    }

    /// Register with context `id`; fails with the current owner if taken
    pub(crate) fn claim(&self, id: usize) -> Result<(), usize> {
        self.owner
            .compare_exchange(UNOWNED, id, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    pub(crate) fn release(&self) {
        self.owner.store(UNOWNED, Ordering::Release);
    }

    pub(crate) fn next(&self) -> Option<&'static T> {
        *self.next.lock()
    }

    fn set_next(&self, next: Option<&'static T>) {
        *self.next.lock() = next;
    }
}

pub(crate) trait Linked: Sync + Sized + 'static {
    fn link(&self) -> &Link<Self>;
}

/// Singly linked list threaded through the workers' own link fields
///
/// A removed worker keeps its stale `next`, so a walk that is standing on
/// it can still continue along the list.
pub(crate) struct WorkerList<T: 'static> {
    head: Option<&'static T>,
}

impl<T: Linked> WorkerList<T> {
    pub(crate) const fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn push_front(&mut self, worker: &'static T) {
        worker.link().set_next(self.head);
        self.head = Some(worker);
    }

    pub(crate) fn remove(&mut self, worker: &T) -> bool {
        let mut prev: Option<&'static T> = None;
        let mut cursor = self.head;
        while let Some(current) = cursor {
            let next = current.link().next();
            if core::ptr::eq(current, worker) {
                match prev {
                    None => self.head = next,
                    Some(prev) => prev.link().set_next(next),
                }
                return true;
            }
            prev = Some(current);
            cursor = next;
        }
        false
    }

    pub(crate) fn iter(&self) -> Iter<T> {
        Iter { cursor: self.head }
    }

    /// Unlink everything, handing each worker to `f`
    pub(crate) fn drain(&mut self, mut f: impl FnMut(&'static T)) {
        let mut cursor = self.head.take();
        while let Some(current) = cursor {
            cursor = current.link().next();
            f(current);
        }
    }
}

pub(crate) struct Iter<T: 'static> {
    cursor: Option<&'static T>,
}

impl<T: Linked> Iterator for Iter<T> {
    type Item = &'static T;

    fn next(&mut self) -> Option<&'static T> {
        let current = self.cursor?;
        self.cursor = current.link().next();
        Some(current)
    }
}

/// A worker run whenever it has been marked as having work pending
pub struct PendingWorker {
    do_work: &'static PendingWorkFn,
    work_pending: AtomicBool,
    link: Link<PendingWorker>,
}

impl PendingWorker {
    pub const fn new(do_work: &'static PendingWorkFn) -> Self {
        Self {
            do_work,
            work_pending: AtomicBool::new(false),
            link: Link::new(),
        }
    }

    /// Whether the worker is marked and waiting for a dispatch pass
    pub fn is_pending(&self) -> bool {
        self.work_pending.load(Ordering::Acquire)
    }

    /// Whether the worker is registered with any context
    pub fn is_registered(&self) -> bool {
        self.link.owner() != UNOWNED
    }

    pub(crate) fn mark_pending(&self) {
        self.work_pending.store(true, Ordering::Release);
    }

    /// Clear the pending flag, returning whether it was set
    pub(crate) fn take_pending(&self) -> bool {
        self.work_pending.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn run(&'static self, context: &dyn AsyncContext) {
        (self.do_work)(context, self);
    }
}

impl Linked for PendingWorker {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

impl fmt::Debug for PendingWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWorker")
            .field("work_pending", &self.is_pending())
            .field("registered", &self.is_registered())
            .finish()
    }
}

/// A worker run once its deadline has passed
///
/// It is removed from its context just before the callback runs; to run
/// again the callback adds it back with a new deadline.
pub struct TimedWorker {
    do_work: &'static TimedWorkFn,
    next_time: AtomicU64,
    link: Link<TimedWorker>,
}

impl TimedWorker {
    pub const fn new(do_work: &'static TimedWorkFn) -> Self {
        Self {
            do_work,
            next_time: AtomicU64::new(AbsoluteTime::AT_THE_END_OF_TIME.as_micros()),
            link: Link::new(),
        }
    }

    /// Deadline of the current (or last) registration
    pub fn next_time(&self) -> AbsoluteTime {
        AbsoluteTime::from_micros(self.next_time.load(Ordering::Acquire))
    }

    pub fn is_registered(&self) -> bool {
        self.link.owner() != UNOWNED
    }

    pub(crate) fn set_next_time(&self, at: AbsoluteTime) {
        self.next_time.store(at.as_micros(), Ordering::Release);
    }

    pub(crate) fn run(&'static self, context: &dyn AsyncContext) {
        (self.do_work)(context, self);
    }
}

impl Linked for TimedWorker {
    fn link(&self) -> &Link<Self> {
        &self.link
    }
}

impl fmt::Debug for TimedWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedWorker")
            .field("next_time", &self.next_time())
            .field("registered", &self.is_registered())
            .finish()
    }
}
