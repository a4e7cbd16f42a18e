//! Task context: dispatch on a dedicated scheduler task.
//!
//! A thread bound to the context's core sleeps on a notification, waking
//! when work is marked pending, when the earliest timed worker comes due,
//! or when a lock holder releases the lock. The lock is a blocking
//! recursive mutex owned per thread, so any thread on either core may take
//! it.

use core::sync::atomic::{AtomicBool, Ordering};
use std::boxed::Box;
use std::sync::OnceLock;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use rp_core::{AbsoluteTime, CoreId};
use rp_hw::Platform;

use crate::context::{AsyncContext, ContextCore, ContextFlags};
use crate::error::ContextResult;
use crate::sync_call::SyncFn;
use crate::worker::PendingWorker;

/// Task context configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskConfig {
    /// Name of the task thread
    pub name: &'static str,
    /// Core the task runs on
    pub core: CoreId,
    /// Stack size of the task thread in bytes
    pub stack_size: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            name: "async_context_task",
            core: CoreId::Core0,
            stack_size: 64 * 1024,
        }
    }
}

impl TaskConfig {
    pub fn builder() -> TaskConfigBuilder {
        TaskConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct TaskConfigBuilder {
    config: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the core the task is bound to
    pub fn core(mut self, core: CoreId) -> Self {
        self.config.core = core;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes;
        self
    }

    pub fn build(self) -> TaskConfig {
        self.config
    }
}

/// Recursive mutex state; outer acquisitions are served in ticket order
#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: u32,
    next_ticket: u64,
    serving: u64,
}

pub struct TaskContext {
    core: ContextCore,
    lock: Mutex<LockState>,
    unlocked: Condvar,
    notified: Mutex<bool>,
    notify: Condvar,
    quit: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    task_id: OnceLock<ThreadId>,
}

impl TaskContext {
    /// Create a task context and start its task
    pub fn init(platform: &'static Platform, config: TaskConfig) -> ContextResult<&'static TaskContext> {
        let context: &'static TaskContext = Box::leak(Box::new(TaskContext {
            core: ContextCore::new(platform, config.core, ContextFlags::CALLBACK_FROM_NON_IRQ),
            lock: Mutex::new(LockState::default()),
            unlocked: Condvar::new(),
            notified: Mutex::new(false),
            notify: Condvar::new(),
            quit: AtomicBool::new(false),
            task: Mutex::new(None),
            task_id: OnceLock::new(),
        }));
        let builder = std::thread::Builder::new()
            .name(config.name.into())
            .stack_size(config.stack_size);
        let handle = platform.spawn_on_core_with(config.core, builder, move || context.task_main())?;
        // a second set can only come from a second init of the same context
        let _ = context.task_id.set(handle.thread().id());
        *context.task.lock() = Some(handle);
        log::debug!(
            "task context {} up on {} as {}",
            context.core.id(),
            config.core,
            config.name
        );
        Ok(context)
    }

    fn task_main(&self) {
        let platform = self.core.platform();
        while !self.quit.load(Ordering::Acquire) {
            if !self.core.needs_servicing(platform.now()) {
                self.wait_for_notification();
                continue;
            }
            // one pass per lock hold, so waiting lock takers get their turn
            self.enter();
            if !self.quit.load(Ordering::Acquire) {
                self.core.execute_once(self);
            }
            self.exit();
        }
        log::trace!("task context {}: task exits", self.core.id());
    }

    fn wait_for_notification(&self) {
        let timer = self.core.platform().timer();
        let mut notified = self.notified.lock();
        if !*notified && !self.quit.load(Ordering::Acquire) {
            match timer.instant_of(self.core.next_time()) {
                Some(deadline) => {
                    self.notify.wait_until(&mut notified, deadline);
                }
                None => self.notify.wait(&mut notified),
            }
        }
        *notified = false;
    }

    fn notify_task(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.notify.notify_one();
    }

    fn is_task_thread(&self) -> bool {
        self.task_id.get() == Some(&std::thread::current().id())
    }

    fn holds_lock(&self) -> bool {
        self.lock.lock().owner == Some(std::thread::current().id())
    }

    fn enter(&self) {
        let me = std::thread::current().id();
        let mut state = self.lock.lock();
        if state.owner == Some(me) {
            state.depth += 1;
            return;
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.owner.is_some() || state.serving != ticket {
            self.unlocked.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = 1;
    }

    /// Leave one level; returns whether the lock is now free
    fn exit(&self) -> bool {
        let me = std::thread::current().id();
        let mut state = self.lock.lock();
        assert!(state.owner == Some(me), "task context lock not held");
        state.depth -= 1;
        if state.depth > 0 {
            return false;
        }
        state.owner = None;
        state.serving += 1;
        drop(state);
        self.unlocked.notify_all();
        true
    }
}

impl AsyncContext for TaskContext {
    fn base(&self) -> &ContextCore {
        &self.core
    }

    fn acquire_lock_blocking(&self) {
        self.enter();
    }

    fn release_lock(&self) {
        if self.exit() && !self.is_task_thread() {
            // whatever was deferred while the lock was held runs on the task
            self.notify_task();
        }
    }

    fn lock_check(&self) {
        assert!(self.holds_lock(), "task context lock not held");
    }

    fn execute_sync(&self, func: SyncFn<'_>) -> u32 {
        assert!(
            !self.core.is_deinitialized(),
            "execute_sync on a deinitialized context"
        );
        assert!(
            !self.holds_lock(),
            "execute_sync called while holding the context lock"
        );
        self.core
            .sync_port()
            .call(self.core.platform(), func, || self.notify_task())
    }

    fn set_work_pending(&self, worker: &'static PendingWorker) {
        self.core.set_work_pending(worker);
        self.notify_task();
    }

    fn wait_until(&self, until: AbsoluteTime) {
        assert!(!self.holds_lock(), "wait_until called from inside a callback");
        self.core.platform().sleep_until(until);
    }

    fn wait_for_work_until(&self, until: AbsoluteTime) {
        assert!(
            !self.holds_lock(),
            "wait_for_work_until called from inside a callback"
        );
        let deadline = until.min(self.core.next_time());
        self.core.work_needed().acquire_block_until(deadline);
    }

    fn deinit(&self) {
        assert!(
            !self.is_task_thread(),
            "deinit called from the context's own task"
        );
        assert!(!self.holds_lock(), "deinit called while holding the context lock");
        if !self.core.mark_deinitialized() {
            return;
        }
        self.quit.store(true, Ordering::Release);
        self.notify_task();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::warn!("task context {}: task panicked", self.core.id());
            }
        }
        self.enter();
        self.core.detach_all();
        self.exit();
        log::debug!("task context {} down", self.core.id());
    }
}
