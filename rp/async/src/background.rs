//! Background context driven by a low-priority interrupt.
//!
//! Dispatch runs in the handler of a software interrupt line on the
//! context's core, at the lowest hardware priority so real interrupts are
//! never held up by it. Marking work pending or a timed worker coming due
//! pends that line; other code on the same core and code on the other core
//! serialize against dispatch through the context lock, a recursive mutex
//! built on a claimed hardware spin lock.
//!
//! While thread-mode code on the context's core holds the lock, the
//! context's line is disabled so the handler cannot interrupt its own
//! lock holder; the outermost release runs anything that came in meanwhile.
//! The context's core has to reach an interrupt take point (waiting,
//! sleeping, re-enabling interrupts) for background work to run.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::boxed::Box;

use rp_core::{AbsoluteTime, CoreId};
use rp_hw::irq::LOWEST_IRQ_PRIORITY;
use rp_hw::timer::AlarmId;
use rp_hw::{InterruptHandler, Irq, Platform};

use crate::context::{AsyncContext, ContextCore, ContextFlags};
use crate::error::ContextResult;
use crate::sync_call::SyncFn;
use crate::worker::PendingWorker;

/// Background context configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundConfig {
    /// Line to dispatch from; a free user line is claimed when `None`
    pub low_priority_irq: Option<Irq>,
    /// Hardware priority of that line
    pub irq_priority: u8,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            low_priority_irq: None,
            irq_priority: LOWEST_IRQ_PRIORITY,
        }
    }
}

impl BackgroundConfig {
    pub fn builder() -> BackgroundConfigBuilder {
        BackgroundConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct BackgroundConfigBuilder {
    config: BackgroundConfig,
}

impl BackgroundConfigBuilder {
    /// Dispatch from `irq` instead of a claimed user line
    pub fn low_priority_irq(mut self, irq: Irq) -> Self {
        self.config.low_priority_irq = Some(irq);
        self
    }

    pub fn irq_priority(mut self, priority: u8) -> Self {
        self.config.irq_priority = priority;
        self
    }

    pub fn build(self) -> BackgroundConfig {
        self.config
    }
}

const NO_OWNER: u8 = u8::MAX;

/// Recursive mutex owned per core, on top of one hardware spin lock
///
/// The spin lock only guards the owner and depth bookkeeping, so it is held
/// for a few instructions with interrupts off. Waiters sleep on the event
/// line, which an exit signals, and announce themselves in `waiters` so the
/// dispatch handler can step aside for them.
struct RecursiveSpinMutex {
    spin_lock_num: u8,
    owner: AtomicU8,
    depth: AtomicU32,
    waiters: AtomicU8,
}

impl RecursiveSpinMutex {
    fn new(spin_lock_num: u8) -> Self {
        Self {
            spin_lock_num,
            owner: AtomicU8::new(NO_OWNER),
            depth: AtomicU32::new(0),
            waiters: AtomicU8::new(0),
        }
    }

    fn try_enter(&self, platform: &Platform, core: CoreId) -> bool {
        let lock = platform.spin_lock(self.spin_lock_num);
        let state = lock.acquire();
        let owner = self.owner.load(Ordering::Relaxed);
        let entered = if owner == NO_OWNER {
            self.owner.store(core.num(), Ordering::Relaxed);
            self.depth.store(1, Ordering::Relaxed);
            true
        } else if owner == core.num() {
            self.depth.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        };
        lock.release(state);
        entered
    }

    fn enter_blocking(&self, platform: &Platform, core: CoreId) {
        let bit = 1 << core.num();
        loop {
            let seen = platform.event_generation();
            if self.try_enter(platform, core) {
                self.waiters.fetch_and(!bit, Ordering::AcqRel);
                return;
            }
            self.waiters.fetch_or(bit, Ordering::AcqRel);
            platform.wait_for_event_since(seen, AbsoluteTime::AT_THE_END_OF_TIME);
        }
    }

    /// Whether a thread on `core` is blocked waiting for the mutex
    fn has_waiter_on(&self, core: CoreId) -> bool {
        self.waiters.load(Ordering::Acquire) & (1 << core.num()) != 0
    }

    /// Leave one level; returns whether the mutex is now free
    fn exit(&self, platform: &Platform) -> bool {
        let lock = platform.spin_lock(self.spin_lock_num);
        let state = lock.acquire();
        let depth = self.depth.load(Ordering::Relaxed);
        if depth == 0 {
            lock.release(state);
            panic!("background context lock released while not held");
        }
        self.depth.store(depth - 1, Ordering::Relaxed);
        if depth == 1 {
            self.owner.store(NO_OWNER, Ordering::Relaxed);
        }
        lock.release(state);
        if depth == 1 {
            platform.sev();
        }
        depth == 1
    }

    fn is_owned_by(&self, core: CoreId) -> bool {
        self.owner.load(Ordering::Acquire) == core.num()
    }

    fn depth(&self) -> u32 {
        self.depth.load(Ordering::Acquire)
    }
}

pub struct BackgroundContext {
    core: ContextCore,
    irq: Irq,
    irq_claimed: bool,
    lock: RecursiveSpinMutex,
    irq_was_enabled: AtomicBool,
    alarm: spin::Mutex<Option<AlarmId>>,
}

impl BackgroundContext {
    /// Create a background context on the calling core
    ///
    /// Claims the dispatch line (unless one is configured) and a spin lock,
    /// and installs the context as the line's exclusive handler.
    pub fn init(
        platform: &'static Platform,
        config: BackgroundConfig,
    ) -> ContextResult<&'static BackgroundContext> {
        let core_num = platform.try_core_num()?;
        let nvic = platform.nvic(core_num);
        let (irq, irq_claimed) = match config.low_priority_irq {
            Some(irq) if irq.is_user() => {
                nvic.claim_user_irq(irq)?;
                (irq, true)
            }
            Some(irq) => (irq, false),
            None => (nvic.claim_unused_user_irq()?, true),
        };
        let spin_lock_num = platform.spin_locks().claim_unused_required();
        platform.spin_lock_init(spin_lock_num);

        let context: &'static BackgroundContext = Box::leak(Box::new(BackgroundContext {
            core: ContextCore::new(platform, core_num, ContextFlags::CALLBACK_FROM_IRQ),
            irq,
            irq_claimed,
            lock: RecursiveSpinMutex::new(spin_lock_num),
            irq_was_enabled: AtomicBool::new(false),
            alarm: spin::Mutex::new(None),
        }));
        nvic.set_exclusive_handler(irq, context);
        nvic.set_priority(irq, config.irq_priority);
        nvic.set_enabled(irq, true);
        log::debug!(
            "background context {} up on {} ({}, spin lock {})",
            context.core.id(),
            core_num,
            irq,
            spin_lock_num
        );
        Ok(context)
    }

    /// The line dispatch runs from
    pub fn irq(&self) -> Irq {
        self.irq
    }

    /// Get the owning core to run a dispatch pass
    fn wake(&self) {
        if self.core.is_deinitialized() {
            return;
        }
        let platform = self.core.platform();
        platform.nvic(self.core.core_num()).set_pending(self.irq);
    }

    /// Dispatch while timed work is due, then arm the alarm for the next timed worker
    fn process_under_lock(&self) {
        if self.core.is_deinitialized() {
            return;
        }
        let platform = self.core.platform();
        // re-marked pending work re-pends the line itself
        loop {
            self.core.execute_once(self);
            if !self.core.next_time().is_reached(platform.now()) {
                break;
            }
        }
        let next_time = self.core.next_time();
        let mut alarm = self.alarm.lock();
        if let Some(id) = alarm.take() {
            platform.cancel_alarm(id);
        }
        if !next_time.is_at_the_end_of_time() {
            *alarm = Some(platform.add_alarm(next_time, self.core.core_num(), self.irq));
        }
    }

    fn current_core(&self) -> CoreId {
        self.core.platform().core_num()
    }
}

impl InterruptHandler for BackgroundContext {
    fn on_interrupt(&self, _irq: Irq) {
        if self.core.is_deinitialized() {
            return;
        }
        let platform = self.core.platform();
        let core = self.core.core_num();
        // a waiting other core goes first; its release pends the line again
        if self.lock.has_waiter_on(core.other()) {
            return;
        }
        // the holder (this core in thread mode, or the other core) dispatches on release
        if !self.lock.try_enter(platform, core) {
            return;
        }
        if self.lock.depth() == 1 {
            self.process_under_lock();
        }
        self.lock.exit(platform);
    }
}

impl AsyncContext for BackgroundContext {
    fn base(&self) -> &ContextCore {
        &self.core
    }

    fn acquire_lock_blocking(&self) {
        let platform = self.core.platform();
        let core = platform.core_num();
        self.lock.enter_blocking(platform, core);
        if core == self.core.core_num() && self.lock.depth() == 1 {
            let nvic = platform.irq();
            self.irq_was_enabled
                .store(nvic.is_enabled(self.irq), Ordering::Release);
            nvic.set_enabled(self.irq, false);
        }
    }

    fn release_lock(&self) {
        let platform = self.core.platform();
        let core = platform.core_num();
        self.lock_check();
        let own_core = core == self.core.core_num();
        if own_core && self.lock.depth() == 1 {
            self.process_under_lock();
            self.lock.exit(platform);
            if self.irq_was_enabled.load(Ordering::Acquire) {
                platform.irq().set_enabled(self.irq, true);
            }
        } else {
            let released = self.lock.exit(platform);
            if released && !own_core {
                self.wake();
            }
        }
    }

    fn lock_check(&self) {
        let core = self.current_core();
        assert!(
            self.lock.is_owned_by(core),
            "background context lock not held by {}",
            core
        );
    }

    fn execute_sync(&self, func: SyncFn<'_>) -> u32 {
        assert!(
            !self.core.is_deinitialized(),
            "execute_sync on a deinitialized context"
        );
        let platform = self.core.platform();
        let core = platform.core_num();
        assert!(
            !self.lock.is_owned_by(core),
            "execute_sync called while holding the context lock"
        );
        if core == self.core.core_num() {
            self.acquire_lock_blocking();
            let result = func();
            self.release_lock();
            result
        } else {
            self.core.sync_port().call(platform, func, || self.wake())
        }
    }

    fn set_work_pending(&self, worker: &'static PendingWorker) {
        self.core.set_work_pending(worker);
        self.wake();
    }

    fn wait_until(&self, until: AbsoluteTime) {
        let core = self.current_core();
        assert!(!self.lock.is_owned_by(core), "wait_until called from inside a callback");
        self.core.platform().sleep_until(until);
    }

    fn wait_for_work_until(&self, until: AbsoluteTime) {
        let core = self.current_core();
        assert!(
            !self.lock.is_owned_by(core),
            "wait_for_work_until called from inside a callback"
        );
        let deadline = until.min(self.core.next_time());
        self.core.work_needed().acquire_block_until(deadline);
    }

    fn deinit(&self) {
        self.core.assert_own_core("deinit");
        let platform = self.core.platform();
        assert!(
            !self.lock.is_owned_by(self.core.core_num()),
            "deinit called from inside a callback"
        );
        // holding the lock with the line disabled: no callback is running on either core
        self.acquire_lock_blocking();
        let first = self.core.mark_deinitialized();
        if first {
            let nvic = platform.irq();
            nvic.set_enabled(self.irq, false);
            nvic.clear_pending(self.irq);
            nvic.remove_handler(self.irq, self);
            if self.irq_claimed {
                if let Err(err) = nvic.unclaim_user_irq(self.irq) {
                    log::warn!("background context {}: {}", self.core.id(), err);
                }
            }
            if let Some(id) = self.alarm.lock().take() {
                platform.cancel_alarm(id);
            }
            self.core.detach_all();
            self.irq_was_enabled.store(false, Ordering::Release);
        }
        self.lock.exit(platform);
        if first {
            platform.spin_locks().unclaim(self.lock.spin_lock_num);
            log::debug!("background context {} down", self.core.id());
        }
    }
}
