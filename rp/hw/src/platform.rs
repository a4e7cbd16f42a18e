//! The chip: two cores, their interrupt controllers, the spin lock bank,
//! the timer and the event line.

use core::time::Duration;
use std::boxed::Box;
use std::sync::Arc;
use std::thread::JoinHandle;

use rp_core::{AbsoluteTime, CoreId};

use crate::cpu::{self, CoreBinding, EventLine, InterruptState};
use crate::error::HwResult;
use crate::irq::{Irq, Nvic};
use crate::spinlock::{SpinLock, SpinLockBank};
use crate::timer::{AlarmId, Timer};

/// Platform configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Name used for threads and log lines
    pub name: &'static str,
    /// Longest single wait for an event before re-checking
    pub event_wait_slice: Duration,
    /// Spin locks claimed up front, beyond those reserved by the SDK
    pub reserved_spin_locks: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: "rp2040",
            event_wait_slice: Duration::from_millis(1),
            reserved_spin_locks: 0,
        }
    }
}

impl PlatformConfig {
    pub fn builder() -> PlatformConfigBuilder {
        PlatformConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct PlatformConfigBuilder {
    config: PlatformConfig,
}

impl PlatformConfigBuilder {
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the longest single event wait
    pub fn event_wait_slice(mut self, slice: Duration) -> Self {
        self.config.event_wait_slice = slice;
        self
    }

    /// Claims the spin locks in `mask` when the platform comes up
    pub fn reserved_spin_locks(mut self, mask: u32) -> Self {
        self.config.reserved_spin_locks = mask;
        self
    }

    pub fn build(self) -> PlatformConfig {
        self.config
    }
}

pub struct Platform {
    config: PlatformConfig,
    events: Arc<EventLine>,
    cores: [Nvic; rp_core::NUM_CORES],
    spin_locks: SpinLockBank,
    timer: Timer,
}

impl Platform {
    /// Bring up a platform that lives for the rest of the program
    pub fn new(config: PlatformConfig) -> &'static Platform {
        assert!(
            !config.event_wait_slice.is_zero(),
            "event wait slice must be positive"
        );
        let events = Arc::new(EventLine::new());
        let platform = Platform {
            cores: CoreId::ALL.map(|core| Nvic::new(core, events.clone())),
            events,
            spin_locks: SpinLockBank::new(),
            timer: Timer::new(),
            config,
        };
        if platform.config.reserved_spin_locks != 0 {
            platform
                .spin_locks
                .claim_mask(platform.config.reserved_spin_locks);
        }
        log::debug!("{}: platform up", platform.config.name);
        Box::leak(Box::new(platform))
    }

    pub fn with_defaults() -> &'static Platform {
        Self::new(PlatformConfig::default())
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    // ---- cores -------------------------------------------------------------

    /// Bind the calling thread to `core`
    pub fn bind_core(&self, core: CoreId) -> CoreBinding {
        cpu::bind_core(core)
    }

    /// Run `f` on a new thread bound to `core`
    pub fn spawn_on_core<F, T>(&'static self, core: CoreId, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = std::format!("{}-{}", self.config.name, core);
        match self.spawn_on_core_with(core, std::thread::Builder::new().name(name), f) {
            Ok(handle) => handle,
            Err(err) => panic!("failed to start thread for {}: {}", core, err),
        }
    }

    /// Run `f` on a thread built by `builder`, bound to `core`
    pub fn spawn_on_core_with<F, T>(
        &'static self,
        core: CoreId,
        builder: std::thread::Builder,
        f: F,
    ) -> std::io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        builder.spawn(move || {
            let _binding = cpu::bind_core(core);
            f()
        })
    }

    /// The core the caller runs on; panics on an unbound thread
    pub fn core_num(&self) -> CoreId {
        cpu::core_num()
    }

    /// The core the caller runs on, or an error on an unbound thread
    pub fn try_core_num(&self) -> HwResult<CoreId> {
        cpu::try_core_num()
    }

    /// Interrupt controller of the calling core
    pub fn irq(&self) -> &Nvic {
        self.nvic(cpu::core_num())
    }

    /// Interrupt controller of `core`
    pub fn nvic(&self, core: CoreId) -> &Nvic {
        &self.cores[core.index()]
    }

    pub fn save_and_disable_interrupts(&self) -> InterruptState {
        self.irq().save_and_disable_interrupts()
    }

    pub fn restore_interrupts(&self, state: InterruptState) {
        self.irq().restore_interrupts(state);
    }

    /// Take any interrupts pending on the calling core
    pub fn service_interrupts(&self) {
        if let Some(core) = cpu::current_core() {
            self.nvic(core).service_pending();
        }
    }

    // ---- spin locks --------------------------------------------------------

    pub fn spin_locks(&self) -> &SpinLockBank {
        &self.spin_locks
    }

    /// Handle on lock `num`; panics if `num` is out of range
    pub fn spin_lock(&self, num: u8) -> SpinLock<'_> {
        match SpinLock::new(self, num) {
            Ok(lock) => lock,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_spin_lock(&self, num: u8) -> HwResult<SpinLock<'_>> {
        SpinLock::new(self, num)
    }

    /// Release lock `num` and return a handle on it
    pub fn spin_lock_init(&self, num: u8) -> SpinLock<'_> {
        let lock = self.spin_lock(num);
        lock.release_unsafe();
        lock
    }

    /// Release every spin lock
    pub fn spin_locks_reset(&self) {
        self.spin_locks.reset();
    }

    /// Claim an unused lock and return it released
    pub fn claim_spin_lock(&self) -> HwResult<SpinLock<'_>> {
        let num = self.spin_locks.claim_unused()?;
        Ok(self.spin_lock_init(num))
    }

    /// A lock from the striped range
    pub fn striped_spin_lock(&self) -> SpinLock<'_> {
        self.spin_lock(self.spin_locks.next_striped_num())
    }

    // ---- time and events ---------------------------------------------------

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn now(&self) -> AbsoluteTime {
        self.timer.now()
    }

    /// Pend `irq` on `core` once `at` is reached
    pub fn add_alarm(&'static self, at: AbsoluteTime, core: CoreId, irq: Irq) -> AlarmId {
        let (id, start) = self.timer.schedule(at, core, irq);
        if start {
            let name = std::format!("{}-timer", self.config.name);
            let spawned = std::thread::Builder::new()
                .name(name)
                .spawn(move || self.timer.serve(self));
            if let Err(err) = spawned {
                panic!("failed to start timer thread: {}", err);
            }
            log::debug!("{}: timer thread started", self.config.name);
        }
        id
    }

    pub fn cancel_alarm(&self, id: AlarmId) -> bool {
        self.timer.cancel(id)
    }

    /// Send an event to both cores
    pub fn sev(&self) {
        self.events.sev();
    }

    /// Count of events sent so far, sampled before checking a wake condition
    pub fn event_generation(&self) -> u64 {
        self.events.generation()
    }

    /// Wait for an event newer than `seen`, but not past `until`
    ///
    /// Pending interrupts of the calling core are taken before and after the
    /// wait. A single wait never lasts longer than the configured slice, so
    /// callers must re-check their condition in a loop.
    pub fn wait_for_event_since(&self, seen: u64, until: AbsoluteTime) -> bool {
        self.service_interrupts();
        let now = self.now();
        let remaining = if until.is_reached(now) {
            Duration::ZERO
        } else {
            Duration::from_micros(now.diff_us(until).unsigned_abs())
        };
        let woke = self
            .events
            .wait_since(seen, remaining.min(self.config.event_wait_slice));
        self.service_interrupts();
        woke
    }

    /// Wait for the next event, for at most one slice
    pub fn wfe(&self) {
        let seen = self.event_generation();
        self.wait_for_event_since(seen, AbsoluteTime::AT_THE_END_OF_TIME);
    }

    /// Sleep until `until`, taking interrupts meanwhile
    pub fn sleep_until(&self, until: AbsoluteTime) {
        loop {
            let seen = self.event_generation();
            if until.is_reached(self.now()) {
                return;
            }
            self.wait_for_event_since(seen, until);
        }
    }

    pub fn sleep_ms(&self, ms: u32) {
        self.sleep_until(self.now().delayed_by_ms(ms));
    }
}
