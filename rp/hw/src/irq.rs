//! Per-core interrupt controllers.
//!
//! Each core has its own [`Nvic`]: enable and pending bits, a priority per
//! line and a handler table. A line holds either one exclusive handler or up
//! to [`MAX_SHARED_IRQ_HANDLERS`] shared handlers, which run in descending
//! order priority. The table may only be changed from the owning core.
//!
//! Handlers are identified by address, so two installs of the same
//! `&'static` handler refer to the same handler. Zero-sized handler types
//! have no stable address and are rejected.
//!
//! On the host model an interrupt is taken on the owning core's thread when
//! that thread pends it, enables it, re-enables interrupts, or waits for an
//! event. A pending line preempts the running code only when it is strictly
//! more urgent (numerically lower priority) than what is running.

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use rp_core::CoreId;

use crate::claim::ClaimRegistry;
use crate::cpu::{current_core, EventLine, InterruptState};
use crate::error::{HwError, HwResult};

/// Number of interrupt lines per core
pub const NUM_IRQS: u8 = 32;
/// First line not wired to a peripheral
pub const FIRST_USER_IRQ: u8 = NUM_IRQS - NUM_USER_IRQS;
/// Lines free for software use
pub const NUM_USER_IRQS: u8 = 6;

/// Priority lines get when nothing else is configured
pub const DEFAULT_IRQ_PRIORITY: u8 = 0x80;
/// Most urgent priority
pub const HIGHEST_IRQ_PRIORITY: u8 = 0x00;
/// Least urgent priority
pub const LOWEST_IRQ_PRIORITY: u8 = 0xff;

/// Shared handlers with a higher order priority run first
pub const SHARED_IRQ_HANDLER_DEFAULT_ORDER_PRIORITY: u8 = 0x80;
pub const SHARED_IRQ_HANDLER_HIGHEST_ORDER_PRIORITY: u8 = 0xff;
pub const SHARED_IRQ_HANDLER_LOWEST_ORDER_PRIORITY: u8 = 0x00;

/// Shared handlers a single line can hold
pub const MAX_SHARED_IRQ_HANDLERS: usize = 4;

/// Running priority of thread mode, below every interrupt
const THREAD_PRIORITY: u16 = 0x100;
const NO_IRQ: u8 = u8::MAX;
const NO_HANDLER: usize = 0;

/// An interrupt line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Irq(u8);

impl Irq {
    pub const TIMER_IRQ_0: Irq = Irq(0);
    pub const TIMER_IRQ_1: Irq = Irq(1);
    pub const TIMER_IRQ_2: Irq = Irq(2);
    pub const TIMER_IRQ_3: Irq = Irq(3);
    pub const PWM_IRQ_WRAP: Irq = Irq(4);
    pub const USBCTRL_IRQ: Irq = Irq(5);
    pub const XIP_IRQ: Irq = Irq(6);
    pub const PIO0_IRQ_0: Irq = Irq(7);
    pub const PIO0_IRQ_1: Irq = Irq(8);
    pub const PIO1_IRQ_0: Irq = Irq(9);
    pub const PIO1_IRQ_1: Irq = Irq(10);
    pub const DMA_IRQ_0: Irq = Irq(11);
    pub const DMA_IRQ_1: Irq = Irq(12);
    pub const IO_IRQ_BANK0: Irq = Irq(13);
    pub const IO_IRQ_QSPI: Irq = Irq(14);
    pub const SIO_IRQ_PROC0: Irq = Irq(15);
    pub const SIO_IRQ_PROC1: Irq = Irq(16);
    pub const CLOCKS_IRQ: Irq = Irq(17);
    pub const SPI0_IRQ: Irq = Irq(18);
    pub const SPI1_IRQ: Irq = Irq(19);
    pub const UART0_IRQ: Irq = Irq(20);
    pub const UART1_IRQ: Irq = Irq(21);
    pub const ADC_IRQ_FIFO: Irq = Irq(22);
    pub const I2C0_IRQ: Irq = Irq(23);
    pub const I2C1_IRQ: Irq = Irq(24);
    pub const RTC_IRQ: Irq = Irq(25);

    pub const fn new(num: u8) -> HwResult<Self> {
        if num < NUM_IRQS {
            Ok(Irq(num))
        } else {
            Err(HwError::InvalidIrq(num))
        }
    }

    /// The `n`th user line
    pub const fn user(n: u8) -> HwResult<Self> {
        if n < NUM_USER_IRQS {
            Ok(Irq(FIRST_USER_IRQ + n))
        } else {
            Err(HwError::InvalidUserIrqIndex(n))
        }
    }

    pub const fn num(self) -> u8 {
        self.0
    }

    pub const fn is_user(self) -> bool {
        self.0 >= FIRST_USER_IRQ
    }

    const fn bit(self) -> u32 {
        1 << self.0
    }

    const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Irq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "irq{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Irq {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "irq{}", self.0);
    }
}

/// Something that can run when an interrupt is taken
pub trait InterruptHandler: Sync {
    fn on_interrupt(&self, irq: Irq);
}

/// A plain function used as an interrupt handler
pub struct IsrFn(pub fn(Irq));

impl InterruptHandler for IsrFn {
    fn on_interrupt(&self, irq: Irq) {
        (self.0)(irq)
    }
}

pub type HandlerRef = &'static dyn InterruptHandler;

fn handler_id(handler: &dyn InterruptHandler) -> usize {
    handler as *const dyn InterruptHandler as *const () as usize
}

fn checked_handler_id(handler: &dyn InterruptHandler) -> usize {
    assert!(
        core::mem::size_of_val(handler) != 0,
        "zero-sized interrupt handlers have no identity"
    );
    handler_id(handler)
}

#[derive(Clone, Copy)]
struct SharedEntry {
    handler: HandlerRef,
    order: u8,
}

#[derive(Clone)]
enum Slot {
    Empty,
    Exclusive(HandlerRef),
    Shared(heapless::Vec<SharedEntry, MAX_SHARED_IRQ_HANDLERS>),
}

/// Interrupt controller of one core
pub struct Nvic {
    core: CoreId,
    enabled: AtomicU32,
    pending: AtomicU32,
    priorities: [AtomicU8; NUM_IRQS as usize],
    handlers: spin::Mutex<[Slot; NUM_IRQS as usize]>,
    user_irqs: ClaimRegistry,
    primask: AtomicBool,
    running_priority: AtomicU16,
    active_irq: AtomicU8,
    active_handler: AtomicUsize,
    events: Arc<EventLine>,
}

impl Nvic {
    pub(crate) fn new(core: CoreId, events: Arc<EventLine>) -> Self {
        Self {
            core,
            enabled: AtomicU32::new(0),
            pending: AtomicU32::new(0),
            priorities: core::array::from_fn(|_| AtomicU8::new(DEFAULT_IRQ_PRIORITY)),
            handlers: spin::Mutex::new(core::array::from_fn(|_| Slot::Empty)),
            user_irqs: ClaimRegistry::new("user irq", NUM_USER_IRQS),
            primask: AtomicBool::new(false),
            running_priority: AtomicU16::new(THREAD_PRIORITY),
            active_irq: AtomicU8::new(NO_IRQ),
            active_handler: AtomicUsize::new(NO_HANDLER),
            events,
        }
    }

    /// The core this controller belongs to
    pub fn core(&self) -> CoreId {
        self.core
    }

    fn is_local(&self) -> bool {
        current_core() == Some(self.core)
    }

    fn assert_local(&self, what: &str) {
        assert!(
            self.is_local(),
            "{} of {} attempted from another core",
            what,
            self.core
        );
    }

    // ---- enable / pending / priority ---------------------------------------

    pub fn set_enabled(&self, irq: Irq, enabled: bool) {
        self.set_mask_enabled(irq.bit(), enabled);
    }

    /// Enable or disable every line in `mask`
    pub fn set_mask_enabled(&self, mask: u32, enabled: bool) {
        if enabled {
            // a line pended while disabled stays pending and fires now
            self.enabled.fetch_or(mask, Ordering::AcqRel);
            self.service_pending();
        } else {
            self.enabled.fetch_and(!mask, Ordering::AcqRel);
        }
    }

    pub fn is_enabled(&self, irq: Irq) -> bool {
        self.enabled.load(Ordering::Acquire) & irq.bit() != 0
    }

    /// Force `irq` pending
    ///
    /// From the owning core an enabled line of sufficient priority is taken
    /// before this returns; from anywhere else the core is woken.
    pub fn set_pending(&self, irq: Irq) {
        self.pending.fetch_or(irq.bit(), Ordering::AcqRel);
        if self.is_local() {
            self.service_pending();
        } else {
            self.events.sev();
        }
    }

    /// Clear a pending line without running it
    pub fn clear_pending(&self, irq: Irq) {
        self.pending.fetch_and(!irq.bit(), Ordering::AcqRel);
    }

    pub fn is_pending(&self, irq: Irq) -> bool {
        self.pending.load(Ordering::Acquire) & irq.bit() != 0
    }

    pub fn set_priority(&self, irq: Irq, priority: u8) {
        self.priorities[irq.index()].store(priority, Ordering::Release);
    }

    pub fn priority(&self, irq: Irq) -> u8 {
        self.priorities[irq.index()].load(Ordering::Acquire)
    }

    // ---- handler tables ----------------------------------------------------

    /// Install the only handler of `irq`
    ///
    /// Installing the handler already present is allowed; any other handler
    /// already on the line is a fatal error.
    pub fn set_exclusive_handler(&self, irq: Irq, handler: HandlerRef) {
        self.assert_local("exclusive handler install");
        let id = checked_handler_id(handler);
        let mut handlers = self.handlers.lock();
        match &handlers[irq.index()] {
            Slot::Empty => {}
            Slot::Exclusive(current) if handler_id(*current) == id => return,
            _ => panic!("{} on {} already has a handler", irq, self.core),
        }
        handlers[irq.index()] = Slot::Exclusive(handler);
        log::debug!("{}: exclusive handler installed on {}", self.core, irq);
    }

    /// The exclusive handler of `irq`, if it has one
    pub fn exclusive_handler(&self, irq: Irq) -> Option<HandlerRef> {
        match &self.handlers.lock()[irq.index()] {
            Slot::Exclusive(handler) => Some(*handler),
            _ => None,
        }
    }

    /// Add a shared handler to `irq`
    ///
    /// Handlers with a higher `order_priority` run first; one added with an
    /// order priority equal to existing handlers runs after them.
    pub fn add_shared_handler(&self, irq: Irq, handler: HandlerRef, order_priority: u8) {
        self.assert_local("shared handler install");
        let id = checked_handler_id(handler);
        let mut handlers = self.handlers.lock();
        let slot = &mut handlers[irq.index()];
        if let Slot::Empty = slot {
            *slot = Slot::Shared(heapless::Vec::new());
        }
        let Slot::Shared(list) = slot else {
            panic!("{} on {} already has an exclusive handler", irq, self.core);
        };
        assert!(
            list.iter().all(|entry| handler_id(entry.handler) != id),
            "handler already installed on {} on {}",
            irq,
            self.core
        );
        let pos = list
            .iter()
            .position(|entry| entry.order < order_priority)
            .unwrap_or(list.len());
        let entry = SharedEntry {
            handler,
            order: order_priority,
        };
        if list.insert(pos, entry).is_err() {
            panic!("shared handler table of {} on {} is full", irq, self.core);
        }
        log::debug!(
            "{}: shared handler added on {} at position {} (order {:#04x})",
            self.core,
            irq,
            pos,
            order_priority
        );
    }

    /// Remove an exclusive or shared handler from `irq`
    ///
    /// From interrupt context only the handler currently running on `irq`
    /// may remove itself. Removing a handler that is not installed is fatal.
    pub fn remove_handler(&self, irq: Irq, handler: &dyn InterruptHandler) {
        self.assert_local("handler removal");
        let id = handler_id(handler);
        if self.in_interrupt() {
            assert!(
                self.active_irq.load(Ordering::Acquire) == irq.num()
                    && self.active_handler.load(Ordering::Acquire) == id,
                "handler of {} on {} may only be removed from thread mode or by itself",
                irq,
                self.core
            );
        }
        let mut handlers = self.handlers.lock();
        let slot = &mut handlers[irq.index()];
        let emptied = match slot {
            Slot::Exclusive(current) if handler_id(*current) == id => true,
            Slot::Shared(list) => {
                let Some(pos) = list.iter().position(|entry| handler_id(entry.handler) == id)
                else {
                    panic!("handler not installed on {} on {}", irq, self.core);
                };
                list.remove(pos);
                list.is_empty()
            }
            _ => panic!("handler not installed on {} on {}", irq, self.core),
        };
        if emptied {
            *slot = Slot::Empty;
        }
        drop(handlers);
        log::debug!("{}: handler removed from {}", self.core, irq);
    }

    /// Whether any handler is installed on `irq`
    pub fn has_handler(&self, irq: Irq) -> bool {
        !matches!(self.handlers.lock()[irq.index()], Slot::Empty)
    }

    /// Whether `irq` is in shared mode
    pub fn has_shared_handler(&self, irq: Irq) -> bool {
        matches!(self.handlers.lock()[irq.index()], Slot::Shared(_))
    }

    // ---- user interrupts ---------------------------------------------------

    /// Claim user line `irq`; panics if it is already claimed
    pub fn claim_user_irq(&self, irq: Irq) -> HwResult<()> {
        self.user_irqs.claim(user_index(irq)?);
        Ok(())
    }

    pub fn unclaim_user_irq(&self, irq: Irq) -> HwResult<()> {
        self.user_irqs.unclaim(user_index(irq)?);
        Ok(())
    }

    pub fn is_user_irq_claimed(&self, irq: Irq) -> HwResult<bool> {
        Ok(self.user_irqs.is_claimed(user_index(irq)?))
    }

    /// Claim the lowest free user line
    pub fn claim_unused_user_irq(&self) -> HwResult<Irq> {
        self.user_irqs
            .claim_unused_in(0..=NUM_USER_IRQS - 1)
            .map(|n| Irq(FIRST_USER_IRQ + n))
            .ok_or(HwError::NoFreeUserIrq(self.core))
    }

    /// Claim the lowest free user line; running out is fatal
    pub fn claim_unused_user_irq_required(&self) -> Irq {
        match self.claim_unused_user_irq() {
            Ok(irq) => irq,
            Err(err) => panic!("{}", err),
        }
    }

    // ---- masking and servicing ---------------------------------------------

    /// Disable interrupts on this core, returning the previous state
    pub fn save_and_disable_interrupts(&self) -> InterruptState {
        InterruptState {
            enabled: !self.primask.swap(true, Ordering::AcqRel),
        }
    }

    /// Restore a state saved by [`Nvic::save_and_disable_interrupts`]
    pub fn restore_interrupts(&self, state: InterruptState) {
        self.primask.store(!state.enabled, Ordering::Release);
        if state.enabled {
            self.service_pending();
        }
    }

    pub fn interrupts_enabled(&self) -> bool {
        !self.primask.load(Ordering::Acquire)
    }

    /// Whether the owning core is currently running a handler
    pub fn in_interrupt(&self) -> bool {
        self.active_irq.load(Ordering::Acquire) != NO_IRQ
    }

    /// The line whose handler is currently running
    pub fn active_irq(&self) -> Option<Irq> {
        match self.active_irq.load(Ordering::Acquire) {
            NO_IRQ => None,
            num => Some(Irq(num)),
        }
    }

    /// Take every pending, enabled line that may preempt the running code
    ///
    /// Does nothing unless called on the owning core.
    pub fn service_pending(&self) {
        if !self.is_local() {
            return;
        }
        loop {
            if self.primask.load(Ordering::Acquire) {
                return;
            }
            let Some(irq) = self.next_ready() else {
                return;
            };
            if self.pending.fetch_and(!irq.bit(), Ordering::AcqRel) & irq.bit() == 0 {
                continue;
            }
            self.take(irq);
        }
    }

    fn next_ready(&self) -> Option<Irq> {
        let running = self.running_priority.load(Ordering::Acquire);
        let mut ready = self.pending.load(Ordering::Acquire) & self.enabled.load(Ordering::Acquire);
        let mut best: Option<(u8, Irq)> = None;
        while ready != 0 {
            let irq = Irq(ready.trailing_zeros() as u8);
            ready &= ready - 1;
            let priority = self.priority(irq);
            if u16::from(priority) >= running {
                continue;
            }
            if best.map_or(true, |(best_priority, _)| priority < best_priority) {
                best = Some((priority, irq));
            }
        }
        best.map(|(_, irq)| irq)
    }

    fn take(&self, irq: Irq) {
        let slot = self.handlers.lock()[irq.index()].clone();
        let previous_priority = self
            .running_priority
            .swap(u16::from(self.priority(irq)), Ordering::AcqRel);
        let previous_irq = self.active_irq.swap(irq.num(), Ordering::AcqRel);
        log::trace!("{}: taking {}", self.core, irq);
        match slot {
            Slot::Empty => panic!("unhandled interrupt {} on {}", irq, self.core),
            Slot::Exclusive(handler) => self.invoke(irq, handler),
            Slot::Shared(list) => {
                for entry in list.iter() {
                    self.invoke(irq, entry.handler);
                }
            }
        }
        self.active_irq.store(previous_irq, Ordering::Release);
        self.running_priority
            .store(previous_priority, Ordering::Release);
    }

    fn invoke(&self, irq: Irq, handler: HandlerRef) {
        let previous = self
            .active_handler
            .swap(handler_id(handler), Ordering::AcqRel);
        handler.on_interrupt(irq);
        self.active_handler.store(previous, Ordering::Release);
    }
}

fn user_index(irq: Irq) -> HwResult<u8> {
    if irq.is_user() {
        Ok(irq.num() - FIRST_USER_IRQ)
    } else {
        Err(HwError::NotUserIrq(irq.num()))
    }
}
