//! The system timer.
//!
//! A free-running microsecond counter and a set of one-shot alarms. When an
//! alarm's deadline is reached its interrupt line is pended on the target
//! core; the interrupt handler decides what to do about it. Alarms are
//! served by a dedicated thread standing in for the timer peripheral,
//! started on first use.

use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;
use std::time::Instant;
use std::vec::Vec;

use parking_lot::{Condvar, Mutex};
use rp_core::{AbsoluteTime, CoreId};

use crate::irq::Irq;
use crate::platform::Platform;

/// Identifies a scheduled alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(u32);

impl AlarmId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
struct Alarm {
    id: AlarmId,
    at: AbsoluteTime,
    core: CoreId,
    irq: Irq,
}

#[derive(Default)]
struct AlarmQueue {
    alarms: Vec<Alarm>,
    serving: bool,
}

impl AlarmQueue {
    fn earliest(&self) -> Option<AbsoluteTime> {
        self.alarms.iter().map(|alarm| alarm.at).min()
    }

    fn pop_due(&mut self, now: AbsoluteTime) -> Option<Alarm> {
        let pos = self
            .alarms
            .iter()
            .enumerate()
            .filter(|(_, alarm)| alarm.at.is_reached(now))
            .min_by_key(|(_, alarm)| alarm.at)
            .map(|(pos, _)| pos)?;
        Some(self.alarms.swap_remove(pos))
    }
}

pub struct Timer {
    epoch: Instant,
    queue: Mutex<AlarmQueue>,
    changed: Condvar,
    next_id: AtomicU32,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            epoch: Instant::now(),
            queue: Mutex::new(AlarmQueue::default()),
            changed: Condvar::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Microseconds since the platform came up
    pub fn now(&self) -> AbsoluteTime {
        let us = u64::try_from(self.epoch.elapsed().as_micros()).unwrap_or(u64::MAX);
        AbsoluteTime::from_micros(us)
    }

    /// The host instant corresponding to `at`, if it is representable
    pub fn instant_of(&self, at: AbsoluteTime) -> Option<Instant> {
        if at.is_at_the_end_of_time() {
            return None;
        }
        self.epoch.checked_add(Duration::from_micros(at.as_micros()))
    }

    /// Schedule an alarm; returns whether the alarm thread still has to be started
    pub(crate) fn schedule(&self, at: AbsoluteTime, core: CoreId, irq: Irq) -> (AlarmId, bool) {
        let id = AlarmId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut queue = self.queue.lock();
        queue.alarms.push(Alarm { id, at, core, irq });
        let start = !queue.serving;
        queue.serving = true;
        self.changed.notify_all();
        log::trace!("alarm {} at {} for {} on {}", id.0, at, irq, core);
        (id, start)
    }

    /// Cancel an alarm; returns false if it already fired or never existed
    pub fn cancel(&self, id: AlarmId) -> bool {
        let mut queue = self.queue.lock();
        let before = queue.alarms.len();
        queue.alarms.retain(|alarm| alarm.id != id);
        let removed = queue.alarms.len() != before;
        if removed {
            self.changed.notify_all();
        }
        removed
    }

    /// Number of alarms not yet fired
    pub fn scheduled(&self) -> usize {
        self.queue.lock().alarms.len()
    }

    /// Alarm thread body: pend each alarm's line as its deadline passes
    pub(crate) fn serve(&self, platform: &Platform) {
        let mut queue = self.queue.lock();
        loop {
            if let Some(alarm) = queue.pop_due(self.now()) {
                log::trace!("alarm {} fired", alarm.id.0);
                parking_lot::MutexGuard::unlocked(&mut queue, || {
                    platform.nvic(alarm.core).set_pending(alarm.irq);
                });
                continue;
            }
            match queue.earliest().and_then(|at| self.instant_of(at)) {
                Some(deadline) => {
                    self.changed.wait_until(&mut queue, deadline);
                }
                None => self.changed.wait(&mut queue),
            }
        }
    }
}
