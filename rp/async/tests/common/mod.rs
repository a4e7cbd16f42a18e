#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rp_async_context::{AsyncContext, PendingWorker, TimedWorker};
use rp_hw::{AbsoluteTime, CoreId, Platform};

pub fn pending_worker<F>(f: F) -> &'static PendingWorker
where
    F: Fn(&dyn AsyncContext, &'static PendingWorker) + Send + Sync + 'static,
{
    Box::leak(Box::new(PendingWorker::new(Box::leak(Box::new(f)))))
}

pub fn timed_worker<F>(f: F) -> &'static TimedWorker
where
    F: Fn(&dyn AsyncContext, &'static TimedWorker) + Send + Sync + 'static,
{
    Box::leak(Box::new(TimedWorker::new(Box::leak(Box::new(f)))))
}

/// What callbacks observed while running
#[derive(Clone, Default)]
pub struct Probe {
    pub runs: Arc<AtomicU32>,
    pub cores: Arc<Mutex<Vec<Option<CoreId>>>>,
    pub times: Arc<Mutex<Vec<AbsoluteTime>>>,
}

impl Probe {
    pub fn record(&self, platform: &Platform) {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.cores.lock().unwrap().push(rp_hw::current_core());
        self.times.lock().unwrap().push(platform.now());
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn only_on(&self, core: CoreId) -> bool {
        self.cores.lock().unwrap().iter().all(|seen| *seen == Some(core))
    }
}

/// Pending worker counting its runs
pub fn counting_pending(probe: &Probe) -> &'static PendingWorker {
    let probe = probe.clone();
    pending_worker(move |ctx, _| probe.record(ctx.platform()))
}

/// Timed worker that re-arms itself `rearms` times, `period_ms` apart
pub fn periodic_timed(probe: &Probe, period_ms: u32, rearms: u32) -> &'static TimedWorker {
    let probe = probe.clone();
    timed_worker(move |ctx, me| {
        probe.record(ctx.platform());
        if probe.runs() <= rearms {
            assert!(ctx.add_timed_worker(me, me.next_time().delayed_by_ms(period_ms)));
        }
    })
}

/// Keep taking interrupts on the calling core until `done` or a generous timeout
pub fn service_until(platform: &Platform, mut done: impl FnMut() -> bool) -> bool {
    let give_up = platform.now().delayed_by_ms(5_000);
    while !done() {
        if give_up.is_reached(platform.now()) {
            return false;
        }
        platform.wfe();
    }
    true
}

/// Shared log of callback names, in run order
#[derive(Clone, Default)]
pub struct Trace {
    entries: Arc<Mutex<Vec<&'static str>>>,
}

impl Trace {
    pub fn push(&self, entry: &'static str) {
        self.entries.lock().unwrap().push(entry);
    }

    pub fn snapshot(&self) -> Vec<&'static str> {
        self.entries.lock().unwrap().clone()
    }
}

pub fn tracing_pending(trace: &Trace, name: &'static str) -> &'static PendingWorker {
    let trace = trace.clone();
    pending_worker(move |_, _| trace.push(name))
}

pub fn tracing_timed(trace: &Trace, name: &'static str) -> &'static TimedWorker {
    let trace = trace.clone();
    timed_worker(move |_, _| trace.push(name))
}
