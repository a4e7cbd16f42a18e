use std::sync::{Arc, Mutex};

use crate::context::AsyncContext;
use crate::worker::{PendingWorker, TimedWorker};

mod worker;

/// Shared log of callback names
#[derive(Clone, Default)]
pub(crate) struct Trace {
    entries: Arc<Mutex<Vec<&'static str>>>,
}

impl Trace {
    pub(crate) fn push(&self, entry: &'static str) {
        self.entries.lock().unwrap().push(entry);
    }

    pub(crate) fn take(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }
}

pub(crate) fn pending_worker<F>(f: F) -> &'static PendingWorker
where
    F: Fn(&dyn AsyncContext, &'static PendingWorker) + Send + Sync + 'static,
{
    Box::leak(Box::new(PendingWorker::new(Box::leak(Box::new(f)))))
}

pub(crate) fn timed_worker<F>(f: F) -> &'static TimedWorker
where
    F: Fn(&dyn AsyncContext, &'static TimedWorker) + Send + Sync + 'static,
{
    Box::leak(Box::new(TimedWorker::new(Box::leak(Box::new(f)))))
}

/// Pending worker that logs `name` each time it runs
pub(crate) fn tracing_pending(trace: &Trace, name: &'static str) -> &'static PendingWorker {
    let trace = trace.clone();
    pending_worker(move |_, _| trace.push(name))
}

/// Timed worker that logs `name` each time it fires
pub(crate) fn tracing_timed(trace: &Trace, name: &'static str) -> &'static TimedWorker {
    let trace = trace.clone();
    timed_worker(move |_, _| trace.push(name))
}
