use super::{tracing_pending, tracing_timed, Trace};
use crate::worker::{Linked, PendingWorker, WorkerList};

#[test]
fn list_pushes_to_front() {
    let trace = Trace::default();
    let a = tracing_pending(&trace, "a");
    let b = tracing_pending(&trace, "b");
    let mut list: WorkerList<PendingWorker> = WorkerList::new();
    list.push_front(a);
    list.push_front(b);
    let order: Vec<_> = list.iter().collect();
    assert_eq!(order.len(), 2);
    assert!(core::ptr::eq(order[0], b));
    assert!(core::ptr::eq(order[1], a));
}

#[test]
fn list_removes_middle_and_missing() {
    let trace = Trace::default();
    let a = tracing_pending(&trace, "a");
    let b = tracing_pending(&trace, "b");
    let c = tracing_pending(&trace, "c");
    let stranger = tracing_pending(&trace, "stranger");
    let mut list = WorkerList::new();
    list.push_front(a);
    list.push_front(b);
    list.push_front(c);
    assert!(list.remove(b));
    assert!(!list.remove(b));
    assert!(!list.remove(stranger));
    let order: Vec<_> = list.iter().collect();
    assert!(core::ptr::eq(order[0], c));
    assert!(core::ptr::eq(order[1], a));
    assert_eq!(order.len(), 2);
}

#[test]
fn removed_worker_keeps_walk_alive() {
    let trace = Trace::default();
    let a = tracing_pending(&trace, "a");
    let b = tracing_pending(&trace, "b");
    let mut list = WorkerList::new();
    list.push_front(a);
    list.push_front(b);
    list.remove(b);
    // a walk standing on b still reaches a
    assert!(core::ptr::eq(b.link().next().unwrap(), a));
}

#[test]
fn link_has_single_owner() {
    let trace = Trace::default();
    let worker = tracing_timed(&trace, "t");
    assert!(!worker.is_registered());
    assert_eq!(worker.link().claim(7), Ok(()));
    assert_eq!(worker.link().claim(8), Err(7));
    assert!(worker.is_registered());
    worker.link().release();
    assert_eq!(worker.link().claim(8), Ok(()));
}

#[test]
fn drain_releases_every_worker() {
    let trace = Trace::default();
    let a = tracing_pending(&trace, "a");
    let b = tracing_pending(&trace, "b");
    a.link().claim(3).unwrap();
    b.link().claim(3).unwrap();
    let mut list = WorkerList::new();
    list.push_front(a);
    list.push_front(b);
    list.drain(|worker| worker.link().release());
    assert!(list.iter().next().is_none());
    assert!(!a.is_registered());
    assert!(!b.is_registered());
}
