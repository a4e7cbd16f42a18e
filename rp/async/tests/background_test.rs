mod common;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{
    counting_pending, pending_worker, periodic_timed, service_until, timed_worker, tracing_pending,
    tracing_timed, Probe, Trace,
};
use rp_async_context::{
    AsyncContext, AsyncContextExt, BackgroundConfig, BackgroundContext, ContextError, ContextFlags,
    Notifier,
};
use rp_hw::irq::LOWEST_IRQ_PRIORITY;
use rp_hw::{CoreId, HwError, Irq, Platform};

fn setup() -> (&'static Platform, rp_hw::CoreBinding, &'static BackgroundContext) {
    let platform = Platform::with_defaults();
    let binding = platform.bind_core(CoreId::Core0);
    let context = BackgroundContext::init(platform, BackgroundConfig::default()).unwrap();
    (platform, binding, context)
}

#[test]
fn init_claims_and_installs_dispatch_line() {
    let (platform, _core, context) = setup();
    let irq = context.irq();
    assert!(irq.is_user());
    let nvic = platform.irq();
    assert!(nvic.is_user_irq_claimed(irq).unwrap());
    assert!(nvic.is_enabled(irq));
    assert_eq!(nvic.priority(irq), LOWEST_IRQ_PRIORITY);
    assert!(nvic.exclusive_handler(irq).is_some());
    assert_eq!(context.flags(), ContextFlags::CALLBACK_FROM_IRQ);
    assert_eq!(context.core_num(), CoreId::Core0);
}

#[test]
fn configured_line_and_priority_are_used() {
    let platform = Platform::with_defaults();
    let _core = platform.bind_core(CoreId::Core1);
    let config = BackgroundConfig::builder()
        .low_priority_irq(Irq::user(5).unwrap())
        .irq_priority(0xc0)
        .build();
    let context = BackgroundContext::init(platform, config).unwrap();
    assert_eq!(context.irq().num(), 31);
    assert_eq!(platform.irq().priority(context.irq()), 0xc0);
    assert_eq!(context.core_num(), CoreId::Core1);
}

#[test]
fn init_fails_without_free_user_line() {
    let platform = Platform::with_defaults();
    let _core = platform.bind_core(CoreId::Core0);
    while platform.irq().claim_unused_user_irq().is_ok() {}
    let result = BackgroundContext::init(platform, BackgroundConfig::default());
    assert!(matches!(
        result,
        Err(ContextError::Hw(HwError::NoFreeUserIrq(CoreId::Core0)))
    ));
}

#[test]
fn init_on_unbound_thread_fails() {
    let platform = Platform::with_defaults();
    let result = BackgroundContext::init(platform, BackgroundConfig::default());
    assert!(matches!(result, Err(ContextError::Hw(HwError::Unbound))));
}

#[test]
fn set_work_pending_dispatches_in_background() {
    let (_platform, _core, context) = setup();
    let probe = Probe::default();
    let worker = counting_pending(&probe);
    assert!(context.add_pending_worker(worker));
    context.set_work_pending(worker);
    assert_eq!(probe.runs(), 1);
    assert!(probe.only_on(CoreId::Core0));
}

#[test]
fn lock_holder_on_own_core_defers_dispatch() {
    let (_platform, _core, context) = setup();
    let probe = Probe::default();
    let worker = counting_pending(&probe);
    context.add_pending_worker(worker);
    context.acquire_lock_blocking();
    context.acquire_lock_blocking();
    context.set_work_pending(worker);
    context.release_lock();
    assert_eq!(probe.runs(), 0);
    context.release_lock();
    assert_eq!(probe.runs(), 1);
}

#[test]
fn scenario_sync_marks_coalesce_and_timer_rearms() {
    let (platform, _core, context) = setup();
    let counter = Probe::default();
    let ticks = Probe::default();
    let a = counting_pending(&counter);
    let b = periodic_timed(&ticks, 10, 1);
    assert!(context.add_pending_worker(a));
    let start = platform.now();
    assert!(context.add_timed_worker(b, start.delayed_by_ms(10)));

    let core1 = platform.spawn_on_core(CoreId::Core1, move || {
        context.execute_sync(&mut || {
            for _ in 0..5 {
                context.set_work_pending(a);
            }
            0
        })
    });
    assert!(service_until(platform, || core1.is_finished()));
    assert_eq!(core1.join().unwrap(), 0);
    assert_eq!(counter.runs(), 1);

    platform.sleep_until(start.delayed_by_ms(60));
    assert_eq!(counter.runs(), 1);
    assert_eq!(ticks.runs(), 2);
    let times = ticks.times.lock().unwrap().clone();
    assert!(start.diff_us(times[0]) >= 10_000);
    assert!(start.diff_us(times[1]) >= 20_000);
    assert!(counter.only_on(CoreId::Core0));
    assert!(ticks.only_on(CoreId::Core0));
}

#[test]
fn execute_sync_from_other_core_returns_value() {
    let (platform, _core, context) = setup();
    let core1 = platform.spawn_on_core(CoreId::Core1, move || {
        context.execute_sync_with(|| {
            context.lock_check();
            rp_hw::current_core()
        })
    });
    assert!(service_until(platform, || core1.is_finished()));
    assert_eq!(core1.join().unwrap(), Some(CoreId::Core0));
}

#[test]
#[should_panic(expected = "while holding the context lock")]
fn execute_sync_under_lock_is_fatal() {
    let (_platform, _core, context) = setup();
    context.acquire_lock_blocking();
    context.execute_sync(&mut || 0);
}

#[test]
fn callbacks_never_overlap_lock_holders() {
    let (platform, _core, context) = setup();
    let inside = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicU32::new(0));
    let probe = Probe::default();
    let worker = {
        let inside = inside.clone();
        let overlaps = overlaps.clone();
        let probe = probe.clone();
        pending_worker(move |ctx, _| {
            if inside.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            probe.record(ctx.platform());
            std::thread::yield_now();
            inside.store(false, Ordering::SeqCst);
        })
    };
    context.add_pending_worker(worker);

    let core1 = {
        let inside = inside.clone();
        let overlaps = overlaps.clone();
        platform.spawn_on_core(CoreId::Core1, move || {
            for _ in 0..200 {
                context.acquire_lock_blocking();
                if inside.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                context.set_work_pending(worker);
                std::thread::yield_now();
                inside.store(false, Ordering::SeqCst);
                context.release_lock();
            }
        })
    };
    assert!(service_until(platform, || core1.is_finished()));
    core1.join().unwrap();
    assert!(service_until(platform, || !worker.is_pending()));
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert!(probe.runs() >= 1);
    assert!(probe.only_on(CoreId::Core0));
}

#[test]
fn notifier_marks_work_from_interrupt_handler() {
    let (platform, _core, context) = setup();
    let probe = Probe::default();
    let worker = counting_pending(&probe);
    context.add_pending_worker(worker);

    struct UartIrq {
        notifier: Notifier,
        worker: &'static rp_async_context::PendingWorker,
    }
    impl rp_hw::InterruptHandler for UartIrq {
        fn on_interrupt(&self, _irq: Irq) {
            self.notifier.set_work_pending(self.worker);
        }
    }
    let handler: &'static UartIrq = Box::leak(Box::new(UartIrq {
        notifier: Notifier::new(context),
        worker,
    }));
    let nvic = platform.irq();
    nvic.set_exclusive_handler(Irq::UART0_IRQ, handler);
    nvic.set_enabled(Irq::UART0_IRQ, true);
    nvic.set_pending(Irq::UART0_IRQ);
    assert_eq!(probe.runs(), 1);
}

#[test]
fn deinit_drains_and_silences() {
    let (platform, _core, context) = setup();
    let probe = Probe::default();
    let worker = counting_pending(&probe);
    let timer = {
        let probe = probe.clone();
        timed_worker(move |ctx, _| probe.record(ctx.platform()))
    };
    context.add_pending_worker(worker);
    context.add_timed_worker_in_ms(timer, 5);
    let irq = context.irq();

    context.deinit();
    assert!(context.is_deinitialized());
    assert!(!platform.irq().has_handler(irq));
    assert!(!platform.irq().is_user_irq_claimed(irq).unwrap());

    let core1 = platform.spawn_on_core(CoreId::Core1, move || context.set_work_pending(worker));
    core1.join().unwrap();
    platform.sleep_ms(20);
    assert_eq!(probe.runs(), 0);
}

#[test]
fn pending_work_runs_before_elapsed_timers() {
    let (platform, _core, context) = setup();
    let trace = Trace::default();
    let timer = tracing_timed(&trace, "timed");
    let worker = tracing_pending(&trace, "pending");
    context.acquire_lock_blocking();
    assert!(context.add_timed_worker(timer, platform.now()));
    assert!(context.add_pending_worker(worker));
    context.set_work_pending(worker);
    assert!(trace.snapshot().is_empty());
    context.release_lock();
    assert_eq!(trace.snapshot(), ["pending", "timed"]);
}

#[test]
fn add_and_remove_are_idempotent() {
    let (platform, _core, context) = setup();
    let probe = Probe::default();
    let worker = counting_pending(&probe);
    let timer = periodic_timed(&probe, 10, 0);
    assert!(!context.remove_pending_worker(worker));
    assert!(context.add_pending_worker(worker));
    assert!(!context.add_pending_worker(worker));
    assert!(context.remove_pending_worker(worker));
    assert!(!context.remove_pending_worker(worker));

    let at = platform.now().delayed_by_ms(1_000);
    assert!(!context.remove_timed_worker(timer));
    assert!(context.add_timed_worker(timer, at));
    assert!(!context.add_timed_worker(timer, at.delayed_by_ms(1)));
    assert_eq!(timer.next_time(), at);
    assert!(context.remove_timed_worker(timer));
    assert!(!context.remove_timed_worker(timer));
    assert_eq!(probe.runs(), 0);
}

#[test]
fn self_marking_worker_lets_other_core_take_the_lock() {
    let (platform, _core, context) = setup();
    let acquired = Arc::new(AtomicBool::new(false));
    let probe = Probe::default();
    let worker = {
        let acquired = acquired.clone();
        let probe = probe.clone();
        pending_worker(move |ctx, me| {
            probe.record(ctx.platform());
            std::thread::sleep(Duration::from_millis(1));
            if !acquired.load(Ordering::SeqCst) {
                ctx.set_work_pending(me);
            }
        })
    };
    assert!(context.add_pending_worker(worker));

    let taker = {
        let acquired = acquired.clone();
        platform.spawn_on_core(CoreId::Core1, move || {
            std::thread::sleep(Duration::from_millis(10));
            let started = Instant::now();
            context.acquire_lock_blocking();
            let waited = started.elapsed();
            acquired.store(true, Ordering::SeqCst);
            context.release_lock();
            waited
        })
    };
    context.set_work_pending(worker);
    assert!(service_until(platform, || taker.is_finished()));
    let waited = taker.join().unwrap();
    assert!(waited < Duration::from_millis(500), "lock taken after {:?}", waited);
    assert!(service_until(platform, || !worker.is_pending()));
    assert!(probe.runs() >= 1);
    assert!(probe.only_on(CoreId::Core0));
}

#[test]
fn wait_for_work_returns_when_timer_is_due() {
    let (platform, _core, context) = setup();
    let probe = Probe::default();
    let timer = {
        let probe = probe.clone();
        timed_worker(move |ctx, _| probe.record(ctx.platform()))
    };
    let start = platform.now();
    assert!(context.add_timed_worker(timer, start.delayed_by_ms(20)));
    context.wait_for_work_until(start.delayed_by_ms(500));
    let waited = start.diff_us(platform.now());
    assert!(waited >= 20_000);
    assert!(waited < 300_000, "wait lasted {}us", waited);
    assert!(service_until(platform, || probe.runs() == 1));
}
