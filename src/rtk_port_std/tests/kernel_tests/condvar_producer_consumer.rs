//! Waits on a condition variable for a flag guarded by a mutex.
//!
//! 1. (`seq`: 0 → 1) `consumer` locks `mtx`, finds `ready` unset, and waits
//!    on `cv`, releasing `mtx`.
//! 2. (`seq`: 1 → 2) `producer` locks `mtx`, sets `ready` and signals `cv`.
//!    `consumer` wakes up and blocks again on `mtx`, which boosts
//!    `producer` to its priority.
//! 3. (`seq`: 2 → 3) `producer` unlocks `mtx`. `consumer` takes it over and
//!    preempts `producer`.
//! 4. (`seq`: 3 → 4) `consumer` sees `ready`, unlocks `mtx` and exits.
//! 5. (`seq`: 4 → 5) `producer` completes the test.
use rtk_kernel::{CondVarId, Kernel, MutexId, ThreadAttr, ThreadId, Timeout};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    OnceLock,
};

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    mtx: MutexId,
    cv: CondVarId,
    producer: ThreadId,
    /// Guarded by `mtx`.
    ready: AtomicBool,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let mtx = kernel.mutex_init();
        let cv = kernel.condvar_init();
        kernel.thread_create(ThreadAttr::new(consumer_body).priority(1));
        let producer = kernel.thread_create(ThreadAttr::new(producer_body).priority(6));
        APP.set(App {
            util,
            mtx,
            cv,
            producer,
            ready: AtomicBool::new(false),
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn consumer_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.mutex_lock(app.mtx, Timeout::Forever).unwrap();
    while !app.ready.load(Ordering::Relaxed) {
        kernel
            .condvar_wait(app.cv, app.mtx, Timeout::Forever)
            .unwrap();
    }

    app.seq.expect_and_replace(3, 4);
    assert_eq!(kernel.mutex_owner(app.mtx), kernel.current_thread());
    kernel.mutex_unlock(app.mtx);
}

fn producer_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(1, 2);
    kernel.mutex_lock(app.mtx, Timeout::Forever).unwrap();
    app.ready.store(true, Ordering::Relaxed);
    kernel.condvar_signal(app.cv);

    app.seq.expect_and_replace(2, 3);
    assert_eq!(kernel.thread_priority(app.producer), 1);
    kernel.mutex_unlock(app.mtx);

    app.seq.expect_and_replace(4, 5);
    assert_eq!(kernel.thread_priority(app.producer), 6);
    app.util.success(kernel);
}
