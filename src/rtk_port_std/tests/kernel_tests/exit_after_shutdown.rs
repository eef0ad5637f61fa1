//! Exits a thread after the shutdown has begun, dispatching a thread whose
//! OS thread is already gone.
//!
//! 1. `waiter` blocks on `sem`, and `main` runs.
//! 2. (`seq`: 0 → 1) `main` gives `sem`. `waiter` preempts it.
//! 3. (`seq`: 1 → 2) `waiter` completes the test, waits until the parked
//!    OS threads have left, and exits, dispatching `main`.
use rtk_kernel::{Kernel, SemaphoreId, ThreadAttr, Timeout};
use std::{sync::OnceLock, time::Duration};

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    sem: SemaphoreId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let sem = kernel.sem_init(0, 1);
        kernel.thread_create(ThreadAttr::new(waiter_body).priority(2));
        kernel.thread_create(ThreadAttr::new(main_body).priority(3));
        APP.set(App {
            util,
            sem,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn main_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.sem_give(app.sem);
    unreachable!();
}

fn waiter_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    kernel.sem_take(app.sem, Timeout::Forever).unwrap();
    app.seq.expect_and_replace(1, 2);
    app.util.success(kernel);
    std::thread::sleep(Duration::from_millis(50));
}
