//! Rotates two compute-bound threads of the same priority by time slicing.
//! Without it, `task1` would keep the CPU forever.
//!
//! 1. `task1` counts in a loop, polling the kernel, until it sees `task2`
//!    run.
//! 2. When `task1`'s slice expires, `task2` runs and completes the test.
use rtk_kernel::{Kernel, ThreadAttr};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    OnceLock,
};

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    task1_count: AtomicUsize,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        kernel.set_time_slice(2, 0);
        kernel.thread_create(ThreadAttr::new(task1_body).priority(5));
        kernel.thread_create(ThreadAttr::new(task2_body).priority(5));
        APP.set(App {
            util,
            task1_count: AtomicUsize::new(0),
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
        kernel.port().start_ticker(std::time::Duration::from_millis(1));
    });
}

fn task1_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    while app.seq.get() == 1 {
        app.task1_count.fetch_add(1, Ordering::Relaxed);
        // Unmasking interrupts at the end of each call lets ticks in
        kernel.uptime_ticks();
    }
}

fn task2_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(1, 2);
    let count = app.task1_count.load(Ordering::Relaxed);
    log::debug!("task1 looped {count} times before its slice expired");
    assert!(count > 0);
    assert!(kernel.uptime_ticks() >= 2);
    app.util.success(kernel);
}
