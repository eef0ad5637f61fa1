//! Unlocks a mutex owned by another thread. The system fault propagates to
//! the host as a panic.
//!
//! 1. (`seq`: 0 → 1) `owner` locks `mtx` and starts `intruder`.
//! 2. (`seq`: 1 → 2) `intruder` unlocks `mtx`, which is fatal.
use rtk_kernel::{Kernel, MutexId, ThreadAttr, ThreadId, Timeout};
use std::sync::OnceLock;

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    mtx: MutexId,
    intruder: ThreadId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let mtx = kernel.mutex_init();
        kernel.thread_create(ThreadAttr::new(owner_body).priority(4));
        let intruder = kernel.thread_create(
            ThreadAttr::new(intruder_body)
                .priority(2)
                .start_delay(Timeout::Forever),
        );
        APP.set(App {
            mtx,
            intruder,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn owner_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.mutex_lock(app.mtx, Timeout::Forever).unwrap();
    kernel.thread_start(app.intruder);
    unreachable!();
}

fn intruder_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(1, 2);
    kernel.mutex_unlock(app.mtx);
    unreachable!();
}
