//! Blocks two threads on a mutex held by a low-priority thread. The owner
//! inherits the priority of its best waiter, and unlocking hands the mutex
//! over in priority order.
//!
//! 1. (`seq`: 0 → 1) `task1` (priority 5) locks `mtx` and starts `task2`
//!    (priority 3).
//! 2. (`seq`: 1 → 2) `task2` blocks on `mtx`. `task1` now runs at priority 3.
//! 3. (`seq`: 2 → 3) `task1` starts `task3` (priority 1).
//! 4. (`seq`: 3 → 4) `task3` blocks on `mtx`. `task1` now runs at priority 1.
//! 5. (`seq`: 4 → 5) `task1` unlocks `mtx`, which goes to `task3`.
//! 6. (`seq`: 5 → 6) `task3` sees `task1` back at priority 5, then unlocks
//!    `mtx`, which goes to `task2`, and exits.
//! 7. (`seq`: 6 → 7) `task2` unlocks `mtx` and exits.
//! 8. (`seq`: 7 → 8) `task1` completes the test.
use rtk_kernel::{Kernel, MutexId, ThreadAttr, ThreadId, Timeout};
use std::sync::OnceLock;

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    mtx: MutexId,
    task1: ThreadId,
    task2: ThreadId,
    task3: ThreadId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let mtx = kernel.mutex_init();
        let task1 = kernel.thread_create(ThreadAttr::new(task1_body).priority(5));
        let task2 = kernel.thread_create(
            ThreadAttr::new(task2_body)
                .priority(3)
                .start_delay(Timeout::Forever),
        );
        let task3 = kernel.thread_create(
            ThreadAttr::new(task3_body)
                .priority(1)
                .start_delay(Timeout::Forever),
        );
        APP.set(App {
            util,
            mtx,
            task1,
            task2,
            task3,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn task1_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.mutex_lock(app.mtx, Timeout::Forever).unwrap();
    kernel.thread_start(app.task2);

    app.seq.expect_and_replace(2, 3);
    assert_eq!(kernel.thread_priority(app.task1), 3);
    kernel.thread_start(app.task3);

    app.seq.expect_and_replace(4, 5);
    assert_eq!(kernel.thread_priority(app.task1), 1);
    assert_eq!(kernel.thread_base_priority(app.task1), 5);
    kernel.mutex_unlock(app.mtx);

    app.seq.expect_and_replace(7, 8);
    assert_eq!(kernel.mutex_owner(app.mtx), None);
    app.util.success(kernel);
}

fn task2_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(1, 2);
    kernel.mutex_lock(app.mtx, Timeout::Forever).unwrap();

    app.seq.expect_and_replace(6, 7);
    kernel.mutex_unlock(app.mtx);
}

fn task3_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(3, 4);
    kernel.mutex_lock(app.mtx, Timeout::Forever).unwrap();

    app.seq.expect_and_replace(5, 6);
    assert_eq!(kernel.thread_priority(app.task1), 5);
    kernel.mutex_unlock(app.mtx);
    assert_eq!(kernel.mutex_owner(app.mtx), Some(app.task2));
}
