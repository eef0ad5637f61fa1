//! Gives a semaphore to unblock a higher-priority thread, which preempts the
//! giver immediately.
//!
//! 1. (`seq`: 0 → 1) `task1` starts `task2`, which preempts it.
//! 2. (`seq`: 1 → 2) `task2` blocks on `sem`.
//! 3. (`seq`: 2 → 3) `task1` gives `sem`. `task2` preempts it.
//! 4. (`seq`: 3 → 4) `task2` exits.
//! 5. (`seq`: 4 → 5) `task1` finds the count zero and completes the test.
use rtk_kernel::{Kernel, SemaphoreId, TakeError, ThreadAttr, ThreadId, Timeout};
use std::sync::OnceLock;

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    sem: SemaphoreId,
    task2: ThreadId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let sem = kernel.sem_init(0, 1);
        kernel.thread_create(ThreadAttr::new(task1_body).priority(2));
        let task2 = kernel.thread_create(
            ThreadAttr::new(task2_body)
                .priority(1)
                .start_delay(Timeout::Forever),
        );
        APP.set(App {
            util,
            sem,
            task2,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn task1_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.thread_start(app.task2);

    app.seq.expect_and_replace(2, 3);
    kernel.sem_give(app.sem);

    app.seq.expect_and_replace(4, 5);
    assert_eq!(kernel.sem_count(app.sem), 0);
    assert_eq!(
        kernel.sem_take(app.sem, Timeout::NoWait),
        Err(TakeError::WouldBlock)
    );
    app.util.success(kernel);
}

fn task2_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(1, 2);
    kernel.sem_take(app.sem, Timeout::Forever).unwrap();
    app.seq.expect_and_replace(3, 4);
}
