//! Lets timed waits expire in virtual time, and wakes a sleeping thread
//! early.
//!
//! 1. (`seq`: 0 → 1) `task1` takes the empty `sem` with a 20-tick timeout,
//!    which expires.
//! 2. (`seq`: 1 → 2) `task1` starts `task2`, which preempts it.
//! 3. (`seq`: 2 → 3) `task2` sleeps for 10 seconds.
//! 4. (`seq`: 3 → 4) `task1` wakes `task2` up, and `task2` preempts it.
//! 5. (`seq`: 4 → 5) `task2` sees the remaining sleep time and exits.
//! 6. (`seq`: 5 → 6) `task1` sleeps for 5 ticks and completes the test.
use rtk_kernel::{Kernel, SemaphoreId, TakeError, ThreadAttr, ThreadId, Timeout};
use std::sync::OnceLock;

use crate::{Cfg, KernelTestUtil, SeqTracker};

const LONG_SLEEP: u32 = 10_000;

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
        kernel.port().use_virtual_time();
    });
}

fn task1_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    let start = kernel.uptime_ticks();
    assert_eq!(
        kernel.sem_take(app.sem, Timeout::Ticks(20)),
        Err(TakeError::Timeout)
    );
    let elapsed = kernel.uptime_ticks() - start;
    log::debug!("the take timed out after {elapsed} ticks");
    assert_eq!(elapsed, 20);

    app.seq.expect_and_replace(1, 2);
    kernel.thread_start(app.task2);

    app.seq.expect_and_replace(3, 4);
    kernel.thread_wakeup(app.task2);

    app.seq.expect_and_replace(5, 6);
    assert_eq!(kernel.sleep(Timeout::Ticks(5)), 0);
    assert_eq!(kernel.uptime_ticks() - start, 25);
    app.util.success(kernel);
}

fn task2_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(2, 3);
    let remaining = kernel.sleep(Timeout::Ticks(LONG_SLEEP));

    app.seq.expect_and_replace(4, 5);
    // No time passes while `task1` runs
    assert_eq!(remaining, LONG_SLEEP);
}
