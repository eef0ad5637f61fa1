//! Joins threads that exit by themselves and threads aborted by others.
//!
//! 1. (`seq`: 0 → 1) `main` starts `sleeper`, which preempts it and sleeps
//!    forever.
//! 2. (`seq`: 1 → 2) `main` fails to join `sleeper` without waiting and with
//!    a timeout, then aborts it. The join now succeeds immediately.
//! 3. (`seq`: 2 → 3) `main` starts `worker` (lower priority) and joins it.
//! 4. (`seq`: 3 → 4) `worker` can't join `main`, which is joining it, and
//!    exits.
//! 5. (`seq`: 4 → 5) `main` returns from the join and completes the test.
use rtk_kernel::{JoinError, Kernel, ThreadAttr, ThreadId, ThreadState, Timeout};
use std::sync::OnceLock;

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    main: ThreadId,
    sleeper: ThreadId,
    worker: ThreadId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let main = kernel.thread_create(ThreadAttr::new(main_body).priority(3));
        let sleeper = kernel.thread_create(
            ThreadAttr::new(sleeper_body)
                .priority(1)
                .start_delay(Timeout::Forever),
        );
        let worker = kernel.thread_create(
            ThreadAttr::new(worker_body)
                .priority(5)
                .start_delay(Timeout::Forever),
        );
        APP.set(App {
            util,
            main,
            sleeper,
            worker,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
        kernel.port().use_virtual_time();
    });
}

fn main_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.thread_start(app.sleeper);

    app.seq.expect_and_replace(1, 2);
    assert_eq!(
        kernel.thread_join(app.sleeper, Timeout::NoWait),
        Err(JoinError::WouldBlock)
    );
    let start = kernel.uptime_ticks();
    assert_eq!(
        kernel.thread_join(app.sleeper, Timeout::Ticks(5)),
        Err(JoinError::Timeout)
    );
    assert_eq!(kernel.uptime_ticks() - start, 5);
    assert_eq!(
        kernel.thread_join(app.main, Timeout::Forever),
        Err(JoinError::WouldDeadlock)
    );
    kernel.thread_abort(app.sleeper);
    assert_eq!(kernel.thread_state(app.sleeper), ThreadState::Dead);
    assert_eq!(kernel.thread_join(app.sleeper, Timeout::NoWait), Ok(()));

    app.seq.expect_and_replace(2, 3);
    kernel.thread_start(app.worker);
    kernel.thread_join(app.worker, Timeout::Forever).unwrap();

    app.seq.expect_and_replace(4, 5);
    assert_eq!(kernel.thread_state(app.worker), ThreadState::Dead);
    app.util.success(kernel);
}

fn sleeper_body(kernel: &'static Kernel<Cfg>, _: usize) {
    kernel.sleep(Timeout::Forever);
    unreachable!();
}

fn worker_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(3, 4);
    assert_eq!(
        kernel.thread_join(app.main, Timeout::NoWait),
        Err(JoinError::WouldDeadlock)
    );
}
