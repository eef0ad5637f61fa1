//! Runs two pinned threads on a dual-core system, synchronizes them with
//! semaphores across CPUs, and migrates one of them.
//!
//! 1. `task_a` (pinned to CPU 0) and `task_b` (pinned to CPU 1) start at the
//!    same time. `task_b` waits for `sem_b`.
//! 2. `task_a` gives `sem_b` and waits for `sem_a`.
//! 3. `task_b` wakes up on CPU 1, gives `sem_a` (waking `task_a` on CPU 0
//!    through an inter-processor interrupt) and waits for `sem_b` forever.
//! 4. `task_a` pins itself to CPU 1. It continues there after `task_b` has
//!    blocked, and completes the test.
use rtk_kernel::{Kernel, Port, SemaphoreId, ThreadAttr, Timeout};
use std::sync::OnceLock;

use crate::{KernelTestUtil, SeqTracker, SmpCfg};

struct App {
    util: &'static KernelTestUtil,
    sem_a: SemaphoreId,
    sem_b: SemaphoreId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<SmpCfg>(|kernel| {
        let sem_a = kernel.sem_init(0, 1);
        let sem_b = kernel.sem_init(0, 1);
        kernel.thread_create(
            ThreadAttr::new(task_a_body)
                .priority(2)
                .name("a")
                .pin_cpu(0),
        );
        kernel.thread_create(
            ThreadAttr::new(task_b_body)
                .priority(2)
                .name("b")
                .pin_cpu(1),
        );
        APP.set(App {
            util,
            sem_a,
            sem_b,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn task_a_body(kernel: &'static Kernel<SmpCfg>, _: usize) {
    let app = app();
    assert_eq!(kernel.port().cpu_id(), 0);
    kernel.sem_give(app.sem_b);
    kernel.sem_take(app.sem_a, Timeout::Forever).unwrap();

    app.seq.expect_and_replace(1, 2);
    assert_eq!(kernel.port().cpu_id(), 0);
    let me = kernel.current_thread().unwrap();
    kernel.thread_pin_cpu(me, Some(1));

    assert_eq!(kernel.port().cpu_id(), 1);
    assert_eq!(kernel.thread_name(me), "a");
    app.util.success(kernel);
}

fn task_b_body(kernel: &'static Kernel<SmpCfg>, _: usize) {
    let app = app();
    kernel.sem_take(app.sem_b, Timeout::Forever).unwrap();

    app.seq.expect_and_replace(0, 1);
    assert_eq!(kernel.port().cpu_id(), 1);
    kernel.sem_give(app.sem_a);
    let _ = kernel.sem_take(app.sem_b, Timeout::Forever);
    unreachable!();
}
