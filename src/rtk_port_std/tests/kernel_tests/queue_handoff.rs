//! Passes items through a queue, both directly to a blocked consumer and
//! through the queue's own storage.
//!
//! 1. (`seq`: 0 → 1) `producer` starts `consumer`, which preempts it.
//! 2. (`seq`: 1 → 2) `consumer` blocks on the empty `queue`.
//! 3. (`seq`: 2 → 3) `producer` puts 10, which goes straight to `consumer`.
//!    `consumer` preempts it.
//! 4. (`seq`: 3 → 4) `consumer` blocks on `queue` again.
//! 5. (`seq`: 4 → 5) With the scheduler locked, `producer` puts 20 (taken
//!    by `consumer`), puts 30 and prepends 40. Unlocking the scheduler lets
//!    `consumer` run.
//! 6. (`seq`: 5 → 6) `consumer` drains 40 and 30 without blocking and exits.
//! 7. (`seq`: 6 → 7) `producer` completes the test.
use rtk_kernel::{GetError, Kernel, QueueId, ThreadAttr, ThreadId, Timeout};
use std::sync::OnceLock;

use crate::{Cfg, KernelTestUtil, SeqTracker};

struct App {
    util: &'static KernelTestUtil,
    queue: QueueId,
    consumer: ThreadId,
    seq: SeqTracker,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let queue = kernel.queue_init();
        kernel.thread_create(ThreadAttr::new(producer_body).priority(4));
        let consumer = kernel.thread_create(
            ThreadAttr::new(consumer_body)
                .priority(2)
                .start_delay(Timeout::Forever),
        );
        APP.set(App {
            util,
            queue,
            consumer,
            seq: SeqTracker::new(),
        })
        .ok()
        .unwrap();
    });
}

fn producer_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(0, 1);
    kernel.thread_start(app.consumer);

    app.seq.expect_and_replace(2, 3);
    kernel.queue_put(app.queue, 10);

    app.seq.expect_and_replace(4, 5);
    kernel.sched_lock();
    kernel.queue_put(app.queue, 20);
    kernel.queue_put(app.queue, 30);
    kernel.queue_prepend(app.queue, 40);
    assert_eq!(kernel.queue_peek_head(app.queue), Some(40));
    assert_eq!(kernel.queue_peek_tail(app.queue), Some(30));
    kernel.sched_unlock();

    app.seq.expect_and_replace(6, 7);
    assert!(kernel.queue_is_empty(app.queue));
    app.util.success(kernel);
}

fn consumer_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    app.seq.expect_and_replace(1, 2);
    assert_eq!(kernel.queue_get(app.queue, Timeout::Forever), Ok(10));

    app.seq.expect_and_replace(3, 4);
    assert_eq!(kernel.queue_get(app.queue, Timeout::Forever), Ok(20));

    app.seq.expect_and_replace(5, 6);
    assert_eq!(kernel.queue_get(app.queue, Timeout::NoWait), Ok(40));
    assert_eq!(kernel.queue_get(app.queue, Timeout::NoWait), Ok(30));
    assert_eq!(
        kernel.queue_get(app.queue, Timeout::NoWait),
        Err(GetError::WouldBlock)
    );
}
