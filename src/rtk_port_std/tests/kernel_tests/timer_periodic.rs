//! Runs a periodic timer whose expiry function counts expiries and whose
//! status is read synchronously by a thread.
//!
//! 1. `task1` starts `timer` with a period of 3 ticks and blocks on its
//!    status until three expiries are observed.
//! 2. `task1` stops `timer`, which calls the stop function once.
use rtk_kernel::{Kernel, ThreadAttr, TimerId, Timeout};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    OnceLock,
};

use crate::{Cfg, KernelTestUtil};

struct App {
    util: &'static KernelTestUtil,
    timer: TimerId,
    stops: AtomicUsize,
}

static APP: OnceLock<App> = OnceLock::new();

fn app() -> &'static App {
    APP.get().unwrap()
}

pub(crate) fn run(util: &'static KernelTestUtil) {
    util.run::<Cfg>(|kernel| {
        let timer = kernel.timer_init(Some(count_expiry), Some(count_stop));
        kernel.thread_create(ThreadAttr::new(task1_body).priority(2));
        APP.set(App {
            util,
            timer,
            stops: AtomicUsize::new(0),
        })
        .ok()
        .unwrap();
        kernel.port().use_virtual_time();
    });
}

fn count_expiry(kernel: &Kernel<Cfg>, timer: TimerId) {
    let n = kernel.timer_user_data(timer);
    kernel.timer_set_user_data(timer, n + 1);
}

fn count_stop(_: &Kernel<Cfg>, _: TimerId) {
    app().stops.fetch_add(1, Ordering::Relaxed);
}

fn task1_body(kernel: &'static Kernel<Cfg>, _: usize) {
    let app = app();
    let start = kernel.uptime_ticks();
    kernel.timer_start(app.timer, Timeout::Ticks(3), Timeout::Ticks(3));

    let mut expiries = 0;
    while expiries < 3 {
        let status = kernel.timer_status_sync(app.timer);
        log::debug!("timer status: {status}");
        expiries += status;
    }
    kernel.timer_stop(app.timer);
    kernel.timer_stop(app.timer);

    assert_eq!(kernel.timer_user_data(app.timer), 3);
    assert_eq!(kernel.uptime_ticks() - start, 9);
    assert_eq!(app.stops.load(Ordering::Relaxed), 1);
    assert_eq!(kernel.timer_remaining_ticks(app.timer), 0);
    app.util.success(kernel);
}
