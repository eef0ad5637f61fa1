//! Runs kernel scenarios on the hosted port, with real OS threads.
use arrayvec::ArrayVec;
use rtk_kernel::{
    CondVarCb, Kernel, KernelCfg, MutexCb, QueueCb, QueueNode, SemaphoreCb, ThreadCb, TimeoutRef,
    TimerCb,
};
use rtk_port_std::StdPort;
use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

/// How long a scenario may run before it's considered deadlocked.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(20);

macro_rules! define_cfg {
    ($( $(#[$meta:meta])* $name:ident { num_cpus: $num_cpus:expr $(,)? } ),* $(,)?) => {$(
        $(#[$meta])*
        pub(crate) struct $name;

        impl KernelCfg for $name {
            type Port = StdPort;
            const NUM_CPUS: usize = $num_cpus;
            const TICKS_PER_SECOND: u32 = 1000;
            type ThreadPool = ArrayVec<ThreadCb<Self>, 16>;
            type SemaphorePool = ArrayVec<SemaphoreCb, 8>;
            type MutexPool = ArrayVec<MutexCb, 8>;
            type QueuePool = ArrayVec<QueueCb, 4>;
            type QueueNodePool = ArrayVec<QueueNode, 32>;
            type CondVarPool = ArrayVec<CondVarCb, 4>;
            type TimerPool = ArrayVec<TimerCb<Self>, 4>;
            type TimeoutHeap = ArrayVec<TimeoutRef, 20>;
        }
    )*};
}

define_cfg! {
    /// A uniprocessor system.
    Cfg { num_cpus: 1 },
    /// A dual-core system.
    SmpCfg { num_cpus: 2 },
}

/// An atomic counter for checking an execution sequence.
pub(crate) struct SeqTracker {
    counter: AtomicUsize,
}

impl SeqTracker {
    pub(crate) const fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    pub(crate) fn get(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }

    /// Assert that the counter is equal to `old` and then replace it with
    /// `new`.
    #[track_caller]
    pub(crate) fn expect_and_replace(&self, old: usize, new: usize) {
        let got = self.counter.load(Ordering::Relaxed);
        log::debug!("{} (expected: {}) → {}", got, old, new);
        assert_eq!(got, old, "expected {}, got {}", old, got);
        self.counter.store(new, Ordering::Relaxed);
    }
}

pub(crate) struct KernelTestUtil {
    is_successful: AtomicBool,
}

impl KernelTestUtil {
    const fn new() -> Self {
        Self {
            is_successful: AtomicBool::new(false),
        }
    }

    pub(crate) fn success<C: KernelCfg<Port = StdPort>>(&self, kernel: &Kernel<C>) {
        self.is_successful.store(true, Ordering::Relaxed);
        kernel.port().shutdown();
    }

    /// Create a kernel, let `setup` create its threads and objects, and run
    /// it until a thread calls `success` (or something panics).
    pub(crate) fn run<C: KernelCfg<Port = StdPort>>(
        &'static self,
        setup: impl FnOnce(&'static Kernel<C>),
    ) {
        let _ = env_logger::builder().is_test(true).try_init();

        let kernel: &'static Kernel<C> =
            Box::leak(Box::new(Kernel::new(StdPort::new(C::NUM_CPUS))));
        setup(kernel);

        std::thread::spawn(move || {
            std::thread::sleep(WATCHDOG_TIMEOUT);
            kernel.port().shutdown();
        });

        kernel.boot();
        kernel.port().wait_for_shutdown();

        assert!(
            self.is_successful.load(Ordering::Relaxed),
            "The program deadlocked without calling `success`"
        );
    }
}

mod kernel_tests {
    pub mod condvar_producer_consumer;
    pub mod exit_after_shutdown;
    pub mod fatal_error;
    pub mod mutex_unlock_and_dispatch;
    pub mod queue_handoff;
    pub mod semaphore_signal_and_dispatch;
    pub mod semaphore_timeout;
    pub mod smp_pinning;
    pub mod thread_abort_and_join;
    pub mod time_slice;
    pub mod timer_periodic;
}

macro_rules! instantiate_kernel_tests {
    ($( $name_ident:ident ),* $(,)?) => {$(
        #[test]
        fn $name_ident() {
            static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();
            kernel_tests::$name_ident::run(&TEST_UTIL);
        }
    )*};
}

instantiate_kernel_tests!(
    condvar_producer_consumer,
    exit_after_shutdown,
    mutex_unlock_and_dispatch,
    queue_handoff,
    semaphore_signal_and_dispatch,
    semaphore_timeout,
    smp_pinning,
    thread_abort_and_join,
    time_slice,
    timer_periodic,
);

#[test]
#[should_panic(expected = "NotOwner")]
fn fatal_error() {
    static TEST_UTIL: KernelTestUtil = KernelTestUtil::new();
    kernel_tests::fatal_error::run(&TEST_UTIL);
}
