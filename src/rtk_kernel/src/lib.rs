#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
use core::num::NonZeroUsize;

mod cfg;
mod condvar;
mod error;
mod mutex;
mod port;
mod queue;
mod sched;
mod semaphore;
mod spinlock;
mod state;
mod thread;
mod time;
mod timeout;
mod timer;
pub mod utils;
mod wait;


pub use self::{
    cfg::{
        coop_priority, highest_priority, idle_priority, preempt_priority, KernelCfg, Priority,
        SchedPolicy, MAX_CPUS, MAX_PRIORITY_LEVELS,
    },
    condvar::CondVarCb,
    error::{
        FatalError, GetError, JoinError, LockError, Resource, ResultCode, TakeError, WaitError,
    },
    mutex::MutexCb,
    port::{IrqKey, Port, PortToKernel},
    queue::{QueueCb, QueueNode},
    semaphore::SemaphoreCb,
    spinlock::{RawSpinLock, SpinKey, SpinLock, SpinLockGuard},
    thread::{Stack, ThreadAttr, ThreadCb, ThreadEntry, ThreadOptions, ThreadState},
    time::{duration_to_ticks, ticks_to_duration, Tick, Timeout, MAX_TIMEOUT_TICKS},
    timeout::TimeoutRef,
    timer::{TimerCb, TimerFn},
};

use self::{state::State, utils::VecLike, wait::WaitObject};

macro_rules! define_id {
    ($( $(#[$meta:meta])* $name:ident ),* $(,)?) => {$(
        $(#[$meta])*
        ///
        /// Wraps a 1-based index into the corresponding object pool.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Construct from a raw identifier.
            #[inline]
            pub const fn new(raw: NonZeroUsize) -> Self {
                Self(raw)
            }

            /// Get the raw identifier.
            #[inline]
            pub const fn get(self) -> NonZeroUsize {
                self.0
            }

            #[inline]
            pub(crate) fn from_index(index: usize) -> Self {
                Self(NonZeroUsize::MIN.saturating_add(index))
            }

            #[inline]
            pub(crate) fn index(self) -> usize {
                self.0.get() - 1
            }
        }
    )*};
}

define_id! {
    /// Identifies a semaphore.
    SemaphoreId,
    /// Identifies a mutex.
    MutexId,
    /// Identifies a queue.
    QueueId,
    /// Identifies a condition variable.
    CondVarId,
    /// Identifies a timer.
    TimerId,
}

/// Identifies a thread.
///
/// Wraps a 1-based index into the thread pool, combined with the generation
/// of the pool slot. The slot of a dead thread is reused with the next
/// generation, so an id outliving its thread never names the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(NonZeroUsize);

impl ThreadId {
    const INDEX_BITS: u32 = 16;
    const INDEX_MASK: usize = (1 << Self::INDEX_BITS) - 1;
    /// Keeps the raw value below `usize::MAX` so that the `+ 1` can't
    /// overflow.
    const GENERATION_MASK: usize = usize::MAX >> (Self::INDEX_BITS + 1);

    /// Construct from a raw identifier.
    #[inline]
    pub const fn new(raw: NonZeroUsize) -> Self {
        Self(raw)
    }

    /// Get the raw identifier.
    #[inline]
    pub const fn get(self) -> NonZeroUsize {
        self.0
    }

    /// Identify the first occupant of the slot `index`.
    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self::with_generation(index, 0)
    }

    #[inline]
    pub(crate) fn with_generation(index: usize, generation: usize) -> Self {
        debug_assert!(index <= Self::INDEX_MASK);
        let raw = ((generation & Self::GENERATION_MASK) << Self::INDEX_BITS) | index;
        Self(NonZeroUsize::MIN.saturating_add(raw))
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        (self.0.get() - 1) & Self::INDEX_MASK
    }

    #[inline]
    pub(crate) fn generation(self) -> usize {
        (self.0.get() - 1) >> Self::INDEX_BITS
    }

    /// Get the generation that follows `generation`.
    #[inline]
    pub(crate) fn next_generation(generation: usize) -> usize {
        generation.wrapping_add(1) & Self::GENERATION_MASK
    }
}

/// The guard of the kernel spinlock.
pub(crate) type KernelGuard<'a, C> = SpinLockGuard<'a, <C as KernelCfg>::Port, State<C>>;

/// A kernel instance.
///
/// Usually placed in a `static` (or leaked) so that [`Self::boot`] can hand
/// a `&'static` reference to the port.
pub struct Kernel<C: KernelCfg> {
    port: C::Port,
    state: SpinLock<State<C>>,
}

impl<C: KernelCfg> Kernel<C> {
    /// Construct a kernel instance.
    ///
    /// # Panics
    ///
    /// Panics if the configuration exceeds [`MAX_CPUS`] CPUs or
    /// [`MAX_PRIORITY_LEVELS`] priority levels.
    pub fn new(port: C::Port) -> Self {
        assert!(
            C::NUM_CPUS >= 1 && C::NUM_CPUS <= MAX_CPUS,
            "NUM_CPUS must be in range 1..={MAX_CPUS}"
        );
        assert!(
            cfg::num_levels::<C>() <= MAX_PRIORITY_LEVELS,
            "too many priority levels (at most {MAX_PRIORITY_LEVELS}, including the idle level)"
        );
        Self {
            port,
            state: SpinLock::new(State::new()),
        }
    }

    /// Get the port.
    #[inline]
    pub fn port(&self) -> &C::Port {
        &self.port
    }

    /// Start the kernel: create the idle threads, choose the first thread of
    /// every CPU and start them through [`Port::start_cpu`].
    ///
    /// Threads and objects created before this call are ready to use when the
    /// first threads run.
    pub fn boot(&'static self) {
        self.port.attach(self);

        let mut lock = self.lock();
        if lock.booted {
            self.fatal(FatalError::BadContext);
        }

        for cpu in lock.cpu_ids() {
            let attr = ThreadAttr::new(idle_main::<C>)
                .priority(idle_priority::<C>())
                .name("idle")
                .pin_cpu(cpu);
            let t = self.alloc_thread(&mut lock, &attr, true);
            let per_cpu = &mut lock.cpus[cpu];
            per_cpu.idle = Some(t);
            per_cpu.current = Some(t);
            lock.threads[t].st = ThreadState::Running;
        }
        lock.booted = true;

        // Let every CPU pick its first thread as if it just left its idle
        // thread
        let mut first: arrayvec::ArrayVec<_, MAX_CPUS> = arrayvec::ArrayVec::new();
        for cpu in lock.cpu_ids() {
            sched::dispatch(&mut lock, cpu);
            let Some(t) = lock.cpus[cpu].current else {
                self.fatal(FatalError::BadContext);
            };
            first.push(lock.threads[t].context.clone());
            log::debug!("CPU {} starts with thread {}", cpu, t);
        }
        lock.resched = 0;
        self.timeouts_changed(&lock);
        drop(lock);

        for (cpu, context) in first.iter().enumerate() {
            // Safety: `context` was created by `init_context` and hasn't run
            unsafe { self.port.start_cpu(cpu, context) };
        }
    }

    /// Report an unrecoverable error. Never returns.
    #[cold]
    pub fn fatal(&self, error: FatalError) -> ! {
        log::error!("fatal error: {}", error);
        self.port.system_fault(error)
    }

    /// Acquire the kernel lock.
    #[inline]
    pub(crate) fn lock(&self) -> KernelGuard<'_, C> {
        self.state.lock(&self.port)
    }

    /// Validate an object index against the length of its pool.
    #[inline]
    pub(crate) fn checked_index(&self, index: usize, len: usize) -> usize {
        if index >= len {
            self.fatal(FatalError::BadId);
        }
        index
    }

    /// Get the calling CPU and thread, or `None` in an interrupt handler or
    /// before boot.
    pub(crate) fn thread_context(&self, st: &State<C>) -> Option<(usize, usize)> {
        if self.port.is_in_isr() {
            return None;
        }
        let cpu = self.port.cpu_id();
        st.cpus[cpu].current.map(|t| (cpu, t))
    }

    /// Like [`Self::thread_context`], but the other contexts are a fatal
    /// error.
    pub(crate) fn expect_thread_context(&self, st: &State<C>) -> (usize, usize) {
        match self.thread_context(st) {
            Some(x) => x,
            None => self.fatal(FatalError::BadContext),
        }
    }

    /// Check that the caller may block: it's a thread other than an idle
    /// thread, and interrupts were enabled when it took the kernel lock.
    pub(crate) fn expect_waitable_context(&self, lock: &KernelGuard<'_, C>) -> (usize, usize) {
        let (cpu, me) = self.expect_thread_context(lock);
        if lock.threads[me].is_idle {
            self.fatal(FatalError::BadContext);
        }
        if !lock.irq_key().was_enabled() {
            self.fatal(FatalError::BlockingWithIrqsLocked);
        }
        (cpu, me)
    }

    /// Block the calling thread `me` on `object`. The caller is responsible
    /// for calling [`Self::schedule`].
    pub(crate) fn pend_current(
        &self,
        st: &mut State<C>,
        me: usize,
        object: WaitObject,
        timeout: Timeout,
    ) {
        if let Err(e) = wait::pend(st, me, object, timeout) {
            self.fatal(e);
        }
        if timeout != Timeout::Forever {
            self.timeouts_changed(st);
        }
    }
}

/// The entry point of the idle threads.
fn idle_main<C: KernelCfg>(kernel: &'static Kernel<C>, _: usize) {
    loop {
        kernel.port.idle();
        kernel.reschedule();
    }
}

impl<C: KernelCfg> PortToKernel for Kernel<C> {
    fn run_thread(&'static self, thread: ThreadId) -> ! {
        let (entry, param) = {
            let lock = self.lock();
            let t = self.thread_index(&lock, thread);
            (lock.threads[t].entry, lock.threads[t].param)
        };
        log::trace!("thread {} starts running", thread.index());
        entry(self, param);
        self.thread_exit()
    }

    fn announce(&self, ticks: u32) {
        Kernel::announce(self, ticks);
    }

    fn reschedule(&self) {
        let lock = self.lock();
        self.unlock_and_check_preemption(lock);
    }
}
