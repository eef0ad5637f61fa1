//! The kernel state protected by the kernel spinlock
use crate::{
    cfg::{KernelCfg, SchedPolicy, MAX_CPUS},
    sched::readyqueue::ReadyQueue,
    time::Tick,
    utils::{Init, VecLike},
    ThreadId,
};

/// Per-CPU scheduling state.
#[derive(Debug)]
pub(crate) struct PerCpu {
    /// The thread running on the CPU. `None` until boot.
    pub(crate) current: Option<usize>,
    /// The idle thread of the CPU. `None` until boot.
    pub(crate) idle: Option<usize>,
    pub(crate) ready: ReadyQueue,
    /// The remaining time slice of `current`, in ticks.
    pub(crate) slice_left: u32,
    /// Set when `current` used up its time slice.
    pub(crate) slice_expired: bool,
}

impl Init for PerCpu {
    const INIT: Self = Self {
        current: None,
        idle: None,
        ready: ReadyQueue::INIT,
        slice_left: 0,
        slice_expired: false,
    };
}

/// All mutable kernel state. Only accessed through the kernel spinlock.
pub(crate) struct State<C: KernelCfg> {
    pub(crate) threads: C::ThreadPool,
    pub(crate) semaphores: C::SemaphorePool,
    pub(crate) mutexes: C::MutexPool,
    pub(crate) queues: C::QueuePool,
    pub(crate) queue_nodes: C::QueueNodePool,
    /// The head of the free list of `queue_nodes`.
    pub(crate) free_queue_node: Option<usize>,
    pub(crate) condvars: C::CondVarPool,
    pub(crate) timers: C::TimerPool,
    pub(crate) timeouts: C::TimeoutHeap,
    /// The current tick count.
    pub(crate) now: Tick,
    /// The number of ticks since boot. Doesn't wrap around.
    pub(crate) uptime: u64,
    pub(crate) cpus: [PerCpu; MAX_CPUS],
    /// CPUs that must re-evaluate their scheduling decision (one bit per
    /// CPU). Turned into IPIs or local dispatches when the lock is released.
    pub(crate) resched: u32,
    pub(crate) policy: SchedPolicy,
    pub(crate) booted: bool,
}

impl<C: KernelCfg> State<C> {
    pub(crate) fn new() -> Self {
        Self {
            threads: C::ThreadPool::DEFAULT,
            semaphores: C::SemaphorePool::DEFAULT,
            mutexes: C::MutexPool::DEFAULT,
            queues: C::QueuePool::DEFAULT,
            queue_nodes: C::QueueNodePool::DEFAULT,
            free_queue_node: None,
            condvars: C::CondVarPool::DEFAULT,
            timers: C::TimerPool::DEFAULT,
            timeouts: C::TimeoutHeap::DEFAULT,
            now: 0,
            uptime: 0,
            cpus: core::array::from_fn(|_| PerCpu::INIT),
            resched: 0,
            policy: SchedPolicy::new(C::TIME_SLICE_TICKS, C::TIME_SLICE_PRIORITY),
            booted: false,
        }
    }

    /// Request the CPU `cpu` to re-evaluate its scheduling decision.
    #[inline]
    pub(crate) fn request_resched(&mut self, cpu: usize) {
        self.resched |= 1 << cpu;
    }

    /// Get the id of the thread currently occupying the slot `t`.
    #[inline]
    pub(crate) fn thread_id(&self, t: usize) -> ThreadId {
        ThreadId::with_generation(t, self.threads[t].generation)
    }

    /// Get the CPUs `0..NUM_CPUS`.
    #[inline]
    pub(crate) fn cpu_ids(&self) -> core::ops::Range<usize> {
        0..C::NUM_CPUS
    }
}
