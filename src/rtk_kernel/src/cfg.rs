//! Static configuration of a kernel instance
use crate::{
    condvar::CondVarCb, mutex::MutexCb, queue::QueueCb, queue::QueueNode,
    semaphore::SemaphoreCb, thread::ThreadCb, timeout::TimeoutRef, timer::TimerCb,
    utils::{VecLike, PRIO_BITMAP_LEN},
    Port,
};

/// Thread priority. A lower value means a higher priority. Negative values
/// are cooperative priorities, non-negative values are preemptible
/// priorities.
pub type Priority = i32;

/// The maximum value of [`KernelCfg::NUM_CPUS`].
pub const MAX_CPUS: usize = 16;

/// The maximum number of priority levels, including the idle level.
pub const MAX_PRIORITY_LEVELS: usize = PRIO_BITMAP_LEN;

/// Implemented by the application on a marker type to configure a
/// [`Kernel`](crate::Kernel).
///
/// Every object pool is a [`VecLike`], typically an
/// [`arrayvec::ArrayVec`] whose capacity sets the maximum number of objects:
///
/// ```ignore
/// impl KernelCfg for App {
///     type Port = MyPort;
///     type ThreadPool = ArrayVec<ThreadCb<Self>, 8>;
///     // ...
/// }
/// ```
pub trait KernelCfg: Sized + Send + Sync + 'static {
    /// The port.
    type Port: Port;

    /// The number of CPUs. Each CPU gets an idle thread from
    /// [`Self::ThreadPool`].
    const NUM_CPUS: usize = 1;

    /// The number of cooperative priorities, `-NUM_COOP_PRIORITIES..0`.
    const NUM_COOP_PRIORITIES: usize = 16;

    /// The number of preemptible priorities, `0..NUM_PREEMPT_PRIORITIES`.
    /// The idle threads run at `NUM_PREEMPT_PRIORITIES`.
    const NUM_PREEMPT_PRIORITIES: usize = 15;

    /// The frequency of [`PortToKernel::announce`] ticks.
    ///
    /// [`PortToKernel::announce`]: crate::PortToKernel::announce
    const TICKS_PER_SECOND: u32 = 100;

    /// The default time slice in ticks. `0` selects strict priority
    /// scheduling.
    const TIME_SLICE_TICKS: u32 = 0;

    /// The default time-slice ceiling. Only threads with a priority value
    /// greater than or equal to this are time-sliced.
    const TIME_SLICE_PRIORITY: Priority = 0;

    /// The maximum recursion count of a mutex.
    const MAX_MUTEX_RECURSION: u32 = u16::MAX as u32;

    /// The maximum number of owners visited when propagating an inherited
    /// priority along a chain of mutexes.
    const MAX_INHERITANCE_DEPTH: usize = 8;

    type ThreadPool: VecLike<Element = ThreadCb<Self>> + Send;
    type SemaphorePool: VecLike<Element = SemaphoreCb> + Send;
    type MutexPool: VecLike<Element = MutexCb> + Send;
    type QueuePool: VecLike<Element = QueueCb> + Send;
    /// The storage for items linked into queues, shared by every queue.
    type QueueNodePool: VecLike<Element = QueueNode> + Send;
    type CondVarPool: VecLike<Element = CondVarCb> + Send;
    type TimerPool: VecLike<Element = TimerCb<Self>> + Send;
    /// The heap of armed timeouts. Needs room for one entry per thread and
    /// per timer.
    type TimeoutHeap: VecLike<Element = TimeoutRef> + Send;
}

/// Get the priority of the idle threads (the lowest priority).
pub const fn idle_priority<C: KernelCfg>() -> Priority {
    C::NUM_PREEMPT_PRIORITIES as Priority
}

/// Get the highest priority (the lowest value) available to threads.
pub const fn highest_priority<C: KernelCfg>() -> Priority {
    -(C::NUM_COOP_PRIORITIES as Priority)
}

/// Get the `x`-th cooperative priority counted from the lowest one.
pub const fn coop_priority<C: KernelCfg>(x: usize) -> Priority {
    -((C::NUM_COOP_PRIORITIES - x) as Priority)
}

/// Get the `x`-th preemptible priority.
pub const fn preempt_priority(x: usize) -> Priority {
    x as Priority
}

/// Get a flag indicating whether `priority` is valid for a non-idle thread.
pub(crate) fn is_valid_priority<C: KernelCfg>(priority: Priority) -> bool {
    (highest_priority::<C>()..idle_priority::<C>()).contains(&priority)
}

/// Map a priority to a ready-queue level.
#[inline]
pub(crate) fn level_of<C: KernelCfg>(priority: Priority) -> usize {
    (priority + C::NUM_COOP_PRIORITIES as Priority) as usize
}

/// The number of ready-queue levels, including the idle level.
pub(crate) const fn num_levels<C: KernelCfg>() -> usize {
    C::NUM_COOP_PRIORITIES + C::NUM_PREEMPT_PRIORITIES + 1
}

/// Scheduling policy among threads of equal priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// A running thread keeps the CPU until it blocks, yields or is preempted
    /// by a higher-priority thread.
    StrictPriority,
    /// Preemptible threads whose priority value is at least
    /// `priority_ceiling` are rotated among their peers every `ticks` ticks.
    TimeSliced {
        ticks: u32,
        priority_ceiling: Priority,
    },
}

impl SchedPolicy {
    pub(crate) fn new(ticks: u32, priority_ceiling: Priority) -> Self {
        if ticks == 0 {
            Self::StrictPriority
        } else {
            Self::TimeSliced {
                ticks,
                priority_ceiling,
            }
        }
    }

    /// Get the time slice of a thread with `priority`, or `None` if it's not
    /// time-sliced.
    pub(crate) fn slice_for(self, priority: Priority) -> Option<u32> {
        match self {
            Self::TimeSliced {
                ticks,
                priority_ceiling,
            } if priority >= 0 && priority >= priority_ceiling => Some(ticks),
            _ => None,
        }
    }
}
