//! The timeout manager
//!
//! Pending timeouts live in a binary min-heap ordered by expiry tick. Each
//! timeout node is embedded in its owner (a thread control block or a timer
//! control block) and remembers its position in the heap, so cancelling
//! takes logarithmic time.
//!
//! ```text
//!            arm            announce (at <= now)
//!   Idle ─────────▶ Armed ───────────────────────▶ Fired
//!                     │
//!                     │ cancel
//!                     ▼
//!                 Cancelled
//! ```
//!
//! Any state can be re-armed.
use crate::{
    error::Resource,
    state::State,
    thread::{self, ThreadCb},
    time::{tick_before, ticks_until, Tick, MAX_TIMEOUT_TICKS},
    timer::{self, TimerCb},
    utils::binary_heap::{BinaryHeap, BinaryHeapCtx},
    FatalError, Kernel, KernelCfg, Port, TimerId,
};

const HEAP_POS_NONE: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeoutState {
    Idle,
    Armed,
    Fired,
    Cancelled,
}

/// A timeout embedded in a thread or a timer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutNode {
    /// The expiry tick. Valid while `Armed`.
    pub(crate) at: Tick,
    /// The position in the heap. Valid while `Armed`.
    heap_pos: usize,
    pub(crate) state: TimeoutState,
}

impl TimeoutNode {
    pub(crate) const INIT: Self = Self {
        at: 0,
        heap_pos: HEAP_POS_NONE,
        state: TimeoutState::Idle,
    };
}

/// An element of the timeout heap: refers to the owner of a
/// [`TimeoutNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutRef(Target);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Thread(usize),
    Timer(usize),
}

impl TimeoutRef {
    #[inline]
    pub(crate) fn thread(t: usize) -> Self {
        Self(Target::Thread(t))
    }

    #[inline]
    pub(crate) fn timer(i: usize) -> Self {
        Self(Target::Timer(i))
    }
}

struct HeapCtx<'a, C: KernelCfg> {
    threads: &'a mut [ThreadCb<C>],
    timers: &'a mut [TimerCb<C>],
}

impl<C: KernelCfg> HeapCtx<'_, C> {
    #[inline]
    fn node(&mut self, r: TimeoutRef) -> &mut TimeoutNode {
        match r.0 {
            Target::Thread(t) => &mut self.threads[t].timeout,
            Target::Timer(i) => &mut self.timers[i].timeout,
        }
    }
}

impl<C: KernelCfg> BinaryHeapCtx<TimeoutRef> for HeapCtx<'_, C> {
    #[inline]
    fn lt(&mut self, x: &TimeoutRef, y: &TimeoutRef) -> bool {
        let x = self.node(*x).at;
        let y = self.node(*y).at;
        tick_before(x, y)
    }

    #[inline]
    fn on_move(&mut self, e: &mut TimeoutRef, new_index: usize) {
        self.node(*e).heap_pos = new_index;
    }
}

fn node<C: KernelCfg>(st: &State<C>, r: TimeoutRef) -> &TimeoutNode {
    match r.0 {
        Target::Thread(t) => &st.threads[t].timeout,
        Target::Timer(i) => &st.timers[i].timeout,
    }
}

fn node_mut<C: KernelCfg>(st: &mut State<C>, r: TimeoutRef) -> &mut TimeoutNode {
    match r.0 {
        Target::Thread(t) => &mut st.threads[t].timeout,
        Target::Timer(i) => &mut st.timers[i].timeout,
    }
}

/// Arm the timeout of `r` to expire `delay` ticks from now. A zero delay
/// expires on the next tick announcement. Re-arms an armed timeout.
pub(crate) fn arm<C: KernelCfg>(
    st: &mut State<C>,
    r: TimeoutRef,
    delay: u32,
) -> Result<(), FatalError> {
    let at = st.now.wrapping_add(delay.min(MAX_TIMEOUT_TICKS));
    arm_at(st, r, at)
}

/// Arm the timeout of `r` to expire at the tick `at`, which must not be more
/// than [`MAX_TIMEOUT_TICKS`] ticks away from now.
pub(crate) fn arm_at<C: KernelCfg>(
    st: &mut State<C>,
    r: TimeoutRef,
    at: Tick,
) -> Result<(), FatalError> {
    cancel(st, r);

    let node = node_mut(st, r);
    node.at = at;
    node.state = TimeoutState::Armed;

    let ctx = HeapCtx {
        threads: &mut st.threads,
        timers: &mut st.timers,
    };
    if st.timeouts.heap_push(r, ctx).is_err() {
        node_mut(st, r).state = TimeoutState::Idle;
        return Err(FatalError::ResourceExhausted(Resource::Timeouts));
    }
    Ok(())
}

/// Disarm the timeout of `r`. Returns `false` (and does nothing) if it's not
/// armed.
pub(crate) fn cancel<C: KernelCfg>(st: &mut State<C>, r: TimeoutRef) -> bool {
    let node = node(st, r);
    if node.state != TimeoutState::Armed {
        return false;
    }
    let pos = node.heap_pos;

    let ctx = HeapCtx {
        threads: &mut st.threads,
        timers: &mut st.timers,
    };
    let removed = st.timeouts.heap_remove(pos, ctx);
    debug_assert_eq!(removed, Some(r));

    let node = node_mut(st, r);
    node.state = TimeoutState::Cancelled;
    node.heap_pos = HEAP_POS_NONE;
    true
}

/// Get the number of ticks until the timeout of `r` expires, or `None` if
/// it's not armed.
pub(crate) fn remaining<C: KernelCfg>(st: &State<C>, r: TimeoutRef) -> Option<u32> {
    let node = node(st, r);
    (node.state == TimeoutState::Armed).then(|| ticks_until(st.now, node.at))
}

/// Get the number of ticks until the earliest timeout expires.
pub(crate) fn next_expiry<C: KernelCfg>(st: &State<C>) -> Option<u32> {
    let first = *st.timeouts.first()?;
    Some(ticks_until(st.now, node(st, first).at))
}

/// Remove the earliest timeout if it expires at or before `until`, and
/// advance the current tick to its expiry tick.
fn pop_expired<C: KernelCfg>(st: &mut State<C>, until: Tick) -> Option<TimeoutRef> {
    let first = *st.timeouts.first()?;
    let at = node(st, first).at;
    if tick_before(until, at) {
        return None;
    }

    let ctx = HeapCtx {
        threads: &mut st.threads,
        timers: &mut st.timers,
    };
    st.timeouts.heap_pop(ctx);

    let node = node_mut(st, first);
    node.state = TimeoutState::Fired;
    node.heap_pos = HEAP_POS_NONE;

    advance_to(st, at);
    Some(first)
}

/// Advance the current tick to `to` if it's in the future.
fn advance_to<C: KernelCfg>(st: &mut State<C>, to: Tick) {
    if tick_before(st.now, to) {
        st.uptime += u64::from(to.wrapping_sub(st.now));
        st.now = to;
    }
}

impl<C: KernelCfg> Kernel<C> {
    /// Advance the system time by `ticks` and process the expired timeouts
    /// in expiry order. Called by the port's timer interrupt handler.
    ///
    /// Timer expiry functions are called from here with the kernel lock
    /// released.
    pub fn announce(&self, mut ticks: u32) {
        let mut lock = self.lock();
        crate::sched::tick_time_slices(&mut lock, ticks);

        // Ticks further apart than `MAX_TIMEOUT_TICKS` can't be ordered, so a
        // long announcement is processed in steps
        loop {
            let step = ticks.min(MAX_TIMEOUT_TICKS);
            ticks -= step;
            let until = lock.now.wrapping_add(step);

            while let Some(r) = pop_expired(&mut lock, until) {
                match r.0 {
                    Target::Thread(t) => thread::timeout_expired(&mut lock, t),
                    Target::Timer(i) => match timer::expired(&mut lock, i) {
                        Ok(Some(expiry_fn)) => {
                            drop(lock);
                            expiry_fn(self, TimerId::from_index(i));
                            lock = self.lock();
                        }
                        Ok(None) => {}
                        Err(e) => self.fatal(e),
                    },
                }
            }
            advance_to(&mut lock, until);

            if ticks == 0 {
                break;
            }
        }

        self.timeouts_changed(&lock);
        self.unlock_and_check_preemption(lock);
    }

    /// Tell the port when the earliest timeout expires.
    pub(crate) fn timeouts_changed(&self, st: &State<C>) {
        self.port.set_next_timeout(next_expiry(st));
    }

    /// Get the current tick count. Wraps around.
    pub fn tick_count(&self) -> Tick {
        self.lock().now
    }

    /// Get the number of ticks since boot.
    pub fn uptime_ticks(&self) -> u64 {
        self.lock().uptime
    }
}
