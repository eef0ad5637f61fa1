//! Kernel timers
//!
//! A timer expires once after its initial duration and then, if it's
//! periodic, every `period` ticks. Each expiry increments its status
//! counter, calls its expiry function (from the tick announcement, in
//! interrupt context, with the kernel lock released), and wakes the threads
//! blocked in [`Kernel::timer_status_sync`].
use core::fmt;

use crate::{
    error::Resource,
    state::State,
    time::{Tick, Timeout},
    timeout::{self, TimeoutNode, TimeoutRef, TimeoutState},
    utils::VecLike,
    wait::{self, WaitObject, WaitQueue},
    FatalError, Kernel, KernelCfg, TimerId,
};

/// A timer expiry or stop function.
pub type TimerFn<C> = fn(&Kernel<C>, TimerId);

/// *Timer control block* - the state data of a timer.
pub struct TimerCb<C: KernelCfg> {
    pub(crate) timeout: TimeoutNode,
    /// The period of a periodic timer, in ticks.
    pub(crate) period: Option<Tick>,
    /// The number of expiries since the status was last read.
    pub(crate) status: u32,
    pub(crate) expiry_fn: Option<TimerFn<C>>,
    pub(crate) stop_fn: Option<TimerFn<C>>,
    pub(crate) wait_queue: WaitQueue,
    pub(crate) user_data: usize,
}

impl<C: KernelCfg> TimerCb<C> {
    #[inline]
    fn is_running(&self) -> bool {
        self.timeout.state == TimeoutState::Armed
    }
}

impl<C: KernelCfg> fmt::Debug for TimerCb<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("timeout", &self.timeout)
            .field("period", &self.period)
            .field("status", &self.status)
            .field("user_data", &self.user_data)
            .finish_non_exhaustive()
    }
}

/// Called when the timeout of the timer `i` fires. Returns the expiry
/// function to call once the kernel lock is released.
pub(crate) fn expired<C: KernelCfg>(
    st: &mut State<C>,
    i: usize,
) -> Result<Option<TimerFn<C>>, FatalError> {
    let tm = &mut st.timers[i];
    tm.status = tm.status.saturating_add(1);
    let expiry_fn = tm.expiry_fn;

    if let Some(period) = tm.period {
        // Relative to the previous expiry so that a late announcement doesn't
        // accumulate drift
        let at = tm.timeout.at.wrapping_add(period);
        timeout::arm_at(st, TimeoutRef::timer(i), at)?;
    }

    wait::wake_all(st, WaitObject::Timer(i), Ok(()));
    Ok(expiry_fn)
}

impl<C: KernelCfg> Kernel<C> {
    #[inline]
    fn timer_index(&self, st: &State<C>, timer: TimerId) -> usize {
        self.checked_index(timer.index(), st.timers.len())
    }

    /// Create a stopped timer. `expiry_fn` is called on every expiry,
    /// `stop_fn` when a running timer is stopped.
    pub fn timer_init(&self, expiry_fn: Option<TimerFn<C>>, stop_fn: Option<TimerFn<C>>) -> TimerId {
        let mut lock = self.lock();
        let i = lock.timers.len();
        let cb = TimerCb {
            timeout: TimeoutNode::INIT,
            period: None,
            status: 0,
            expiry_fn,
            stop_fn,
            wait_queue: WaitQueue::INIT,
            user_data: 0,
        };
        if lock.timers.try_push(cb).is_err() {
            self.fatal(FatalError::ResourceExhausted(Resource::Timers));
        }
        TimerId::from_index(i)
    }

    /// (Re)start a timer. It first expires after `duration`, then every
    /// `period` ([`Timeout::NoWait`] or [`Timeout::Forever`] for a one-shot
    /// timer). A `duration` of [`Timeout::Forever`] leaves it stopped.
    ///
    /// Resets the status counter.
    pub fn timer_start(&self, timer: TimerId, duration: Timeout, period: Timeout) {
        let mut lock = self.lock();
        let i = self.timer_index(&lock, timer);

        timeout::cancel(&mut lock, TimeoutRef::timer(i));
        let tm = &mut lock.timers[i];
        tm.status = 0;
        tm.period = match period.delay() {
            Some(0) | None => None,
            Some(ticks) => Some(ticks),
        };

        if let Some(delay) = duration.delay() {
            if let Err(e) = timeout::arm(&mut lock, TimeoutRef::timer(i), delay) {
                self.fatal(e);
            }
        }
        self.timeouts_changed(&lock);
    }

    /// Stop a timer. If it was running, its stop function is called (with
    /// the kernel lock released) and the threads blocked in
    /// [`Self::timer_status_sync`] are woken.
    pub fn timer_stop(&self, timer: TimerId) {
        let mut lock = self.lock();
        let i = self.timer_index(&lock, timer);
        if !timeout::cancel(&mut lock, TimeoutRef::timer(i)) {
            return;
        }
        wait::wake_all(&mut lock, WaitObject::Timer(i), Ok(()));
        let stop_fn = lock.timers[i].stop_fn;
        self.unlock_and_check_preemption(lock);

        if let Some(stop_fn) = stop_fn {
            stop_fn(self, timer);
        }
    }

    /// Get the number of expiries since the status was last read, and reset
    /// it.
    pub fn timer_status(&self, timer: TimerId) -> u32 {
        let mut lock = self.lock();
        let i = self.timer_index(&lock, timer);
        core::mem::take(&mut lock.timers[i].status)
    }

    /// Like [`Self::timer_status`], but if the count is zero and the timer is
    /// running, block until it expires or is stopped.
    pub fn timer_status_sync(&self, timer: TimerId) -> u32 {
        let mut lock = self.lock();
        let i = self.timer_index(&lock, timer);

        let tm = &lock.timers[i];
        if tm.status == 0 && tm.is_running() {
            let (_, me) = self.expect_waitable_context(&lock);
            self.pend_current(&mut lock, me, WaitObject::Timer(i), Timeout::Forever);
            lock = self.schedule(lock);
        }
        core::mem::take(&mut lock.timers[i].status)
    }

    /// Get the number of ticks until the next expiry, or `0` if the timer is
    /// stopped.
    pub fn timer_remaining_ticks(&self, timer: TimerId) -> u32 {
        let lock = self.lock();
        let i = self.timer_index(&lock, timer);
        timeout::remaining(&lock, TimeoutRef::timer(i)).unwrap_or(0)
    }

    pub fn timer_set_user_data(&self, timer: TimerId, user_data: usize) {
        let mut lock = self.lock();
        let i = self.timer_index(&lock, timer);
        lock.timers[i].user_data = user_data;
    }

    pub fn timer_user_data(&self, timer: TimerId) -> usize {
        let lock = self.lock();
        let i = self.timer_index(&lock, timer);
        lock.timers[i].user_data
    }
}
