//! Wait queues
//!
//! A wait queue is a priority-ordered intrusive list of the threads blocked
//! on one object. Each thread records the object it's waiting on
//! ([`WaitObject`]), which is how the timeout and abort paths find the queue
//! to unlink the thread from.
use crate::{
    error::WaitError,
    sched,
    state::State,
    thread::{ThreadCb, ThreadState},
    time::Timeout,
    timeout::{self, TimeoutRef},
    utils::{
        intrusive_list::{Link, ListAccessor, ListHead},
        Init,
    },
    FatalError, KernelCfg,
};

/// The header of a wait queue.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WaitQueue {
    waiters: ListHead<usize>,
}

impl WaitQueue {
    pub(crate) const INIT: Self = Self {
        waiters: ListHead::INIT,
    };

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Get the highest-priority waiter.
    #[inline]
    pub(crate) fn first(&self) -> Option<usize> {
        self.waiters.first
    }
}

/// What a thread is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    Semaphore(usize),
    Mutex(usize),
    Queue(usize),
    CondVar(usize),
    /// The expiry of a timer
    Timer(usize),
    /// The termination of a thread
    Join(usize),
    /// Nothing; woken by a timeout or an explicit wake-up
    Sleep,
}

/// The wait state embedded in a thread control block.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ThreadWait {
    pub(crate) link: Option<Link<usize>>,
    /// The object the thread is waiting on
    pub(crate) object: Option<WaitObject>,
    /// Set by whoever ends the wait
    pub(crate) result: Result<(), WaitError>,
    /// A word handed to the thread along with the result
    pub(crate) payload: usize,
}

impl ThreadWait {
    pub(crate) const INIT: Self = Self {
        link: None,
        object: None,
        result: Ok(()),
        payload: 0,
    };
}

type WaitAccessor<'a, C> = ListAccessor<
    'a,
    usize,
    [ThreadCb<C>],
    for<'x> fn(&'x mut ThreadCb<C>) -> &'x mut Option<Link<usize>>,
>;

fn queue_mut<C: KernelCfg>(st: &mut State<C>, object: WaitObject) -> Option<&mut WaitQueue> {
    Some(match object {
        WaitObject::Semaphore(i) => &mut st.semaphores[i].wait_queue,
        WaitObject::Mutex(i) => &mut st.mutexes[i].wait_queue,
        WaitObject::Queue(i) => &mut st.queues[i].wait_queue,
        WaitObject::CondVar(i) => &mut st.condvars[i].wait_queue,
        WaitObject::Timer(i) => &mut st.timers[i].wait_queue,
        WaitObject::Join(t) => &mut st.threads[t].join_queue,
        WaitObject::Sleep => return None,
    })
}

/// Run `f` on the wait queue of `object`.
///
/// The queue header is copied out and written back afterwards because a join
/// queue lives in the very pool the list links through.
fn with_waiters<C: KernelCfg, R>(
    st: &mut State<C>,
    object: WaitObject,
    f: impl FnOnce(&mut WaitAccessor<'_, C>) -> R,
) -> Option<R> {
    let mut queue = *queue_mut(st, object)?;
    let map_link: for<'x> fn(&'x mut ThreadCb<C>) -> &'x mut Option<Link<usize>> =
        |cb| &mut cb.wait.link;
    let result = f(&mut ListAccessor::new(
        &mut queue.waiters,
        &mut st.threads[..],
        map_link,
    ));
    if let Some(slot) = queue_mut(st, object) {
        *slot = queue;
    }
    Some(result)
}

/// Insert `t` after every waiter whose effective priority is higher than or
/// equal to its own.
fn insert_by_priority<C: KernelCfg>(accessor: &mut WaitAccessor<'_, C>, t: usize) {
    let priority = accessor.pool()[t].effective_priority;

    // Scan from the back; waiters usually arrive with similar priorities
    let mut insert_at = None;
    let mut cursor = accessor.back();
    while let Some(next) = cursor {
        if accessor.pool()[next].effective_priority <= priority {
            break;
        }
        insert_at = Some(next);
        cursor = accessor.prev(next).unwrap_or(None);
    }

    if accessor.insert(t, insert_at).is_err() {
        panic!("thread {t} is already waiting");
    }
}

/// Block the thread `t` on `object` until it's woken or `timeout` expires.
/// The caller is responsible for switching away from `t`.
///
/// `timeout` must not satisfy [`Timeout::is_no_wait`]; the caller handles
/// that case without blocking.
pub(crate) fn pend<C: KernelCfg>(
    st: &mut State<C>,
    t: usize,
    object: WaitObject,
    timeout: Timeout,
) -> Result<(), FatalError> {
    debug_assert!(!timeout.is_no_wait());

    let cb = &mut st.threads[t];
    cb.wait.object = Some(object);
    cb.wait.result = Ok(());
    cb.wait.payload = 0;
    cb.st = match timeout {
        Timeout::Forever => ThreadState::Waiting,
        _ => ThreadState::WaitingWithTimeout,
    };

    with_waiters(st, object, |waiters| insert_by_priority(waiters, t));

    if let Some(delay) = timeout.delay() {
        timeout::arm(st, TimeoutRef::thread(t), delay)?;
    }

    log::trace!("thread {} waits on {:?} ({:?})", t, object, timeout);
    Ok(())
}

/// Remove the waiting thread `t` from its wait queue and disarm its timeout
/// without making it runnable. Returns the object it was waiting on.
pub(crate) fn unlink<C: KernelCfg>(st: &mut State<C>, t: usize) -> Option<WaitObject> {
    let object = st.threads[t].wait.object.take()?;
    with_waiters(st, object, |waiters| waiters.remove(t).is_ok());
    timeout::cancel(st, TimeoutRef::thread(t));
    Some(object)
}

/// End the wait of the thread `t` with `result` and make it Ready (or
/// Suspended if a suspension was requested while it was waiting).
pub(crate) fn wake<C: KernelCfg>(st: &mut State<C>, t: usize, result: Result<(), WaitError>) {
    unlink(st, t);

    let cb = &mut st.threads[t];
    cb.wait.result = result;
    if cb.suspend_pending {
        cb.suspend_pending = false;
        cb.st = ThreadState::Suspended;
    } else {
        sched::make_ready(st, t);
    }
}

/// Get the highest-priority waiter of `object`.
pub(crate) fn first_waiter<C: KernelCfg>(st: &mut State<C>, object: WaitObject) -> Option<usize> {
    with_waiters(st, object, |waiters| waiters.front()).flatten()
}

/// Wake the highest-priority waiter of `object` with `result`. Returns the
/// woken thread.
pub(crate) fn wake_one<C: KernelCfg>(
    st: &mut State<C>,
    object: WaitObject,
    result: Result<(), WaitError>,
) -> Option<usize> {
    let t = first_waiter(st, object)?;
    wake(st, t, result);
    Some(t)
}

/// Wake every waiter of `object` with `result`. Returns the number of woken
/// threads.
pub(crate) fn wake_all<C: KernelCfg>(
    st: &mut State<C>,
    object: WaitObject,
    result: Result<(), WaitError>,
) -> usize {
    let mut count = 0;
    while wake_one(st, object, result).is_some() {
        count += 1;
    }
    count
}

/// Reposition the waiting thread `t` after a change in its effective
/// priority.
pub(crate) fn reorder<C: KernelCfg>(st: &mut State<C>, t: usize) {
    let Some(object) = st.threads[t].wait.object else {
        return;
    };
    with_waiters(st, object, |waiters| {
        if waiters.remove(t).is_ok() {
            insert_by_priority(waiters, t);
        }
    });
}

/// Get the waiters of `object` in order.
#[cfg(test)]
pub(crate) fn waiters<C: KernelCfg>(st: &mut State<C>, object: WaitObject) -> Vec<usize> {
    with_waiters(st, object, |waiters| {
        let mut out = Vec::new();
        let mut cursor = waiters.front();
        while let Some(t) = cursor {
            out.push(t);
            cursor = waiters.next(t).unwrap();
        }
        out
    })
    .unwrap_or_default()
}
