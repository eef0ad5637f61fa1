//! Mutexes
//!
//! A mutex is owned by at most one thread and may be locked recursively by
//! its owner. Contended mutexes implement priority inheritance: the
//! effective priority of an owner is the highest of its base priority and
//! the priorities of the first waiters of every mutex it holds. A change is
//! carried along the chain of owners (an owner may itself be waiting for
//! another mutex), up to [`KernelCfg::MAX_INHERITANCE_DEPTH`] hops.
//!
//! The mutexes held by a thread form a singly-linked list starting at
//! `ThreadCb::last_mutex_held`.
use crate::{
    cfg::{KernelCfg, Priority},
    error::{LockError, Resource},
    state::State,
    thread,
    time::Timeout,
    utils::VecLike,
    wait::{self, WaitObject, WaitQueue},
    FatalError, Kernel, MutexId, ThreadId,
};

/// *Mutex control block* - the state data of a mutex.
#[derive(Debug, Clone, Copy)]
pub struct MutexCb {
    pub(crate) owner: Option<usize>,
    /// The recursion count. Non-zero iff `owner.is_some()`.
    pub(crate) lock_count: u32,
    pub(crate) wait_queue: WaitQueue,
    /// The mutex the owner locked before this one.
    pub(crate) prev_held: Option<usize>,
}

impl MutexCb {
    pub(crate) const INIT: Self = Self {
        owner: None,
        lock_count: 0,
        wait_queue: WaitQueue::INIT,
        prev_held: None,
    };
}

/// The outcome of [`try_lock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryLock {
    Acquired,
    Busy,
}

/// Get the priority `t` should run at: its base priority, raised to the
/// priority of the first waiter of each mutex it holds.
pub(crate) fn inherited_priority<C: KernelCfg>(st: &State<C>, t: usize) -> Priority {
    let mut priority = st.threads[t].base_priority;
    let mut cursor = st.threads[t].last_mutex_held;
    while let Some(m) = cursor {
        if let Some(w) = st.mutexes[m].wait_queue.first() {
            priority = priority.min(st.threads[w].effective_priority);
        }
        cursor = st.mutexes[m].prev_held;
    }
    priority
}

/// Re-evaluate the effective priorities along the chain of owners starting
/// at the owner of `m`, after the set of waiters of `m` or their priorities
/// changed.
pub(crate) fn propagate<C: KernelCfg>(st: &mut State<C>, mut m: usize) {
    for _ in 0..C::MAX_INHERITANCE_DEPTH {
        let Some(owner) = st.mutexes[m].owner else {
            return;
        };
        let priority = inherited_priority(st, owner);
        if !thread::set_effective_priority(st, owner, priority) {
            return;
        }
        match st.threads[owner].wait.object {
            Some(WaitObject::Mutex(next)) => m = next,
            _ => return,
        }
    }
    log::warn!(
        "priority inheritance chain truncated after {} hops at mutex {}",
        C::MAX_INHERITANCE_DEPTH,
        m
    );
}

/// Make `t` the owner of the unlocked mutex `m`.
fn acquire<C: KernelCfg>(st: &mut State<C>, m: usize, t: usize) {
    let prev = st.threads[t].last_mutex_held.replace(m);
    let mx = &mut st.mutexes[m];
    debug_assert!(mx.owner.is_none());
    mx.owner = Some(t);
    mx.lock_count = 1;
    mx.prev_held = prev;
}

/// Remove `m` from the held-mutex list of its owner `t`.
fn unlink_held<C: KernelCfg>(st: &mut State<C>, t: usize, m: usize) {
    let next_prev = st.mutexes[m].prev_held.take();
    if st.threads[t].last_mutex_held == Some(m) {
        st.threads[t].last_mutex_held = next_prev;
        return;
    }
    let mut cursor = st.threads[t].last_mutex_held;
    while let Some(held) = cursor {
        if st.mutexes[held].prev_held == Some(m) {
            st.mutexes[held].prev_held = next_prev;
            return;
        }
        cursor = st.mutexes[held].prev_held;
    }
    debug_assert!(false, "mutex {m} is not held by thread {t}");
}

fn try_lock<C: KernelCfg>(st: &mut State<C>, m: usize, t: usize) -> Result<TryLock, FatalError> {
    let mx = &mut st.mutexes[m];
    match mx.owner {
        None => {
            acquire(st, m, t);
            Ok(TryLock::Acquired)
        }
        Some(owner) if owner == t => {
            if mx.lock_count >= C::MAX_MUTEX_RECURSION {
                return Err(FatalError::RecursionLimit);
            }
            mx.lock_count += 1;
            Ok(TryLock::Acquired)
        }
        Some(_) => Ok(TryLock::Busy),
    }
}

/// Detach `m` from its owner and hand it over to its first waiter, if any.
/// The caller is responsible for re-evaluating the previous owner's
/// priority.
fn release<C: KernelCfg>(st: &mut State<C>, m: usize) {
    let Some(owner) = st.mutexes[m].owner.take() else {
        return;
    };
    unlink_held(st, owner, m);
    st.mutexes[m].lock_count = 0;

    if let Some(w) = st.mutexes[m].wait_queue.first() {
        acquire(st, m, w);
        wait::wake(st, w, Ok(()));
        // The new owner inherits from the remaining waiters
        thread::update_effective_priority(st, w);
        log::trace!("mutex {} handed over from thread {} to {}", m, owner, w);
    }
}

/// Undo one level of locking of `m` by `t`.
pub(crate) fn unlock<C: KernelCfg>(st: &mut State<C>, m: usize, t: usize) -> Result<(), FatalError> {
    let mx = &mut st.mutexes[m];
    match mx.owner {
        None => return Err(FatalError::NotLocked),
        Some(owner) if owner != t => return Err(FatalError::NotOwner),
        Some(_) => {}
    }

    mx.lock_count -= 1;
    if mx.lock_count == 0 {
        release(st, m);
        thread::update_effective_priority(st, t);
    }
    Ok(())
}

/// Release every mutex held by the dying thread `t`.
pub(crate) fn release_all<C: KernelCfg>(st: &mut State<C>, t: usize) {
    while let Some(m) = st.threads[t].last_mutex_held {
        log::warn!("thread {} exited while holding mutex {}", t, m);
        release(st, m);
    }
}

impl<C: KernelCfg> Kernel<C> {
    #[inline]
    fn mutex_index(&self, st: &State<C>, mutex: MutexId) -> usize {
        self.checked_index(mutex.index(), st.mutexes.len())
    }

    /// Create an unlocked mutex.
    pub fn mutex_init(&self) -> MutexId {
        let mut lock = self.lock();
        let m = lock.mutexes.len();
        if lock.mutexes.try_push(MutexCb::INIT).is_err() {
            self.fatal(FatalError::ResourceExhausted(Resource::Mutexes));
        }
        MutexId::from_index(m)
    }

    /// Lock a mutex, waiting up to `timeout` for the owner to release it.
    ///
    /// While the caller waits, the owner runs at the caller's priority if
    /// that is higher than its own.
    pub fn mutex_lock(&self, mutex: MutexId, timeout: Timeout) -> Result<(), LockError> {
        let mut lock = self.lock();
        let m = self.mutex_index(&lock, mutex);
        let (_, me) = self.expect_thread_context(&lock);

        match try_lock(&mut lock, m, me) {
            Ok(TryLock::Acquired) => return Ok(()),
            Ok(TryLock::Busy) => {}
            Err(e) => self.fatal(e),
        }
        if timeout.is_no_wait() {
            return Err(LockError::WouldBlock);
        }

        self.expect_waitable_context(&lock);
        self.pend_current(&mut lock, me, WaitObject::Mutex(m), timeout);
        propagate(&mut lock, m);

        let lock = self.schedule(lock);
        let result = lock.threads[me].wait.result;
        debug_assert!(result.is_err() || lock.mutexes[m].owner == Some(me));
        result.map_err(|_| LockError::Timeout)
    }

    /// Undo one level of locking. The mutex is handed over to its
    /// highest-priority waiter when the recursion count reaches zero.
    ///
    /// Unlocking a mutex not owned by the caller is a fatal error.
    pub fn mutex_unlock(&self, mutex: MutexId) {
        let mut lock = self.lock();
        let m = self.mutex_index(&lock, mutex);
        let (_, me) = self.expect_thread_context(&lock);
        if let Err(e) = unlock(&mut lock, m, me) {
            self.fatal(e);
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Get the owner of a mutex.
    pub fn mutex_owner(&self, mutex: MutexId) -> Option<ThreadId> {
        let lock = self.lock();
        let m = self.mutex_index(&lock, mutex);
        lock.mutexes[m].owner.map(|t| lock.thread_id(t))
    }
}
