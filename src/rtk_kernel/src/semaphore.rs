//! Counting semaphores
use crate::{
    error::{Resource, TakeError, WaitError},
    state::State,
    time::Timeout,
    utils::VecLike,
    wait::{self, WaitObject, WaitQueue},
    FatalError, Kernel, KernelCfg, SemaphoreId,
};

/// *Semaphore control block* - the state data of a semaphore.
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreCb {
    /// `0 <= count <= limit`
    pub(crate) count: u32,
    pub(crate) limit: u32,
    pub(crate) wait_queue: WaitQueue,
}

impl SemaphoreCb {
    pub(crate) const INIT: Self = Self {
        count: 0,
        limit: 1,
        wait_queue: WaitQueue::INIT,
    };
}

/// Give the semaphore `s`: hand the unit to the first waiter, or increment
/// the count if nobody waits.
pub(crate) fn give<C: KernelCfg>(st: &mut State<C>, s: usize) {
    let object = WaitObject::Semaphore(s);
    if wait::wake_one(st, object, Ok(())).is_none() {
        let sem = &mut st.semaphores[s];
        if sem.count < sem.limit {
            sem.count += 1;
        }
    }
}

impl<C: KernelCfg> Kernel<C> {
    #[inline]
    fn semaphore_index(&self, st: &State<C>, semaphore: SemaphoreId) -> usize {
        self.checked_index(semaphore.index(), st.semaphores.len())
    }

    /// Create a semaphore with the count `initial` and the maximum count
    /// `limit`.
    pub fn sem_init(&self, initial: u32, limit: u32) -> SemaphoreId {
        if limit == 0 || initial > limit {
            self.fatal(FatalError::BadParam);
        }
        let mut lock = self.lock();
        let s = lock.semaphores.len();
        let cb = SemaphoreCb {
            count: initial,
            limit,
            ..SemaphoreCb::INIT
        };
        if lock.semaphores.try_push(cb).is_err() {
            self.fatal(FatalError::ResourceExhausted(Resource::Semaphores));
        }
        SemaphoreId::from_index(s)
    }

    /// Give a semaphore. Wakes the highest-priority waiter, or increments
    /// the count (saturating at the limit) if there is none. Can be called
    /// from an interrupt handler.
    pub fn sem_give(&self, semaphore: SemaphoreId) {
        let mut lock = self.lock();
        let s = self.semaphore_index(&lock, semaphore);
        give(&mut lock, s);
        self.unlock_and_check_preemption(lock);
    }

    /// Take a semaphore, waiting up to `timeout` for the count to become
    /// positive.
    pub fn sem_take(&self, semaphore: SemaphoreId, timeout: Timeout) -> Result<(), TakeError> {
        let mut lock = self.lock();
        let s = self.semaphore_index(&lock, semaphore);

        if lock.semaphores[s].count > 0 {
            lock.semaphores[s].count -= 1;
            return Ok(());
        }
        if timeout.is_no_wait() {
            return Err(TakeError::WouldBlock);
        }

        let (_, me) = self.expect_waitable_context(&lock);
        self.pend_current(&mut lock, me, WaitObject::Semaphore(s), timeout);
        let lock = self.schedule(lock);
        let result = lock.threads[me].wait.result;
        result.map_err(TakeError::from)
    }

    /// Set the count to zero and wake every waiter with
    /// [`TakeError::Interrupted`].
    pub fn sem_reset(&self, semaphore: SemaphoreId) {
        let mut lock = self.lock();
        let s = self.semaphore_index(&lock, semaphore);
        lock.semaphores[s].count = 0;
        let woken = wait::wake_all(
            &mut lock,
            WaitObject::Semaphore(s),
            Err(WaitError::Interrupted),
        );
        log::trace!("semaphore {} reset, {} waiter(s) interrupted", s, woken);
        self.unlock_and_check_preemption(lock);
    }

    /// Get the current count.
    pub fn sem_count(&self, semaphore: SemaphoreId) -> u32 {
        let lock = self.lock();
        let s = self.semaphore_index(&lock, semaphore);
        lock.semaphores[s].count
    }
}
