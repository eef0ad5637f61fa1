//! Condition variables
use crate::{
    error::{Resource, WaitError},
    mutex,
    state::State,
    time::Timeout,
    utils::VecLike,
    wait::{self, WaitObject, WaitQueue},
    CondVarId, FatalError, Kernel, KernelCfg, MutexId,
};

/// *Condition variable control block*
#[derive(Debug, Clone, Copy)]
pub struct CondVarCb {
    pub(crate) wait_queue: WaitQueue,
}

impl CondVarCb {
    pub(crate) const INIT: Self = Self {
        wait_queue: WaitQueue::INIT,
    };
}

impl<C: KernelCfg> Kernel<C> {
    #[inline]
    fn condvar_index(&self, st: &State<C>, condvar: CondVarId) -> usize {
        self.checked_index(condvar.index(), st.condvars.len())
    }

    pub fn condvar_init(&self) -> CondVarId {
        let mut lock = self.lock();
        let c = lock.condvars.len();
        if lock.condvars.try_push(CondVarCb::INIT).is_err() {
            self.fatal(FatalError::ResourceExhausted(Resource::CondVars));
        }
        CondVarId::from_index(c)
    }

    /// Wake the highest-priority waiter.
    pub fn condvar_signal(&self, condvar: CondVarId) {
        let mut lock = self.lock();
        let c = self.condvar_index(&lock, condvar);
        wait::wake_one(&mut lock, WaitObject::CondVar(c), Ok(()));
        self.unlock_and_check_preemption(lock);
    }

    /// Wake every waiter. Returns the number of woken threads.
    pub fn condvar_broadcast(&self, condvar: CondVarId) -> usize {
        let mut lock = self.lock();
        let c = self.condvar_index(&lock, condvar);
        let woken = wait::wake_all(&mut lock, WaitObject::CondVar(c), Ok(()));
        self.unlock_and_check_preemption(lock);
        woken
    }

    /// Release one level of `mutex` and wait for a signal, atomically. The
    /// mutex is locked again before returning, whatever the outcome.
    pub fn condvar_wait(
        &self,
        condvar: CondVarId,
        mutex: MutexId,
        timeout: Timeout,
    ) -> Result<(), WaitError> {
        let mut lock = self.lock();
        let c = self.condvar_index(&lock, condvar);
        let m = self.checked_index(mutex.index(), lock.mutexes.len());
        let (_, me) = self.expect_waitable_context(&lock);

        if let Err(e) = mutex::unlock(&mut lock, m, me) {
            self.fatal(e);
        }

        let result = if timeout.is_no_wait() {
            self.unlock_and_check_preemption(lock);
            Err(WaitError::Timeout)
        } else {
            self.pend_current(&mut lock, me, WaitObject::CondVar(c), timeout);
            let lock = self.schedule(lock);
            let result = lock.threads[me].wait.result;
            drop(lock);
            result
        };

        let relocked = self.mutex_lock(mutex, Timeout::Forever);
        debug_assert!(relocked.is_ok());
        result
    }
}
