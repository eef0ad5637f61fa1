//! The scheduler core
//!
//! The functions in this module operate on [`State`] only and never switch
//! contexts. They record their decisions: `make_ready` marks the CPUs that
//! must reschedule in `State::resched`, and `dispatch` returns the [`Switch`]
//! the calling CPU must perform. [`Kernel::unlock_and_check_preemption`] and
//! [`Kernel::schedule`] turn the decisions into IPIs and context switches.
use core::mem;

use crate::{
    cfg::{idle_priority, KernelCfg, Priority},
    state::State,
    thread::ThreadState,
    Kernel, KernelGuard, Port,
};

pub(crate) mod readyqueue;

/// A context switch decided by [`dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Switch {
    pub(crate) from: usize,
    pub(crate) to: usize,
}

/// Get a flag indicating whether the CPU `cpu` has nothing to do, i.e., it
/// runs its idle thread (or hasn't booted yet) and has no Ready threads.
fn is_cpu_idle<C: KernelCfg>(st: &State<C>, cpu: usize) -> bool {
    let running_idle = match st.cpus[cpu].current {
        Some(t) => st.threads[t].is_idle,
        None => true,
    };
    running_idle && st.cpus[cpu].ready.is_empty()
}

/// Get a flag indicating whether a Ready thread with `priority` should
/// preempt the running thread of `cpu`.
fn should_preempt<C: KernelCfg>(st: &State<C>, cpu: usize, priority: Priority) -> bool {
    let Some(current) = st.cpus[cpu].current else {
        return false;
    };
    let cb = &st.threads[current];
    if cb.st != ThreadState::Running || cb.is_idle {
        return true;
    }
    if cb.effective_priority < 0 || cb.sched_lock > 0 {
        // Cooperative threads and threads holding the scheduler lock keep
        // the CPU
        return false;
    }
    priority < cb.effective_priority
}

/// Choose the CPU to queue the thread `t` on.
fn choose_cpu<C: KernelCfg>(st: &State<C>, t: usize) -> usize {
    let cb = &st.threads[t];
    if let Some(cpu) = cb.pinned {
        return cpu;
    }
    if C::NUM_CPUS == 1 {
        return 0;
    }

    // An idle CPU, the last one first
    if is_cpu_idle(st, cb.cpu) {
        return cb.cpu;
    }
    if let Some(cpu) = st.cpu_ids().find(|&cpu| is_cpu_idle(st, cpu)) {
        return cpu;
    }

    // The CPU running the lowest-priority thread that `t` preempts
    st.cpu_ids()
        .filter(|&cpu| should_preempt(st, cpu, cb.effective_priority))
        .filter_map(|cpu| Some((cpu, st.threads[st.cpus[cpu].current?].effective_priority)))
        .max_by_key(|&(cpu, priority)| (priority, cpu == cb.cpu))
        .map(|(cpu, _)| cpu)
        .unwrap_or(cb.cpu)
}

/// Transition the thread `t` to the Ready state and queue it on a CPU.
pub(crate) fn make_ready<C: KernelCfg>(st: &mut State<C>, t: usize) {
    debug_assert!(!st.threads[t].is_idle);
    let cpu = choose_cpu(st, t);
    let cb = &mut st.threads[t];
    cb.st = ThreadState::Ready;
    cb.cpu = cpu;
    let priority = cb.effective_priority;
    st.cpus[cpu].ready.push_back(&mut st.threads, t);

    log::trace!("thread {} ready on CPU {} (priority {})", t, cpu, priority);

    if should_preempt(st, cpu, priority) {
        st.request_resched(cpu);
    }
}

/// Remove the Ready thread `t` from its ready queue. The caller is
/// responsible for updating its state.
pub(crate) fn remove_ready<C: KernelCfg>(st: &mut State<C>, t: usize) {
    debug_assert_eq!(st.threads[t].st, ThreadState::Ready);
    let cpu = st.threads[t].cpu;
    st.cpus[cpu].ready.remove(&mut st.threads, t);
}

/// Move the running thread of `cpu` to the back of its level. The next
/// `dispatch` on `cpu` picks the next thread of the same priority, if any.
pub(crate) fn yield_current<C: KernelCfg>(st: &mut State<C>, cpu: usize) {
    let Some(t) = st.cpus[cpu].current else {
        return;
    };
    if st.threads[t].is_idle || st.threads[t].st != ThreadState::Running {
        return;
    }
    st.threads[t].st = ThreadState::Ready;
    st.cpus[cpu].ready.push_back(&mut st.threads, t);
}

/// Find the best thread `cpu` could run: its own highest-priority Ready
/// thread, or an unpinned thread with a strictly higher priority queued on
/// another CPU. Returns the thread and the CPU whose queue holds it.
fn best_candidate<C: KernelCfg>(st: &mut State<C>, cpu: usize) -> Option<(usize, usize)> {
    let local = st.cpus[cpu].ready.front();
    let mut bound = match local {
        Some(t) => st.threads[t].effective_priority,
        None => idle_priority::<C>(),
    };
    let mut best = local.map(|t| (t, cpu));

    for other in st.cpu_ids().filter(|&other| other != cpu) {
        let found = st.cpus[other]
            .ready
            .find(&mut st.threads, bound, |cb| cb.pinned.is_none());
        if let Some(t) = found {
            bound = st.threads[t].effective_priority;
            best = Some((t, other));
        }
    }

    best
}

/// Get a flag indicating whether the running thread of `cpu` must give up
/// the CPU.
fn preemption_needed<C: KernelCfg>(st: &mut State<C>, cpu: usize, current: usize) -> bool {
    let Some((best, _)) = best_candidate(st, cpu) else {
        return false;
    };
    let cb = &st.threads[current];
    if cb.is_idle {
        return true;
    }
    if cb.effective_priority < 0 || cb.sched_lock > 0 {
        return false;
    }
    let best_priority = st.threads[best].effective_priority;
    best_priority < cb.effective_priority
        || (st.cpus[cpu].slice_expired && best_priority == cb.effective_priority)
}

/// Choose the thread to run next on `cpu` and make it the running thread.
///
/// Returns `None` if the running thread stays. A running thread that is
/// preempted goes back to the front of its level, or to the back if its time
/// slice expired. A running thread that blocked, yielded, got suspended or
/// died is replaced by the best candidate or the idle thread.
pub(crate) fn dispatch<C: KernelCfg>(st: &mut State<C>, cpu: usize) -> Option<Switch> {
    let current = st.cpus[cpu].current?;

    if st.threads[current].st == ThreadState::Running {
        let cb = &st.threads[current];
        if !cb.is_idle && cb.pinned.map_or(false, |pinned| pinned != cpu) {
            // Pinned to another CPU while running here
            make_ready(st, current);
        } else if !preemption_needed(st, cpu, current) {
            if mem::take(&mut st.cpus[cpu].slice_expired) {
                // Nobody to rotate with
                reload_slice(st, cpu, current);
            }
            return None;
        } else {
            let cb = &mut st.threads[current];
            cb.st = ThreadState::Ready;
            if !cb.is_idle {
                if mem::take(&mut st.cpus[cpu].slice_expired) {
                    st.cpus[cpu].ready.push_back(&mut st.threads, current);
                } else {
                    st.cpus[cpu].ready.push_front(&mut st.threads, current);
                }
            }
        }
    }
    st.cpus[cpu].slice_expired = false;

    let next = match best_candidate(st, cpu) {
        Some((t, queue_cpu)) => {
            st.cpus[queue_cpu].ready.remove(&mut st.threads, t);
            t
        }
        None => st.cpus[cpu].idle?,
    };

    let cb = &mut st.threads[next];
    cb.st = ThreadState::Running;
    cb.cpu = cpu;
    st.cpus[cpu].current = Some(next);
    reload_slice(st, cpu, next);

    if next == current {
        None
    } else {
        log::trace!("CPU {}: switching from thread {} to {}", cpu, current, next);
        Some(Switch {
            from: current,
            to: next,
        })
    }
}

pub(crate) fn reload_slice<C: KernelCfg>(st: &mut State<C>, cpu: usize, t: usize) {
    let cb = &st.threads[t];
    st.cpus[cpu].slice_left = if cb.is_idle {
        0
    } else {
        st.policy.slice_for(cb.effective_priority).unwrap_or(0)
    };
}

/// Charge `ticks` to the time slices of the running threads.
pub(crate) fn tick_time_slices<C: KernelCfg>(st: &mut State<C>, ticks: u32) {
    for cpu in st.cpu_ids() {
        let Some(t) = st.cpus[cpu].current else {
            continue;
        };
        let cb = &st.threads[t];
        if cb.is_idle
            || cb.sched_lock > 0
            || cb.st != ThreadState::Running
            || st.policy.slice_for(cb.effective_priority).is_none()
        {
            continue;
        }

        let per_cpu = &mut st.cpus[cpu];
        per_cpu.slice_left = per_cpu.slice_left.saturating_sub(ticks);
        if per_cpu.slice_left == 0 && !per_cpu.slice_expired {
            per_cpu.slice_expired = true;
            st.request_resched(cpu);
        }
    }
}

impl<C: KernelCfg> Kernel<C> {
    /// Release the kernel lock, then act on the reschedule requests recorded
    /// in `State::resched`: in a thread context, the calling CPU is
    /// rescheduled (possibly switching away from the calling thread) and the
    /// other CPUs are interrupted; in an interrupt handler, every requested
    /// CPU (including the calling one) is interrupted.
    pub(crate) fn unlock_and_check_preemption(&self, mut lock: KernelGuard<'_, C>) {
        if self.port.is_in_isr() || !lock.booted {
            let pending = if lock.booted {
                mem::take(&mut lock.resched)
            } else {
                0
            };
            drop(lock);
            self.send_ipis(pending);
            return;
        }

        drop(self.schedule(lock));
    }

    /// Reschedule the calling CPU from a thread context. Returns when the
    /// calling thread is running (again).
    ///
    /// This also carries out a pending abort or suspension of the calling
    /// thread.
    pub(crate) fn schedule<'a>(&'a self, mut lock: KernelGuard<'a, C>) -> KernelGuard<'a, C> {
        loop {
            let cpu = self.port.cpu_id();
            let Some(me) = lock.cpus[cpu].current else {
                return lock;
            };

            if lock.threads[me].abort_pending {
                self.exit_current(lock, cpu, me);
            }
            if lock.threads[me].suspend_pending && lock.threads[me].st == ThreadState::Running {
                lock.threads[me].suspend_pending = false;
                lock.threads[me].st = ThreadState::Suspended;
            }

            let switch = dispatch(&mut lock, cpu);

            let pending = mem::take(&mut lock.resched) & !(1 << cpu);
            self.send_ipis(pending);

            match switch {
                None => return lock,
                Some(switch) => lock = self.swap(lock, cpu, switch),
            }
        }
    }

    /// Switch from the calling thread to `switch.to`. Returns when the
    /// calling thread is resumed.
    fn swap<'a>(
        &'a self,
        lock: KernelGuard<'a, C>,
        cpu: usize,
        switch: Switch,
    ) -> KernelGuard<'a, C> {
        let from = lock.threads[switch.from].context.clone();
        let to = lock.threads[switch.to].context.clone();

        // Release the lock, but keep interrupts masked until this thread
        // resumes and restores its own interrupt state
        let key = lock.unlock_keep_irq();

        // Safety: Interrupts are masked, the kernel lock is released, and
        //         `from` is the calling thread's context
        unsafe { self.port.switch_context(cpu, &from, &to) };

        // Safety: Interrupts are still masked, and `key` is this thread's
        //         outstanding key
        unsafe { self.state.lock_with_key(&self.port, key) }
    }

    /// Interrupt the CPUs in the bitmask `cpus`.
    pub(crate) fn send_ipis(&self, mut cpus: u32) {
        while cpus != 0 {
            let cpu = cpus.trailing_zeros() as usize;
            cpus &= cpus - 1;
            self.port.send_ipi(cpu);
        }
    }
}
