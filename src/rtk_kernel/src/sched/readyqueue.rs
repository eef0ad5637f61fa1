//! Per-CPU ready queue
//!
//! One intrusive FIFO list per priority level plus a bitmap of the non-empty
//! levels, so finding the highest-priority Ready thread takes constant time.
use core::fmt;

use crate::{
    cfg::{level_of, KernelCfg, Priority},
    thread::ThreadCb,
    utils::{
        intrusive_list::{Link, ListAccessor, ListHead},
        Init, PrioBitmap, PRIO_BITMAP_LEN,
    },
};

type ReadyAccessor<'a, C> = ListAccessor<
    'a,
    usize,
    [ThreadCb<C>],
    for<'x> fn(&'x mut ThreadCb<C>) -> &'x mut Option<Link<usize>>,
>;

pub(crate) struct ReadyQueue {
    heads: [ListHead<usize>; PRIO_BITMAP_LEN],
    /// `bitmap.get(i) == heads[i].first.is_some()`
    bitmap: PrioBitmap,
}

impl Init for ReadyQueue {
    const INIT: Self = Self {
        heads: [ListHead::INIT; PRIO_BITMAP_LEN],
        bitmap: PrioBitmap::INIT,
    };
}

impl fmt::Debug for ReadyQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.bitmap.iter().map(|level| (level, self.heads[level])))
            .finish()
    }
}

impl ReadyQueue {
    fn accessor<'a, C: KernelCfg>(
        head: &'a mut ListHead<usize>,
        threads: &'a mut [ThreadCb<C>],
    ) -> ReadyAccessor<'a, C> {
        let map_link: for<'x> fn(&'x mut ThreadCb<C>) -> &'x mut Option<Link<usize>> =
            |cb| &mut cb.ready_link;
        ListAccessor::new(head, threads, map_link)
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.bitmap.is_empty()
    }

    /// Insert the thread `t` at the back of its level.
    pub(crate) fn push_back<C: KernelCfg>(&mut self, threads: &mut [ThreadCb<C>], t: usize) {
        let level = level_of::<C>(threads[t].effective_priority);
        let mut accessor = Self::accessor(&mut self.heads[level], threads);
        if accessor.push_back(t).is_err() {
            inconsistent();
        }
        self.bitmap.set(level);
    }

    /// Insert the thread `t` at the front of its level.
    pub(crate) fn push_front<C: KernelCfg>(&mut self, threads: &mut [ThreadCb<C>], t: usize) {
        let level = level_of::<C>(threads[t].effective_priority);
        let mut accessor = Self::accessor(&mut self.heads[level], threads);
        if accessor.push_front(t).is_err() {
            inconsistent();
        }
        self.bitmap.set(level);
    }

    /// Remove the thread `t`, which must be in this queue at the level of
    /// its current effective priority.
    pub(crate) fn remove<C: KernelCfg>(&mut self, threads: &mut [ThreadCb<C>], t: usize) {
        let level = level_of::<C>(threads[t].effective_priority);
        let mut accessor = Self::accessor(&mut self.heads[level], threads);
        if accessor.remove(t).is_err() {
            inconsistent();
        }
        if accessor.is_empty() {
            self.bitmap.clear(level);
        }
    }

    /// Get the first thread of the highest non-empty level.
    pub(crate) fn front(&self) -> Option<usize> {
        let level = self.bitmap.find_set()?;
        self.heads[level].first
    }

    /// Find the first thread (in priority order) satisfying `pred` whose
    /// priority is strictly higher than `bound`. Returns the thread and its
    /// priority.
    pub(crate) fn find<C: KernelCfg>(
        &mut self,
        threads: &mut [ThreadCb<C>],
        bound: Priority,
        mut pred: impl FnMut(&ThreadCb<C>) -> bool,
    ) -> Option<usize> {
        let bound_level = level_of::<C>(bound);
        for level in self.bitmap.iter().take_while(|&level| level < bound_level) {
            let mut accessor = Self::accessor(&mut self.heads[level], threads);
            let mut cursor = accessor.front();
            while let Some(t) = cursor {
                if pred(&accessor.pool()[t]) {
                    return Some(t);
                }
                cursor = accessor.next(t).unwrap_or(None);
            }
        }
        None
    }

    /// Iterate over the threads in priority order.
    #[cfg(test)]
    pub(crate) fn to_vec<C: KernelCfg>(&mut self, threads: &mut [ThreadCb<C>]) -> Vec<usize> {
        let mut out = Vec::new();
        for level in self.bitmap.iter() {
            let mut accessor = Self::accessor(&mut self.heads[level], threads);
            let mut cursor = accessor.front();
            while let Some(t) = cursor {
                out.push(t);
                cursor = accessor.next(t).unwrap();
            }
        }
        out
    }
}

#[cold]
fn inconsistent() -> ! {
    panic!("ready queue is inconsistent");
}
