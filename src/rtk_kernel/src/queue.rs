//! FIFO/LIFO queues of machine words
//!
//! Items are linked through nodes drawn from a node pool shared by every
//! queue (`State::queue_nodes`). Freed nodes are kept in a free list.
use crate::{
    error::{GetError, Resource, WaitError},
    state::State,
    time::Timeout,
    utils::VecLike,
    wait::{self, WaitObject, WaitQueue},
    FatalError, Kernel, KernelCfg, QueueId,
};

/// *Queue control block* - the state data of a queue.
#[derive(Debug, Clone, Copy)]
pub struct QueueCb {
    pub(crate) head: Option<usize>,
    pub(crate) tail: Option<usize>,
    pub(crate) wait_queue: WaitQueue,
}

impl QueueCb {
    pub(crate) const INIT: Self = Self {
        head: None,
        tail: None,
        wait_queue: WaitQueue::INIT,
    };
}

/// A queued item.
#[derive(Debug, Clone, Copy)]
pub struct QueueNode {
    pub(crate) item: usize,
    /// The next node of the queue, or of the free list.
    pub(crate) next: Option<usize>,
}

fn alloc_node<C: KernelCfg>(st: &mut State<C>, item: usize) -> Result<usize, FatalError> {
    let node = QueueNode { item, next: None };
    if let Some(n) = st.free_queue_node {
        st.free_queue_node = st.queue_nodes[n].next;
        st.queue_nodes[n] = node;
        return Ok(n);
    }
    let n = st.queue_nodes.len();
    st.queue_nodes
        .try_push(node)
        .map_err(|_| FatalError::ResourceExhausted(Resource::QueueNodes))?;
    Ok(n)
}

fn free_node<C: KernelCfg>(st: &mut State<C>, n: usize) {
    st.queue_nodes[n].next = st.free_queue_node;
    st.free_queue_node = Some(n);
}

/// Deliver `item` to the first consumer waiting on `q`, or link it in at the
/// tail (`lifo == false`) or the head (`lifo == true`).
fn insert<C: KernelCfg>(
    st: &mut State<C>,
    q: usize,
    item: usize,
    lifo: bool,
) -> Result<(), FatalError> {
    if let Some(w) = st.queues[q].wait_queue.first() {
        st.threads[w].wait.payload = item;
        wait::wake(st, w, Ok(()));
        return Ok(());
    }

    let n = alloc_node(st, item)?;
    let queue = &mut st.queues[q];
    if lifo {
        st.queue_nodes[n].next = queue.head;
        queue.head = Some(n);
        if queue.tail.is_none() {
            queue.tail = Some(n);
        }
    } else {
        match queue.tail {
            Some(tail) => st.queue_nodes[tail].next = Some(n),
            None => queue.head = Some(n),
        }
        queue.tail = Some(n);
    }
    Ok(())
}

fn pop<C: KernelCfg>(st: &mut State<C>, q: usize) -> Option<usize> {
    let n = st.queues[q].head?;
    let QueueNode { item, next } = st.queue_nodes[n];
    let queue = &mut st.queues[q];
    queue.head = next;
    if next.is_none() {
        queue.tail = None;
    }
    free_node(st, n);
    Some(item)
}

impl<C: KernelCfg> Kernel<C> {
    #[inline]
    fn queue_index(&self, st: &State<C>, queue: QueueId) -> usize {
        self.checked_index(queue.index(), st.queues.len())
    }

    /// Create an empty queue.
    pub fn queue_init(&self) -> QueueId {
        let mut lock = self.lock();
        let q = lock.queues.len();
        if lock.queues.try_push(QueueCb::INIT).is_err() {
            self.fatal(FatalError::ResourceExhausted(Resource::Queues));
        }
        QueueId::from_index(q)
    }

    fn queue_insert(&self, queue: QueueId, item: usize, lifo: bool) {
        let mut lock = self.lock();
        let q = self.queue_index(&lock, queue);
        if let Err(e) = insert(&mut lock, q, item, lifo) {
            self.fatal(e);
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Append an item (first in, first out). Can be called from an interrupt
    /// handler.
    pub fn queue_put(&self, queue: QueueId, item: usize) {
        self.queue_insert(queue, item, false);
    }

    /// Prepend an item (last in, first out). Can be called from an interrupt
    /// handler.
    pub fn queue_prepend(&self, queue: QueueId, item: usize) {
        self.queue_insert(queue, item, true);
    }

    /// Remove the item at the head, waiting up to `timeout` for one to
    /// arrive.
    pub fn queue_get(&self, queue: QueueId, timeout: Timeout) -> Result<usize, GetError> {
        let mut lock = self.lock();
        let q = self.queue_index(&lock, queue);

        if let Some(item) = pop(&mut lock, q) {
            return Ok(item);
        }
        if timeout.is_no_wait() {
            return Err(GetError::WouldBlock);
        }

        let (_, me) = self.expect_waitable_context(&lock);
        self.pend_current(&mut lock, me, WaitObject::Queue(q), timeout);
        let lock = self.schedule(lock);
        let wait = lock.threads[me].wait;
        wait.result.map(|()| wait.payload).map_err(GetError::from)
    }

    pub fn queue_peek_head(&self, queue: QueueId) -> Option<usize> {
        let lock = self.lock();
        let q = self.queue_index(&lock, queue);
        let head = lock.queues[q].head?;
        Some(lock.queue_nodes[head].item)
    }

    pub fn queue_peek_tail(&self, queue: QueueId) -> Option<usize> {
        let lock = self.lock();
        let q = self.queue_index(&lock, queue);
        let tail = lock.queues[q].tail?;
        Some(lock.queue_nodes[tail].item)
    }

    pub fn queue_is_empty(&self, queue: QueueId) -> bool {
        let lock = self.lock();
        let q = self.queue_index(&lock, queue);
        lock.queues[q].head.is_none()
    }

    /// Make the highest-priority waiter of [`Self::queue_get`] return
    /// [`GetError::Interrupted`].
    pub fn queue_cancel_wait(&self, queue: QueueId) {
        let mut lock = self.lock();
        let q = self.queue_index(&lock, queue);
        wait::wake_one(&mut lock, WaitObject::Queue(q), Err(WaitError::Interrupted));
        self.unlock_and_check_preemption(lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tests::{booted, new_thread, spawn, TestCfg},
        thread::ThreadState,
    };

    #[test]
    fn fifo_and_lifo_order() {
        let kernel = booted::<TestCfg>(|k| {
            spawn(k, 5);
        });
        let queue = kernel.queue_init();
        kernel.queue_put(queue, 1);
        kernel.queue_put(queue, 2);
        kernel.queue_prepend(queue, 0);
        assert_eq!(kernel.queue_peek_head(queue), Some(0));
        assert_eq!(kernel.queue_peek_tail(queue), Some(2));

        let items: Vec<_> = (0..3)
            .map(|_| kernel.queue_get(queue, Timeout::NoWait).unwrap())
            .collect();
        assert_eq!(items, [0, 1, 2]);
        assert!(kernel.queue_is_empty(queue));
        assert_eq!(kernel.queue_get(queue, Timeout::NoWait), Err(GetError::WouldBlock));
        assert_eq!(kernel.queue_peek_tail(queue), None);
    }

    #[test]
    fn zero_tick_get_does_not_block() {
        let kernel = booted::<TestCfg>(|k| {
            spawn(k, 5);
            spawn(k, 6);
        });
        let queue = kernel.queue_init();
        assert_eq!(kernel.queue_get(queue, Timeout::Ticks(0)), Err(GetError::WouldBlock));
        assert!(kernel.lock().queues[0].wait_queue.is_empty());
        assert!(kernel.lock().timeouts.is_empty());
        assert!(kernel.port().take_switches().is_empty());
    }

    #[test]
    fn nodes_are_recycled() {
        let kernel = booted::<TestCfg>(|k| {
            spawn(k, 5);
        });
        let queue = kernel.queue_init();
        for i in 0..100 {
            kernel.queue_put(queue, i);
            kernel.queue_put(queue, i + 1);
            assert_eq!(kernel.queue_get(queue, Timeout::NoWait), Ok(i));
            assert_eq!(kernel.queue_get(queue, Timeout::NoWait), Ok(i + 1));
        }
        assert_eq!(kernel.lock().queue_nodes.len(), 2);
    }

    #[test]
    #[should_panic(expected = "ResourceExhausted(QueueNodes)")]
    fn node_exhaustion_is_fatal() {
        let kernel = booted::<TestCfg>(|_| {});
        let queue = kernel.queue_init();
        for i in 0..=16 {
            kernel.queue_put(queue, i);
        }
    }

    #[test]
    fn put_hands_item_to_waiter() {
        let kernel = booted::<TestCfg>(|_| {});
        let queue = kernel.queue_init();
        let mut st = kernel.lock();
        let (a, b) = (new_thread(&mut st, 5), new_thread(&mut st, 2));
        wait::pend(&mut st, a, WaitObject::Queue(0), Timeout::Forever).unwrap();
        wait::pend(&mut st, b, WaitObject::Queue(0), Timeout::Forever).unwrap();
        drop(st);

        kernel.port().set_isr(true);
        kernel.queue_put(queue, 42);
        kernel.queue_cancel_wait(queue);
        let st = kernel.lock();
        assert_eq!(st.threads[b].st, ThreadState::Ready);
        assert_eq!(st.threads[b].wait.payload, 42);
        assert_eq!(st.threads[a].wait.result, Err(WaitError::Interrupted));
        assert!(st.queues[0].head.is_none());
    }
}
