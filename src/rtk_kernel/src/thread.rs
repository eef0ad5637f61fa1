//! Threads
use core::{fmt, ptr};

use crate::{
    cfg::{is_valid_priority, KernelCfg, Priority, SchedPolicy},
    error::{JoinError, Resource},
    mutex, sched,
    state::State,
    time::Timeout,
    timeout::{self, TimeoutNode, TimeoutRef},
    utils::{intrusive_list::Link, VecLike},
    wait::{self, ThreadWait, WaitObject, WaitQueue},
    FatalError, Kernel, KernelGuard, Port, ThreadId,
};

/// The entry point of a thread. Receives the kernel and the parameter given
/// by [`ThreadAttr::param`].
pub type ThreadEntry<C> = fn(&'static Kernel<C>, usize);

bitflags::bitflags! {
    /// Options for [`Kernel::thread_create`].
    pub struct ThreadOptions: u32 {
        /// The system faults if the thread exits or is aborted.
        const ESSENTIAL = 1 << 0;
    }
}

/// The lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Created but not started yet.
    New,
    /// Waiting in a ready queue.
    Ready,
    /// Running on a CPU.
    Running,
    /// Suspended by [`Kernel::thread_suspend`].
    Suspended,
    /// Blocked without a timeout.
    Waiting,
    /// Blocked with a timeout.
    WaitingWithTimeout,
    /// Exited or aborted. The slot may be reused by a later
    /// [`Kernel::thread_create`].
    Dead,
}

/// A stack region for a thread.
///
/// The kernel never touches the stack itself; it's passed through to
/// [`Port::init_context`]. A hosted port may ignore the base address and use
/// the size as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stack {
    base: *mut u8,
    size: usize,
}

// Safety: `Stack` is a plain description of a memory region. Only the port
//         dereferences it, on behalf of a single thread.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// The stack size used when none is specified.
    pub const DEFAULT_SIZE: usize = 16 * 1024;

    /// A stack of `size` bytes to be allocated by the port.
    pub const fn with_size(size: usize) -> Self {
        Self {
            base: ptr::null_mut(),
            size,
        }
    }

    /// A stack in a caller-provided buffer.
    pub fn from_static(buf: &'static mut [u8]) -> Self {
        Self {
            base: buf.as_mut_ptr(),
            size: buf.len(),
        }
    }

    /// Get the base address, or `None` if the port is expected to allocate
    /// the stack.
    pub fn base(&self) -> Option<ptr::NonNull<u8>> {
        ptr::NonNull::new(self.base)
    }

    /// Get the size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::with_size(Self::DEFAULT_SIZE)
    }
}

/// The creation parameters of a thread, passed to
/// [`Kernel::thread_create`].
///
/// ```ignore
/// let worker = kernel.thread_create(
///     ThreadAttr::new(worker_main)
///         .param(42)
///         .priority(preempt_priority(3))
///         .name("worker"),
/// );
/// ```
pub struct ThreadAttr<C: KernelCfg> {
    entry: ThreadEntry<C>,
    param: usize,
    priority: Priority,
    stack: Stack,
    options: ThreadOptions,
    name: &'static str,
    cpu: Option<usize>,
    start: Timeout,
}

impl<C: KernelCfg> ThreadAttr<C> {
    /// Start describing a thread running `entry`. By default the thread has
    /// priority `0`, a [`Stack::DEFAULT_SIZE`]-byte stack, may run on any
    /// CPU, and starts immediately.
    pub fn new(entry: ThreadEntry<C>) -> Self {
        Self {
            entry,
            param: 0,
            priority: 0,
            stack: Stack::default(),
            options: ThreadOptions::empty(),
            name: "",
            cpu: None,
            start: Timeout::NoWait,
        }
    }

    pub fn param(mut self, param: usize) -> Self {
        self.param = param;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn stack(mut self, stack: Stack) -> Self {
        self.stack = stack;
        self
    }

    pub fn options(mut self, options: ThreadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Restrict the thread to the CPU `cpu`.
    pub fn pin_cpu(mut self, cpu: usize) -> Self {
        self.cpu = Some(cpu);
        self
    }

    /// Set when the thread starts: [`Timeout::NoWait`] starts it
    /// immediately, [`Timeout::Ticks`] after a delay, and
    /// [`Timeout::Forever`] leaves it in [`ThreadState::New`] until
    /// [`Kernel::thread_start`] is called.
    pub fn start_delay(mut self, start: Timeout) -> Self {
        self.start = start;
        self
    }
}

impl<C: KernelCfg> fmt::Debug for ThreadAttr<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadAttr")
            .field("entry", &(self.entry as *const ()))
            .field("param", &self.param)
            .field("priority", &self.priority)
            .field("stack", &self.stack)
            .field("options", &self.options)
            .field("name", &self.name)
            .field("cpu", &self.cpu)
            .field("start", &self.start)
            .finish()
    }
}

/// *Thread control block* - the state data of a thread.
pub struct ThreadCb<C: KernelCfg> {
    pub(crate) context: <C::Port as Port>::Context,
    /// Incremented each time the slot is reused. Part of [`ThreadId`].
    pub(crate) generation: usize,
    pub(crate) entry: ThreadEntry<C>,
    pub(crate) param: usize,
    pub(crate) name: &'static str,
    pub(crate) options: ThreadOptions,

    pub(crate) st: ThreadState,

    /// The priority assigned by the application.
    pub(crate) base_priority: Priority,

    /// The priority the scheduler uses: `base_priority` raised by the
    /// waiters of the mutexes the thread holds.
    pub(crate) effective_priority: Priority,

    /// The CPU the thread last ran on or is queued on.
    pub(crate) cpu: usize,
    pub(crate) pinned: Option<usize>,
    /// The nesting depth of [`Kernel::sched_lock`].
    pub(crate) sched_lock: u32,
    pub(crate) is_idle: bool,

    pub(crate) ready_link: Option<Link<usize>>,
    pub(crate) wait: ThreadWait,
    pub(crate) timeout: TimeoutNode,
    /// The threads waiting for this thread to exit.
    pub(crate) join_queue: WaitQueue,
    /// The last mutex locked by the thread. The rest of the held mutexes are
    /// chained through `MutexCb::prev_held`.
    pub(crate) last_mutex_held: Option<usize>,

    pub(crate) suspend_pending: bool,
    pub(crate) abort_pending: bool,
}

impl<C: KernelCfg> ThreadCb<C> {
    pub(crate) fn new(
        attr: &ThreadAttr<C>,
        context: <C::Port as Port>::Context,
        is_idle: bool,
    ) -> Self {
        Self {
            context,
            generation: 0,
            entry: attr.entry,
            param: attr.param,
            name: attr.name,
            options: attr.options,
            st: ThreadState::New,
            base_priority: attr.priority,
            effective_priority: attr.priority,
            cpu: attr.cpu.unwrap_or(0),
            pinned: attr.cpu,
            sched_lock: 0,
            is_idle,
            ready_link: None,
            wait: ThreadWait::INIT,
            timeout: TimeoutNode::INIT,
            join_queue: WaitQueue::INIT,
            last_mutex_held: None,
            suspend_pending: false,
            abort_pending: false,
        }
    }
}

impl<C: KernelCfg> fmt::Debug for ThreadCb<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadCb")
            .field("self", &(self as *const _))
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("context", &self.context)
            .field("st", &self.st)
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority)
            .field("cpu", &self.cpu)
            .field("pinned", &self.pinned)
            .field("wait", &self.wait)
            .field("last_mutex_held", &self.last_mutex_held)
            .finish_non_exhaustive()
    }
}

/// Called when the timeout of the thread `t` fires: starts a delayed thread
/// or ends a timed wait with [`WaitError::Timeout`].
///
/// [`WaitError::Timeout`]: crate::WaitError::Timeout
pub(crate) fn timeout_expired<C: KernelCfg>(st: &mut State<C>, t: usize) {
    match st.threads[t].st {
        ThreadState::New => {
            log::debug!("thread {} starts after its delay", t);
            sched::make_ready(st, t);
        }
        ThreadState::WaitingWithTimeout | ThreadState::Waiting => {
            let object = st.threads[t].wait.object;
            wait::wake(st, t, Err(crate::WaitError::Timeout));
            if let Some(WaitObject::Mutex(m)) = object {
                // The boost this waiter lent to the owner is withdrawn
                mutex::propagate(st, m);
            }
        }
        _ => {}
    }
}

/// Recompute the effective priority of `t` and carry the change along the
/// chain of mutex owners it waits on.
pub(crate) fn update_effective_priority<C: KernelCfg>(st: &mut State<C>, t: usize) {
    let priority = mutex::inherited_priority(st, t);
    if set_effective_priority(st, t, priority) {
        if let Some(WaitObject::Mutex(m)) = st.threads[t].wait.object {
            mutex::propagate(st, m);
        }
    }
}

/// Change the effective priority of `t`, repositioning it in whatever queue
/// it's in. Returns `false` if the priority doesn't change.
pub(crate) fn set_effective_priority<C: KernelCfg>(
    st: &mut State<C>,
    t: usize,
    priority: Priority,
) -> bool {
    let cb = &st.threads[t];
    if cb.effective_priority == priority {
        return false;
    }

    log::trace!(
        "thread {}: effective priority {} -> {}",
        t,
        cb.effective_priority,
        priority
    );

    match cb.st {
        ThreadState::Ready => {
            sched::remove_ready(st, t);
            st.threads[t].effective_priority = priority;
            sched::make_ready(st, t);
        }
        ThreadState::Running => {
            let cpu = cb.cpu;
            st.threads[t].effective_priority = priority;
            st.request_resched(cpu);
        }
        ThreadState::Waiting | ThreadState::WaitingWithTimeout => {
            st.threads[t].effective_priority = priority;
            wait::reorder(st, t);
        }
        _ => st.threads[t].effective_priority = priority,
    }
    true
}

/// Make the thread `t` Dead: take it out of every queue, release its
/// mutexes and wake its joiners. The caller is responsible for switching
/// away from `t` if it's running.
fn terminate<C: KernelCfg>(st: &mut State<C>, t: usize) -> Result<(), FatalError> {
    if st.threads[t].options.contains(ThreadOptions::ESSENTIAL) {
        log::error!("essential thread {} ({:?}) exited", t, st.threads[t].name);
        return Err(FatalError::EssentialThreadExited);
    }

    match st.threads[t].st {
        ThreadState::Ready => sched::remove_ready(st, t),
        ThreadState::Waiting | ThreadState::WaitingWithTimeout => {
            if let Some(WaitObject::Mutex(m)) = wait::unlink(st, t) {
                mutex::propagate(st, m);
            }
        }
        _ => {}
    }
    timeout::cancel(st, TimeoutRef::thread(t));

    mutex::release_all(st, t);

    let cb = &mut st.threads[t];
    cb.st = ThreadState::Dead;
    cb.suspend_pending = false;
    cb.abort_pending = false;
    cb.sched_lock = 0;

    let joiners = wait::wake_all(st, WaitObject::Join(t), Ok(()));
    log::debug!("thread {} exited, {} joiner(s) woken", t, joiners);
    Ok(())
}

/// Place a thread that was just created or started according to `start`.
fn start<C: KernelCfg>(st: &mut State<C>, t: usize, start: Timeout) -> Result<(), FatalError> {
    match start.delay() {
        Some(0) => sched::make_ready(st, t),
        Some(delay) => timeout::arm(st, TimeoutRef::thread(t), delay)?,
        None => {}
    }
    Ok(())
}

impl<C: KernelCfg> Kernel<C> {
    /// Resolve `thread` to its slot. An id whose thread exited and whose slot
    /// was reused is invalid.
    #[inline]
    pub(crate) fn thread_index(&self, st: &State<C>, thread: ThreadId) -> usize {
        match self.live_thread_index(st, thread) {
            Some(t) => t,
            None => self.fatal(FatalError::BadId),
        }
    }

    /// Like [`Self::thread_index`], but returns `None` if the thread exited
    /// and its slot now holds another thread. Such an id still names a Dead
    /// thread for the operations that accept one.
    #[inline]
    fn live_thread_index(&self, st: &State<C>, thread: ThreadId) -> Option<usize> {
        let t = self.checked_index(thread.index(), st.threads.len());
        (st.threads[t].generation == thread.generation()).then_some(t)
    }

    /// Allocate a thread control block, reusing the slot of a dead thread if
    /// there is one.
    pub(crate) fn alloc_thread(
        &self,
        st: &mut State<C>,
        attr: &ThreadAttr<C>,
        is_idle: bool,
    ) -> usize {
        let free = st
            .threads
            .iter()
            .position(|cb| cb.st == ThreadState::Dead && !cb.is_idle);
        let t = free.unwrap_or(st.threads.len());
        let generation = free.map_or(0, |t| ThreadId::next_generation(st.threads[t].generation));

        let context = self
            .port
            .init_context(ThreadId::with_generation(t, generation), attr.stack);
        let mut cb = ThreadCb::new(attr, context, is_idle);
        cb.generation = generation;
        match free {
            Some(t) => st.threads[t] = cb,
            None => {
                if st.threads.try_push(cb).is_err() {
                    self.fatal(FatalError::ResourceExhausted(Resource::Threads));
                }
            }
        }
        t
    }

    /// Create a thread. It starts as specified by
    /// [`ThreadAttr::start_delay`].
    ///
    /// Can be called before [`Self::boot`]; the threads created then run as
    /// soon as the kernel boots.
    pub fn thread_create(&self, attr: ThreadAttr<C>) -> ThreadId {
        if !is_valid_priority::<C>(attr.priority)
            || attr.cpu.map_or(false, |cpu| cpu >= C::NUM_CPUS)
        {
            self.fatal(FatalError::BadParam);
        }

        let mut lock = self.lock();
        let t = self.alloc_thread(&mut lock, &attr, false);
        log::debug!(
            "thread {} ({:?}) created with priority {}",
            t,
            attr.name,
            attr.priority
        );
        if let Err(e) = start(&mut lock, t, attr.start) {
            self.fatal(e);
        }
        if let Timeout::Ticks(_) = attr.start {
            self.timeouts_changed(&lock);
        }
        let id = lock.thread_id(t);
        self.unlock_and_check_preemption(lock);
        id
    }

    /// Start a thread that is in [`ThreadState::New`], cancelling its start
    /// delay. Does nothing for a thread in any other state.
    pub fn thread_start(&self, thread: ThreadId) {
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].st == ThreadState::New {
            timeout::cancel(&mut lock, TimeoutRef::thread(t));
            sched::make_ready(&mut lock, t);
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Terminate a thread.
    ///
    /// A thread running on another CPU dies at its next reschedule point;
    /// when called from a thread, this waits for that to happen. Aborting
    /// the calling thread doesn't return.
    ///
    /// Aborting an idle thread is a fatal error.
    pub fn thread_abort(&self, thread: ThreadId) {
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].is_idle {
            self.fatal(FatalError::BadParam);
        }
        let caller = self.thread_context(&lock);

        match lock.threads[t].st {
            ThreadState::Dead => {}
            ThreadState::Running => {
                if let Some((cpu, me)) = caller {
                    if me == t {
                        self.exit_current(lock, cpu, me);
                    }
                }

                let cpu = lock.threads[t].cpu;
                lock.threads[t].abort_pending = true;
                lock.request_resched(cpu);

                if let Some((_, me)) = caller {
                    self.expect_waitable_context(&lock);
                    self.pend_current(&mut lock, me, WaitObject::Join(t), Timeout::Forever);
                    drop(self.schedule(lock));
                    return;
                }
            }
            _ => {
                if let Err(e) = terminate(&mut lock, t) {
                    self.fatal(e);
                }
                self.port.discard_context(&lock.threads[t].context);
            }
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Terminate the calling thread.
    pub fn thread_exit(&self) -> ! {
        let lock = self.lock();
        let (cpu, me) = self.expect_thread_context(&lock);
        self.exit_current(lock, cpu, me)
    }

    /// Terminate the calling thread `me` running on `cpu` and dispatch the
    /// next thread.
    pub(crate) fn exit_current(&self, mut lock: KernelGuard<'_, C>, cpu: usize, me: usize) -> ! {
        if lock.threads[me].is_idle {
            self.fatal(FatalError::BadContext);
        }
        if let Err(e) = terminate(&mut lock, me) {
            self.fatal(e);
        }

        let Some(switch) = sched::dispatch(&mut lock, cpu) else {
            self.fatal(FatalError::BadContext);
        };
        let pending = core::mem::take(&mut lock.resched) & !(1 << cpu);
        let to = lock.threads[switch.to].context.clone();

        // The interrupt state of a dead thread is never restored; the next
        // thread restores its own
        let _ = lock.unlock_keep_irq();
        self.send_ipis(pending);

        // Safety: Interrupts are masked, the kernel lock is released, and
        //         the calling thread is Dead
        unsafe { self.port.exit_and_dispatch(cpu, &to) }
    }

    /// Wait for a thread to exit.
    pub fn thread_join(&self, thread: ThreadId, timeout: Timeout) -> Result<(), JoinError> {
        let mut lock = self.lock();
        let Some(t) = self
            .live_thread_index(&lock, thread)
            .filter(|&t| lock.threads[t].st != ThreadState::Dead)
        else {
            return Ok(());
        };
        if let Some((_, me)) = self.thread_context(&lock) {
            if me == t || lock.threads[t].wait.object == Some(WaitObject::Join(me)) {
                return Err(JoinError::WouldDeadlock);
            }
        }
        if timeout.is_no_wait() {
            return Err(JoinError::WouldBlock);
        }

        let (_, me) = self.expect_waitable_context(&lock);
        self.pend_current(&mut lock, me, WaitObject::Join(t), timeout);
        let lock = self.schedule(lock);
        let result = lock.threads[me].wait.result;
        result.map_err(|_| JoinError::Timeout)
    }

    /// Suspend a thread. A waiting thread is suspended when its wait ends; a
    /// thread running on another CPU at its next reschedule point.
    pub fn thread_suspend(&self, thread: ThreadId) {
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].is_idle {
            self.fatal(FatalError::BadParam);
        }
        let caller = self.thread_context(&lock).map(|(_, me)| me);

        match lock.threads[t].st {
            ThreadState::New => {
                timeout::cancel(&mut lock, TimeoutRef::thread(t));
                lock.threads[t].st = ThreadState::Suspended;
            }
            ThreadState::Ready => {
                sched::remove_ready(&mut lock, t);
                lock.threads[t].st = ThreadState::Suspended;
            }
            ThreadState::Running if caller == Some(t) => {
                lock.threads[t].st = ThreadState::Suspended;
            }
            ThreadState::Running => {
                let cpu = lock.threads[t].cpu;
                lock.threads[t].suspend_pending = true;
                lock.request_resched(cpu);
            }
            ThreadState::Waiting | ThreadState::WaitingWithTimeout => {
                lock.threads[t].suspend_pending = true;
            }
            ThreadState::Suspended | ThreadState::Dead => {}
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Resume a suspended thread, or cancel a suspension that hasn't taken
    /// effect yet.
    pub fn thread_resume(&self, thread: ThreadId) {
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].st == ThreadState::Suspended {
            sched::make_ready(&mut lock, t);
        } else {
            lock.threads[t].suspend_pending = false;
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Get the state of a thread. A thread whose slot has been reused by a
    /// later [`Self::thread_create`] is [`ThreadState::Dead`].
    pub fn thread_state(&self, thread: ThreadId) -> ThreadState {
        let lock = self.lock();
        self.live_thread_index(&lock, thread)
            .map_or(ThreadState::Dead, |t| lock.threads[t].st)
    }

    pub fn thread_name(&self, thread: ThreadId) -> &'static str {
        let lock = self.lock();
        let t = self.thread_index(&lock, thread);
        lock.threads[t].name
    }

    /// Put the calling thread to sleep. Returns the number of ticks left when
    /// it was woken early by [`Self::thread_wakeup`] (`u32::MAX` for a
    /// [`Timeout::Forever`] sleep), or `0` if it slept the whole time.
    ///
    /// A zero sleep ([`Timeout::is_no_wait`]) is a [`Self::yield_now`].
    pub fn sleep(&self, timeout: Timeout) -> u32 {
        if timeout.is_no_wait() {
            self.yield_now();
            return 0;
        }

        let mut lock = self.lock();
        let (_, me) = self.expect_waitable_context(&lock);
        self.pend_current(&mut lock, me, WaitObject::Sleep, timeout);
        let lock = self.schedule(lock);
        let wait = lock.threads[me].wait;
        match wait.result {
            Ok(()) => wait.payload as u32,
            Err(_) => 0,
        }
    }

    /// Wake a sleeping thread early. Does nothing if the thread isn't in
    /// [`Self::sleep`].
    pub fn thread_wakeup(&self, thread: ThreadId) {
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].wait.object == Some(WaitObject::Sleep) {
            let left = timeout::remaining(&lock, TimeoutRef::thread(t)).unwrap_or(u32::MAX);
            lock.threads[t].wait.payload = left as usize;
            wait::wake(&mut lock, t, Ok(()));
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Give the CPU to the next Ready thread of the same priority, if any.
    pub fn yield_now(&self) {
        let mut lock = self.lock();
        let (cpu, _) = self.expect_thread_context(&lock);
        sched::yield_current(&mut lock, cpu);
        drop(self.schedule(lock));
    }

    /// Get the calling thread, or `None` in an interrupt handler or before
    /// boot.
    pub fn current_thread(&self) -> Option<ThreadId> {
        let lock = self.lock();
        self.thread_context(&lock)
            .map(|(_, t)| lock.thread_id(t))
    }

    /// Get the effective priority of a thread, which includes priority
    /// inheritance.
    pub fn thread_priority(&self, thread: ThreadId) -> Priority {
        let lock = self.lock();
        let t = self.thread_index(&lock, thread);
        lock.threads[t].effective_priority
    }

    pub fn thread_base_priority(&self, thread: ThreadId) -> Priority {
        let lock = self.lock();
        let t = self.thread_index(&lock, thread);
        lock.threads[t].base_priority
    }

    /// Change the base priority of a thread. The effective priority follows
    /// unless a mutex waiter holds it higher.
    pub fn thread_set_priority(&self, thread: ThreadId, priority: Priority) {
        if !is_valid_priority::<C>(priority) {
            self.fatal(FatalError::BadParam);
        }
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].is_idle {
            self.fatal(FatalError::BadParam);
        }
        if lock.threads[t].st != ThreadState::Dead {
            lock.threads[t].base_priority = priority;
            update_effective_priority(&mut lock, t);
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Restrict a thread to the CPU `cpu`, or let it run anywhere (`None`).
    /// A running thread migrates at its CPU's next reschedule point.
    pub fn thread_pin_cpu(&self, thread: ThreadId, cpu: Option<usize>) {
        if cpu.map_or(false, |cpu| cpu >= C::NUM_CPUS) {
            self.fatal(FatalError::BadParam);
        }
        let mut lock = self.lock();
        let Some(t) = self.live_thread_index(&lock, thread) else {
            return;
        };
        if lock.threads[t].is_idle {
            self.fatal(FatalError::BadParam);
        }

        lock.threads[t].pinned = cpu;
        if let Some(cpu) = cpu {
            let cb = &lock.threads[t];
            if cb.cpu != cpu {
                match cb.st {
                    ThreadState::Ready => {
                        sched::remove_ready(&mut lock, t);
                        sched::make_ready(&mut lock, t);
                    }
                    ThreadState::Running => {
                        let current_cpu = cb.cpu;
                        lock.request_resched(current_cpu);
                    }
                    _ => {}
                }
            }
        }
        self.unlock_and_check_preemption(lock);
    }

    /// Prevent the calling thread from being preempted by other threads.
    /// Nests; interrupts are still served.
    pub fn sched_lock(&self) {
        let mut lock = self.lock();
        let (_, me) = self.expect_thread_context(&lock);
        lock.threads[me].sched_lock += 1;
    }

    /// Undo one [`Self::sched_lock`]. The deferred preemption, if any, takes
    /// place when the count reaches zero.
    pub fn sched_unlock(&self) {
        let mut lock = self.lock();
        let (_, me) = self.expect_thread_context(&lock);
        let depth = &mut lock.threads[me].sched_lock;
        if *depth == 0 {
            self.fatal(FatalError::BadContext);
        }
        *depth -= 1;
        if *depth == 0 {
            self.unlock_and_check_preemption(lock);
        }
    }

    /// Change the time-slicing policy. `ticks == 0` selects strict priority
    /// scheduling; otherwise, preemptible threads whose priority value is at
    /// least `priority_ceiling` are rotated every `ticks` ticks.
    pub fn set_time_slice(&self, ticks: u32, priority_ceiling: Priority) {
        let mut lock = self.lock();
        lock.policy = SchedPolicy::new(ticks, priority_ceiling);
        log::debug!("scheduling policy: {:?}", lock.policy);
        for cpu in lock.cpu_ids() {
            lock.cpus[cpu].slice_expired = false;
            if let Some(t) = lock.cpus[cpu].current {
                sched::reload_slice(&mut lock, cpu, t);
            }
        }
        self.unlock_and_check_preemption(lock);
    }
}
