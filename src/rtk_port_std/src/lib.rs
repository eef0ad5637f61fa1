#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use rtk_kernel::{FatalError, IrqKey, Port, PortToKernel, Stack, ThreadId};
use slab::Slab;
use spin::Mutex as SpinMutex;
use std::{
    any::Any,
    cell::Cell,
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc, Condvar, Mutex, MutexGuard, OnceLock},
    thread::{self, JoinHandle},
    time::Duration,
};

/// Used by integration tests
#[doc(hidden)]
pub extern crate env_logger;

/// The smallest stack given to the OS thread backing a kernel thread.
/// [`Stack::size`] is only a hint; Rust's test and logging machinery needs
/// more than a typical RTOS stack.
pub const MIN_STACK_SIZE: usize = 256 * 1024;

/// The hosted port. See the [crate-level documentation](crate).
pub struct StdPort {
    inner: Arc<Inner>,
}

struct Inner {
    num_cpus: usize,
    kernel: OnceLock<&'static dyn PortToKernel>,
    sched: Mutex<Sched>,
    /// Signalled whenever `Sched::running`, `Sched::pending` or
    /// `Sched::shutdown` changes.
    cond: Condvar,
    ticker: SpinMutex<Option<Ticker>>,
}

struct Sched {
    /// The context each CPU is running.
    running: Vec<Option<usize>>,
    /// The interrupts pending on each CPU.
    pending: Vec<Pending>,
    contexts: Slab<ContextSlot>,
    shutdown: bool,
    /// See [`StdPort::use_virtual_time`].
    virtual_time: bool,
    /// The last value passed to `set_next_timeout`.
    next_timeout: Option<u32>,
    /// The first panic raised by a kernel thread.
    panic: Option<Box<dyn Any + Send>>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    ticks: u32,
    ipi: bool,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.ticks == 0 && !self.ipi
    }
}

/// A context's slot outlives its OS thread until the context is discarded,
/// so its key isn't reused while the kernel may still switch to it.
#[derive(Debug)]
struct ContextSlot {
    thread: ThreadId,
    stack_size: usize,
    spawned: bool,
    /// The OS thread has exited.
    exited: bool,
    /// The context will never be restored. Its OS thread exits when it sees
    /// this.
    discarded: bool,
}

impl ContextSlot {
    /// The slot can be freed once nothing refers to it anymore.
    fn is_released(&self) -> bool {
        self.discarded && (!self.spawned || self.exited)
    }
}

struct Ticker {
    stop_send: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

/// The saved context of a kernel thread: a handle to the OS thread backing
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextId(usize);

/// The role of an OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The backing thread of a kernel thread.
    Worker,
}

thread_local! {
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
    /// The CPU the current worker runs on.
    static CPU: Cell<usize> = Cell::new(0);
    static IRQ_MASKED: Cell<bool> = Cell::new(false);
    static IN_ISR: Cell<bool> = Cell::new(false);
    /// Set while the current worker takes pending interrupts.
    static SERVICING: Cell<bool> = Cell::new(false);
}

/// The panic payload used to unwind a worker that must exit.
struct WorkerExit;

/// Record that the OS thread of `ctx` is gone.
fn worker_exited(sched: &mut Sched, ctx: usize) {
    if let Some(slot) = sched.contexts.get_mut(ctx) {
        slot.exited = true;
        if slot.is_released() {
            sched.contexts.remove(ctx);
        }
    }
}

/// End the calling worker thread.
fn exit_worker() -> ! {
    panic::resume_unwind(Box::new(WorkerExit))
}

impl StdPort {
    /// Construct a port simulating `num_cpus` CPUs. `num_cpus` must match
    /// `KernelCfg::NUM_CPUS`.
    pub fn new(num_cpus: usize) -> Self {
        assert!(num_cpus >= 1);
        Self {
            inner: Arc::new(Inner {
                num_cpus,
                kernel: OnceLock::new(),
                sched: Mutex::new(Sched {
                    running: vec![None; num_cpus],
                    pending: vec![Pending::default(); num_cpus],
                    contexts: Slab::new(),
                    shutdown: false,
                    virtual_time: false,
                    next_timeout: None,
                    panic: None,
                    workers: Vec::new(),
                }),
                cond: Condvar::new(),
                ticker: SpinMutex::new(None),
            }),
        }
    }

    /// Start a host thread announcing a tick to CPU 0 every `period`.
    pub fn start_ticker(&self, period: Duration) {
        let (stop_send, stop_recv) = mpsc::channel::<()>();
        let inner = Arc::clone(&self.inner);
        log::trace!("starting the ticker ({period:?})");
        let join_handle = thread::spawn(move || loop {
            match stop_recv.recv_timeout(period) {
                Err(mpsc::RecvTimeoutError::Timeout) => inner.pend_ticks(0, 1),
                // `shutdown` dropped the sender
                Err(mpsc::RecvTimeoutError::Disconnected) | Ok(()) => break,
            }
        });

        let old = self.inner.ticker.lock().replace(Ticker {
            stop_send,
            join_handle,
        });
        assert!(old.is_none(), "the ticker is already running");
    }

    /// Make CPU 0 jump straight to the next timeout whenever it idles,
    /// instead of waiting for the host clock. The kernel's view of time then
    /// depends only on what its threads do.
    pub fn use_virtual_time(&self) {
        self.inner.lock_sched().virtual_time = true;
    }

    /// Announce `ticks` ticks to `cpu` from a host thread that isn't managed
    /// by the port.
    pub fn pend_ticks(&self, cpu: usize, ticks: u32) {
        assert_eq!(
            THREAD_ROLE.with(|r| r.get()),
            ThreadRole::Unknown,
            "this method cannot be called from a port-managed thread"
        );
        self.inner.pend_ticks(cpu, ticks);
    }

    /// Initiate a shutdown. May be called from any thread.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Wait until [`Self::shutdown`] is called and every worker thread has
    /// exited. Re-raises the first panic of a kernel thread.
    pub fn wait_for_shutdown(&self) {
        let mut sched = self.inner.lock_sched();
        while !sched.shutdown {
            sched = self.inner.wait(sched);
        }
        drop(sched);

        if let Some(ticker) = self.inner.ticker.lock().take() {
            drop(ticker.stop_send);
            log::trace!("stopping the ticker");
            ticker.join_handle.join().unwrap();
        }

        loop {
            let workers = mem::take(&mut self.inner.lock_sched().workers);
            if workers.is_empty() {
                break;
            }
            for worker in workers {
                worker.join().unwrap();
            }
        }
        log::trace!("all workers exited");

        if let Some(e) = self.inner.lock_sched().panic.take() {
            panic::resume_unwind(e);
        }
    }
}

impl fmt::Debug for StdPort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StdPort")
            .field("num_cpus", &self.inner.num_cpus)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn lock_sched(&self) -> MutexGuard<'_, Sched> {
        // A worker never panics while holding the lock
        self.sched.lock().unwrap()
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Sched>) -> MutexGuard<'a, Sched> {
        self.cond.wait(guard).unwrap()
    }

    fn kernel(&self) -> &'static dyn PortToKernel {
        *self.kernel.get().expect("the kernel is not attached")
    }

    fn pend_ticks(&self, cpu: usize, ticks: u32) {
        let mut sched = self.lock_sched();
        let pending = &mut sched.pending[cpu];
        pending.ticks = pending.ticks.saturating_add(ticks);
        self.cond.notify_all();
    }

    fn shutdown(&self) {
        log::debug!("shutting down");
        self.lock_sched().shutdown = true;
        self.cond.notify_all();
    }

    /// Make `ctx` the running context of `cpu`, spawning its worker if it
    /// hasn't run yet.
    fn assign(self: &Arc<Self>, sched: &mut Sched, cpu: usize, ctx: usize) {
        sched.running[cpu] = Some(ctx);
        let Some(slot) = sched.contexts.get_mut(ctx) else {
            panic!("context {ctx} doesn't exist");
        };
        if !slot.spawned && !sched.shutdown {
            slot.spawned = true;
            let (thread, stack_size) = (slot.thread, slot.stack_size);
            let inner = Arc::clone(self);
            let worker = thread::Builder::new()
                .name(format!("rtk thread {}", thread.get()))
                .stack_size(stack_size)
                .spawn(move || inner.worker_main(ctx, thread))
                .unwrap();
            log::trace!("spawned worker {:?} for context {ctx}", worker.thread().id());
            sched.workers.push(worker);
        }
        self.cond.notify_all();
    }

    /// Mark `ctx` as never restored again, freeing its slot if its OS thread
    /// is gone or was never spawned.
    fn release(&self, sched: &mut Sched, ctx: usize) {
        let Some(slot) = sched.contexts.get_mut(ctx) else {
            return;
        };
        slot.discarded = true;
        if slot.is_released() {
            sched.contexts.remove(ctx);
        } else {
            self.cond.notify_all();
        }
    }

    /// Block the calling worker until some CPU runs `ctx`. Returns the CPU.
    fn park(&self, mut sched: MutexGuard<'_, Sched>, ctx: usize) -> usize {
        loop {
            if sched.shutdown || sched.contexts.get(ctx).map_or(true, |s| s.discarded) {
                drop(sched);
                exit_worker();
            }
            if let Some(cpu) = sched.running.iter().position(|&r| r == Some(ctx)) {
                return cpu;
            }
            sched = self.wait(sched);
        }
    }

    fn worker_main(&self, ctx: usize, thread: ThreadId) {
        THREAD_ROLE.with(|r| r.set(ThreadRole::Worker));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let cpu = self.park(self.lock_sched(), ctx);
            CPU.with(|c| c.set(cpu));
            log::trace!("context {ctx} starts on CPU {cpu}");
            self.kernel().run_thread(thread)
        }));

        let mut sched = self.lock_sched();
        worker_exited(&mut sched, ctx);
        if let Err(e) = result {
            if !e.is::<WorkerExit>() {
                log::debug!("thread {} panicked; shutting down", thread.get());
                if sched.panic.is_none() {
                    sched.panic = Some(e);
                }
                sched.shutdown = true;
                self.cond.notify_all();
            }
        }
    }

    /// Take the interrupts pending on the current CPU. Tick announcements
    /// run in an interrupt context; rescheduling happens in the context of
    /// the interrupted thread, as on a real CPU returning from an interrupt.
    fn service_interrupts(&self) {
        if SERVICING.with(|s| s.replace(true)) {
            return;
        }
        loop {
            let cpu = CPU.with(|c| c.get());
            let pending = {
                let mut sched = self.lock_sched();
                if sched.shutdown {
                    drop(sched);
                    exit_worker();
                }
                mem::take(&mut sched.pending[cpu])
            };
            if pending.is_empty() {
                break;
            }

            let kernel = self.kernel();
            if pending.ticks > 0 {
                IN_ISR.with(|f| f.set(true));
                kernel.announce(pending.ticks);
                IN_ISR.with(|f| f.set(false));
            }
            kernel.reschedule();
        }
        SERVICING.with(|s| s.set(false));
    }
}

unsafe impl Port for StdPort {
    type Context = ContextId;

    fn irq_lock(&self) -> IrqKey {
        IrqKey::new(!IRQ_MASKED.with(|m| m.replace(true)))
    }

    unsafe fn irq_unlock(&self, key: IrqKey) {
        IRQ_MASKED.with(|m| m.set(!key.was_enabled()));
        // Not while unwinding from a system fault
        if key.was_enabled()
            && THREAD_ROLE.with(|r| r.get()) == ThreadRole::Worker
            && !IN_ISR.with(|f| f.get())
            && !thread::panicking()
        {
            self.inner.service_interrupts();
        }
    }

    fn cpu_id(&self) -> usize {
        CPU.with(|c| c.get())
    }

    fn is_in_isr(&self) -> bool {
        IN_ISR.with(|f| f.get())
    }

    fn attach(&self, kernel: &'static dyn PortToKernel) {
        if self.inner.kernel.set(kernel).is_err() {
            panic!("the port is already attached to a kernel");
        }
    }

    fn init_context(&self, thread: ThreadId, stack: Stack) -> ContextId {
        let mut sched = self.inner.lock_sched();
        let ctx = sched.contexts.insert(ContextSlot {
            thread,
            stack_size: stack.size().max(MIN_STACK_SIZE),
            spawned: false,
            exited: false,
            discarded: false,
        });
        ContextId(ctx)
    }

    fn discard_context(&self, context: &ContextId) {
        let mut sched = self.inner.lock_sched();
        self.inner.release(&mut sched, context.0);
    }

    unsafe fn switch_context(&self, cpu: usize, from: &ContextId, to: &ContextId) {
        let mut sched = self.inner.lock_sched();
        log::trace!("CPU {cpu}: switching from {from:?} to {to:?}");
        self.inner.assign(&mut sched, cpu, to.0);
        let cpu = self.inner.park(sched, from.0);
        CPU.with(|c| c.set(cpu));
    }

    unsafe fn exit_and_dispatch(&self, cpu: usize, to: &ContextId) -> ! {
        let mut sched = self.inner.lock_sched();
        log::trace!("CPU {cpu}: exiting to {to:?}");
        if let Some(from) = sched.running[cpu] {
            self.inner.release(&mut sched, from);
        }
        self.inner.assign(&mut sched, cpu, to.0);
        drop(sched);
        exit_worker();
    }

    unsafe fn start_cpu(&self, cpu: usize, first: &ContextId) {
        let mut sched = self.inner.lock_sched();
        log::trace!("CPU {cpu}: starting with {first:?}");
        self.inner.assign(&mut sched, cpu, first.0);
    }

    fn send_ipi(&self, cpu: usize) {
        let mut sched = self.inner.lock_sched();
        sched.pending[cpu].ipi = true;
        self.inner.cond.notify_all();
    }

    fn idle(&self) {
        let cpu = self.cpu_id();
        let mut sched = self.inner.lock_sched();
        while sched.pending[cpu].is_empty() {
            if sched.shutdown {
                drop(sched);
                exit_worker();
            }
            if cpu == 0 && sched.virtual_time {
                if let Some(ticks) = sched.next_timeout.take() {
                    log::trace!("skipping {ticks} idle ticks");
                    sched.pending[0].ticks = ticks.max(1);
                    break;
                }
            }
            sched = self.inner.wait(sched);
        }
        drop(sched);
        self.inner.service_interrupts();
    }

    fn set_next_timeout(&self, ticks: Option<u32>) {
        log::trace!("next timeout in {ticks:?} ticks");
        self.inner.lock_sched().next_timeout = ticks;
    }

    fn system_fault(&self, error: FatalError) -> ! {
        log::error!("system fault: {error}");
        self.inner.shutdown();
        panic!("system fault: {error:?}");
    }
}
