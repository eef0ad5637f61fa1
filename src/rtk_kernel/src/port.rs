//! The interface between the kernel and a port (the CPU/board-specific layer)
use core::fmt;

use crate::{FatalError, ThreadId};

/// The interrupt state saved by [`Port::irq_lock`] and restored by
/// [`Port::irq_unlock`].
#[derive(Clone, Copy, PartialEq, Eq)]
#[must_use = "the interrupt state must be restored with `Port::irq_unlock`"]
pub struct IrqKey {
    was_enabled: bool,
}

impl IrqKey {
    /// Construct an `IrqKey`. `was_enabled` indicates whether interrupts were
    /// enabled before the matching `irq_lock` call.
    #[inline]
    pub const fn new(was_enabled: bool) -> Self {
        Self { was_enabled }
    }

    /// Get a flag indicating whether interrupts were enabled before the
    /// `irq_lock` call that produced this key.
    #[inline]
    pub const fn was_enabled(self) -> bool {
        self.was_enabled
    }
}

impl fmt::Debug for IrqKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.was_enabled {
            f.write_str("IrqKey(enabled)")
        } else {
            f.write_str("IrqKey(masked)")
        }
    }
}

/// Implemented by a port. Provides the CPU-specific services the kernel
/// needs: interrupt masking, context switching, inter-processor interrupts
/// and a fault handler.
///
/// # Safety
///
/// The kernel relies on the port for memory safety. In particular:
///
///  - `irq_lock` must prevent every interrupt handler on the calling CPU from
///    running until the matching `irq_unlock`.
///  - `switch_context` must not return to `from` until `from` is passed as
///    the `to` parameter of a later `switch_context` or `start_cpu` call.
///  - `cpu_id` must be stable while interrupts are masked.
pub unsafe trait Port: Send + Sync + 'static {
    /// The saved execution context of a thread. A clone refers to the same
    /// context.
    type Context: Clone + Send + Sync + fmt::Debug;

    /// Mask interrupts on the calling CPU and return the previous state.
    fn irq_lock(&self) -> IrqKey;

    /// Restore the interrupt state saved by [`Self::irq_lock`].
    ///
    /// # Safety
    ///
    /// `key` must have been returned by the most recent unmatched
    /// `irq_lock` call in the current execution context.
    unsafe fn irq_unlock(&self, key: IrqKey);

    /// Get the index of the calling CPU, in range `0..NUM_CPUS`.
    fn cpu_id(&self) -> usize;

    /// Get a flag indicating whether the caller is an interrupt handler.
    fn is_in_isr(&self) -> bool;

    /// Called once by [`Kernel::boot`] before any context is started. Gives
    /// the port the handle it uses to call back into the kernel.
    ///
    /// [`Kernel::boot`]: crate::Kernel::boot
    fn attach(&self, kernel: &'static dyn PortToKernel);

    /// Create the context of a new thread. When first restored, the context
    /// must enable interrupts and call [`PortToKernel::run_thread`] with
    /// `thread`.
    fn init_context(&self, thread: ThreadId, stack: crate::Stack) -> Self::Context;

    /// Release the resources of a context that will never be restored again
    /// because its thread was terminated while not running.
    fn discard_context(&self, context: &Self::Context) {
        let _ = context;
    }

    /// Save the calling thread's context into `from` and restore `to` on the
    /// CPU `cpu`. Returns when `from` is restored again, possibly on another
    /// CPU.
    ///
    /// # Safety
    ///
    /// Interrupts are masked, the kernel spinlock is released, and `from`
    /// is the calling thread's context.
    unsafe fn switch_context(&self, cpu: usize, from: &Self::Context, to: &Self::Context);

    /// Discard the calling thread's context and restore `to` on the CPU
    /// `cpu`.
    ///
    /// # Safety
    ///
    /// Interrupts are masked and the kernel spinlock is released. The calling
    /// thread's context is never restored again.
    unsafe fn exit_and_dispatch(&self, cpu: usize, to: &Self::Context) -> !;

    /// Start executing `first` on the CPU `cpu`. Called by
    /// [`Kernel::boot`] once for every CPU.
    ///
    /// # Safety
    ///
    /// `first` is a fresh context returned by [`Self::init_context`] and is
    /// not running anywhere.
    ///
    /// [`Kernel::boot`]: crate::Kernel::boot
    unsafe fn start_cpu(&self, cpu: usize, first: &Self::Context);

    /// Ask the CPU `cpu` to call [`PortToKernel::reschedule`] as soon as
    /// possible. May be called for the calling CPU from an interrupt handler.
    fn send_ipi(&self, cpu: usize);

    /// Wait for an interrupt. Called by the idle thread of the calling CPU
    /// with interrupts enabled.
    fn idle(&self);

    /// Inform the port of the number of ticks until the earliest pending
    /// timeout (`None` if there is none). A port with a periodic tick may
    /// ignore this.
    fn set_next_timeout(&self, ticks: Option<u32>) {
        let _ = ticks;
    }

    /// Halt the system after an unrecoverable error.
    fn system_fault(&self, error: FatalError) -> !;
}

/// Methods the port calls into the kernel. Object safe so that the port
/// needn't know the kernel configuration.
pub trait PortToKernel: Send + Sync {
    /// Run the entry point of `thread`, then terminate the thread. Called by
    /// the port on the thread's own context when it's restored for the first
    /// time.
    fn run_thread(&'static self, thread: ThreadId) -> !;

    /// Advance the system time by `ticks`. Called by the timer interrupt
    /// handler.
    fn announce(&self, ticks: u32);

    /// Handle an inter-processor interrupt (or any other interrupt that might
    /// have made a higher-priority thread ready) on the calling CPU.
    fn reschedule(&self);
}
