//! Error types
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use rtk_kernel::ResultCode;
            /// assert_eq!(ResultCode::WouldBlock.as_str(), "WouldBlock");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel operation can
    /// report.
    ///
    /// The negated values are the matching POSIX errno numbers.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// The operation was interrupted before it could complete, e.g., by
        /// [`Kernel::sem_reset`] or [`Kernel::queue_cancel_wait`].
        ///
        /// [`Kernel::sem_reset`]: crate::Kernel::sem_reset
        /// [`Kernel::queue_cancel_wait`]: crate::Kernel::queue_cancel_wait
        Interrupted = -4,
        /// The operation timed out.
        Timeout = -11,
        /// The operation would have to block, but the caller asked not to wait.
        WouldBlock = -16,
        /// Resource deadlock would occur.
        WouldDeadlock = -45,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident $(: $($subty:ident),* $(,)*)? {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }

        $($(
            $subty!(impl From<_> for $name);
        )*)?

        #[allow(unused_macros)]
        macro_rules! $name {
            (impl From<_> for $dest_ty:ty) => {
                impl From<$name> for $dest_ty {
                    #[inline]
                    fn from(x: $name) -> Self {
                        match x {
                            $(
                                $name::$vname => Self::$vname,
                            )*
                        }
                    }
                }
            };
        }
    };
}

define_error! {
    mod wait_error {}
    /// The outcome of a wait that did not end successfully. Stored in the
    /// thread's result slot by whoever ends the wait.
    pub enum WaitError {
        /// The timeout expired.
        Timeout,
        /// The wait object was reset or the wait was cancelled.
        Interrupted,
    }
}

define_error! {
    mod take_error {}
    /// Error type for [`Kernel::sem_take`].
    ///
    /// [`Kernel::sem_take`]: crate::Kernel::sem_take
    pub enum TakeError: WaitError {
        /// The count is zero and the timeout is [`NoWait`].
        ///
        /// [`NoWait`]: crate::Timeout::NoWait
        WouldBlock,
        /// The count stayed zero until the timeout expired.
        Timeout,
        /// The semaphore was reset while the caller was waiting.
        Interrupted,
    }
}

define_error! {
    mod lock_error {}
    /// Error type for [`Kernel::mutex_lock`].
    ///
    /// [`Kernel::mutex_lock`]: crate::Kernel::mutex_lock
    pub enum LockError {
        /// The mutex is owned by another thread and the timeout is
        /// [`NoWait`].
        ///
        /// [`NoWait`]: crate::Timeout::NoWait
        WouldBlock,
        /// The mutex was not handed over before the timeout expired.
        Timeout,
    }
}

define_error! {
    mod get_error {}
    /// Error type for [`Kernel::queue_get`].
    ///
    /// [`Kernel::queue_get`]: crate::Kernel::queue_get
    pub enum GetError: WaitError {
        /// The queue is empty and the timeout is [`NoWait`].
        ///
        /// [`NoWait`]: crate::Timeout::NoWait
        WouldBlock,
        /// No item arrived before the timeout expired.
        Timeout,
        /// The wait was cancelled by [`Kernel::queue_cancel_wait`].
        ///
        /// [`Kernel::queue_cancel_wait`]: crate::Kernel::queue_cancel_wait
        Interrupted,
    }
}

define_error! {
    mod join_error {}
    /// Error type for [`Kernel::thread_join`].
    ///
    /// [`Kernel::thread_join`]: crate::Kernel::thread_join
    pub enum JoinError {
        /// The thread is still alive and the timeout is [`NoWait`].
        ///
        /// [`NoWait`]: crate::Timeout::NoWait
        WouldBlock,
        /// The thread did not exit before the timeout expired.
        Timeout,
        /// The caller tried to join itself, or the target thread is joining
        /// the caller.
        WouldDeadlock,
    }
}

/// Kernel objects allocated from fixed-capacity pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Threads,
    Semaphores,
    Mutexes,
    Queues,
    QueueNodes,
    CondVars,
    Timers,
    Timeouts,
}

/// Programming errors and exhausted resources. Reported through
/// [`Kernel::fatal`], which never returns.
///
/// [`Kernel::fatal`]: crate::Kernel::fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FatalError {
    /// A thread other than the owner tried to unlock a mutex.
    NotOwner,
    /// A mutex was unlocked while not locked.
    NotLocked,
    /// The recursion count of a mutex would exceed
    /// [`KernelCfg::MAX_MUTEX_RECURSION`].
    ///
    /// [`KernelCfg::MAX_MUTEX_RECURSION`]: crate::KernelCfg::MAX_MUTEX_RECURSION
    RecursionLimit,
    /// The operation is not allowed in the current context, e.g., a blocking
    /// call from an interrupt handler or before boot.
    BadContext,
    /// A blocking call was made while interrupts were already masked.
    BlockingWithIrqsLocked,
    /// A spinlock was acquired again by the CPU already holding it.
    SpinlockRecursion,
    /// An object identifier does not refer to an object of the pool.
    BadId,
    /// A parameter is out of range.
    BadParam,
    /// A thread created with [`ThreadOptions::ESSENTIAL`] exited or was
    /// aborted.
    ///
    /// [`ThreadOptions::ESSENTIAL`]: crate::ThreadOptions::ESSENTIAL
    EssentialThreadExited,
    /// An object pool is full.
    ResourceExhausted(Resource),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotOwner => f.write_str("mutex unlocked by a thread that does not own it"),
            Self::NotLocked => f.write_str("mutex unlocked while not locked"),
            Self::RecursionLimit => f.write_str("mutex recursion limit exceeded"),
            Self::BadContext => f.write_str("operation not allowed in this context"),
            Self::BlockingWithIrqsLocked => f.write_str("blocking with interrupts masked"),
            Self::SpinlockRecursion => f.write_str("recursive spinlock acquisition"),
            Self::BadId => f.write_str("invalid object identifier"),
            Self::BadParam => f.write_str("parameter out of range"),
            Self::EssentialThreadExited => f.write_str("essential thread exited"),
            Self::ResourceExhausted(r) => write!(f, "{r:?} pool exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_conversion() {
        assert_eq!(TakeError::from(WaitError::Timeout), TakeError::Timeout);
        assert_eq!(GetError::from(WaitError::Interrupted), GetError::Interrupted);
    }

    #[test]
    fn debug_prints_variant_name() {
        assert_eq!(format!("{:?}", JoinError::WouldDeadlock), "WouldDeadlock");
        assert!(ResultCode::from(GetError::Timeout).is_err());
        assert!(ResultCode::Success.is_ok());
    }

    #[test]
    fn fatal_display() {
        assert_eq!(
            FatalError::ResourceExhausted(Resource::QueueNodes).to_string(),
            "QueueNodes pool exhausted"
        );
    }
}
