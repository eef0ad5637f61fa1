//! System time and timeouts
use core::time::Duration;

use crate::KernelCfg;

/// A point in time measured in ticks. Wraps around; see [`tick_before`].
pub type Tick = u32;

/// The longest delay that can be scheduled. Longer delays are clamped to
/// this value so that the wrap-tolerant ordering of [`Tick`]s stays valid.
pub const MAX_TIMEOUT_TICKS: u32 = i32::MAX as u32;

/// How long a blocking operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// Don't wait. A blocking operation fails with `WouldBlock` instead.
    NoWait,
    /// Wait for at most the specified number of ticks. `Ticks(0)` doesn't
    /// wait at all, like [`Self::NoWait`].
    Ticks(u32),
    /// Wait indefinitely.
    Forever,
}

impl Timeout {
    /// Construct a `Timeout` from a `Duration`, rounding up to whole ticks.
    /// A zero duration means [`Self::NoWait`].
    pub fn from_duration<C: KernelCfg>(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::NoWait
        } else {
            Self::Ticks(duration_to_ticks::<C>(duration))
        }
    }

    /// Construct a `Timeout` from milliseconds. Shorthand for
    /// `from_duration(Duration::from_millis(ms))`.
    pub fn from_millis<C: KernelCfg>(ms: u64) -> Self {
        Self::from_duration::<C>(Duration::from_millis(ms))
    }

    /// Return `true` if a blocking operation must not wait: [`Self::NoWait`]
    /// or a zero-tick [`Self::Ticks`].
    #[inline]
    pub fn is_no_wait(self) -> bool {
        matches!(self, Self::NoWait | Self::Ticks(0))
    }

    /// Get the delay to arm for this timeout, or `None` if no timeout should
    /// be armed.
    pub(crate) fn delay(self) -> Option<u32> {
        match self {
            Self::NoWait => Some(0),
            Self::Ticks(x) => Some(x.min(MAX_TIMEOUT_TICKS)),
            Self::Forever => None,
        }
    }
}

/// Convert a `Duration` to ticks, rounding up and saturating at
/// [`MAX_TIMEOUT_TICKS`].
pub fn duration_to_ticks<C: KernelCfg>(duration: Duration) -> u32 {
    let hz = u128::from(C::TICKS_PER_SECOND);
    let ticks = (duration.as_nanos() * hz + 999_999_999) / 1_000_000_000;
    ticks.min(u128::from(MAX_TIMEOUT_TICKS)) as u32
}

/// Convert ticks to a `Duration`.
pub fn ticks_to_duration<C: KernelCfg>(ticks: u64) -> Duration {
    let hz = u64::from(C::TICKS_PER_SECOND);
    let secs = ticks / hz;
    let nanos = (ticks % hz) * 1_000_000_000 / hz;
    Duration::new(secs, nanos as u32)
}

/// Return `true` iff `a` comes before `b`. Valid as long as the two are less
/// than `2^31` ticks apart.
#[inline]
pub(crate) fn tick_before(a: Tick, b: Tick) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Get the number of ticks from `now` until `at`, zero if `at` has passed.
#[inline]
pub(crate) fn ticks_until(now: Tick, at: Tick) -> u32 {
    if tick_before(now, at) {
        at.wrapping_sub(now)
    } else {
        0
    }
}
