//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only because [`VecLike`] appears in [`KernelCfg`](crate::KernelCfg).
pub(crate) mod binary_heap;
pub(crate) mod intrusive_list;
mod prio_bitmap;
pub use self::{binary_heap::VecLike, prio_bitmap::*};

/// Trait for types having a constant default value.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl Init for usize {
    const INIT: Self = 0;
}
