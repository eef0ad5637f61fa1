//! Provides `PrioBitmap`, a bit array structure supporting constant-time bit
//! scan operations.
use core::fmt;

use super::Init;

/// The maximum bit count supported by [`PrioBitmap`].
pub const PRIO_BITMAP_LEN: usize = u64::BITS as usize;

/// A bit array structure supporting constant-time bit scan operations.
///
/// All methods panic when the given bit position is out of range.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PrioBitmap {
    bits: u64,
}

impl Init for PrioBitmap {
    const INIT: Self = Self { bits: 0 };
}

impl Default for PrioBitmap {
    fn default() -> Self {
        Self::INIT
    }
}

impl fmt::Debug for PrioBitmap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl PrioBitmap {
    /// Get the bit at the specified position.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits & (1 << i) != 0
    }

    /// Clear the bit at the specified position.
    #[inline]
    pub fn clear(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits &= !(1 << i);
    }

    /// Set the bit at the specified position.
    #[inline]
    pub fn set(&mut self, i: usize) {
        assert!(i < PRIO_BITMAP_LEN);
        self.bits |= 1 << i;
    }

    /// Get the position of the first set bit.
    #[inline]
    pub fn find_set(&self) -> Option<usize> {
        if self.bits == 0 {
            None
        } else {
            Some(self.bits.trailing_zeros() as usize)
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Iterate over the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> {
        let mut bits = self.bits;
        core::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let i = bits.trailing_zeros();
                bits &= bits - 1;
                Some(i as usize)
            }
        })
    }
}
