use arrayvec::ArrayVec;
use core::ops;

/// A fixed- or growable-capacity vector. Every object pool of the kernel is a
/// `VecLike`, which lets the application choose the pool sizes without
/// `generic_const_exprs`.
pub trait VecLike: ops::Deref<Target = [<Self as VecLike>::Element]> + ops::DerefMut {
    // FIXME: Work-around for the lack of compiler support for adding a
    //        `const Default` bound to a non-`const` `impl`
    const DEFAULT: Self;
    type Element;
    fn is_empty(&self) -> bool;
    fn len(&self) -> usize;
    fn pop(&mut self) -> Option<Self::Element>;
    /// Append `x`, handing it back if the vector is full.
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element>;
}

impl<T, const N: usize> VecLike for ArrayVec<T, N> {
    const DEFAULT: Self = Self::new_const();
    type Element = T;
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element> {
        ArrayVec::try_push(self, x).map_err(|e| e.element())
    }
}

#[cfg(test)]
impl<T> VecLike for Vec<T> {
    const DEFAULT: Self = Vec::new();
    type Element = T;
    fn is_empty(&self) -> bool {
        self.is_empty()
    }
    fn len(&self) -> usize {
        self.len()
    }
    fn pop(&mut self) -> Option<Self::Element> {
        self.pop()
    }
    fn try_push(&mut self, x: Self::Element) -> Result<(), Self::Element> {
        self.push(x);
        Ok(())
    }
}
