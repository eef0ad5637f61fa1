//! Intrusive doubly linked list backed by a container implementing
//! `core::ops::IndexMut`.
//!
//! Elements are identified by indices into the container (a thread pool, for
//! example), so the links never hold references and the list can be stored
//! inside the very container it links.
use core::{fmt, ops};

use super::Init;

/// Circular linked list header.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ListHead<Index> {
    pub first: Option<Index>,
}

impl<Index> Default for ListHead<Index> {
    fn default() -> Self {
        Self::INIT
    }
}

impl<Index: fmt::Debug> fmt::Debug for ListHead<Index> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ListHead({:?})", &self.first)
    }
}

impl<Index> Init for ListHead<Index> {
    const INIT: Self = Self { first: None };
}

impl<Index> ListHead<Index> {
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }
}

/// Links to neighbor items.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Link<Index> {
    pub prev: Index,
    pub next: Index,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertError {
    AlreadyLinked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemError {
    NotLinked,
}

#[cold]
#[track_caller]
fn inconsistent() -> ! {
    panic!("linked list is inconsistent");
}

/// Accessor to a linked list whose header is `head` and whose elements live
/// in `pool`. `map_link` projects an element to its link field.
pub struct ListAccessor<'a, Index, Pool: ?Sized, MapLink> {
    head: &'a mut ListHead<Index>,
    pool: &'a mut Pool,
    map_link: MapLink,
}

impl<Index: fmt::Debug, Pool: ?Sized, MapLink> fmt::Debug
    for ListAccessor<'_, Index, Pool, MapLink>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ListAccessor")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

impl<'a, Index, Pool, MapLink, Element> ListAccessor<'a, Index, Pool, MapLink>
where
    Pool: ops::IndexMut<Index, Output = Element> + ?Sized,
    MapLink: Fn(&mut Element) -> &mut Option<Link<Index>>,
    Index: PartialEq + Copy,
{
    pub fn new(head: &'a mut ListHead<Index>, pool: &'a mut Pool, map_link: MapLink) -> Self {
        Self {
            head,
            pool,
            map_link,
        }
    }

    #[inline]
    fn link<'b>(&'b mut self, i: Index) -> &'b mut Option<Link<Index>>
    where
        Element: 'b,
    {
        (self.map_link)(&mut self.pool[i])
    }

    /// Get the link of an item which is known to be in the list.
    #[inline]
    #[track_caller]
    fn linked(&mut self, i: Index) -> Link<Index> {
        match *self.link(i) {
            Some(link) => link,
            None => inconsistent(),
        }
    }

    pub fn pool(&self) -> &Pool {
        &*self.pool
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_empty()
    }

    /// Check if `item` is linked to any list.
    fn is_linked(&mut self, item: Index) -> bool {
        self.link(item).is_some()
    }

    #[inline]
    pub fn front(&self) -> Option<Index> {
        self.head.first
    }

    #[inline]
    pub fn back(&mut self) -> Option<Index> {
        let first = self.head.first?;
        Some(self.linked(first).prev)
    }

    /// Insert `item` before the position `p` (if `at` is `Some(p)`) or to the
    /// the list's back (if `at` is `None`).
    pub fn insert(&mut self, item: Index, at: Option<Index>) -> Result<(), InsertError> {
        if self.is_linked(item) {
            return Err(InsertError::AlreadyLinked);
        }

        if let Some(first) = self.head.first {
            let (next, update_first) = match at {
                Some(at) => (at, at == first),
                None => (first, false),
            };

            let prev = self.linked(next).prev;

            // prev.next = item
            match self.link(prev) {
                Some(l) => l.next = item,
                None => inconsistent(),
            }

            // next.prev = item
            match self.link(next) {
                Some(l) => l.prev = item,
                None => inconsistent(),
            }

            *self.link(item) = Some(Link { prev, next });

            if update_first {
                self.head.first = Some(item);
            }
        } else {
            debug_assert!(at.is_none());

            *self.link(item) = Some(Link {
                prev: item,
                next: item,
            });
            self.head.first = Some(item);
        }

        Ok(())
    }

    #[inline]
    pub fn push_back(&mut self, item: Index) -> Result<(), InsertError> {
        self.insert(item, None)
    }

    #[inline]
    pub fn push_front(&mut self, item: Index) -> Result<(), InsertError> {
        let at = self.front();
        self.insert(item, at)
    }

    /// Remove `item` from the list. Returns `item`.
    pub fn remove(&mut self, item: Index) -> Result<Index, ItemError> {
        let link = self.link(item).ok_or(ItemError::NotLinked)?;

        if self.head.first == Some(item) {
            if link.next == item {
                // The list just became empty
                self.head.first = None;
                *self.link(item) = None;
                return Ok(item);
            }

            // Move the head pointer
            self.head.first = Some(link.next);
        }

        // link.prev.next = link.next
        match self.link(link.prev) {
            Some(l) => l.next = link.next,
            None => inconsistent(),
        }

        // link.next.prev = link.prev
        match self.link(link.next) {
            Some(l) => l.prev = link.prev,
            None => inconsistent(),
        }

        *self.link(item) = None;

        Ok(item)
    }

    /// Get the next element of the specified element.
    pub fn next(&mut self, i: Index) -> Result<Option<Index>, ItemError> {
        let next = self.link(i).ok_or(ItemError::NotLinked)?.next;
        Ok(if Some(next) == self.head.first {
            None
        } else {
            Some(next)
        })
    }

    /// Get the previous element of the specified element.
    pub fn prev(&mut self, i: Index) -> Result<Option<Index>, ItemError> {
        let prev = self.link(i).ok_or(ItemError::NotLinked)?.prev;
        Ok(if Some(i) == self.head.first {
            None
        } else {
            Some(prev)
        })
    }
}
