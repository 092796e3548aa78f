//! Count-aware destruction of a packed allocation.
//!
//! Teardown always runs in the same order: elements from the last index down
//! to zero, then the header, then the raw block goes back to the base
//! allocator. The construction path reuses the same [`Teardown`] guard to
//! unwind a partially built allocation, so both paths share that order.

use std::alloc::Layout;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

use crate::enlarge::release_enlarged;
use crate::layout::{header_bytes, layout_for_count_unchecked, verify_layout};
use crate::{BaseAlloc, Global, PackedLayout};

/// Destruction policy bound to a [`PackedPtr`](crate::PackedPtr).
///
/// Records the number of elements so that teardown never has to re-derive it
/// from a byte size.
pub struct Deleter<T: PackedLayout, A: BaseAlloc = Global> {
    count: usize,
    alloc: A,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PackedLayout, A: BaseAlloc> Deleter<T, A> {
    /// Creates a deleter for `count` elements released through `alloc`.
    pub fn new_in(count: usize, alloc: A) -> Self {
        verify_layout::<T>();
        Deleter {
            count,
            alloc,
            _marker: PhantomData,
        }
    }

    /// Number of elements destroyed by this deleter.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    /// The base allocator the block is released to.
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    pub(crate) fn set_count(&mut self, count: usize) {
        self.count = count;
    }

    pub(crate) fn into_allocator(self) -> A {
        self.alloc
    }

    /// Destroys the allocation at `ptr`.
    ///
    /// Does nothing for `None`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation produced by this crate for
    /// `self.count()` constructed elements through an allocator compatible
    /// with `self.allocator()`. It must not be used afterwards.
    pub unsafe fn delete(&self, ptr: Option<NonNull<T>>) {
        let Some(ptr) = ptr else {
            return;
        };
        // SAFETY: the allocation was created with the layout for `self.count`.
        let layout = unsafe { layout_for_count_unchecked::<T>(self.count) };
        let mut teardown = Teardown::<T, A>::new(ptr.cast(), layout, &self.alloc);
        teardown.header_built = true;
        teardown.elements_built = self.count;
        drop(teardown);
    }
}

impl<T: PackedLayout, A: BaseAlloc + Default> Default for Deleter<T, A> {
    fn default() -> Self {
        Deleter::new_in(0, A::default())
    }
}

/// Guard owning a packed block with a known number of constructed slots.
///
/// Dropping it destroys the constructed elements in descending index order,
/// then the header if it was built, then releases the block.
pub(crate) struct Teardown<'a, T: PackedLayout, A: BaseAlloc + ?Sized> {
    base: NonNull<u8>,
    layout: Layout,
    alloc: &'a A,
    pub(crate) header_built: bool,
    pub(crate) elements_built: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: PackedLayout, A: BaseAlloc + ?Sized> Teardown<'a, T, A> {
    pub(crate) fn new(base: NonNull<u8>, layout: Layout, alloc: &'a A) -> Self {
        Teardown {
            base,
            layout,
            alloc,
            header_built: false,
            elements_built: 0,
            _marker: PhantomData,
        }
    }

    /// Gives up ownership of the block without destroying anything.
    pub(crate) fn disarm(self) {
        std::mem::forget(self);
    }
}

impl<T: PackedLayout, A: BaseAlloc + ?Sized> Drop for Teardown<'_, T, A> {
    fn drop(&mut self) {
        // SAFETY: `elements_built` slots past the header and, when flagged,
        // the header itself hold live values inside a block owned by `self`.
        unsafe {
            let first = self
                .base
                .as_ptr()
                .add(header_bytes::<T>())
                .cast::<T::Element>();
            let mut index = self.elements_built;
            while index > 0 {
                index -= 1;
                ptr::drop_in_place(first.add(index));
            }
            if self.header_built {
                ptr::drop_in_place(self.base.as_ptr().cast::<T::Header>());
            }
            release_enlarged(self.alloc, self.base, self.layout);
        }
    }
}
