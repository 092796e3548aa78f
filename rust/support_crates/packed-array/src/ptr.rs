//! `PackedPtr`: the single owner of a header-plus-elements allocation.

use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Index, IndexMut};
use std::ptr::{self, NonNull};

use crate::layout::{header_bytes, verify_layout};
use crate::{BaseAlloc, Deleter, Global, PackedLayout};

/// Owning pointer to a header followed by a trailing array of elements, held
/// in one allocation.
///
/// A default-constructed pointer owns nothing and reports a count of zero.
/// Ownership moves with the value; there is no `Clone`. The allocation is
/// destroyed exactly once, by [`PackedPtr::reset`] or on drop, through the
/// pointer's [`Deleter`].
///
/// Allocations are created with [`allocate_bytes`](crate::allocate_bytes) and
/// [`allocate_count`](crate::allocate_count).
pub struct PackedPtr<T: PackedLayout, A: BaseAlloc = Global> {
    ptr: Option<NonNull<T>>,
    deleter: Deleter<T, A>,
    _owns: PhantomData<T>,
}

impl<T: PackedLayout> PackedPtr<T> {
    /// Returns a pointer that owns nothing.
    pub fn null() -> Self {
        Self::null_in(Global)
    }
}

impl<T: PackedLayout, A: BaseAlloc> PackedPtr<T, A> {
    /// Returns a pointer that owns nothing, carrying `alloc` for later use.
    pub fn null_in(alloc: A) -> Self {
        PackedPtr {
            ptr: None,
            deleter: Deleter::new_in(0, alloc),
            _owns: PhantomData,
        }
    }

    /// Takes ownership of a raw packed allocation.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a block obtained from `alloc` (or an allocator
    /// compatible with it) with the layout for `count` elements, in which the
    /// header and `count` elements have been constructed. No other owner may
    /// exist.
    pub unsafe fn from_raw_parts_in(ptr: NonNull<T>, count: usize, alloc: A) -> Self {
        PackedPtr {
            ptr: Some(ptr),
            deleter: Deleter::new_in(count, alloc),
            _owns: PhantomData,
        }
    }

    /// Gives up ownership, returning the raw pointer, the element count and
    /// the base allocator.
    ///
    /// The caller becomes responsible for destroying the allocation, for
    /// example by rebuilding a pointer with [`PackedPtr::from_raw_parts_in`].
    pub fn into_raw_parts(self) -> (Option<NonNull<T>>, usize, A) {
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the deleter is moved out once.
        let deleter = unsafe { ptr::read(&this.deleter) };
        (this.ptr, deleter.count(), deleter.into_allocator())
    }

    /// Number of trailing elements.
    ///
    /// Zero for a null pointer, and possibly zero for a live allocation.
    #[inline]
    pub fn count(&self) -> usize {
        self.deleter.count()
    }

    /// Same as [`PackedPtr::count`].
    #[inline]
    pub fn len(&self) -> usize {
        self.count()
    }

    /// Returns `true` if there are no trailing elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if the pointer owns nothing.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// The deleter that will destroy the allocation.
    #[inline]
    pub fn deleter(&self) -> &Deleter<T, A> {
        &self.deleter
    }

    /// The base allocator the allocation is released to.
    #[inline]
    pub fn allocator(&self) -> &A {
        self.deleter.allocator()
    }

    /// Raw pointer to the managed value, or null.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.ptr.map_or(ptr::null(), |p| p.as_ptr() as *const T)
    }

    /// The managed value, viewed with its declared one-element array.
    ///
    /// `None` for a null pointer and for an allocation without elements,
    /// whose single declared array slot was never constructed.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.count() == 0 {
            return None;
        }
        // SAFETY: the header and at least element 0 are constructed, which
        // covers every field of `T`.
        self.ptr.map(|p| unsafe { p.as_ref() })
    }

    /// Mutable access to the managed value.
    ///
    /// `None` under the same conditions as [`PackedPtr::get`].
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.count() == 0 {
            return None;
        }
        // SAFETY: as in `get`; `&mut self` guarantees exclusive access.
        self.ptr.map(|mut p| unsafe { p.as_mut() })
    }

    /// The header, or `None` for a null pointer.
    #[inline]
    pub fn header(&self) -> Option<&T::Header> {
        // SAFETY: the header sits at offset zero of a live allocation.
        self.ptr.map(|p| unsafe { p.cast::<T::Header>().as_ref() })
    }

    /// Mutable access to the header.
    #[inline]
    pub fn header_mut(&mut self) -> Option<&mut T::Header> {
        // SAFETY: as in `header`; `&mut self` guarantees exclusive access.
        self.ptr.map(|p| unsafe { p.cast::<T::Header>().as_mut() })
    }

    /// Address of the first trailing element, or null for a null pointer.
    ///
    /// The trailing array starts right after the header; a zero-sized header
    /// adds no offset.
    #[inline]
    pub fn begin(&self) -> *const T::Iterated {
        verify_layout::<T>();
        match self.ptr {
            // SAFETY: `header_bytes` is within the allocation, which is at
            // least as large as `T`.
            Some(p) => unsafe { p.as_ptr().cast::<u8>().add(header_bytes::<T>()).cast() },
            None => ptr::null(),
        }
    }

    /// One past the last trailing element; equals `begin() + count()`.
    #[inline]
    pub fn end(&self) -> *const T::Iterated {
        let begin = self.begin();
        if begin.is_null() {
            begin
        } else {
            // SAFETY: `count` elements follow `begin` inside the allocation.
            unsafe { begin.add(self.count()) }
        }
    }

    #[inline]
    fn begin_mut(&mut self) -> *mut T::Iterated {
        self.begin() as *mut T::Iterated
    }

    /// The trailing elements as a slice; empty for a null pointer.
    #[inline]
    pub fn as_slice(&self) -> &[T::Iterated] {
        if self.is_null() {
            return &[];
        }
        // SAFETY: `begin` is aligned and followed by `count` live elements.
        unsafe { std::slice::from_raw_parts(self.begin(), self.count()) }
    }

    /// The trailing elements as a mutable slice; empty for a null pointer.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T::Iterated] {
        if self.is_null() {
            return &mut [];
        }
        let count = self.count();
        // SAFETY: as in `as_slice`; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.begin_mut(), count) }
    }

    /// Iterates over the trailing elements, first to last.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, T::Iterated> {
        self.as_slice().iter()
    }

    /// Iterates mutably over the trailing elements, first to last.
    #[inline]
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T::Iterated> {
        self.as_mut_slice().iter_mut()
    }

    /// Returns the element at `index` without bounds checking.
    ///
    /// # Safety
    ///
    /// The pointer must not be null and `index` must be less than
    /// [`PackedPtr::count`].
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T::Iterated {
        debug_assert!(!self.is_null(), "indexing a null PackedPtr");
        debug_assert!(index < self.count(), "index {index} out of range");
        unsafe { &*self.begin().add(index) }
    }

    /// Returns the element at `index` mutably without bounds checking.
    ///
    /// # Safety
    ///
    /// Same as [`PackedPtr::get_unchecked`].
    #[inline]
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T::Iterated {
        debug_assert!(!self.is_null(), "indexing a null PackedPtr");
        debug_assert!(index < self.count(), "index {index} out of range");
        unsafe { &mut *self.begin_mut().add(index) }
    }

    /// The trailing elements as raw bytes.
    pub fn as_bytes(&self) -> &[u8]
    where
        T::Iterated: bytemuck::NoUninit,
    {
        bytemuck::cast_slice(self.as_slice())
    }

    /// Destroys the allocation now, leaving the pointer null with a count of
    /// zero. Does nothing if the pointer is already null.
    pub fn reset(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            // SAFETY: `ptr` was owned by `self` and has just been detached,
            // so it is destroyed exactly once.
            unsafe { self.deleter.delete(Some(ptr)) };
            self.deleter.set_count(0);
        }
    }

    /// Moves the allocation out, leaving `self` null with a count of zero.
    ///
    /// `self` keeps a clone of the allocator.
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        let alloc = self.allocator().clone();
        std::mem::replace(self, Self::null_in(alloc))
    }
}

/// Number of trailing elements owned by `ptr`.
#[inline]
pub fn count<T: PackedLayout, A: BaseAlloc>(ptr: &PackedPtr<T, A>) -> usize {
    ptr.count()
}

/// Address of the first trailing element of `ptr`, or null.
#[inline]
pub fn begin<T: PackedLayout, A: BaseAlloc>(ptr: &PackedPtr<T, A>) -> *const T::Iterated {
    ptr.begin()
}

/// One past the last trailing element of `ptr`, or null.
#[inline]
pub fn end<T: PackedLayout, A: BaseAlloc>(ptr: &PackedPtr<T, A>) -> *const T::Iterated {
    ptr.end()
}

impl<T: PackedLayout, A: BaseAlloc> Drop for PackedPtr<T, A> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: PackedLayout, A: BaseAlloc + Default> Default for PackedPtr<T, A> {
    fn default() -> Self {
        Self::null_in(A::default())
    }
}

impl<T: PackedLayout, A: BaseAlloc> Index<usize> for PackedPtr<T, A> {
    type Output = T::Iterated;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        assert!(!self.is_null(), "indexing a null PackedPtr");
        &self.as_slice()[index]
    }
}

impl<T: PackedLayout, A: BaseAlloc> IndexMut<usize> for PackedPtr<T, A> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        assert!(!self.is_null(), "indexing a null PackedPtr");
        &mut self.as_mut_slice()[index]
    }
}

impl<'a, T: PackedLayout, A: BaseAlloc> IntoIterator for &'a PackedPtr<T, A> {
    type Item = &'a T::Iterated;
    type IntoIter = std::slice::Iter<'a, T::Iterated>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T: PackedLayout, A: BaseAlloc> IntoIterator for &'a mut PackedPtr<T, A> {
    type Item = &'a mut T::Iterated;
    type IntoIter = std::slice::IterMut<'a, T::Iterated>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T: PackedLayout, A: BaseAlloc> fmt::Debug for PackedPtr<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedPtr")
            .field("ptr", &self.as_ptr())
            .field("count", &self.count())
            .finish()
    }
}

// SAFETY: `PackedPtr` owns its header and elements like a `Box` would.
unsafe impl<T, A> Send for PackedPtr<T, A>
where
    T: PackedLayout + Send,
    T::Header: Send,
    T::Element: Send,
    T::Iterated: Send,
    A: BaseAlloc + Send,
{
}

// SAFETY: shared access only hands out shared references to owned values.
unsafe impl<T, A> Sync for PackedPtr<T, A>
where
    T: PackedLayout + Sync,
    T::Header: Sync,
    T::Element: Sync,
    T::Iterated: Sync,
    A: BaseAlloc + Sync,
{
}
