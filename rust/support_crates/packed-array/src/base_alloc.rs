//! `BaseAlloc`: the strategy that supplies and releases the raw memory behind
//! a packed allocation.

use std::alloc::Layout;
use std::ptr::NonNull;

/// Raw memory source for packed allocations.
///
/// # Safety
///
/// Implementors must guarantee that:
/// - A pointer returned by `allocate` is valid for reads and writes of
///   `layout.size()` bytes and aligned to `layout.align()`.
/// - The memory stays valid until it is passed to `release` with the same
///   layout.
/// - `release` accepts every pointer produced by `allocate` on the same
///   instance (or on a clone that shares its backing store).
pub unsafe trait BaseAlloc {
    /// Allocates a block for `layout`.
    ///
    /// `layout.size()` is never zero when called from this crate. Returns
    /// `None` if the request cannot be satisfied.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by [`BaseAlloc::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this allocator with the same `layout`,
    /// and must not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-wide allocator (`std::alloc`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl BaseAlloc for Global {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert_ne!(layout.size(), 0);
        // SAFETY: callers never request zero-sized blocks.
        NonNull::new(unsafe { std::alloc::alloc(layout) })
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: `ptr` came from `std::alloc::alloc` in `allocate` with the
        // same `layout`, and the caller gives up all further use of it.
        unsafe {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

unsafe impl<A: BaseAlloc + ?Sized> BaseAlloc for &A {
    #[inline]
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        (**self).allocate(layout)
    }

    #[inline]
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).release(ptr, layout) }
    }
}
