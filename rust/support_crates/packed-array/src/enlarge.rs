//! Enlarging allocation: a request for a type's declared layout that may be
//! granted more bytes to hold trailing elements.

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::{BaseAlloc, Error, Result, verify_arg};

/// Layout of at least `enlarged` bytes, with the alignment of `declared`.
///
/// The enlargement is a floor: the result is never smaller than `declared`.
pub fn enlarged_layout(declared: Layout, enlarged: usize) -> Result<Layout> {
    let size = declared.size().max(enlarged);
    verify_arg!(enlarged, size != 0);
    Layout::from_size_align(size, declared.align()).map_err(|_| Error::capacity_overflow(size))
}

/// Allocates `max(declared.size(), enlarged)` bytes from `alloc`.
///
/// Returns the block together with the layout it was requested with; the same
/// layout must be handed back to [`release_enlarged`].
pub fn allocate_enlarged<A: BaseAlloc + ?Sized>(
    alloc: &A,
    declared: Layout,
    enlarged: usize,
) -> Result<(NonNull<u8>, Layout)> {
    let layout = enlarged_layout(declared, enlarged)?;
    match alloc.allocate(layout) {
        Some(ptr) => {
            log::trace!(
                "packed allocation {:p}: {} bytes (declared {}), align {}",
                ptr,
                layout.size(),
                declared.size(),
                layout.align()
            );
            Ok((ptr, layout))
        }
        None => Err(Error::out_of_memory(layout)),
    }
}

/// Releases a block obtained from [`allocate_enlarged`].
///
/// # Safety
///
/// `ptr` and `layout` must be the pair returned by `allocate_enlarged` on the
/// same allocator, and the block must not be used afterwards.
pub unsafe fn release_enlarged<A: BaseAlloc + ?Sized>(alloc: &A, ptr: NonNull<u8>, layout: Layout) {
    log::trace!("packed release {:p}: {} bytes", ptr, layout.size());
    unsafe { alloc.release(ptr, layout) }
}
