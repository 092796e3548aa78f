//! Allocation functions: size a packed block, construct it in place and hand
//! it to a [`PackedPtr`].
//!
//! Allocation and construction are split, so that a call reads like placement
//! construction with separate allocator and constructor arguments:
//!
//! ```
//! use packed_array::{NoHeader, allocate_count};
//!
//! let samples = allocate_count::<f32>(3).init(|_| NoHeader, |i| i as f32 * 0.5);
//! assert_eq!(samples.as_slice(), &[0.0, 0.5, 1.0]);
//! ```

use std::alloc::{Layout, handle_alloc_error};
use std::convert::Infallible;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::deleter::Teardown;
use crate::enlarge::allocate_enlarged;
use crate::layout::{
    bytes_for_count, count_for_bytes, has_header, header_bytes, verify_layout,
};
use crate::{BaseAlloc, Error, ErrorKind, Global, PackedLayout, PackedPtr, Result};

/// A sized but not yet constructed packed allocation.
///
/// Returned by [`allocate_bytes`] and [`allocate_count`]; completed by one of
/// the `init` methods.
#[must_use = "nothing is allocated until one of the `init` methods is called"]
pub struct Allocate<T: PackedLayout, A: BaseAlloc = Global> {
    count: usize,
    alloc: A,
    _marker: PhantomData<fn() -> T>,
}

/// Plans an allocation holding at least `bytes` bytes.
///
/// The byte budget is raised to the size of `T` and rounded up to a whole
/// number of elements. Every element the enlarged block can hold is
/// constructed.
pub fn allocate_bytes<T: PackedLayout>(bytes: usize) -> Allocate<T> {
    allocate_bytes_in(bytes, Global)
}

/// Same as [`allocate_bytes`], drawing memory from `alloc`.
pub fn allocate_bytes_in<T: PackedLayout, A: BaseAlloc>(bytes: usize, alloc: A) -> Allocate<T, A> {
    Allocate::with_count(count_for_bytes::<T>(bytes), alloc)
}

/// Plans an allocation holding `count` elements.
///
/// If `T` has a non-empty header, at least one element is always allocated.
pub fn allocate_count<T: PackedLayout>(count: usize) -> Allocate<T> {
    allocate_count_in(count, Global)
}

/// Same as [`allocate_count`], drawing memory from `alloc`.
pub fn allocate_count_in<T: PackedLayout, A: BaseAlloc>(count: usize, alloc: A) -> Allocate<T, A> {
    verify_layout::<T>();
    let count = if has_header::<T>() { count.max(1) } else { count };
    Allocate::with_count(count, alloc)
}

impl<T: PackedLayout, A: BaseAlloc> Allocate<T, A> {
    fn with_count(count: usize, alloc: A) -> Self {
        verify_layout::<T>();
        Allocate {
            count,
            alloc,
            _marker: PhantomData,
        }
    }

    /// Number of elements that will be constructed.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size in bytes of the block that will be allocated.
    pub fn size(&self) -> Result<usize> {
        bytes_for_count::<T>(self.count)
    }

    /// Constructs the header and every element, aborting on allocation
    /// failure.
    ///
    /// `header` receives the element count; `element` receives each index in
    /// ascending order. If either panics, everything built so far is
    /// destroyed in reverse order and the block is released before the panic
    /// continues.
    ///
    /// # Panics
    ///
    /// Panics if the allocation size overflows. Calls
    /// [`handle_alloc_error`] if the base allocator fails.
    pub fn init<H, F>(self, header: H, mut element: F) -> PackedPtr<T, A>
    where
        H: FnOnce(usize) -> T::Header,
        F: FnMut(usize) -> T::Element,
    {
        let (base, layout) = match self.reserve() {
            Ok(block) => block,
            Err(e) => allocation_failed(e),
        };
        // SAFETY: `base` was just allocated with `layout` for `self.count`.
        let built = unsafe {
            self.construct::<Infallible, _, _>(
                base,
                layout,
                |count| Ok(header(count)),
                |index| Ok(element(index)),
            )
        };
        match built {
            Ok(ptr) => ptr,
            Err(never) => match never {},
        }
    }

    /// Constructs the header and every element with fallible constructors.
    ///
    /// Allocation failures are returned as [`Error`] converted into `E`. If a
    /// constructor fails or panics, everything built so far is destroyed in
    /// reverse order and the block is released before the failure propagates.
    pub fn try_init<E, H, F>(self, header: H, element: F) -> std::result::Result<PackedPtr<T, A>, E>
    where
        E: From<Error>,
        H: FnOnce(usize) -> std::result::Result<T::Header, E>,
        F: FnMut(usize) -> std::result::Result<T::Element, E>,
    {
        let (base, layout) = self.reserve()?;
        // SAFETY: `base` was just allocated with `layout` for `self.count`.
        unsafe { self.construct(base, layout, header, element) }
    }

    /// Constructs the header and fills every element with a clone of
    /// `value`.
    pub fn init_with<H>(self, header: H, value: T::Element) -> PackedPtr<T, A>
    where
        H: FnOnce(usize) -> T::Header,
        T::Element: Clone,
    {
        self.init(header, |_| value.clone())
    }

    fn reserve(&self) -> Result<(NonNull<u8>, Layout)> {
        let bytes = bytes_for_count::<T>(self.count)?;
        allocate_enlarged(&self.alloc, Layout::new::<T>(), bytes)
    }

    /// # Safety
    ///
    /// `base` must be an uninitialized block allocated from `self.alloc`
    /// with `layout`, large enough for the header and `self.count` elements.
    unsafe fn construct<E, H, F>(
        self,
        base: NonNull<u8>,
        layout: Layout,
        header: H,
        mut element: F,
    ) -> std::result::Result<PackedPtr<T, A>, E>
    where
        H: FnOnce(usize) -> std::result::Result<T::Header, E>,
        F: FnMut(usize) -> std::result::Result<T::Element, E>,
    {
        let count = self.count;
        let mut guard = Teardown::<T, A>::new(base, layout, &self.alloc);

        let value = match header(count) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("packed allocation {base:p}: header construction failed");
                return Err(e);
            }
        };
        // SAFETY: the header lives at offset zero of a block aligned for `T`.
        unsafe { base.cast::<T::Header>().write(value) };
        guard.header_built = true;

        // SAFETY: the array starts `header_bytes` into the block.
        let first = unsafe { base.add(header_bytes::<T>()).cast::<T::Element>() };
        for index in 0..count {
            let value = match element(index) {
                Ok(value) => value,
                Err(e) => {
                    log::debug!(
                        "packed allocation {base:p}: element {index} of {count} failed, \
                         unwinding {index} elements"
                    );
                    return Err(e);
                }
            };
            // SAFETY: `index < count`, and the block holds `count` elements.
            unsafe { first.add(index).write(value) };
            guard.elements_built += 1;
        }

        guard.disarm();
        // SAFETY: the header and all `count` elements are constructed in a
        // block from `self.alloc`.
        Ok(unsafe { PackedPtr::from_raw_parts_in(base.cast(), count, self.alloc) })
    }
}

impl<T: PackedLayout, A: BaseAlloc> std::fmt::Debug for Allocate<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocate")
            .field("count", &self.count)
            .field("header_bytes", &header_bytes::<T>())
            .finish()
    }
}

#[cold]
fn allocation_failed(e: Error) -> ! {
    match e.into_kind() {
        ErrorKind::OutOfMemory { layout } => handle_alloc_error(layout),
        kind => panic!("{}", Error::from(kind)),
    }
}
