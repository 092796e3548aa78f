//! Header/element split of a managed type and the arithmetic derived from it.
//!
//! A managed type `T` is laid out as a header followed by a trailing array
//! whose declared length is one:
//!
//! ```text
//! #[repr(C)]
//! struct Block {
//!     rate: u32,          // \
//!     channels: u32,      //  > Header
//!     samples: [f32; 1],  // Element, repeated `count` times in the allocation
//! }
//! ```
//!
//! [`PackedLayout`] names the two halves. [`Overlay`] rebuilds the type from
//! them and is compared against `T` at compile time, so a split that does not
//! describe the real layout never reaches the allocation code.

use std::alloc::Layout;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};

use crate::{Error, Result};

/// Zero-sized header for types that carry nothing before their elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NoHeader;

/// Describes how a managed type splits into a header and a trailing array.
///
/// Types that have no header and are themselves the element can use
/// [`plain_packed_layout!`](crate::plain_packed_layout), which is already
/// applied to the primitive numeric types, `bool` and `char`.
///
/// # Safety
///
/// Implementors must guarantee one of the following:
/// - `Self` is `#[repr(C)]`, its last field is `[Self::Element; 1]`, and
///   `Self::Header` is either zero-sized or a `#[repr(C)]` struct overlaying
///   exactly the fields of `Self` that precede the array.
/// - `Self::Header` is zero-sized and `Self::Element` is `Self`.
///
/// In both cases every value of `Self::Element` must also be a valid
/// `Self::Iterated`, and the reverse must hold for writes through
/// mutable iteration.
///
/// Sizes, alignments and the array offset are verified at compile time;
/// field order and field types are not.
///
/// # Layout check
///
/// A header that does not match the real prefix fails to build as soon as
/// the type is allocated:
///
/// ```compile_fail
/// use packed_array::{PackedLayout, allocate_count};
///
/// #[repr(C)]
/// struct Short {
///     tag: u32,
///     values: [u32; 1],
/// }
///
/// unsafe impl PackedLayout for Short {
///     type Header = u64;
///     type Element = u32;
///     type Iterated = u32;
/// }
///
/// let _ = allocate_count::<Short>(1).init(|_| 0, |_| 0);
/// ```
///
/// So does a header whose size leaves padding before the array:
///
/// ```compile_fail
/// use packed_array::{PackedLayout, allocate_count};
///
/// #[repr(C)]
/// struct Padded {
///     tag: [u8; 3],
///     values: [u32; 1],
/// }
///
/// unsafe impl PackedLayout for Padded {
///     type Header = [u8; 3];
///     type Element = u32;
///     type Iterated = u32;
/// }
///
/// let _ = allocate_count::<Padded>(1).init(|_| [0; 3], |_| 0);
/// ```
///
/// And a zero-sized element:
///
/// ```compile_fail
/// use packed_array::{NoHeader, PackedLayout, allocate_count};
///
/// struct Nothing;
///
/// unsafe impl PackedLayout for Nothing {
///     type Header = NoHeader;
///     type Element = ();
///     type Iterated = ();
/// }
///
/// let _ = allocate_count::<Nothing>(1).init(|_| NoHeader, |_| ());
/// ```
///
/// The matching split builds:
///
/// ```
/// use packed_array::{PackedLayout, allocate_count};
///
/// #[repr(C)]
/// struct Tagged {
///     tag: u32,
///     values: [u32; 1],
/// }
///
/// unsafe impl PackedLayout for Tagged {
///     type Header = u32;
///     type Element = u32;
///     type Iterated = u32;
/// }
///
/// let tagged = allocate_count::<Tagged>(2).init(|_| 7, |i| i as u32);
/// assert_eq!(tagged.header(), Some(&7));
/// ```
pub unsafe trait PackedLayout: Sized {
    /// Fixed-size prefix, built once per allocation.
    type Header;
    /// Repeated unit of the trailing array.
    type Element;
    /// View of an element exposed by iteration and indexing.
    type Iterated;
}

/// Imitation of a managed type's layout, used only for the layout check.
///
/// Zero-sized headers occupy no bytes in a `#[repr(C)]` struct, so the array
/// starts at offset zero for them.
#[repr(C)]
pub struct Overlay<H, E> {
    pub header: H,
    pub elements: [E; 1],
}

pub(crate) struct LayoutCheck<T>(PhantomData<T>);

impl<T: PackedLayout> LayoutCheck<T> {
    pub(crate) const VERIFIED: () = {
        assert!(
            size_of::<T::Element>() != 0,
            "packed element type must not be zero-sized"
        );
        assert!(
            size_of::<Overlay<T::Header, T::Element>>() == size_of::<T>(),
            "header followed by one element does not match the size of the managed type"
        );
        assert!(
            align_of::<Overlay<T::Header, T::Element>>() == align_of::<T>(),
            "header followed by one element does not match the alignment of the managed type"
        );
        assert!(
            array_offset::<T::Header, T::Element>() == header_bytes::<T>(),
            "trailing array does not start right after the header"
        );
        assert!(
            size_of::<T::Iterated>() == size_of::<T::Element>(),
            "iterated type must have the size of the element type"
        );
        assert!(
            align_of::<T::Iterated>() <= align_of::<T::Element>(),
            "iterated type must not be more strictly aligned than the element type"
        );
    };
}

/// Forces the compile-time layout check for `T`.
#[inline(always)]
pub(crate) fn verify_layout<T: PackedLayout>() {
    let () = LayoutCheck::<T>::VERIFIED;
}

/// Offset of `elements` inside `Overlay<H, E>`.
const fn array_offset<H, E>() -> usize {
    let align = align_of::<E>();
    size_of::<H>().div_ceil(align) * align
}

/// Number of bytes preceding the trailing array.
///
/// A zero-sized header contributes no offset.
#[inline]
pub const fn header_bytes<T: PackedLayout>() -> usize {
    if size_of::<T::Header>() == 0 {
        0
    } else {
        size_of::<T::Header>()
    }
}

/// Size of one trailing element.
#[inline]
pub const fn element_bytes<T: PackedLayout>() -> usize {
    size_of::<T::Element>()
}

/// Returns `true` if `T` carries a non-empty header.
#[inline]
pub const fn has_header<T: PackedLayout>() -> bool {
    header_bytes::<T>() != 0
}

/// Number of elements that fit in a byte budget.
///
/// The budget is first raised to the size of `T` and then rounded up to a
/// whole number of elements, so the allocation for the returned count is never
/// smaller than `bytes`.
pub fn count_for_bytes<T: PackedLayout>(bytes: usize) -> usize {
    verify_layout::<T>();
    let enlarged = bytes.max(size_of::<T>());
    (enlarged - header_bytes::<T>()).div_ceil(element_bytes::<T>())
}

/// Size in bytes of an allocation holding `count` elements.
///
/// Never less than the size of `T`.
pub fn bytes_for_count<T: PackedLayout>(count: usize) -> Result<usize> {
    verify_layout::<T>();
    count
        .checked_mul(element_bytes::<T>())
        .and_then(|bytes| bytes.checked_add(header_bytes::<T>()))
        .map(|bytes| bytes.max(size_of::<T>()))
        .ok_or_else(|| Error::capacity_overflow(usize::MAX))
}

/// Allocation layout for `count` elements.
pub fn layout_for_count<T: PackedLayout>(count: usize) -> Result<Layout> {
    let bytes = bytes_for_count::<T>(count)?;
    crate::enlarge::enlarged_layout(Layout::new::<T>(), bytes)
}

/// Allocation layout for `count` elements, skipping the overflow checks.
///
/// # Safety
///
/// `layout_for_count::<T>(count)` must have succeeded before.
#[inline]
pub(crate) unsafe fn layout_for_count_unchecked<T: PackedLayout>(count: usize) -> Layout {
    let bytes = (header_bytes::<T>() + count * element_bytes::<T>()).max(size_of::<T>());
    // SAFETY: the same size and alignment were validated by `layout_for_count`.
    unsafe { Layout::from_size_align_unchecked(bytes, align_of::<T>()) }
}

/// Implements [`PackedLayout`] for types that have no header and are
/// themselves the element.
///
/// ```
/// #[derive(Clone, Copy)]
/// struct Stereo {
///     left: f32,
///     right: f32,
/// }
///
/// packed_array::plain_packed_layout!(Stereo);
///
/// let frames = packed_array::allocate_count::<Stereo>(4)
///     .init(|_| packed_array::NoHeader, |_| Stereo { left: 0.0, right: 0.0 });
/// assert_eq!(frames.count(), 4);
/// ```
#[macro_export]
macro_rules! plain_packed_layout {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: a zero-sized header followed by `[T; 1]` is exactly `T`.
            unsafe impl $crate::PackedLayout for $ty {
                type Header = $crate::NoHeader;
                type Element = $ty;
                type Iterated = $ty;
            }
        )*
    };
}

plain_packed_layout!(
    u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char,
);
