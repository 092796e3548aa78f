//! Single-allocation storage for a fixed-size header followed by a trailing
//! array whose length is chosen at allocation time.
//!
//! A managed type describes its split through [`PackedLayout`]; the split is
//! checked against the type's real layout at compile time. [`allocate_bytes`]
//! and [`allocate_count`] size the block, construct the header and elements
//! in place, and return a [`PackedPtr`] that owns the result. Dropping the
//! pointer destroys the elements from last to first, then the header, then
//! releases the block through its [`BaseAlloc`].
//!
//! ```
//! use packed_array::{PackedLayout, allocate_count};
//!
//! #[repr(C)]
//! struct BlockHeader {
//!     rate: u32,
//!     channels: u32,
//! }
//!
//! #[repr(C)]
//! struct Block {
//!     header: BlockHeader,
//!     samples: [f32; 1],
//! }
//!
//! unsafe impl PackedLayout for Block {
//!     type Header = BlockHeader;
//!     type Element = f32;
//!     type Iterated = f32;
//! }
//!
//! let block = allocate_count::<Block>(4).init(
//!     |_| BlockHeader { rate: 48_000, channels: 1 },
//!     |i| i as f32,
//! );
//! assert_eq!(block.count(), 4);
//! assert_eq!(block.header().map(|h| h.rate), Some(48_000));
//! assert_eq!(block.iter().sum::<f32>(), 6.0);
//! ```

pub mod allocate;
pub mod base_alloc;
pub mod deleter;
pub mod enlarge;
pub mod error;
pub mod layout;
pub mod ptr;
pub mod result;

pub use allocate::{Allocate, allocate_bytes, allocate_bytes_in, allocate_count, allocate_count_in};
pub use base_alloc::{BaseAlloc, Global};
pub use deleter::Deleter;
pub use error::{Error, ErrorKind};
pub use layout::{NoHeader, Overlay, PackedLayout};
pub use ptr::{PackedPtr, begin, count, end};
pub use result::Result;
