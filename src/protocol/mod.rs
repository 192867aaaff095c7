//! Control channel protocol.
//!
//! Three request kinds map one-to-one onto [`crate::WatchRegistry`]
//! operations. Frames are little-endian `i32` sequences:
//!
//! ```text
//! request:  size | opcode | payload
//! response: size | opcode | code | payload (when code == 0)
//! ```
//!
//! Dirty units travel in a compact form: a non-negative integer is a single
//! block, a negative integer `-first` is followed by the run length.

mod codec;
mod dispatch;
mod message;
pub use codec::*;
pub use dispatch::*;
pub use message::*;
