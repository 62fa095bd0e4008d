//! Response wire protocol
//!
//! Frames are separated by a blank line and carry an `event:` type line and
//! a `data:` JSON line.

pub mod event;
pub mod frame;

pub use event::Event;
pub use frame::{Frame, FrameDecoder};
