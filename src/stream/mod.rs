//! Response session processing: frames in, text and ordered audio out

pub mod processor;
pub mod session;
pub mod sinks;
pub mod typing;

pub use processor::{ProcessorHandle, StreamProcessor};
pub use session::{Session, SessionStats};
pub use sinks::Sinks;
pub use typing::TypingScheduler;
