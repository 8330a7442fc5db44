//! Cross-thread handoff primitives shared by every producer.

pub mod cancel;
pub mod double_buffer;

pub use cancel::CancellationToken;
pub use double_buffer::{BackBuffer, BufferStats, DoubleBuffer};
