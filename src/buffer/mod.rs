//! In-memory buffer machines: the growable ring, the bounded fixed-block
//! variant, and the whole-message handle queue.

mod block;
pub mod fixed;
pub mod queue;
pub mod ring;

pub use fixed::FixedBuffer;
pub use queue::{HandleQueue, QueueOrder};
pub use ring::RingBuf;
