//! Batch formation: the single-consumer accumulator driven by the
//! dispatcher loop.

mod queue;

pub use queue::{MessageQueue, QueuedEvent};
