//! Asynchronous execution of the extraction pipeline.
//!
//! One task per uploaded document, five reported steps, bounded retries.

pub mod progress;
pub mod job;
pub mod queue;

pub use progress::*;
pub use job::DocumentTaskRunner;
pub use queue::{QueueError, TaskQueue, TaskQueueConfig};
