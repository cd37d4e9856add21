//! Flow elements used inside the node.
//!
//! - [`Splitter`]: 1-to-N fanout (replicates buffers and events)
//! - [`BranchQueue`]: bounded buffering between a splitter branch and a port

mod queue;
mod tee;

pub use queue::{BranchQueue, LeakyMode, PushOutcome, QueueItem, QueueStats};
pub use tee::{BranchId, Splitter, SplitterBranch, SplitterId, SplitterStats};
