//! Building blocks the distribution node is assembled from.

pub mod flow;

pub use flow::{
    BranchId, BranchQueue, LeakyMode, PushOutcome, QueueItem, QueueStats, Splitter,
    SplitterBranch, SplitterId, SplitterStats,
};
