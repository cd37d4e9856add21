//! Pad-level building blocks shared by the node and the encoding branch.

mod pad;
mod probe;

pub use pad::{PadDirection, PadPresence, PadTemplate, Peer, StaticPeer};
pub use probe::{ProbeId, ProbeInfo, ProbeMask, ProbeReturn, ProbeTable};
