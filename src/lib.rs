//! # Tributary
//!
//! A format-agnostic media distribution node.
//!
//! One stream comes in on the node's sink. Any number of output ports can be
//! requested, each linked to a consumer that wants some format. A background
//! worker matches every port against the formats the node's splitters
//! produce and splices a queue between the first match and the port.
//! Encoding branches turn the raw stream into encoded ones, with their
//! bitrate driven by receiver feedback.
//!
//! ## Features
//!
//! - **Format negotiation**: caps intersection over raw and encoded media
//! - **Deferred connection**: port reconnects never run on streaming threads
//! - **Adaptive encoding**: low-latency encoder profiles with feedback-driven
//!   bitrate and kbit/s hysteresis
//! - **Observability**: `tracing` spans and `metrics` counters
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tributary::prelude::*;
//!
//! let node = DistributionNode::new(NodeConfig::new("agnostic0"))?;
//! let port = node.request_output_port(FormatCaps::Any)?;
//! port.link(Arc::new(StaticPeer::new("sink", FormatCaps::raw_video())));
//!
//! node.sink().push_event(Event::Caps(FormatCaps::i420()));
//! node.sink().push_event(Event::Segment(SegmentEvent::default()));
//! node.wait_idle(Duration::from_secs(1));
//!
//! node.sink().push_buffer(Buffer::new(frame, 0));
//! let item = port.pull(Duration::from_millis(100));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod element;
pub mod elements;
pub mod encoding;
pub mod error;
pub mod event;
pub mod format;
pub mod node;
pub mod observability;

mod sync;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::buffer::{Buffer, BufferFlags};
    pub use crate::element::{Peer, ProbeInfo, ProbeMask, ProbeReturn, StaticPeer};
    pub use crate::elements::{BranchQueue, QueueItem, Splitter};
    pub use crate::encoding::{BranchContext, EncoderFactory, EncodingBranch, EstimatorFactory};
    pub use crate::error::{Error, Result};
    pub use crate::event::{Event, SegmentEvent};
    pub use crate::format::{AudioCodec, FormatCaps, VideoCodec};
    pub use crate::node::{ConnectionState, DistributionNode, NodeConfig, OutputPort};
}

pub use error::{Error, Result};
