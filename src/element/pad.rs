//! Pad templates and downstream peers.
//!
//! Templates describe the connection points a component can offer (the
//! node's `src_%u` request template, an encoder's sink and src templates).
//! A [`Peer`] is whatever sits downstream of an output port: the node only
//! needs to know its name and which formats it can take.

use crate::format::FormatCaps;
use crate::sync::{read, write};
use std::sync::RwLock;

/// Direction of a pad (input or output).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadDirection {
    /// An input pad (receives buffers from upstream).
    Input,
    /// An output pad (sends buffers downstream).
    Output,
}

/// Whether a pad is always present or created on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PadPresence {
    /// Pad is always present.
    Always,
    /// Pad appears once data is seen.
    Sometimes,
    /// Pad is created when requested.
    Request,
}

/// Template for creating pads.
#[derive(Debug, Clone, PartialEq)]
pub struct PadTemplate {
    /// Name pattern for this pad (e.g., "sink", "src_%u").
    pub name: String,
    /// Direction of this pad.
    pub direction: PadDirection,
    /// Whether this pad is always present or created on demand.
    pub presence: PadPresence,
    /// Formats pads created from this template can carry.
    pub caps: FormatCaps,
}

impl PadTemplate {
    /// Create a new pad template.
    pub fn new(
        name: impl Into<String>,
        direction: PadDirection,
        presence: PadPresence,
        caps: FormatCaps,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            presence,
            caps,
        }
    }

    /// Always-present input pad named "sink".
    pub fn sink(caps: FormatCaps) -> Self {
        Self::new("sink", PadDirection::Input, PadPresence::Always, caps)
    }

    /// Always-present output pad named "src".
    pub fn src(caps: FormatCaps) -> Self {
        Self::new("src", PadDirection::Output, PadPresence::Always, caps)
    }

    /// Request output pads named "src_%u".
    pub fn request_src(caps: FormatCaps) -> Self {
        Self::new("src_%u", PadDirection::Output, PadPresence::Request, caps)
    }

    /// Expand the `%u` pattern with `index`.
    pub fn pad_name(&self, index: u32) -> String {
        self.name.replace("%u", &index.to_string())
    }
}

/// The downstream side of an output port.
///
/// Implemented by whatever consumes a port: an encoding branch's head, a
/// network sender, a test sink.
pub trait Peer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Formats the peer can currently take, or `None` if it cannot answer.
    fn query_caps(&self) -> Option<FormatCaps>;

    /// Whether the peer would take buffers in `caps` without renegotiating.
    fn accept_caps(&self, caps: &FormatCaps) -> bool {
        self.query_caps()
            .is_some_and(|accepted| accepted.can_intersect(caps))
    }
}

/// A peer whose accepted formats are set explicitly.
///
/// Useful for terminating an output port in-process; changing the caps
/// followed by a `Reconfigure` event on the port models a consumer
/// renegotiating.
#[derive(Debug)]
pub struct StaticPeer {
    name: String,
    caps: RwLock<Option<FormatCaps>>,
}

impl StaticPeer {
    /// Create a peer accepting `caps`.
    pub fn new(name: impl Into<String>, caps: FormatCaps) -> Self {
        Self {
            name: name.into(),
            caps: RwLock::new(Some(caps)),
        }
    }

    /// Create a peer that cannot answer a caps query.
    pub fn unanswering(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            caps: RwLock::new(None),
        }
    }

    /// Replace the accepted formats.
    pub fn set_caps(&self, caps: Option<FormatCaps>) {
        *write(&self.caps) = caps;
    }
}

impl Peer for StaticPeer {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_caps(&self) -> Option<FormatCaps> {
        read(&self.caps).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::VideoCodec;

    #[test]
    fn test_request_template_names() {
        let template = PadTemplate::request_src(FormatCaps::Any);
        assert_eq!(template.pad_name(0), "src_0");
        assert_eq!(template.pad_name(12), "src_12");
        assert_eq!(template.presence, PadPresence::Request);
        assert_eq!(template.direction, PadDirection::Output);
    }

    #[test]
    fn test_static_peer_accept_caps() {
        let peer = StaticPeer::new("rtp-vp8", VideoCodec::Vp8.into());
        assert!(peer.accept_caps(&VideoCodec::Vp8.into()));
        assert!(!peer.accept_caps(&FormatCaps::raw_video()));

        peer.set_caps(None);
        assert!(peer.query_caps().is_none());
        assert!(!peer.accept_caps(&VideoCodec::Vp8.into()));
    }
}
