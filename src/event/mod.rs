//! Out-of-band events travelling alongside buffers.
//!
//! Events flow in one of two directions:
//!
//! - **Downstream** (with data): stream-start, caps, segment, EOS
//! - **Upstream** (against data): reconfigure
//!
//! Flush events and custom events may travel either way.
//!
//! The distribution node reacts to two of them: a [`Event::Segment`] arriving
//! on its sink marks the moment data flow has really begun, and an
//! [`Event::Reconfigure`] sent upstream by a consumer asks for its output
//! port to be renegotiated.
//!
//! # Example
//!
//! ```rust
//! use tributary::event::{Event, SegmentEvent};
//!
//! let segment = Event::Segment(SegmentEvent::default());
//! assert!(segment.is_downstream());
//! assert!(Event::Reconfigure.is_upstream());
//! ```

use crate::format::FormatCaps;

/// Events that flow through the node.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // ========== Downstream Events ==========
    /// Start of a new stream.
    StreamStart(String),

    /// Format of the buffers that follow.
    Caps(FormatCaps),

    /// Start of a playback segment; data flow has begun.
    Segment(SegmentEvent),

    /// End of stream.
    Eos,

    // ========== Upstream Events ==========
    /// A consumer asks upstream to renegotiate the format.
    Reconfigure,

    // ========== Bidirectional Events ==========
    /// Discard buffered data.
    FlushStart,

    /// Resume after a flush.
    FlushStop,

    /// Application defined event.
    Custom(String),
}

impl Event {
    /// Check if this event flows with data.
    pub fn is_downstream(&self) -> bool {
        matches!(
            self,
            Event::StreamStart(_) | Event::Caps(_) | Event::Segment(_) | Event::Eos
        ) || self.is_bidirectional()
    }

    /// Check if this event flows against data.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Event::Reconfigure) || self.is_bidirectional()
    }

    /// Check if this event may travel in either direction.
    pub fn is_bidirectional(&self) -> bool {
        matches!(self, Event::FlushStart | Event::FlushStop | Event::Custom(_))
    }

    /// Human-readable name for logging.
    pub fn name(&self) -> &str {
        match self {
            Event::StreamStart(_) => "stream-start",
            Event::Caps(_) => "caps",
            Event::Segment(_) => "segment",
            Event::Eos => "eos",
            Event::Reconfigure => "reconfigure",
            Event::FlushStart => "flush-start",
            Event::FlushStop => "flush-stop",
            Event::Custom(name) => name,
        }
    }
}

/// Segment event: defines the timeline of the buffers that follow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentEvent {
    /// Segment start position in nanoseconds.
    pub start: u64,
    /// Segment stop position in nanoseconds, if bounded.
    pub stop: Option<u64>,
    /// Playback rate (1.0 = normal speed).
    pub rate: f64,
}

impl SegmentEvent {
    /// Create a time segment.
    pub fn new(start: u64, stop: Option<u64>) -> Self {
        Self {
            start,
            stop,
            rate: 1.0,
        }
    }

    /// Set the playback rate.
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }
}

impl Default for SegmentEvent {
    fn default() -> Self {
        Self::new(0, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_direction() {
        assert!(Event::Caps(FormatCaps::Any).is_downstream());
        assert!(!Event::Caps(FormatCaps::Any).is_upstream());
        assert!(Event::Reconfigure.is_upstream());
        assert!(!Event::Reconfigure.is_downstream());
        assert!(Event::FlushStart.is_upstream());
        assert!(Event::FlushStart.is_downstream());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Event::Segment(SegmentEvent::default()).name(), "segment");
        assert_eq!(Event::Reconfigure.name(), "reconfigure");
        assert_eq!(Event::Custom("keyframe-request".into()).name(), "keyframe-request");
    }
}
