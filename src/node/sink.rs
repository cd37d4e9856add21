//! The node's single input.

use crate::buffer::Buffer;
use crate::element::{ProbeInfo, ProbeMask, ProbeReturn, ProbeTable};
use crate::elements::Splitter;
use crate::event::Event;
use std::sync::Arc;
use tracing::trace;

/// Input of a distribution node, feeding its primary splitter.
///
/// Data pushed here runs the sink probes inline on the caller's thread and is
/// then replicated by the splitter.
pub struct SinkPad {
    probes: ProbeTable,
    splitter: Arc<Splitter>,
}

impl SinkPad {
    pub(crate) fn new(splitter: Arc<Splitter>) -> Self {
        Self {
            probes: ProbeTable::new(),
            splitter,
        }
    }

    /// Pad name.
    pub fn name(&self) -> &str {
        "sink"
    }

    pub(crate) fn splitter(&self) -> &Arc<Splitter> {
        &self.splitter
    }

    /// Probes on the sink.
    pub fn probes(&self) -> &ProbeTable {
        &self.probes
    }

    /// Push a buffer. Returns `false` if a probe dropped it.
    pub fn push_buffer(&self, buffer: Buffer) -> bool {
        if self
            .probes
            .dispatch(ProbeMask::BUFFER, &ProbeInfo::Buffer(&buffer))
            == ProbeReturn::Drop
        {
            return false;
        }
        self.splitter.push_buffer(buffer);
        true
    }

    /// Push a downstream event. Returns `false` if a probe dropped it or it
    /// is not a downstream event.
    pub fn push_event(&self, event: Event) -> bool {
        if !event.is_downstream() {
            return false;
        }
        if self
            .probes
            .dispatch(ProbeMask::EVENT_DOWNSTREAM, &ProbeInfo::Event(&event))
            == ProbeReturn::Drop
        {
            trace!(event = event.name(), "sink event dropped by probe");
            return false;
        }
        self.splitter.push_event(event);
        true
    }
}
