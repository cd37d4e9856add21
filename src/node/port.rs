//! Output ports.
//!
//! An [`OutputPort`] is the node's side of one consumer. It never links
//! itself: linking, unlinking and renegotiation only schedule the port on the
//! node's connection worker, which does the actual wiring.

use super::NodeInner;
use crate::element::{PadTemplate, Peer, ProbeInfo, ProbeMask, ProbeReturn, ProbeTable};
use crate::elements::{BranchId, BranchQueue, QueueItem, Splitter, SplitterId};
use crate::event::Event;
use crate::sync::lock;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, trace};

/// Identity of an output port. Rendered as its pad name, `src_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(pub(crate) u32);

impl PortId {
    /// Index assigned by the node, increasing per node.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src_{}", self.0)
    }
}

/// Where a port stands with respect to the splitters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not linked to any splitter.
    #[default]
    Unconnected,
    /// Waiting for the connection worker.
    PendingConnect,
    /// Fed by a splitter branch.
    Connected,
}

/// The splitter branch currently feeding a port.
#[derive(Debug, Clone)]
pub struct PortTarget {
    /// Splitter the branch belongs to.
    pub splitter: SplitterId,
    /// Branch on that splitter.
    pub branch: BranchId,
    /// Queue between the branch and the port.
    pub queue: BranchQueue,
}

#[derive(Default)]
struct PortLink {
    state: ConnectionState,
    peer: Option<Arc<dyn Peer>>,
    target: Option<PortTarget>,
    released: bool,
}

impl PortLink {
    fn settle(&mut self) {
        self.state = if self.target.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Unconnected
        };
    }
}

/// A requested output of a distribution node.
pub struct OutputPort {
    id: PortId,
    name: String,
    template: PadTemplate,
    node: Weak<NodeInner>,
    probes: ProbeTable,
    link: Mutex<PortLink>,
}

impl OutputPort {
    pub(crate) fn new(id: PortId, template: PadTemplate, node: Weak<NodeInner>) -> Self {
        Self {
            id,
            name: template.pad_name(id.0),
            template,
            node,
            probes: ProbeTable::new(),
            link: Mutex::new(PortLink::default()),
        }
    }

    /// Port identity.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Pad name, `src_<n>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template the port was requested with.
    pub fn template(&self) -> &PadTemplate {
        &self.template
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    /// Splitter and branch feeding this port, if connected.
    pub fn target(&self) -> Option<(SplitterId, BranchId)> {
        lock(&self.link)
            .target
            .as_ref()
            .map(|t| (t.splitter, t.branch))
    }

    /// Downstream peer, if linked.
    pub fn peer(&self) -> Option<Arc<dyn Peer>> {
        lock(&self.link).peer.clone()
    }

    /// Whether the port has been released from its node.
    pub fn is_released(&self) -> bool {
        lock(&self.link).released
    }

    /// Probes on this port. Upstream events pass through them first.
    pub fn probes(&self) -> &ProbeTable {
        &self.probes
    }

    /// Record the downstream peer and schedule the port for connection.
    pub fn link(&self, peer: Arc<dyn Peer>) {
        {
            let mut link = lock(&self.link);
            if link.released {
                return;
            }
            debug!(port = %self.id, peer = peer.name(), "linked");
            link.peer = Some(peer);
        }
        self.notify_node();
    }

    /// Forget the downstream peer and schedule the port.
    pub fn unlink(&self) {
        {
            let mut link = lock(&self.link);
            if link.released || link.peer.take().is_none() {
                return;
            }
            debug!(port = %self.id, "unlinked");
        }
        self.notify_node();
    }

    /// Send an event upstream from the consumer side.
    ///
    /// The port's probes see it first; then, if the port is connected, the
    /// probes of the splitter branch feeding it. Returns `true` if the event
    /// made it past both and reached the producer side.
    pub fn push_upstream_event(&self, event: Event) -> bool {
        if self
            .probes
            .dispatch(ProbeMask::EVENT_UPSTREAM, &ProbeInfo::Event(&event))
            == ProbeReturn::Drop
        {
            trace!(port = %self.id, event = event.name(), "upstream event intercepted");
            return false;
        }

        let Some((splitter, branch)) = self.target() else {
            return false;
        };
        self.node
            .upgrade()
            .and_then(|node| node.splitter(splitter))
            .is_some_and(|s| s.send_upstream(branch, &event))
    }

    /// Take the next buffer or event without waiting.
    pub fn try_pull(&self) -> Option<QueueItem> {
        self.queue()?.try_pop()
    }

    /// Take the next buffer or event, waiting up to `timeout`.
    pub fn pull(&self, timeout: Duration) -> Option<QueueItem> {
        self.queue()?.pop_timeout(Some(timeout))
    }

    fn queue(&self) -> Option<BranchQueue> {
        lock(&self.link).target.as_ref().map(|t| t.queue.clone())
    }

    fn notify_node(&self) {
        if let Some(node) = self.node.upgrade() {
            node.enqueue(self.id);
        }
    }

    // ------------------------------------------------------------------
    // Worker and node side
    // ------------------------------------------------------------------

    pub(crate) fn mark_pending(&self) {
        let mut link = lock(&self.link);
        if link.state == ConnectionState::Unconnected && !link.released {
            link.state = ConnectionState::PendingConnect;
        }
    }

    /// Peer and current target, or `None` if released.
    pub(crate) fn snapshot(&self) -> Option<(Option<Arc<dyn Peer>>, Option<PortTarget>)> {
        let link = lock(&self.link);
        (!link.released).then(|| (link.peer.clone(), link.target.clone()))
    }

    /// Leave the port as it is, resolving a pending state.
    pub(crate) fn settle(&self) {
        lock(&self.link).settle();
    }

    /// Move the port onto a new branch of `splitter`.
    ///
    /// Returns `false` if the port was released in the meantime.
    pub(crate) fn attach(
        &self,
        node: &NodeInner,
        splitter_id: SplitterId,
        splitter: &Splitter,
        queue: BranchQueue,
    ) -> bool {
        let mut link = lock(&self.link);
        if link.released {
            return false;
        }

        if let Some(old) = link.target.take() {
            detach_target(node, &old);
        }

        let branch = splitter.attach_branch(queue.clone());
        branch
            .probes()
            .add(ProbeMask::EVENT_UPSTREAM, |info| match info {
                ProbeInfo::Event(Event::Reconfigure) => ProbeReturn::Drop,
                _ => ProbeReturn::Ok,
            });

        link.target = Some(PortTarget {
            splitter: splitter_id,
            branch: branch.id(),
            queue,
        });
        link.state = ConnectionState::Connected;
        true
    }

    /// Drop any link to a splitter and become unconnected.
    pub(crate) fn detach(&self, node: &NodeInner) {
        let mut link = lock(&self.link);
        if let Some(old) = link.target.take() {
            debug!(port = %self.id, splitter = %old.splitter, "stale link detached");
            detach_target(node, &old);
        }
        link.settle();
    }

    /// Detach, clear probes and refuse any further work.
    pub(crate) fn release(&self, node: &NodeInner) {
        let mut link = lock(&self.link);
        link.released = true;
        link.peer = None;
        if let Some(old) = link.target.take() {
            detach_target(node, &old);
        }
        link.state = ConnectionState::Unconnected;
        drop(link);
        self.probes.clear();
    }
}

fn detach_target(node: &NodeInner, target: &PortTarget) {
    match node.splitter(target.splitter) {
        Some(splitter) => {
            splitter.detach_branch(target.branch);
        }
        None => target.queue.set_flushing(true),
    }
}

impl fmt::Debug for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputPort")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("target", &self.target())
            .finish()
    }
}
