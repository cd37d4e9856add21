//! The distribution node.
//!
//! A [`DistributionNode`] takes one stream on its [`SinkPad`] and serves any
//! number of [`OutputPort`]s, each of which may want a different format.
//! Ports are requested and released at any time, also while data flows.
//! Connecting a port to a splitter is never done on the caller's thread:
//!
//! 1. A segment event on the sink (data flow has started) schedules every
//!    known port.
//! 2. A `Reconfigure` event sent upstream on a port is swallowed and
//!    schedules that port.
//! 3. Linking or unlinking a peer schedules the port.
//!
//! The connection worker then matches each scheduled port's peer caps
//! against the active caps of the splitters, in splitter order, and splices a
//! [`BranchQueue`](crate::elements::BranchQueue) between the first match and
//! the port.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tributary::element::StaticPeer;
//! use tributary::event::{Event, SegmentEvent};
//! use tributary::format::{FormatCaps, VideoCodec};
//! use tributary::node::{DistributionNode, NodeConfig};
//!
//! let node = DistributionNode::new(NodeConfig::new("agnostic0"))?;
//! let port = node.request_output_port(FormatCaps::Any)?;
//! port.link(Arc::new(StaticPeer::new("rtp", VideoCodec::Vp8.into())));
//!
//! node.sink().push_event(Event::Caps(VideoCodec::Vp8.into()));
//! node.sink().push_event(Event::Segment(SegmentEvent::default()));
//! ```

mod config;
mod port;
mod sink;
mod worker;

pub use config::{DEFAULT_BRANCH_QUEUE_BUFFERS, DEFAULT_TARGET_BITRATE, NodeConfig};
pub use port::{ConnectionState, OutputPort, PortId, PortTarget};
pub use sink::SinkPad;

use crate::element::{PadTemplate, ProbeInfo, ProbeMask, ProbeReturn};
use crate::elements::{Splitter, SplitterId};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::format::FormatCaps;
use crate::observability::{NodeMetrics, init_metrics};
use crate::sync::{lock, read, write};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};
use worker::NodeState;

pub(crate) struct NodeInner {
    config: NodeConfig,
    state: Mutex<NodeState>,
    wakeup: Condvar,
    idle: Condvar,
    splitters: RwLock<BTreeMap<SplitterId, Arc<Splitter>>>,
    next_splitter: AtomicU32,
    ports: RwLock<BTreeMap<PortId, Arc<OutputPort>>>,
    next_port: AtomicU32,
    sink: SinkPad,
    metrics: NodeMetrics,
}

impl NodeInner {
    fn new(config: NodeConfig, weak: &Weak<NodeInner>) -> Self {
        let primary = Arc::new(Splitter::new(format!("{}-tee", config.name)));
        let sink = SinkPad::new(Arc::clone(&primary));

        let node = weak.clone();
        sink.probes().add(ProbeMask::EVENT_DOWNSTREAM, move |info| {
            if let ProbeInfo::Event(Event::Segment(_)) = info {
                if let Some(node) = node.upgrade() {
                    node.enqueue_all();
                }
            }
            ProbeReturn::Ok
        });

        let mut splitters = BTreeMap::new();
        splitters.insert(SplitterId(0), primary);

        Self {
            metrics: NodeMetrics::new(&config.name),
            config,
            state: Mutex::new(NodeState::default()),
            wakeup: Condvar::new(),
            idle: Condvar::new(),
            splitters: RwLock::new(splitters),
            next_splitter: AtomicU32::new(1),
            ports: RwLock::new(BTreeMap::new()),
            next_port: AtomicU32::new(0),
            sink,
        }
    }

    pub(crate) fn port(&self, id: PortId) -> Option<Arc<OutputPort>> {
        read(&self.ports).get(&id).cloned()
    }

    pub(crate) fn splitter(&self, id: SplitterId) -> Option<Arc<Splitter>> {
        read(&self.splitters).get(&id).cloned()
    }

    /// Splitters in identity order.
    fn splitters_snapshot(&self) -> Vec<(SplitterId, Arc<Splitter>)> {
        read(&self.splitters)
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect()
    }

    /// Schedule a port for the worker. O(1); safe from streaming threads.
    pub(crate) fn enqueue(&self, id: PortId) -> bool {
        let port = self.port(id);

        let depth = {
            let mut state = lock(&self.state);
            if state.shutdown {
                return false;
            }
            if !state.pending.push(id) {
                trace!(node = %self.config.name, port = %id, "already pending");
                return false;
            }
            // Marked before the worker can pop it.
            if let Some(port) = &port {
                port.mark_pending();
            }
            self.wakeup.notify_one();
            state.pending.len()
        };
        self.metrics.record_enqueued(depth);
        true
    }

    /// Schedule every known port.
    fn enqueue_all(&self) {
        let ids: Vec<PortId> = read(&self.ports).keys().copied().collect();
        debug!(node = %self.config.name, ports = ids.len(), "segment seen, scheduling ports");
        for id in ids {
            self.enqueue(id);
        }
    }
}

/// Routes one stream to many output ports.
///
/// Dropping the node shuts the worker down.
pub struct DistributionNode {
    inner: Arc<NodeInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DistributionNode {
    /// Create a node and start its connection worker.
    ///
    /// The node starts with one splitter, fed by the sink.
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        init_metrics();

        let inner = Arc::new_cyclic(|weak| NodeInner::new(config, weak));
        let worker = thread::Builder::new()
            .name(format!("{}-connect", inner.config.name))
            .spawn({
                let inner = Arc::clone(&inner);
                move || worker::run(inner)
            })?;

        info!(node = %inner.config.name, "distribution node created");
        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Node name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Node configuration.
    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Bitrate offered to encoding branches built for this node.
    pub fn default_bitrate(&self) -> u32 {
        self.inner.config.default_bitrate
    }

    /// The node's input.
    pub fn sink(&self) -> &SinkPad {
        &self.inner.sink
    }

    /// Allocate a new, unconnected output port named `src_<n>`.
    ///
    /// A probe on the port turns upstream `Reconfigure` events into a
    /// reconnect request for the worker; the event itself goes no further.
    pub fn request_output_port(&self, caps: FormatCaps) -> Result<Arc<OutputPort>> {
        if lock(&self.inner.state).shutdown {
            return Err(Error::NodeShutdown);
        }

        let id = PortId(self.inner.next_port.fetch_add(1, Ordering::Relaxed));
        let port = Arc::new(OutputPort::new(
            id,
            PadTemplate::request_src(caps),
            Arc::downgrade(&self.inner),
        ));

        let node = Arc::downgrade(&self.inner);
        port.probes()
            .add(ProbeMask::EVENT_UPSTREAM, move |info| match info {
                ProbeInfo::Event(Event::Reconfigure) => {
                    if let Some(node) = node.upgrade() {
                        node.enqueue(id);
                    }
                    ProbeReturn::Drop
                }
                _ => ProbeReturn::Ok,
            });

        write(&self.inner.ports).insert(id, Arc::clone(&port));
        debug!(node = %self.name(), port = %id, "output port requested");
        Ok(port)
    }

    /// Detach and forget a port.
    ///
    /// Safe while the worker is connecting the same port: the worker holds
    /// no node lock while it works and gives up once it sees the port
    /// released.
    pub fn release_output_port(&self, id: PortId) -> Result<()> {
        let port = write(&self.inner.ports)
            .remove(&id)
            .ok_or(Error::PortNotFound(id))?;
        port.release(&self.inner);
        debug!(node = %self.name(), port = %id, "output port released");
        Ok(())
    }

    /// Register an externally built splitter, such as an encoding branch's
    /// output. Connect attempts consider splitters in registration order.
    pub fn insert_splitter(&self, splitter: Arc<Splitter>) -> SplitterId {
        let id = SplitterId(self.inner.next_splitter.fetch_add(1, Ordering::Relaxed));
        debug!(node = %self.name(), splitter = %id, name = splitter.name(), "splitter inserted");
        write(&self.inner.splitters).insert(id, splitter);
        id
    }

    /// Look up a splitter.
    pub fn splitter(&self, id: SplitterId) -> Option<Arc<Splitter>> {
        self.inner.splitter(id)
    }

    /// The splitter created with the node, fed by the sink.
    pub fn primary_splitter(&self) -> Arc<Splitter> {
        Arc::clone(self.inner.sink.splitter())
    }

    /// All splitters in identity order.
    pub fn splitters(&self) -> Vec<(SplitterId, Arc<Splitter>)> {
        self.inner.splitters_snapshot()
    }

    /// Look up a port.
    pub fn port(&self, id: PortId) -> Option<Arc<OutputPort>> {
        self.inner.port(id)
    }

    /// All registered ports in identity order.
    pub fn ports(&self) -> Vec<Arc<OutputPort>> {
        read(&self.inner.ports).values().cloned().collect()
    }

    /// Number of ports waiting for the worker.
    pub fn pending_len(&self) -> usize {
        lock(&self.inner.state).pending.len()
    }

    /// Block until the worker has nothing queued and nothing in hand, or
    /// `timeout` expires. Returns `true` if the worker went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.inner.state);
        while !state.shutdown && (state.busy || !state.pending.is_empty()) {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            state = self
                .inner
                .idle
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Stop the worker and wait for it.
    ///
    /// Ports still queued are not processed: they fall back to their settled
    /// state and their number is returned. Later calls return 0.
    pub fn shutdown(&self) -> usize {
        {
            let mut state = lock(&self.inner.state);
            state.shutdown = true;
            self.inner.wakeup.notify_all();
        }

        if let Some(handle) = lock(&self.worker).take() {
            if handle.thread().id() == thread::current().id() {
                warn!(node = %self.name(), "shutdown called from the worker, not joining");
            } else if handle.join().is_err() {
                warn!(node = %self.name(), "connection worker panicked");
            }
        }

        let dropped_ports = lock(&self.inner.state).pending.drain();
        for id in &dropped_ports {
            if let Some(port) = self.inner.port(*id) {
                port.settle();
            }
        }
        let dropped = dropped_ports.len();
        if dropped > 0 {
            debug!(node = %self.name(), dropped, "pending ports dropped at shutdown");
            self.inner.metrics.record_dropped_at_shutdown(dropped);
        }
        dropped
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        lock(&self.inner.state).shutdown
    }
}

impl Drop for DistributionNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DistributionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionNode")
            .field("name", &self.name())
            .field("ports", &read(&self.inner.ports).len())
            .field("splitters", &read(&self.inner.splitters).len())
            .field("pending", &self.pending_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::StaticPeer;
    use crate::format::VideoCodec;

    #[test]
    fn test_ports_are_named_in_request_order() {
        let node = DistributionNode::new(NodeConfig::new("agnostic0")).unwrap();
        let a = node.request_output_port(FormatCaps::Any).unwrap();
        let b = node.request_output_port(FormatCaps::Any).unwrap();

        assert_eq!(a.name(), "src_0");
        assert_eq!(b.name(), "src_1");
        assert_eq!(a.state(), ConnectionState::Unconnected);
        assert_eq!(node.ports().len(), 2);
    }

    #[test]
    fn test_release_unknown_port() {
        let node = DistributionNode::new(NodeConfig::default()).unwrap();
        let port = node.request_output_port(FormatCaps::Any).unwrap();

        node.release_output_port(port.id()).unwrap();
        assert!(port.is_released());
        assert!(matches!(
            node.release_output_port(port.id()),
            Err(Error::PortNotFound(id)) if id == port.id()
        ));
    }

    #[test]
    fn test_request_after_shutdown_fails() {
        let node = DistributionNode::new(NodeConfig::default()).unwrap();
        assert_eq!(node.shutdown(), 0);
        assert!(node.is_shutdown());
        assert!(matches!(
            node.request_output_port(FormatCaps::Any),
            Err(Error::NodeShutdown)
        ));
        assert_eq!(node.shutdown(), 0);
    }

    #[test]
    fn test_link_after_shutdown_leaves_port_unconnected() {
        let node = DistributionNode::new(NodeConfig::default()).unwrap();
        let port = node.request_output_port(FormatCaps::Any).unwrap();
        node.shutdown();

        port.link(Arc::new(StaticPeer::new("late", FormatCaps::Any)));
        assert_eq!(port.state(), ConnectionState::Unconnected);
        assert_eq!(node.pending_len(), 0);

        assert!(!node.inner.enqueue(port.id()));
        assert_eq!(port.state(), ConnectionState::Unconnected);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = DistributionNode::new(NodeConfig::new("n").branch_queue_buffers(0));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_primary_splitter_tracks_sink_caps() {
        let node = DistributionNode::new(NodeConfig::default()).unwrap();
        node.sink().push_event(Event::Caps(VideoCodec::Vp8.into()));

        assert_eq!(
            node.primary_splitter().active_caps(),
            Some(VideoCodec::Vp8.into())
        );
        assert!(!node.sink().push_event(Event::Reconfigure));
    }

    #[test]
    fn test_reconfigure_is_swallowed_and_schedules_port() {
        let node = DistributionNode::new(NodeConfig::default()).unwrap();
        node.sink().push_event(Event::Caps(VideoCodec::Vp8.into()));
        let port = node.request_output_port(FormatCaps::Any).unwrap();
        port.link(Arc::new(StaticPeer::new("rtp", VideoCodec::Vp8.into())));
        assert!(node.wait_idle(Duration::from_secs(5)));
        assert_eq!(port.state(), ConnectionState::Connected);

        assert!(!port.push_upstream_event(Event::Reconfigure));
        assert!(node.wait_idle(Duration::from_secs(5)));
        assert_eq!(port.state(), ConnectionState::Connected);
        assert_eq!(node.primary_splitter().stats().upstream_forwarded, 0);
    }
}
