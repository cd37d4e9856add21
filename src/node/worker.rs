//! The connection worker.
//!
//! One thread per node drains a FIFO of ports needing (re)connection. It is
//! the only place where ports are wired to splitters; streaming threads only
//! enqueue. The pending queue is deduplicated at insertion, so a port
//! scheduled many times before the worker gets to it is processed once.

use super::port::PortId;
use super::NodeInner;
use crate::elements::BranchQueue;
use crate::sync::lock;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, warn};

/// Ordered set of ports awaiting the worker.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    order: VecDeque<PortId>,
    members: HashSet<PortId>,
}

impl PendingQueue {
    /// Append `id` unless it is already queued. Returns `true` if appended.
    pub(crate) fn push(&mut self, id: PortId) -> bool {
        if !self.members.insert(id) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    pub(crate) fn pop(&mut self) -> Option<PortId> {
        let id = self.order.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget everything, returning the dropped entries in queue order.
    pub(crate) fn drain(&mut self) -> Vec<PortId> {
        self.members.clear();
        self.order.drain(..).collect()
    }
}

/// State shared between the node handle, the probes and the worker.
#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub(crate) pending: PendingQueue,
    pub(crate) shutdown: bool,
    pub(crate) busy: bool,
}

pub(crate) fn run(inner: Arc<NodeInner>) {
    let span = inner.config.tracing.node_span(&inner.config.name);
    let _guard = span.enter();
    debug!("connection worker started");

    loop {
        let id = {
            let mut state = lock(&inner.state);
            state.busy = false;
            if state.pending.is_empty() {
                inner.idle.notify_all();
            }
            while !state.shutdown && state.pending.is_empty() {
                state = inner
                    .wakeup
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            // Queued ports are left behind; shutdown() counts them.
            if state.shutdown {
                break;
            }
            state.busy = true;
            let id = state.pending.pop();
            inner.metrics.record_depth(state.pending.len());
            id
        };

        if let Some(id) = id {
            inner.connect_port(id);
        }
    }

    inner.idle.notify_all();
    debug!("connection worker exiting");
}

impl NodeInner {
    /// Wire one port to the first compatible splitter.
    ///
    /// Runs on the worker only. No node-level lock is held here; the port's
    /// own lock guards the final attach.
    pub(crate) fn connect_port(&self, id: PortId) {
        let node = self.config.name.as_str();

        let Some(port) = self.port(id) else {
            debug!(node, port = %id, "port no longer registered");
            return;
        };
        let Some((peer, current)) = port.snapshot() else {
            debug!(node, port = %id, "port released before connect");
            return;
        };

        let Some(peer) = peer else {
            // Unlinking is not acted upon: an existing target is kept.
            debug!(node, port = %id, "no peer, nothing to connect");
            port.settle();
            return;
        };

        let Some(caps) = peer.query_caps() else {
            warn!(node, port = %id, peer = peer.name(), "peer returned no caps, port left unlinked");
            self.metrics.record_malformed();
            port.settle();
            return;
        };

        if let Some(target) = &current {
            let still_accepted = self
                .splitter(target.splitter)
                .and_then(|s| s.active_caps())
                .is_some_and(|active| peer.accept_caps(&active));
            if still_accepted {
                debug!(node, port = %id, splitter = %target.splitter, "no need to reconfigure");
                port.settle();
                return;
            }
        }

        let found = self
            .splitters_snapshot()
            .into_iter()
            .find(|(_, splitter)| splitter.is_compatible(&caps));

        let Some((splitter_id, splitter)) = found else {
            info!(node, port = %id, caps = %caps, "no splitter with compatible caps");
            self.metrics.record_no_compatible();
            port.detach(self);
            return;
        };

        let queue = BranchQueue::new(self.config.branch_queue_buffers)
            .leaky(self.config.leaky)
            .with_name(format!("{}-queue-{}", node, port.name()));

        if port.attach(self, splitter_id, &splitter, queue) {
            info!(node, port = %id, splitter = %splitter_id, peer = peer.name(), "port connected");
            self.metrics.record_connected();
        } else {
            debug!(node, port = %id, "port released during connect");
        }
    }
}
