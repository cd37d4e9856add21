//! Metrics collection using metrics-rs.

use metrics::{Counter, Unit, counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether metrics have been initialized.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const PORTS_ENQUEUED: &str = "tributary_ports_enqueued";
const PORTS_CONNECTED: &str = "tributary_ports_connected";
const PORTS_NO_COMPATIBLE: &str = "tributary_ports_no_compatible_splitter";
const PORTS_MALFORMED: &str = "tributary_ports_malformed_negotiation";
const PORTS_DROPPED_AT_SHUTDOWN: &str = "tributary_ports_dropped_at_shutdown";
const PENDING_DEPTH: &str = "tributary_pending_depth";
const BITRATE_UPDATES: &str = "tributary_bitrate_updates";

/// Initialize metrics descriptions.
///
/// Call this once at application startup. Safe to call multiple times.
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    metrics::describe_counter!(
        PORTS_ENQUEUED,
        Unit::Count,
        "Output ports scheduled for (re)connection"
    );
    metrics::describe_counter!(
        PORTS_CONNECTED,
        Unit::Count,
        "Output ports linked to a splitter"
    );
    metrics::describe_counter!(
        PORTS_NO_COMPATIBLE,
        Unit::Count,
        "Connect attempts that found no splitter with compatible caps"
    );
    metrics::describe_counter!(
        PORTS_MALFORMED,
        Unit::Count,
        "Connect attempts whose peer could not report caps"
    );
    metrics::describe_counter!(
        PORTS_DROPPED_AT_SHUTDOWN,
        Unit::Count,
        "Pending ports discarded when the node shut down"
    );
    metrics::describe_gauge!(
        PENDING_DEPTH,
        Unit::Count,
        "Ports waiting for the connection worker"
    );
    metrics::describe_counter!(
        BITRATE_UPDATES,
        Unit::Count,
        "Encoder bitrate changes applied from feedback"
    );
}

/// Counters for one distribution node, labelled with its name.
#[derive(Clone)]
pub struct NodeMetrics {
    node: String,
    enqueued: Counter,
    connected: Counter,
    no_compatible: Counter,
    malformed: Counter,
    dropped_at_shutdown: Counter,
}

impl NodeMetrics {
    /// Create the counters for `node`.
    pub fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            enqueued: counter!(PORTS_ENQUEUED, "node" => node.to_string()),
            connected: counter!(PORTS_CONNECTED, "node" => node.to_string()),
            no_compatible: counter!(PORTS_NO_COMPATIBLE, "node" => node.to_string()),
            malformed: counter!(PORTS_MALFORMED, "node" => node.to_string()),
            dropped_at_shutdown: counter!(PORTS_DROPPED_AT_SHUTDOWN, "node" => node.to_string()),
        }
    }

    /// A port entered the pending queue.
    #[inline]
    pub fn record_enqueued(&self, depth: usize) {
        self.enqueued.increment(1);
        self.record_depth(depth);
    }

    /// Current pending queue depth.
    #[inline]
    pub fn record_depth(&self, depth: usize) {
        gauge!(PENDING_DEPTH, "node" => self.node.clone()).set(depth as f64);
    }

    /// A port was linked to a splitter.
    #[inline]
    pub fn record_connected(&self) {
        self.connected.increment(1);
    }

    /// No splitter matched the peer's caps.
    #[inline]
    pub fn record_no_compatible(&self) {
        self.no_compatible.increment(1);
    }

    /// The peer returned no caps.
    #[inline]
    pub fn record_malformed(&self) {
        self.malformed.increment(1);
    }

    /// Ports left in the queue at shutdown.
    #[inline]
    pub fn record_dropped_at_shutdown(&self, count: usize) {
        self.dropped_at_shutdown.increment(count as u64);
    }

    /// Get the node name.
    pub fn node(&self) -> &str {
        &self.node
    }
}

/// Record an encoder bitrate change applied from feedback.
#[inline]
pub fn record_bitrate_update(encoder: &str, bitrate: u32) {
    counter!(BITRATE_UPDATES, "encoder" => encoder.to_string()).increment(1);
    tracing::trace!(encoder = %encoder, bitrate, "bitrate update recorded");
}
