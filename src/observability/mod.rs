//! Observability features: metrics and tracing.
//!
//! ## Metrics
//!
//! Tributary exposes the following metrics:
//!
//! | Metric | Type | Description |
//! |--------|------|-------------|
//! | `tributary_ports_enqueued` | Counter | Ports scheduled for (re)connection |
//! | `tributary_ports_connected` | Counter | Ports linked to a splitter |
//! | `tributary_ports_no_compatible_splitter` | Counter | Connect attempts with no matching splitter |
//! | `tributary_ports_malformed_negotiation` | Counter | Peers that returned no caps |
//! | `tributary_ports_dropped_at_shutdown` | Counter | Pending ports discarded at shutdown |
//! | `tributary_pending_depth` | Gauge | Ports waiting for the worker |
//! | `tributary_bitrate_updates` | Counter | Encoder bitrate changes from feedback |
//!
//! Recording is a no-op until a recorder (prometheus, statsd, ...) is
//! installed.
//!
//! ## Tracing
//!
//! The connection worker runs inside a `connect-worker` span carrying the
//! node name; encoding branches are built inside an `encoding-branch` span.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tributary::observability::init_metrics;
//!
//! init_metrics();
//! ```

mod metrics;
mod tracing_support;

pub use metrics::{NodeMetrics, init_metrics, record_bitrate_update};
pub use tracing_support::{TracingConfig, span_branch, span_node};
