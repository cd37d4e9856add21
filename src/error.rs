//! Error types for Tributary.

use crate::node::PortId;
use thiserror::Error;

/// Result type alias using Tributary's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tributary operations.
///
/// Only construction-time impossibilities are surfaced here. Per-port
/// problems met by the connection worker (no compatible splitter, a peer
/// without caps) are logged and absorbed.
#[derive(Error, Debug)]
pub enum Error {
    /// No single-input/single-output encoder accepts the requested caps.
    #[error("no suitable encoder for caps: {caps}")]
    NoSuitableEncoder {
        /// Human-readable description of the caps that were requested.
        caps: String,
    },

    /// The encoder factory failed to instantiate the selected candidate.
    #[error("failed to instantiate encoder: {0}")]
    EncoderInstantiation(String),

    /// The port is not (or no longer) owned by the node.
    #[error("output port not found: {0}")]
    PortNotFound(PortId),

    /// The node has been shut down and accepts no further requests.
    #[error("distribution node is shut down")]
    NodeShutdown,

    /// The connection worker thread could not be started.
    #[error("failed to spawn connection worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
