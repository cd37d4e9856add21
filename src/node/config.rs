//! Node configuration.

use crate::elements::LeakyMode;
use crate::error::{Error, Result};
use crate::observability::TracingConfig;

/// Bitrate handed to encoding branches when the application sets none.
pub const DEFAULT_TARGET_BITRATE: u32 = 100_000_000;

/// Buffers held per branch queue before the leaky policy applies.
pub const DEFAULT_BRANCH_QUEUE_BUFFERS: usize = 200;

/// Distribution node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node name, used for the worker thread and in logs.
    pub name: String,
    /// Bitrate (bits/sec) offered to encoding branches built for this node.
    pub default_bitrate: u32,
    /// Capacity of each per-port branch queue, in buffers.
    pub branch_queue_buffers: usize,
    /// What a full branch queue does with new buffers.
    pub leaky: LeakyMode,
    /// Span configuration for the worker.
    pub tracing: TracingConfig,
}

impl NodeConfig {
    /// Create a configuration with defaults and the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_bitrate: DEFAULT_TARGET_BITRATE,
            branch_queue_buffers: DEFAULT_BRANCH_QUEUE_BUFFERS,
            leaky: LeakyMode::Downstream,
            tracing: TracingConfig::default(),
        }
    }

    /// Set the default target bitrate in bits per second.
    pub fn default_bitrate(mut self, bps: u32) -> Self {
        self.default_bitrate = bps;
        self
    }

    /// Set the per-branch queue capacity.
    pub fn branch_queue_buffers(mut self, buffers: usize) -> Self {
        self.branch_queue_buffers = buffers;
        self
    }

    /// Set the leaky mode of branch queues.
    pub fn leaky(mut self, mode: LeakyMode) -> Self {
        self.leaky = mode;
        self
    }

    /// Set the tracing configuration.
    pub fn tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }

    /// Check the configuration for values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("node name must not be empty".into()));
        }
        if self.default_bitrate == 0 {
            return Err(Error::Config("default bitrate must be non-zero".into()));
        }
        if self.branch_queue_buffers == 0 {
            return Err(Error::Config(
                "branch queues must hold at least one buffer".into(),
            ));
        }
        Ok(())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("agnosticbin")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.default_bitrate, 100_000_000);
        assert_eq!(config.branch_queue_buffers, 200);
        assert_eq!(config.leaky, LeakyMode::Downstream);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(matches!(
            NodeConfig::new("n").default_bitrate(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            NodeConfig::new("n").branch_queue_buffers(0).validate(),
            Err(Error::Config(_))
        ));
        assert!(NodeConfig::new("").validate().is_err());
    }
}
