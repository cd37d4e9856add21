//! Tracing integration for structured logging and spans.

use tracing::{Level, Span, span};

// `span!` wants its level at compile time.
macro_rules! leveled_span {
    ($level:expr, $name:literal, $($fields:tt)*) => {{
        let level = $level;
        if level == Level::ERROR {
            span!(Level::ERROR, $name, $($fields)*)
        } else if level == Level::WARN {
            span!(Level::WARN, $name, $($fields)*)
        } else if level == Level::INFO {
            span!(Level::INFO, $name, $($fields)*)
        } else if level == Level::DEBUG {
            span!(Level::DEBUG, $name, $($fields)*)
        } else {
            span!(Level::TRACE, $name, $($fields)*)
        }
    }};
}

/// Configuration for tracing behavior.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Whether the connection worker runs inside a node span.
    pub node_spans: bool,
    /// Whether encoding branches create spans while being built.
    pub branch_spans: bool,
    /// Whether every probe invocation on the data path is logged.
    pub probe_events: bool,
    /// Level of the spans created through this configuration.
    pub level: Level,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            node_spans: true,
            branch_spans: true,
            probe_events: false, // one line per buffer
            level: Level::INFO,
        }
    }
}

impl TracingConfig {
    /// Everything on, at debug level.
    pub fn all() -> Self {
        Self {
            node_spans: true,
            branch_spans: true,
            probe_events: true,
            level: Level::DEBUG,
        }
    }

    /// Disable all spans.
    pub fn none() -> Self {
        Self {
            node_spans: false,
            branch_spans: false,
            probe_events: false,
            level: Level::INFO,
        }
    }

    /// Span for a node's connection worker at `level`, or a disabled span.
    pub fn node_span(&self, name: &str) -> Span {
        if self.node_spans {
            leveled_span!(self.level, "connect-worker", node = %name)
        } else {
            Span::none()
        }
    }

    /// Span for building an encoding branch at `level`, or a disabled span.
    pub fn branch_span(&self, encoder: &str) -> Span {
        if self.branch_spans {
            leveled_span!(self.level, "encoding-branch", encoder = %encoder)
        } else {
            Span::none()
        }
    }
}

/// Create a span for a node's connection worker.
///
/// # Example
///
/// ```rust,ignore
/// use tributary::observability::span_node;
///
/// let span = span_node("agnostic0");
/// let _guard = span.enter();
/// ```
#[inline]
pub fn span_node(name: &str) -> Span {
    span!(Level::DEBUG, "connect-worker", node = %name)
}

/// Create a span for assembling an encoding branch.
#[inline]
pub fn span_branch(encoder: &str) -> Span {
    span!(Level::DEBUG, "encoding-branch", encoder = %encoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_spans() {
        let config = TracingConfig::none();
        assert!(config.node_span("agnostic0").is_disabled());
        assert!(config.branch_span("vp8enc").is_disabled());
    }

    #[test]
    fn test_presets() {
        assert!(TracingConfig::all().probe_events);
        assert!(!TracingConfig::default().probe_events);
        assert_eq!(TracingConfig::all().level, Level::DEBUG);
    }

    fn span_level(span: &Span) -> Option<Level> {
        span.metadata().map(|meta| *meta.level())
    }

    #[test]
    fn test_spans_use_configured_level() {
        let mut config = TracingConfig::default();
        assert_eq!(span_level(&config.node_span("agnostic0")), Some(Level::INFO));
        assert_eq!(span_level(&config.branch_span("vp8enc")), Some(Level::INFO));

        for level in [Level::ERROR, Level::WARN, Level::DEBUG, Level::TRACE] {
            config.level = level;
            assert_eq!(span_level(&config.node_span("agnostic0")), Some(level));
            assert_eq!(span_level(&config.branch_span("vp8enc")), Some(level));
        }

        assert_eq!(span_level(&TracingConfig::none().node_span("agnostic0")), None);
    }
}
