//! Encoding branch controller.
//!
//! An [`EncodingBranch`] turns one raw stream into one encoded stream:
//!
//! ```text
//! rate ! convert ! mediator ! [capsfilter] ! encoder ! output splitter
//! ```
//!
//! The branch is built for the encoded caps a consumer asked for. The encoder
//! is the first single-input/single-output candidate the [`EncoderFactory`]
//! offers whose output produces those caps; the pre-processing stages follow
//! their media kind. A buffer probe on the encoder's input reads the
//! feedback estimator for every buffer and retunes the encoder when the
//! estimate moves by at least one kbit/s.

use super::encoder::{Encoder, EncoderCandidate, EncoderFactory};
use super::estimator::{EstimatorFactory, FeedbackEstimator};
use super::profile::EncoderFamily;
use super::topology::{BranchState, Stage, StageKind, Topology};
use crate::buffer::Buffer;
use crate::element::{Peer, ProbeId, ProbeInfo, ProbeMask, ProbeReturn};
use crate::elements::Splitter;
use crate::error::{Error, Result};
use crate::format::FormatCaps;
use crate::observability::{TracingConfig, record_bitrate_update};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Collaborators an encoding branch is built with.
#[derive(Clone)]
pub struct BranchContext {
    /// Where encoders come from.
    pub encoders: Arc<dyn EncoderFactory>,
    /// Where feedback estimators come from.
    pub estimators: Arc<dyn EstimatorFactory>,
    /// Running state of the container the branch is added to.
    pub parent_state: BranchState,
    /// Span configuration.
    pub tracing: TracingConfig,
}

impl BranchContext {
    /// Create a context for a container in the `Playing` state.
    pub fn new(encoders: Arc<dyn EncoderFactory>, estimators: Arc<dyn EstimatorFactory>) -> Self {
        Self {
            encoders,
            estimators,
            parent_state: BranchState::Playing,
            tracing: TracingConfig::default(),
        }
    }

    /// Set the container's running state.
    pub fn with_state(mut self, state: BranchState) -> Self {
        self.parent_state = state;
        self
    }

    /// Set the tracing configuration.
    pub fn with_tracing(mut self, tracing: TracingConfig) -> Self {
        self.tracing = tracing;
        self
    }
}

/// Live configuration of a branch.
#[derive(Debug, Default)]
pub struct BranchConfig {
    target_bitrate: Arc<AtomicU32>,
    family: Option<EncoderFamily>,
    topology: Topology,
}

impl BranchConfig {
    /// Current target bitrate in bits/sec. Follows the applied feedback.
    pub fn target_bitrate(&self) -> u32 {
        self.target_bitrate.load(Ordering::Relaxed)
    }

    /// Family of the selected encoder.
    pub fn family(&self) -> Option<EncoderFamily> {
        self.family
    }

    /// Assembled stages, head first.
    pub fn stages(&self) -> &[Stage] {
        self.topology.stages()
    }

    /// Stages with their links.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}

/// One encoder with its pre-processing chain and bitrate control.
///
/// Dropping the branch runs [`dispose`](Self::dispose).
pub struct EncodingBranch {
    ctx: BranchContext,
    config: BranchConfig,
    input_caps: Option<FormatCaps>,
    output_caps: Option<FormatCaps>,
    encoder: Option<Arc<dyn Encoder>>,
    probe: Option<ProbeId>,
    estimator: Option<Arc<dyn FeedbackEstimator>>,
    output: Arc<Splitter>,
    bitrate_updates: Arc<AtomicU64>,
}

impl EncodingBranch {
    /// Create an unconfigured branch. Only the output splitter exists.
    pub fn new(ctx: BranchContext) -> Self {
        Self {
            ctx,
            config: BranchConfig::default(),
            input_caps: None,
            output_caps: None,
            encoder: None,
            probe: None,
            estimator: None,
            output: Arc::new(Splitter::new("enc-output-tee")),
            bitrate_updates: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build a branch producing `caps` at `target_bitrate` bits/sec.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let ctx = BranchContext::new(Arc::new(registry), Arc::new(MinEstimatorFactory::new()));
    /// let branch = EncodingBranch::build(ctx, &VideoCodec::Vp8.into(), 300_000)?;
    /// assert_eq!(branch.config().family(), Some(EncoderFamily::Vp8));
    /// ```
    pub fn build(ctx: BranchContext, caps: &FormatCaps, target_bitrate: u32) -> Result<Self> {
        let mut branch = Self::new(ctx);
        branch.configure(caps, target_bitrate)?;
        Ok(branch)
    }

    /// Select, tune and wire the encoder, then assemble the chain.
    ///
    /// Fails with [`Error::NoSuitableEncoder`] if no single-input,
    /// single-output encoder produces `caps`. Nothing is allocated on
    /// failure.
    pub fn configure(&mut self, caps: &FormatCaps, target_bitrate: u32) -> Result<()> {
        if self.encoder.is_some() {
            return Err(Error::Config("encoding branch already configured".into()));
        }

        let candidate = select_encoder(self.ctx.encoders.as_ref(), caps)?;
        let encoder = self.ctx.encoders.instantiate(&candidate)?;

        let span = self.ctx.tracing.branch_span(encoder.name());
        let _guard = span.enter();

        let family = EncoderFamily::from_name(encoder.factory_name());
        family.configure(encoder.as_ref(), target_bitrate);
        self.config.target_bitrate.store(target_bitrate, Ordering::Relaxed);
        self.config.family = Some(family);

        let estimator = self
            .ctx
            .estimators
            .create(&format!("{}:sink", encoder.name()));
        let probe = encoder.sink_probes().add(
            ProbeMask::BUFFER,
            bitrate_probe(
                Arc::downgrade(&encoder),
                Arc::clone(&estimator),
                family,
                Arc::clone(&self.config.target_bitrate),
                Arc::clone(&self.bitrate_updates),
                self.ctx.tracing.probe_events,
            ),
        );

        let mut topology = Topology::new();
        topology.add(Stage::rate_for(caps));
        topology.add(Stage::convert_for(caps));
        topology.add(Stage::mediator_for(caps));
        if let Some(filter) = family.input_filter() {
            topology.add(Stage::filter(filter));
        }
        topology.add(Stage::new(StageKind::Encoder, encoder.name()));
        topology.add(Stage::new(StageKind::OutputSplitter, self.output.name()));
        topology.sync_state(self.ctx.parent_state);
        topology.link_chain();

        debug!(encoder = encoder.name(), %family, chain = %topology, "encoding branch assembled");

        self.config.topology = topology;
        self.input_caps = Some(candidate.input_caps().cloned().unwrap_or_default());
        self.output_caps = Some(caps.clone());
        self.probe = Some(probe);
        self.estimator = Some(estimator);
        self.encoder = Some(encoder);
        Ok(())
    }

    /// Whether an encoder has been selected.
    pub fn is_configured(&self) -> bool {
        self.encoder.is_some()
    }

    /// Live configuration.
    pub fn config(&self) -> &BranchConfig {
        &self.config
    }

    /// First stage of the chain, where input is linked.
    pub fn head(&self) -> Option<&Stage> {
        self.config.topology.head()
    }

    /// Splitter fanning out the encoded stream.
    pub fn output(&self) -> &Arc<Splitter> {
        &self.output
    }

    /// The selected encoder.
    pub fn encoder(&self) -> Option<&Arc<dyn Encoder>> {
        self.encoder.as_ref()
    }

    /// Raw caps the selected encoder takes.
    pub fn input_caps(&self) -> Option<&FormatCaps> {
        self.input_caps.as_ref()
    }

    /// Encoded caps the branch was built for.
    pub fn output_caps(&self) -> Option<&FormatCaps> {
        self.output_caps.as_ref()
    }

    /// Number of bitrate changes applied from feedback.
    pub fn bitrate_updates(&self) -> u64 {
        self.bitrate_updates.load(Ordering::Relaxed)
    }

    /// Feed a buffer through the chain to the encoder input. Returns `false`
    /// if the branch is not configured or an input probe dropped it.
    pub fn push_buffer(&self, buffer: &Buffer) -> bool {
        match &self.encoder {
            Some(encoder) => encoder.push_buffer(buffer),
            None => false,
        }
    }

    /// Release the probe, then the estimator. Safe to call repeatedly and
    /// on a branch that was never configured.
    pub fn dispose(&mut self) {
        if let Some(id) = self.probe.take() {
            if let Some(encoder) = &self.encoder {
                encoder.sink_probes().remove(id);
            }
        }
        if let Some(estimator) = self.estimator.take() {
            self.ctx.estimators.destroy(estimator);
        }
        trace!("encoding branch disposed");
    }
}

impl Drop for EncodingBranch {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// As a consumer, the branch takes what its encoder's input takes.
impl Peer for EncodingBranch {
    fn name(&self) -> &str {
        self.encoder
            .as_ref()
            .map(|e| e.name())
            .unwrap_or("encoding-branch")
    }

    fn query_caps(&self) -> Option<FormatCaps> {
        self.input_caps.clone()
    }
}

impl std::fmt::Debug for EncodingBranch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodingBranch")
            .field("encoder", &self.encoder.as_ref().map(|e| e.name().to_string()))
            .field("config", &self.config)
            .finish()
    }
}

/// First candidate with exactly one input and one output template.
fn select_encoder(factory: &dyn EncoderFactory, caps: &FormatCaps) -> Result<EncoderCandidate> {
    let candidates = factory.list_compatible_encoders(caps);
    for candidate in &candidates {
        if !candidate.is_single_in_out() {
            trace!(encoder = %candidate.factory_name, "skipping multi-pad encoder");
        }
    }
    candidates
        .into_iter()
        .find(EncoderCandidate::is_single_in_out)
        .ok_or_else(|| {
            warn!(caps = %caps, "no suitable encoder");
            Error::NoSuitableEncoder {
                caps: caps.to_string(),
            }
        })
}

fn bitrate_probe(
    encoder: Weak<dyn Encoder>,
    estimator: Arc<dyn FeedbackEstimator>,
    family: EncoderFamily,
    target: Arc<AtomicU32>,
    updates: Arc<AtomicU64>,
    log_every_buffer: bool,
) -> impl Fn(&ProbeInfo<'_>) -> ProbeReturn + Send + Sync + 'static {
    move |_| {
        let estimate = estimator.min_estimate();
        if log_every_buffer {
            trace!(estimate, "bitrate probe");
        }
        if estimate == 0 {
            return ProbeReturn::Ok;
        }
        let Some(encoder) = encoder.upgrade() else {
            return ProbeReturn::Ok;
        };
        if family.apply_estimate(encoder.as_ref(), estimate).is_some() {
            debug!(encoder = encoder.name(), bitrate = estimate, "set bitrate");
            target.store(estimate, Ordering::Relaxed);
            updates.fetch_add(1, Ordering::Relaxed);
            record_bitrate_update(encoder.name(), estimate);
        }
        ProbeReturn::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encoder::EncoderRegistry;
    use crate::encoding::estimator::MinEstimatorFactory;
    use crate::format::VideoCodec;

    fn context(registry: EncoderRegistry) -> (BranchContext, Arc<MinEstimatorFactory>) {
        let estimators = Arc::new(MinEstimatorFactory::new());
        let ctx = BranchContext::new(Arc::new(registry), estimators.clone());
        (ctx, estimators)
    }

    #[test]
    fn test_configure_twice_is_rejected() {
        let registry =
            EncoderRegistry::new().with_recording("vp8enc", FormatCaps::raw_video(), VideoCodec::Vp8.into());
        let (ctx, estimators) = context(registry);

        let mut branch = EncodingBranch::build(ctx, &VideoCodec::Vp8.into(), 300_000).unwrap();
        assert!(matches!(
            branch.configure(&VideoCodec::Vp8.into(), 300_000),
            Err(Error::Config(_))
        ));
        assert_eq!(estimators.created(), 1);
    }

    #[test]
    fn test_unconfigured_branch_is_inert() {
        let (ctx, estimators) = context(EncoderRegistry::new());
        let mut branch = EncodingBranch::new(ctx);

        assert!(!branch.is_configured());
        assert!(branch.head().is_none());
        assert!(!branch.push_buffer(&Buffer::new(vec![0u8; 4], 0)));
        assert_eq!(Peer::name(&branch), "encoding-branch");

        branch.dispose();
        drop(branch);
        assert_eq!(estimators.destroyed(), 0);
    }

    #[test]
    fn test_stage_states_follow_parent() {
        let registry =
            EncoderRegistry::new().with_recording("vp8enc", FormatCaps::raw_video(), VideoCodec::Vp8.into());
        let (ctx, _) = context(registry);

        let branch = EncodingBranch::build(
            ctx.with_state(BranchState::Paused),
            &VideoCodec::Vp8.into(),
            300_000,
        )
        .unwrap();
        assert!(branch
            .config()
            .stages()
            .iter()
            .all(|s| s.state == BranchState::Paused));
    }
}
