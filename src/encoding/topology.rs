//! Stage chain of an encoding branch.
//!
//! A branch is a straight chain: rate normaliser, format converter,
//! mediator, an optional raw format filter, the encoder and the output
//! splitter. The stage factories depend on the media kind:
//!
//! | stage | audio | video |
//! |---|---|---|
//! | rate normaliser | `audiorate` | `videorate` |
//! | format converter | `audioconvert` | `videoconvert` |
//! | mediator | `audioresample` | `videoscale` |

use crate::format::{FormatCaps, MediaKind};
use std::fmt;

/// Running state a stage can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum BranchState {
    /// Not allocated.
    #[default]
    Null,
    /// Resources allocated.
    Ready,
    /// Prerolled, not flowing.
    Paused,
    /// Data flowing.
    Playing,
}

/// Role of a stage in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Keeps a constant rate (duplicates or drops).
    RateNormalizer,
    /// Converts pixel or sample formats.
    FormatConverter,
    /// Scales or resamples so the encoder input can be satisfied.
    Mediator,
    /// Forces a raw format in front of the encoder.
    RawFormatFilter,
    /// The encoder itself.
    Encoder,
    /// Splitter fanning out the encoded stream.
    OutputSplitter,
}

/// One element of the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Role in the chain.
    pub kind: StageKind,
    /// Factory or instance name.
    pub factory: String,
    /// Forced caps, for filter stages.
    pub caps: Option<FormatCaps>,
    /// Current running state.
    pub state: BranchState,
}

impl Stage {
    /// Create a stage in the `Null` state.
    pub fn new(kind: StageKind, factory: impl Into<String>) -> Self {
        Self {
            kind,
            factory: factory.into(),
            caps: None,
            state: BranchState::Null,
        }
    }

    /// Caps filter stage.
    pub fn filter(caps: FormatCaps) -> Self {
        Self {
            caps: Some(caps),
            ..Self::new(StageKind::RawFormatFilter, "capsfilter")
        }
    }

    /// Rate normaliser for `caps`.
    pub fn rate_for(caps: &FormatCaps) -> Self {
        Self::new(
            StageKind::RateNormalizer,
            by_kind(caps, "audiorate", "videorate"),
        )
    }

    /// Format converter for `caps`.
    pub fn convert_for(caps: &FormatCaps) -> Self {
        Self::new(
            StageKind::FormatConverter,
            by_kind(caps, "audioconvert", "videoconvert"),
        )
    }

    /// Mediator for `caps`.
    pub fn mediator_for(caps: &FormatCaps) -> Self {
        Self::new(
            StageKind::Mediator,
            by_kind(caps, "audioresample", "videoscale"),
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.caps {
            Some(caps) => write!(f, "{} caps=\"{}\"", self.factory, caps),
            None => f.write_str(&self.factory),
        }
    }
}

fn by_kind(caps: &FormatCaps, audio: &'static str, video: &'static str) -> &'static str {
    match caps.kind() {
        MediaKind::Audio => audio,
        MediaKind::Video | MediaKind::Unknown => video,
    }
}

/// Stages plus the links recorded between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Topology {
    stages: Vec<Stage>,
    links: Vec<(usize, usize)>,
}

impl Topology {
    /// Empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage, returning its index.
    pub fn add(&mut self, stage: Stage) -> usize {
        self.stages.push(stage);
        self.stages.len() - 1
    }

    /// Bring every stage to `state`.
    pub fn sync_state(&mut self, state: BranchState) {
        for stage in &mut self.stages {
            stage.state = state;
        }
    }

    /// Link the stages in insertion order.
    pub fn link_chain(&mut self) {
        self.links = (1..self.stages.len()).map(|i| (i - 1, i)).collect();
    }

    /// All stages, head first.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Recorded links as `(upstream, downstream)` indices.
    pub fn links(&self) -> &[(usize, usize)] {
        &self.links
    }

    /// First stage of the chain.
    pub fn head(&self) -> Option<&Stage> {
        self.stages.first()
    }

    /// First stage of the given kind.
    pub fn find(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind == kind)
    }

    /// Stage factory names, head first.
    pub fn factories(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.factory.as_str()).collect()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" ! ")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioCodec;

    #[test]
    fn test_stage_factories_follow_media_kind() {
        let audio = FormatCaps::raw_audio();
        assert_eq!(Stage::rate_for(&audio).factory, "audiorate");
        assert_eq!(Stage::convert_for(&audio).factory, "audioconvert");
        assert_eq!(Stage::mediator_for(&audio).factory, "audioresample");
        assert_eq!(Stage::rate_for(&AudioCodec::Opus.into()).factory, "audiorate");

        let video = FormatCaps::raw_video();
        assert_eq!(Stage::rate_for(&video).factory, "videorate");
        assert_eq!(Stage::convert_for(&video).factory, "videoconvert");
        assert_eq!(Stage::mediator_for(&video).factory, "videoscale");
    }

    #[test]
    fn test_chain_links_and_display() {
        let caps = FormatCaps::raw_video();
        let mut topology = Topology::new();
        topology.add(Stage::rate_for(&caps));
        topology.add(Stage::convert_for(&caps));
        topology.add(Stage::filter(FormatCaps::i420()));
        topology.sync_state(BranchState::Playing);
        topology.link_chain();

        assert_eq!(topology.links(), &[(0, 1), (1, 2)]);
        assert!(topology.stages().iter().all(|s| s.state == BranchState::Playing));
        assert_eq!(topology.head().map(|s| s.kind), Some(StageKind::RateNormalizer));
        assert!(topology.to_string().starts_with("videorate ! videoconvert ! capsfilter caps=\"video/x-raw"));
    }
}
