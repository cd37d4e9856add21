//! Encoding branches.
//!
//! An [`EncodingBranch`] takes one raw stream, normalises it, encodes it with
//! the first suitable encoder and fans the result out through its own
//! [`Splitter`](crate::elements::Splitter). Receiver feedback retunes the
//! encoder bitrate while data flows.

mod branch;
mod encoder;
mod estimator;
mod profile;
mod property;
mod topology;

pub use branch::{BranchConfig, BranchContext, EncodingBranch};
pub use encoder::{Encoder, EncoderCandidate, EncoderFactory, EncoderRegistry, RecordingEncoder};
pub use estimator::{EstimatorFactory, FeedbackEstimator, MinBitrateEstimator, MinEstimatorFactory};
pub use profile::EncoderFamily;
pub use property::{PropertyStore, PropertyValue};
pub use topology::{BranchState, Stage, StageKind, Topology};
