//! Encoder seams.
//!
//! The crate does not encode anything itself. It selects and tunes encoders
//! supplied through an [`EncoderFactory`]; an [`Encoder`] only has to expose
//! named properties and the probes on its input.
//!
//! [`EncoderRegistry`] is an in-process factory built from registered
//! candidates, and [`RecordingEncoder`] an encoder that keeps every property
//! write. Together they are enough to assemble branches without a media
//! framework.

use super::property::{PropertyStore, PropertyValue};
use crate::buffer::Buffer;
use crate::element::{PadDirection, PadTemplate, ProbeInfo, ProbeMask, ProbeReturn, ProbeTable};
use crate::error::{Error, Result};
use crate::format::FormatCaps;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A live encoder instance.
pub trait Encoder: Send + Sync {
    /// Instance name, e.g. `vp8enc0`.
    fn name(&self) -> &str;

    /// Name of the factory the instance was created from, e.g. `vp8enc`.
    fn factory_name(&self) -> &str;

    /// Set a named property.
    fn set_property(&self, key: &str, value: PropertyValue);

    /// Read a named property.
    fn property(&self, key: &str) -> Option<PropertyValue>;

    /// Probes on the encoder's input pad. Buffers entering the encoder pass
    /// through them.
    fn sink_probes(&self) -> &ProbeTable;

    /// Feed a buffer to the encoder. Returns `false` if an input probe
    /// dropped it.
    fn push_buffer(&self, buffer: &Buffer) -> bool {
        self.sink_probes()
            .dispatch(ProbeMask::BUFFER, &ProbeInfo::Buffer(buffer))
            != ProbeReturn::Drop
    }
}

/// An encoder implementation that can be instantiated.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderCandidate {
    /// Factory name, e.g. `x264enc`.
    pub factory_name: String,
    /// Pad templates the implementation advertises.
    pub templates: Vec<PadTemplate>,
}

impl EncoderCandidate {
    /// Candidate with a single `sink` and a single `src` template.
    pub fn new(factory_name: impl Into<String>, sink: FormatCaps, src: FormatCaps) -> Self {
        Self {
            factory_name: factory_name.into(),
            templates: vec![PadTemplate::sink(sink), PadTemplate::src(src)],
        }
    }

    /// Add another pad template.
    pub fn with_template(mut self, template: PadTemplate) -> Self {
        self.templates.push(template);
        self
    }

    /// Input templates.
    pub fn sink_templates(&self) -> impl Iterator<Item = &PadTemplate> {
        self.templates
            .iter()
            .filter(|t| t.direction == PadDirection::Input)
    }

    /// Output templates.
    pub fn src_templates(&self) -> impl Iterator<Item = &PadTemplate> {
        self.templates
            .iter()
            .filter(|t| t.direction == PadDirection::Output)
    }

    /// Whether the implementation has exactly one input and one output.
    pub fn is_single_in_out(&self) -> bool {
        self.sink_templates().count() == 1 && self.src_templates().count() == 1
    }

    /// Whether any input template accepts `caps`.
    pub fn accepts(&self, caps: &FormatCaps) -> bool {
        self.sink_templates().any(|t| t.caps.can_intersect(caps))
    }

    /// Whether any output template can produce `caps`.
    pub fn produces(&self, caps: &FormatCaps) -> bool {
        self.src_templates().any(|t| t.caps.can_intersect(caps))
    }

    /// Caps of the first input template.
    pub fn input_caps(&self) -> Option<&FormatCaps> {
        self.sink_templates().next().map(|t| &t.caps)
    }
}

/// Source of encoder implementations.
pub trait EncoderFactory: Send + Sync {
    /// Candidates whose output can produce `caps`, in preference order.
    fn list_compatible_encoders(&self, caps: &FormatCaps) -> Vec<EncoderCandidate>;

    /// Create an instance of `candidate`.
    fn instantiate(&self, candidate: &EncoderCandidate) -> Result<Arc<dyn Encoder>>;
}

type EncoderConstructor = Arc<dyn Fn(&str) -> Result<Arc<dyn Encoder>> + Send + Sync>;

/// Registry of encoder constructors, usable as an [`EncoderFactory`].
///
/// Candidates are listed in registration order. Instances are named after
/// their factory with a per-factory counter (`vp8enc0`, `vp8enc1`, ...).
///
/// # Example
///
/// ```rust
/// use tributary::encoding::{EncoderFactory, EncoderRegistry};
/// use tributary::format::{FormatCaps, VideoCodec};
///
/// let registry = EncoderRegistry::new()
///     .with_recording("vp8enc", FormatCaps::raw_video(), VideoCodec::Vp8.into());
///
/// let candidates = registry.list_compatible_encoders(&VideoCodec::Vp8.into());
/// assert_eq!(candidates.len(), 1);
/// assert!(registry.list_compatible_encoders(&VideoCodec::H264.into()).is_empty());
/// ```
#[derive(Default)]
pub struct EncoderRegistry {
    entries: Vec<(EncoderCandidate, EncoderConstructor)>,
    counters: Mutex<HashMap<String, u64>>,
}

impl EncoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a candidate with its constructor.
    pub fn register<F>(&mut self, candidate: EncoderCandidate, constructor: F)
    where
        F: Fn(&str) -> Result<Arc<dyn Encoder>> + Send + Sync + 'static,
    {
        self.entries.push((candidate, Arc::new(constructor)));
    }

    /// Register a [`RecordingEncoder`] candidate with one sink and one src
    /// template.
    pub fn with_recording(mut self, factory_name: &str, sink: FormatCaps, src: FormatCaps) -> Self {
        let candidate = EncoderCandidate::new(factory_name, sink, src);
        let factory = factory_name.to_string();
        self.register(candidate, move |name| {
            Ok(Arc::new(RecordingEncoder::new(name, &factory)) as Arc<dyn Encoder>)
        });
        self
    }

    /// Number of registered candidates.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_instance_name(&self, factory_name: &str) -> String {
        let mut counters = crate::sync::lock(&self.counters);
        let counter = counters.entry(factory_name.to_string()).or_insert(0);
        let name = format!("{factory_name}{counter}");
        *counter += 1;
        name
    }
}

impl EncoderFactory for EncoderRegistry {
    fn list_compatible_encoders(&self, caps: &FormatCaps) -> Vec<EncoderCandidate> {
        self.entries
            .iter()
            .filter(|(candidate, _)| candidate.produces(caps))
            .map(|(candidate, _)| candidate.clone())
            .collect()
    }

    fn instantiate(&self, candidate: &EncoderCandidate) -> Result<Arc<dyn Encoder>> {
        let (_, constructor) = self
            .entries
            .iter()
            .find(|(c, _)| c.factory_name == candidate.factory_name)
            .ok_or_else(|| {
                Error::EncoderInstantiation(format!(
                    "{} is not registered",
                    candidate.factory_name
                ))
            })?;
        constructor(&self.next_instance_name(&candidate.factory_name))
    }
}

/// An encoder that only records what is done to it.
///
/// Properties are kept in a [`PropertyStore`]; buffers passing the input
/// probes are counted.
#[derive(Debug)]
pub struct RecordingEncoder {
    name: String,
    factory_name: String,
    properties: PropertyStore,
    probes: ProbeTable,
    property_writes: AtomicU64,
    buffers: AtomicU64,
}

impl RecordingEncoder {
    /// Create an instance.
    pub fn new(name: &str, factory_name: &str) -> Self {
        Self {
            name: name.to_string(),
            factory_name: factory_name.to_string(),
            properties: PropertyStore::new(),
            probes: ProbeTable::new(),
            property_writes: AtomicU64::new(0),
            buffers: AtomicU64::new(0),
        }
    }

    /// The recorded properties.
    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// Number of `set_property` calls so far.
    pub fn property_writes(&self) -> u64 {
        self.property_writes.load(Ordering::Relaxed)
    }

    /// Number of buffers accepted.
    pub fn buffers(&self) -> u64 {
        self.buffers.load(Ordering::Relaxed)
    }
}

impl Encoder for RecordingEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn factory_name(&self) -> &str {
        &self.factory_name
    }

    fn set_property(&self, key: &str, value: PropertyValue) {
        self.property_writes.fetch_add(1, Ordering::Relaxed);
        self.properties.set(key, value);
    }

    fn property(&self, key: &str) -> Option<PropertyValue> {
        self.properties.get(key)
    }

    fn sink_probes(&self) -> &ProbeTable {
        &self.probes
    }

    fn push_buffer(&self, buffer: &Buffer) -> bool {
        let accepted = self
            .probes
            .dispatch(ProbeMask::BUFFER, &ProbeInfo::Buffer(buffer))
            != ProbeReturn::Drop;
        if accepted {
            self.buffers.fetch_add(1, Ordering::Relaxed);
        }
        accepted
    }
}
