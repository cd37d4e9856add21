//! Format descriptors (caps) used to match ports against splitters.
//!
//! A [`FormatCaps`] is a capability set: a media kind plus constrained
//! parameters. Two descriptors are compatible when their intersection is not
//! empty, which is the only question the distribution node ever asks.
//!
//! ```rust
//! use tributary::format::{CapsValue, FormatCaps, PixelFormat, VideoCaps};
//!
//! let splitter = FormatCaps::VideoRaw(VideoCaps::fixed(1280, 720, PixelFormat::I420));
//! let consumer = FormatCaps::VideoRaw(VideoCaps {
//!     width: CapsValue::Range { min: 640, max: 1920 },
//!     ..VideoCaps::any()
//! });
//!
//! assert!(splitter.can_intersect(&consumer));
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

// ============================================================================
// CapsValue
// ============================================================================

/// A single constrained parameter: fixed, inclusive range, list or any.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum CapsValue<T> {
    /// Exactly this value.
    Fixed(T),
    /// Any value in `min..=max`.
    Range {
        /// Lower bound (inclusive).
        min: T,
        /// Upper bound (inclusive).
        max: T,
    },
    /// One of these values, in preference order.
    List(Vec<T>),
    /// Unconstrained.
    #[default]
    Any,
}

impl<T: Clone + Ord> CapsValue<T> {
    /// Whether `value` satisfies this constraint.
    pub fn accepts(&self, value: &T) -> bool {
        match self {
            Self::Fixed(v) => v == value,
            Self::Range { min, max } => (min..=max).contains(&value),
            Self::List(values) => values.contains(value),
            Self::Any => true,
        }
    }

    /// Common sub-constraint of `self` and `other`, or `None` when disjoint.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, rhs) => Some(rhs.clone()),
            (lhs, Self::Any) => Some(lhs.clone()),
            (Self::Fixed(v), rhs) | (rhs, Self::Fixed(v)) => {
                rhs.accepts(v).then(|| Self::Fixed(v.clone()))
            }
            (Self::Range { min: a, max: b }, Self::Range { min: c, max: d }) => {
                let lo = a.max(c);
                let hi = b.min(d);
                match lo.cmp(hi) {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Self::Fixed(lo.clone())),
                    std::cmp::Ordering::Less => Some(Self::Range {
                        min: lo.clone(),
                        max: hi.clone(),
                    }),
                }
            }
            (Self::List(values), rhs) | (rhs, Self::List(values)) => {
                Self::from_candidates(values.iter().filter(|v| rhs.accepts(v)).cloned().collect())
            }
        }
    }

    /// Whether the two constraints share at least one value.
    pub fn can_intersect(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// Pick a concrete value: the fixed one, the range minimum or the first
    /// list entry. `Any` cannot be fixated.
    pub fn fixate(&self) -> Option<T> {
        match self {
            Self::Fixed(v) => Some(v.clone()),
            Self::Range { min, .. } => Some(min.clone()),
            Self::List(values) => values.first().cloned(),
            Self::Any => None,
        }
    }

    /// Whether this is a single fixed value.
    #[inline]
    pub fn is_fixed(&self) -> bool {
        matches!(self, Self::Fixed(_))
    }

    fn from_candidates(mut values: Vec<T>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(Self::Fixed),
            _ => Some(Self::List(values)),
        }
    }
}

impl<T: Clone + Ord> From<T> for CapsValue<T> {
    fn from(value: T) -> Self {
        Self::Fixed(value)
    }
}

impl<T: Clone + Ord> From<std::ops::RangeInclusive<T>> for CapsValue<T> {
    fn from(range: std::ops::RangeInclusive<T>) -> Self {
        let (min, max) = range.into_inner();
        Self::Range { min, max }
    }
}

impl<T: fmt::Display> fmt::Display for CapsValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "{v}"),
            Self::Range { min, max } => write!(f, "[ {min}, {max} ]"),
            Self::List(values) => {
                f.write_str("{ ")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(" }")
            }
            Self::Any => f.write_str("ANY"),
        }
    }
}

// ============================================================================
// Parameter types
// ============================================================================

/// Raw video pixel layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PixelFormat {
    /// YUV 4:2:0 planar.
    I420,
    /// YUV 4:2:0 semi-planar.
    Nv12,
    /// YUV 4:2:2 packed.
    Yuy2,
    /// Packed RGB, 8 bits per channel.
    Rgb,
    /// Packed RGBA, 8 bits per channel.
    Rgba,
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I420 => "I420",
            Self::Nv12 => "NV12",
            Self::Yuy2 => "YUY2",
            Self::Rgb => "RGB",
            Self::Rgba => "RGBA",
        })
    }
}

/// Raw audio sample layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleFormat {
    /// Signed 16-bit little endian.
    S16Le,
    /// 32-bit float little endian.
    F32Le,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::S16Le => "S16LE",
            Self::F32Le => "F32LE",
        })
    }
}

/// Frame rate as an exact fraction.
///
/// Equal fractions compare equal whatever their terms: `60/2 == 30/1`.
#[derive(Clone, Copy, Debug)]
pub struct Framerate {
    /// Frames.
    pub num: u32,
    /// Per this many seconds.
    pub den: u32,
}

impl Framerate {
    /// Create a new framerate; a zero denominator is treated as 1.
    pub const fn new(num: u32, den: u32) -> Self {
        Self {
            num,
            den: if den == 0 { 1 } else { den },
        }
    }

    /// The fraction in lowest terms.
    pub fn reduced(self) -> Self {
        let divisor = gcd(self.num, self.den);
        Self {
            num: self.num / divisor,
            den: self.den / divisor,
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

impl PartialEq for Framerate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Framerate {}

impl Hash for Framerate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let reduced = self.reduced();
        reduced.num.hash(state);
        reduced.den.hash(state);
    }
}

impl PartialOrd for Framerate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Framerate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.num as u64 * other.den as u64).cmp(&(other.num as u64 * self.den as u64))
    }
}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Encoded video formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// VP8.
    Vp8,
    /// VP9.
    Vp9,
    /// H.264 / AVC.
    H264,
    /// H.265 / HEVC.
    H265,
}

impl VideoCodec {
    /// Media type string for this codec.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Vp8 => "video/x-vp8",
            Self::Vp9 => "video/x-vp9",
            Self::H264 => "video/x-h264",
            Self::H265 => "video/x-h265",
        }
    }
}

/// Encoded audio formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioCodec {
    /// Opus.
    Opus,
    /// AMR narrow band.
    Amr,
    /// G.711 mu-law.
    Pcmu,
    /// G.711 A-law.
    Pcma,
}

impl AudioCodec {
    /// Media type string for this codec.
    pub fn media_type(&self) -> &'static str {
        match self {
            Self::Opus => "audio/x-opus",
            Self::Amr => "audio/AMR",
            Self::Pcmu => "audio/x-mulaw",
            Self::Pcma => "audio/x-alaw",
        }
    }
}

// ============================================================================
// Raw caps
// ============================================================================

/// Constraints on raw video.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct VideoCaps {
    /// Width in pixels.
    pub width: CapsValue<u32>,
    /// Height in pixels.
    pub height: CapsValue<u32>,
    /// Pixel layout.
    pub pixel_format: CapsValue<PixelFormat>,
    /// Frame rate.
    pub framerate: CapsValue<Framerate>,
}

impl VideoCaps {
    /// Unconstrained raw video.
    pub fn any() -> Self {
        Self::default()
    }

    /// Raw video with fixed size and layout, any framerate.
    pub fn fixed(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width: width.into(),
            height: height.into(),
            pixel_format: pixel_format.into(),
            framerate: CapsValue::Any,
        }
    }

    /// Restrict the framerate.
    pub fn with_framerate(mut self, framerate: Framerate) -> Self {
        self.framerate = framerate.into();
        self
    }

    /// Field-wise intersection.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        Some(Self {
            width: self.width.intersect(&other.width)?,
            height: self.height.intersect(&other.height)?,
            pixel_format: self.pixel_format.intersect(&other.pixel_format)?,
            framerate: self.framerate.intersect(&other.framerate)?,
        })
    }
}

/// Constraints on raw audio.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AudioCaps {
    /// Sample rate in Hz.
    pub rate: CapsValue<u32>,
    /// Channel count.
    pub channels: CapsValue<u16>,
    /// Sample layout.
    pub sample_format: CapsValue<SampleFormat>,
}

impl AudioCaps {
    /// Unconstrained raw audio.
    pub fn any() -> Self {
        Self::default()
    }

    /// Raw audio with a fixed rate and channel count, any sample layout.
    pub fn fixed(rate: u32, channels: u16) -> Self {
        Self {
            rate: rate.into(),
            channels: channels.into(),
            sample_format: CapsValue::Any,
        }
    }

    /// Field-wise intersection.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        Some(Self {
            rate: self.rate.intersect(&other.rate)?,
            channels: self.channels.intersect(&other.channels)?,
            sample_format: self.sample_format.intersect(&other.sample_format)?,
        })
    }
}

// ============================================================================
// FormatCaps
// ============================================================================

/// Broad media kind of a descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Raw or encoded video.
    Video,
    /// Raw or encoded audio.
    Audio,
    /// Not determined (`ANY`).
    Unknown,
}

/// Format descriptor negotiated on a port.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum FormatCaps {
    /// Raw video frames.
    VideoRaw(VideoCaps),
    /// Encoded video.
    Video(VideoCodec),
    /// Raw audio samples.
    AudioRaw(AudioCaps),
    /// Encoded audio.
    Audio(AudioCodec),
    /// Anything.
    #[default]
    Any,
}

impl FormatCaps {
    /// Unconstrained raw video.
    pub fn raw_video() -> Self {
        Self::VideoRaw(VideoCaps::any())
    }

    /// Raw video restricted to I420, any size.
    pub fn i420() -> Self {
        Self::VideoRaw(VideoCaps {
            pixel_format: PixelFormat::I420.into(),
            ..VideoCaps::any()
        })
    }

    /// Unconstrained raw audio.
    pub fn raw_audio() -> Self {
        Self::AudioRaw(AudioCaps::any())
    }

    /// Intersection of two descriptors.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Any, rhs) => Some(rhs.clone()),
            (lhs, Self::Any) => Some(lhs.clone()),
            (Self::VideoRaw(a), Self::VideoRaw(b)) => a.intersect(b).map(Self::VideoRaw),
            (Self::AudioRaw(a), Self::AudioRaw(b)) => a.intersect(b).map(Self::AudioRaw),
            (Self::Video(a), Self::Video(b)) if a == b => Some(Self::Video(*a)),
            (Self::Audio(a), Self::Audio(b)) if a == b => Some(Self::Audio(*a)),
            _ => None,
        }
    }

    /// Whether the two capability sets overlap.
    pub fn can_intersect(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// Whether this is the unconstrained descriptor.
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Whether this describes uncompressed media.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::VideoRaw(_) | Self::AudioRaw(_))
    }

    /// Whether this describes video, raw or encoded.
    pub fn is_video(&self) -> bool {
        self.kind() == MediaKind::Video
    }

    /// Whether this describes audio, raw or encoded.
    pub fn is_audio(&self) -> bool {
        self.kind() == MediaKind::Audio
    }

    /// Broad media kind.
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::VideoRaw(_) | Self::Video(_) => MediaKind::Video,
            Self::AudioRaw(_) | Self::Audio(_) => MediaKind::Audio,
            Self::Any => MediaKind::Unknown,
        }
    }
}

impl From<VideoCodec> for FormatCaps {
    fn from(codec: VideoCodec) -> Self {
        Self::Video(codec)
    }
}

impl From<AudioCodec> for FormatCaps {
    fn from(codec: AudioCodec) -> Self {
        Self::Audio(codec)
    }
}

impl fmt::Display for FormatCaps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VideoRaw(v) => write!(
                f,
                "video/x-raw, format={}, width={}, height={}, framerate={}",
                v.pixel_format, v.width, v.height, v.framerate
            ),
            Self::AudioRaw(a) => write!(
                f,
                "audio/x-raw, format={}, rate={}, channels={}",
                a.sample_format, a.rate, a.channels
            ),
            Self::Video(codec) => f.write_str(codec.media_type()),
            Self::Audio(codec) => f.write_str(codec.media_type()),
            Self::Any => f.write_str("ANY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_value_fixed_against_range_and_list() {
        let fixed = CapsValue::Fixed(720u32);
        assert_eq!(
            fixed.intersect(&CapsValue::Range { min: 480, max: 1080 }),
            Some(CapsValue::Fixed(720))
        );
        assert_eq!(fixed.intersect(&CapsValue::List(vec![1080, 480])), None);
    }

    #[test]
    fn test_caps_value_range_overlap_collapses_to_fixed() {
        let a: CapsValue<u32> = (100..=200).into();
        let b: CapsValue<u32> = (200..=300).into();
        assert_eq!(a.intersect(&b), Some(CapsValue::Fixed(200)));

        let c: CapsValue<u32> = (150..=250).into();
        assert_eq!(
            a.intersect(&c),
            Some(CapsValue::Range { min: 150, max: 200 })
        );
        assert!(!a.can_intersect(&(201..=300).into()));
    }

    #[test]
    fn test_caps_value_list_keeps_preference_order() {
        let list = CapsValue::List(vec![48000u32, 44100, 16000]);
        let range: CapsValue<u32> = (16000..=44100).into();
        assert_eq!(
            list.intersect(&range),
            Some(CapsValue::List(vec![44100, 16000]))
        );
        assert_eq!(list.fixate(), Some(48000));
    }

    #[test]
    fn test_framerate_ordering_is_fractional() {
        assert!(Framerate::new(30000, 1001) < Framerate::new(30, 1));
        assert_eq!(
            Framerate::new(60, 2).cmp(&Framerate::new(30, 1)),
            std::cmp::Ordering::Equal
        );
    }

    #[test]
    fn test_equal_framerates_match_in_every_constraint() {
        let doubled = Framerate::new(60, 2);
        let plain = Framerate::new(30, 1);
        assert_eq!(doubled, plain);
        assert_eq!(doubled.reduced(), Framerate { num: 30, den: 1 });
        assert_ne!(Framerate::new(30000, 1001), plain);

        let range = CapsValue::Range {
            min: plain,
            max: plain,
        };
        assert!(CapsValue::Fixed(plain).accepts(&doubled));
        assert!(range.accepts(&doubled));
        assert!(CapsValue::List(vec![plain]).accepts(&doubled));
        assert_eq!(
            CapsValue::Fixed(doubled).intersect(&range),
            Some(CapsValue::Fixed(doubled))
        );

        let hash = |rate: Framerate| {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            rate.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(doubled), hash(plain));
        assert_eq!(Framerate::new(0, 5), Framerate::new(0, 1));
        assert_eq!(hash(Framerate::new(0, 5)), hash(Framerate::new(0, 1)));
    }

    #[test]
    fn test_format_caps_compatibility() {
        let raw = FormatCaps::VideoRaw(VideoCaps::fixed(640, 480, PixelFormat::I420));
        assert!(raw.can_intersect(&FormatCaps::i420()));
        assert!(raw.can_intersect(&FormatCaps::Any));
        assert!(!raw.can_intersect(&FormatCaps::raw_audio()));
        assert!(!raw.can_intersect(&VideoCodec::Vp8.into()));

        let vp8: FormatCaps = VideoCodec::Vp8.into();
        assert!(vp8.can_intersect(&VideoCodec::Vp8.into()));
        assert!(!vp8.can_intersect(&VideoCodec::H264.into()));
    }

    #[test]
    fn test_format_caps_classification() {
        assert!(FormatCaps::raw_audio().is_raw());
        assert!(FormatCaps::raw_audio().is_audio());
        assert!(!FormatCaps::from(AudioCodec::Opus).is_raw());
        assert!(FormatCaps::from(VideoCodec::H264).is_video());
        assert_eq!(FormatCaps::Any.kind(), MediaKind::Unknown);
    }

    #[test]
    fn test_format_caps_display() {
        assert_eq!(FormatCaps::from(VideoCodec::Vp8).to_string(), "video/x-vp8");
        let caps = FormatCaps::VideoRaw(VideoCaps::fixed(320, 240, PixelFormat::I420));
        assert_eq!(
            caps.to_string(),
            "video/x-raw, format=I420, width=320, height=240, framerate=ANY"
        );
    }
}
