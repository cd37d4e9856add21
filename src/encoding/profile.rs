//! Low-latency tuning per encoder family.
//!
//! | family | properties |
//! |---|---|
//! | `vp8enc*` | `deadline`=200000, `threads`=1, `cpu-used`=16, `resize-allowed`=true, `target-bitrate`=bps, `end-usage`=1 (cbr) |
//! | `x264enc*` | `speed-preset`=1 (ultrafast), `tune`=4 (zerolatency), `threads`=1, `bitrate`=kbps, `quantizer`=0, `qp-step`=0, `qp-min`=0, `qp-max`=0, `key-int-max`=10 |
//! | other | untouched |

use super::encoder::Encoder;
use crate::format::FormatCaps;
use std::fmt;
use tracing::debug;

const VP8_DEADLINE_US: i64 = 200_000;
const VP8_CPU_USED: i64 = 16;
const VP8_END_USAGE_CBR: i64 = 1;

const X264_SPEED_PRESET_ULTRAFAST: i64 = 1;
const X264_TUNE_ZEROLATENCY: i64 = 4;
const X264_KEY_INT_MAX: i64 = 10;

/// Encoder families with a known tuning profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderFamily {
    /// libvpx VP8 (`vp8enc*`). Bitrate in bits/sec.
    Vp8,
    /// x264 (`x264enc*`). Bitrate in kbit/s; needs I420 input.
    X264,
    /// Anything else; left at its defaults.
    Other,
}

impl EncoderFamily {
    /// Family of an encoder, from its factory or instance name prefix.
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("vp8enc") {
            EncoderFamily::Vp8
        } else if name.starts_with("x264enc") {
            EncoderFamily::X264
        } else {
            EncoderFamily::Other
        }
    }

    /// Raw format forced in front of the encoder, if the family needs one.
    pub fn input_filter(&self) -> Option<FormatCaps> {
        match self {
            EncoderFamily::X264 => Some(FormatCaps::i420()),
            _ => None,
        }
    }

    /// Apply the family's low-latency profile for `bitrate` bits/sec.
    pub fn configure(&self, encoder: &dyn Encoder, bitrate: u32) {
        match self {
            EncoderFamily::Vp8 => {
                encoder.set_property("deadline", VP8_DEADLINE_US.into());
                encoder.set_property("threads", 1i64.into());
                encoder.set_property("cpu-used", VP8_CPU_USED.into());
                encoder.set_property("resize-allowed", true.into());
                encoder.set_property("target-bitrate", bitrate.into());
                encoder.set_property("end-usage", VP8_END_USAGE_CBR.into());
            }
            EncoderFamily::X264 => {
                encoder.set_property("speed-preset", X264_SPEED_PRESET_ULTRAFAST.into());
                encoder.set_property("tune", X264_TUNE_ZEROLATENCY.into());
                encoder.set_property("threads", 1i64.into());
                encoder.set_property("bitrate", (bitrate / 1000).into());
                encoder.set_property("quantizer", 0i64.into());
                encoder.set_property("qp-step", 0i64.into());
                encoder.set_property("qp-min", 0i64.into());
                encoder.set_property("qp-max", 0i64.into());
                encoder.set_property("key-int-max", X264_KEY_INT_MAX.into());
            }
            EncoderFamily::Other => {}
        }
        debug!(encoder = encoder.name(), family = %self, bitrate, "encoder configured");
    }

    /// Retune a running encoder from a feedback `estimate` in bits/sec.
    ///
    /// Only writes when the estimate differs from the current setting at
    /// kbit/s granularity. Returns the value written, if any.
    ///
    /// x264 compares against `bitrate` but writes `target-bitrate`, a key
    /// x264 does not read; since `bitrate` never moves, it rewrites on every
    /// call once the estimate differs from the initial bitrate.
    pub fn apply_estimate(&self, encoder: &dyn Encoder, estimate: u32) -> Option<i64> {
        let current = |key: &str| {
            encoder
                .property(key)
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        };

        match self {
            EncoderFamily::Vp8 => {
                let last = current("target-bitrate");
                (last / 1000 != i64::from(estimate / 1000)).then(|| {
                    encoder.set_property("target-bitrate", estimate.into());
                    i64::from(estimate)
                })
            }
            EncoderFamily::X264 => {
                let kbps = i64::from(estimate / 1000);
                (current("bitrate") != kbps).then(|| {
                    encoder.set_property("target-bitrate", kbps.into());
                    kbps
                })
            }
            EncoderFamily::Other => None,
        }
    }
}

impl fmt::Display for EncoderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EncoderFamily::Vp8 => "vp8",
            EncoderFamily::X264 => "x264",
            EncoderFamily::Other => "other",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encoder::RecordingEncoder;
    use crate::encoding::property::PropertyValue;

    #[test]
    fn test_family_from_name() {
        assert_eq!(EncoderFamily::from_name("vp8enc"), EncoderFamily::Vp8);
        assert_eq!(EncoderFamily::from_name("vp8enc3"), EncoderFamily::Vp8);
        assert_eq!(EncoderFamily::from_name("x264enc0"), EncoderFamily::X264);
        assert_eq!(EncoderFamily::from_name("openh264enc"), EncoderFamily::Other);
        assert_eq!(EncoderFamily::X264.input_filter(), Some(FormatCaps::i420()));
        assert_eq!(EncoderFamily::Vp8.input_filter(), None);
    }

    #[test]
    fn test_vp8_profile() {
        let enc = RecordingEncoder::new("vp8enc0", "vp8enc");
        EncoderFamily::Vp8.configure(&enc, 300_000);

        let props = enc.properties();
        assert_eq!(props.get_i64("deadline"), Some(200_000));
        assert_eq!(props.get_i64("threads"), Some(1));
        assert_eq!(props.get_i64("cpu-used"), Some(16));
        assert_eq!(props.get("resize-allowed"), Some(PropertyValue::Bool(true)));
        assert_eq!(props.get_i64("target-bitrate"), Some(300_000));
        assert_eq!(props.get_i64("end-usage"), Some(1));
    }

    #[test]
    fn test_x264_profile_uses_kbps() {
        let enc = RecordingEncoder::new("x264enc0", "x264enc");
        EncoderFamily::X264.configure(&enc, 2_500_000);

        let props = enc.properties();
        assert_eq!(props.get_i64("speed-preset"), Some(1));
        assert_eq!(props.get_i64("tune"), Some(4));
        assert_eq!(props.get_i64("bitrate"), Some(2_500));
        assert_eq!(props.get_i64("key-int-max"), Some(10));
        for key in ["quantizer", "qp-step", "qp-min", "qp-max"] {
            assert_eq!(props.get_i64(key), Some(0), "{key}");
        }
    }

    #[test]
    fn test_other_family_is_untouched() {
        let enc = RecordingEncoder::new("openh264enc0", "openh264enc");
        EncoderFamily::Other.configure(&enc, 1_000_000);
        assert_eq!(EncoderFamily::Other.apply_estimate(&enc, 500_000), None);
        assert_eq!(enc.property_writes(), 0);
    }

    #[test]
    fn test_vp8_estimate_hysteresis() {
        let enc = RecordingEncoder::new("vp8enc0", "vp8enc");
        EncoderFamily::Vp8.configure(&enc, 300_000);

        assert_eq!(EncoderFamily::Vp8.apply_estimate(&enc, 300_999), None);
        assert_eq!(EncoderFamily::Vp8.apply_estimate(&enc, 500_000), Some(500_000));
        assert_eq!(EncoderFamily::Vp8.apply_estimate(&enc, 500_999), None);
        assert_eq!(enc.properties().get_i64("target-bitrate"), Some(500_000));
    }

    #[test]
    fn test_x264_writes_target_bitrate_key() {
        let enc = RecordingEncoder::new("x264enc0", "x264enc");
        EncoderFamily::X264.configure(&enc, 1_000_000);

        assert_eq!(EncoderFamily::X264.apply_estimate(&enc, 1_000_500), None);
        assert_eq!(EncoderFamily::X264.apply_estimate(&enc, 600_000), Some(600));
        assert_eq!(EncoderFamily::X264.apply_estimate(&enc, 600_000), Some(600));

        let props = enc.properties();
        assert_eq!(props.get_i64("bitrate"), Some(1_000));
        assert_eq!(props.get_i64("target-bitrate"), Some(600));
    }
}
