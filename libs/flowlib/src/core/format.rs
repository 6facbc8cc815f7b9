// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Value formats - the tagged description of what flows through a port.
//!
//! A [`ValueFormat`] is a closed sum over the port-data kinds the engine
//! moves. Data-bearing variants carry a sample encoding, a shape and a
//! time-series descriptor; sparse kinds (midi, events, program text, gui
//! traffic) and the order/receipt control kinds carry nothing.
//!
//! Two formats are *copy-compatible* when their kind and sample encoding
//! agree even if shape or timing differ - a packet can be reinterpreted
//! losslessly across such ports. *Same* requires full equality.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sample encoding for data-bearing formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    U8,
    I16,
    I32,
    F32,
}

impl SampleType {
    /// Size of one sample in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::I16 => 2,
            SampleType::I32 => 4,
            SampleType::F32 => 4,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, SampleType::F32)
    }

    pub fn is_signed(self) -> bool {
        matches!(self, SampleType::I16 | SampleType::I32 | SampleType::F32)
    }
}

/// Dense time-series descriptor: how often periods arrive and how many
/// frames each period carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Period frequency in Hz (e.g. 44100 for audio samples, 60 for video).
    pub rate_hz: u32,
    /// Frames delivered per period (e.g. 128-sample audio periods).
    pub frames_per_period: u32,
}

impl TimeSeries {
    pub fn new(rate_hz: u32, frames_per_period: u32) -> Self {
        Self {
            rate_hz,
            frames_per_period,
        }
    }

    /// Non-degenerate: both rate and period length must be nonzero.
    pub fn is_valid(&self) -> bool {
        self.rate_hz > 0 && self.frames_per_period > 0
    }

    /// Wall-clock seconds covered by one period.
    pub fn period_seconds(&self) -> f64 {
        if self.rate_hz == 0 {
            return 0.0;
        }
        f64::from(self.frames_per_period) / f64::from(self.rate_hz)
    }
}

/// Interleaved audio: `channels` samples per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample: SampleType,
    pub channels: u32,
    pub timing: TimeSeries,
}

impl AudioFormat {
    pub fn is_valid(&self) -> bool {
        self.channels > 0 && self.timing.is_valid()
    }

    /// Bytes in one full period of audio.
    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.timing.frames_per_period as usize * self.sample.size_bytes()
    }
}

/// Packed raster video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormat {
    pub sample: SampleType,
    pub width: u32,
    pub height: u32,
    pub timing: TimeSeries,
}

impl VideoFormat {
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.timing.is_valid()
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.timing.frames_per_period as usize
            * self.sample.size_bytes()
    }
}

/// Dense voxel volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeFormat {
    pub sample: SampleType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub timing: TimeSeries,
}

impl VolumeFormat {
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.depth > 0 && self.timing.is_valid()
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.depth as usize
            * self.timing.frames_per_period as usize
            * self.sample.size_bytes()
    }
}

/// Framebuffer surfaces. Depth is optional (0 = plain 2-D target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FramebufferFormat {
    pub sample: SampleType,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub timing: TimeSeries,
}

impl FramebufferFormat {
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0 && self.timing.is_valid()
    }

    pub fn frame_size(&self) -> usize {
        self.width as usize
            * self.height as usize
            * self.depth.max(1) as usize
            * self.timing.frames_per_period as usize
            * self.sample.size_bytes()
    }
}

/// Tag-only view of a format: what kind of channel accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Audio,
    Video,
    Volume,
    Midi,
    Event,
    Framebuffer,
    Program,
    Gui,
    Order,
    Receipt,
}

impl ValueKind {
    /// Order and receipt packets carry control flow only, no payload data.
    pub fn has_data(self) -> bool {
        !matches!(self, ValueKind::Order | ValueKind::Receipt)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Audio => "audio",
            ValueKind::Video => "video",
            ValueKind::Volume => "volume",
            ValueKind::Midi => "midi",
            ValueKind::Event => "event",
            ValueKind::Framebuffer => "framebuffer",
            ValueKind::Program => "program",
            ValueKind::Gui => "gui",
            ValueKind::Order => "order",
            ValueKind::Receipt => "receipt",
        };
        f.write_str(name)
    }
}

/// The negotiated description of a port's traffic.
///
/// Midi, event, program and gui traffic is sparse - packets arrive when they
/// arrive, with no fixed shape - so those variants (like the order/receipt
/// control variants) are tags without parameters and are always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueFormat {
    Audio(AudioFormat),
    Video(VideoFormat),
    Volume(VolumeFormat),
    Framebuffer(FramebufferFormat),
    Midi,
    Event,
    Program,
    Gui,
    Order,
    Receipt,
}

impl ValueFormat {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueFormat::Audio(_) => ValueKind::Audio,
            ValueFormat::Video(_) => ValueKind::Video,
            ValueFormat::Volume(_) => ValueKind::Volume,
            ValueFormat::Framebuffer(_) => ValueKind::Framebuffer,
            ValueFormat::Midi => ValueKind::Midi,
            ValueFormat::Event => ValueKind::Event,
            ValueFormat::Program => ValueKind::Program,
            ValueFormat::Gui => ValueKind::Gui,
            ValueFormat::Order => ValueKind::Order,
            ValueFormat::Receipt => ValueKind::Receipt,
        }
    }

    pub fn has_data(&self) -> bool {
        self.kind().has_data()
    }

    /// A format is valid iff its shape and timing are non-degenerate.
    /// Sparse and control variants have nothing to degenerate.
    pub fn is_valid(&self) -> bool {
        match self {
            ValueFormat::Audio(f) => f.is_valid(),
            ValueFormat::Video(f) => f.is_valid(),
            ValueFormat::Volume(f) => f.is_valid(),
            ValueFormat::Framebuffer(f) => f.is_valid(),
            _ => true,
        }
    }

    /// Full equality.
    pub fn is_same(&self, other: &ValueFormat) -> bool {
        self == other
    }

    /// Kind and sample encoding agree; shape and timing are free.
    pub fn is_copy_compatible(&self, other: &ValueFormat) -> bool {
        if self.kind() != other.kind() {
            return false;
        }
        match (self.sample(), other.sample()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        }
    }

    /// Sample encoding of a data-bearing variant.
    pub fn sample(&self) -> Option<SampleType> {
        match self {
            ValueFormat::Audio(f) => Some(f.sample),
            ValueFormat::Video(f) => Some(f.sample),
            ValueFormat::Volume(f) => Some(f.sample),
            ValueFormat::Framebuffer(f) => Some(f.sample),
            _ => None,
        }
    }

    pub fn sample_size(&self) -> usize {
        self.sample().map_or(0, SampleType::size_bytes)
    }

    /// Bytes in one period of traffic. Sparse kinds have no fixed frame
    /// size and report 0.
    pub fn frame_size(&self) -> usize {
        match self {
            ValueFormat::Audio(f) => f.frame_size(),
            ValueFormat::Video(f) => f.frame_size(),
            ValueFormat::Volume(f) => f.frame_size(),
            ValueFormat::Framebuffer(f) => f.frame_size(),
            _ => 0,
        }
    }

    /// Wall-clock seconds covered by one period, 0.0 for sparse kinds.
    pub fn frame_seconds(&self) -> f64 {
        match self {
            ValueFormat::Audio(f) => f.timing.period_seconds(),
            ValueFormat::Video(f) => f.timing.period_seconds(),
            ValueFormat::Volume(f) => f.timing.period_seconds(),
            ValueFormat::Framebuffer(f) => f.timing.period_seconds(),
            _ => 0.0,
        }
    }

    /// First-use default for a channel that has not negotiated anything yet.
    pub fn default_for(kind: ValueKind) -> ValueFormat {
        match kind {
            ValueKind::Audio => ValueFormat::Audio(AudioFormat {
                sample: SampleType::F32,
                channels: 2,
                timing: TimeSeries::new(44100, 128),
            }),
            ValueKind::Video => ValueFormat::Video(VideoFormat {
                sample: SampleType::U8,
                width: 1280,
                height: 720,
                timing: TimeSeries::new(60, 1),
            }),
            ValueKind::Volume => ValueFormat::Volume(VolumeFormat {
                sample: SampleType::U8,
                width: 512,
                height: 512,
                depth: 512,
                timing: TimeSeries::new(1, 1),
            }),
            ValueKind::Framebuffer => ValueFormat::Framebuffer(FramebufferFormat {
                sample: SampleType::U8,
                width: 1280,
                height: 720,
                depth: 0,
                timing: TimeSeries::new(60, 1),
            }),
            ValueKind::Midi => ValueFormat::Midi,
            ValueKind::Event => ValueFormat::Event,
            ValueKind::Program => ValueFormat::Program,
            ValueKind::Gui => ValueFormat::Gui,
            ValueKind::Order => ValueFormat::Order,
            ValueKind::Receipt => ValueFormat::Receipt,
        }
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueFormat::Audio(a) => write!(
                f,
                "audio({:?}, {}ch, {}Hz/{})",
                a.sample, a.channels, a.timing.rate_hz, a.timing.frames_per_period
            ),
            ValueFormat::Video(v) => write!(
                f,
                "video({:?}, {}x{}, {}Hz)",
                v.sample, v.width, v.height, v.timing.rate_hz
            ),
            ValueFormat::Volume(v) => write!(
                f,
                "volume({:?}, {}x{}x{})",
                v.sample, v.width, v.height, v.depth
            ),
            ValueFormat::Framebuffer(v) => write!(
                f,
                "framebuffer({:?}, {}x{}x{})",
                v.sample, v.width, v.height, v.depth
            ),
            other => write!(f, "{}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid_for_every_kind() {
        for kind in [
            ValueKind::Audio,
            ValueKind::Video,
            ValueKind::Volume,
            ValueKind::Midi,
            ValueKind::Event,
            ValueKind::Framebuffer,
            ValueKind::Program,
            ValueKind::Gui,
            ValueKind::Order,
            ValueKind::Receipt,
        ] {
            let fmt = ValueFormat::default_for(kind);
            assert_eq!(fmt.kind(), kind);
            assert!(fmt.is_valid(), "default for {kind} must be valid");
        }
    }

    #[test]
    fn degenerate_shape_is_invalid() {
        let fmt = ValueFormat::Audio(AudioFormat {
            sample: SampleType::F32,
            channels: 0,
            timing: TimeSeries::new(44100, 128),
        });
        assert!(!fmt.is_valid());

        let fmt = ValueFormat::Video(VideoFormat {
            sample: SampleType::U8,
            width: 640,
            height: 480,
            timing: TimeSeries::new(0, 1),
        });
        assert!(!fmt.is_valid());
    }

    #[test]
    fn copy_compatible_ignores_shape_and_timing() {
        let a = ValueFormat::Audio(AudioFormat {
            sample: SampleType::F32,
            channels: 2,
            timing: TimeSeries::new(44100, 128),
        });
        let b = ValueFormat::Audio(AudioFormat {
            sample: SampleType::F32,
            channels: 6,
            timing: TimeSeries::new(48000, 256),
        });
        assert!(a.is_copy_compatible(&b));
        assert!(!a.is_same(&b));
    }

    #[test]
    fn copy_compatible_requires_same_sample_encoding() {
        let a = ValueFormat::default_for(ValueKind::Audio);
        let b = ValueFormat::Audio(AudioFormat {
            sample: SampleType::I16,
            channels: 2,
            timing: TimeSeries::new(44100, 128),
        });
        assert!(!a.is_copy_compatible(&b));
    }

    #[test]
    fn copy_compatible_requires_same_kind() {
        let a = ValueFormat::default_for(ValueKind::Audio);
        let v = ValueFormat::default_for(ValueKind::Video);
        assert!(!a.is_copy_compatible(&v));
        assert!(ValueFormat::Midi.is_copy_compatible(&ValueFormat::Midi));
        assert!(!ValueFormat::Midi.is_copy_compatible(&ValueFormat::Event));
    }

    #[test]
    fn control_kinds_carry_no_data() {
        assert!(!ValueFormat::Order.has_data());
        assert!(!ValueFormat::Receipt.has_data());
        assert!(ValueFormat::Midi.has_data());
        assert_eq!(ValueFormat::Order.frame_size(), 0);
    }

    #[test]
    fn audio_frame_size_matches_shape() {
        let fmt = ValueFormat::default_for(ValueKind::Audio);
        // 2 channels * 128 frames * 4 bytes
        assert_eq!(fmt.frame_size(), 2 * 128 * 4);
        assert!((fmt.frame_seconds() - 128.0 / 44100.0).abs() < 1e-12);
    }

    #[test]
    fn serde_round_trip() {
        let fmt = ValueFormat::default_for(ValueKind::Video);
        let json = serde_json::to_string(&fmt).unwrap();
        let back: ValueFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(fmt, back);
    }
}
