//! Translation from decoder-native frame metadata to the host-facing
//! audio frame representation, plus the output timestamp policies.

use std::time::Instant;

use ffmpeg_next::format::Sample;
use ffmpeg_next::format::sample::Type;

/// Host-facing sample format. Formats the host cannot represent map to
/// `Unknown` instead of failing the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    Unknown,
    U8,
    S16,
    S32,
    F32,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
}

impl SampleFormat {
    pub fn from_native(sample: Sample) -> Self {
        match sample {
            Sample::U8(Type::Packed) => Self::U8,
            Sample::I16(Type::Packed) => Self::S16,
            Sample::I32(Type::Packed) => Self::S32,
            Sample::F32(Type::Packed) => Self::F32,
            Sample::U8(Type::Planar) => Self::U8Planar,
            Sample::I16(Type::Planar) => Self::S16Planar,
            Sample::I32(Type::Planar) => Self::S32Planar,
            Sample::F32(Type::Planar) => Self::F32Planar,
            _ => Self::Unknown,
        }
    }

    pub fn is_planar(self) -> bool {
        matches!(
            self,
            Self::U8Planar | Self::S16Planar | Self::S32Planar | Self::F32Planar
        )
    }
}

/// Speaker layout derived from the decoded channel count. Counts without
/// a defined layout (7, or anything above 8) map to `Unknown` and are
/// never coerced to a neighboring layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelLayout {
    Unknown,
    Mono,
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

impl ChannelLayout {
    pub fn from_channel_count(channels: u16) -> Self {
        match channels {
            1 => Self::Mono,
            2 => Self::Stereo,
            3 => Self::TwoPointOne,
            4 => Self::FourPointZero,
            5 => Self::FourPointOne,
            6 => Self::FivePointOne,
            8 => Self::SevenPointOne,
            _ => Self::Unknown,
        }
    }
}

/// Decoded PCM frame handed to the host sink. Plane slices borrow the
/// worker's reusable decode buffer and are valid only for the duration of
/// the synchronous callback.
#[derive(Debug)]
pub struct OutputFrame<'a> {
    pub format: SampleFormat,
    pub layout: ChannelLayout,
    pub sample_rate: u32,
    pub samples: usize,
    pub planes: Vec<&'a [u8]>,
    pub timestamp_ns: u64,
}

pub(crate) fn output_frame(frame: &ffmpeg_next::frame::Audio, timestamp_ns: u64) -> OutputFrame<'_> {
    OutputFrame {
        format: SampleFormat::from_native(frame.format()),
        layout: ChannelLayout::from_channel_count(frame.channels()),
        sample_rate: frame.rate(),
        samples: frame.samples(),
        planes: (0..frame.planes()).map(|i| frame.data(i)).collect(),
        timestamp_ns,
    }
}

/// How output timestamps are synthesized. Encoded input carries no usable
/// timestamps, so they are derived from the monotonic clock at emission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// Current time minus the frame duration, approximating the frame's
    /// start time.
    StartOfFrame,
    /// Elapsed time since the first emitted frame. Used where the
    /// start-of-frame derivation produces audible drift.
    FixedBase,
}

impl TimestampPolicy {
    pub fn default_for_platform() -> Self {
        if cfg!(windows) {
            Self::StartOfFrame
        } else {
            Self::FixedBase
        }
    }
}

/// Timestamp generator for one worker lifetime. Stamps are clamped
/// non-decreasing under either policy.
pub(crate) struct Timestamps {
    policy: TimestampPolicy,
    epoch: Instant,
    base: Option<Instant>,
    last: u64,
}

impl Timestamps {
    pub(crate) fn new(policy: TimestampPolicy) -> Self {
        Self {
            policy,
            epoch: Instant::now(),
            base: None,
            last: 0,
        }
    }

    pub(crate) fn stamp(&mut self, samples: usize, sample_rate: u32) -> u64 {
        let now = Instant::now();
        let raw = match self.policy {
            TimestampPolicy::StartOfFrame => {
                let elapsed = (now - self.epoch).as_nanos() as u64;
                let duration = if sample_rate > 0 {
                    samples as u64 * 1_000_000_000 / sample_rate as u64
                } else {
                    0
                };
                elapsed.saturating_sub(duration)
            }
            TimestampPolicy::FixedBase => {
                let base = *self.base.get_or_insert(now);
                (now - base).as_nanos() as u64
            }
        };
        let stamped = raw.max(self.last);
        self.last = stamped;
        stamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn channel_counts_map_to_layouts() {
        assert_eq!(ChannelLayout::from_channel_count(0), ChannelLayout::Unknown);
        assert_eq!(ChannelLayout::from_channel_count(1), ChannelLayout::Mono);
        assert_eq!(ChannelLayout::from_channel_count(2), ChannelLayout::Stereo);
        assert_eq!(
            ChannelLayout::from_channel_count(3),
            ChannelLayout::TwoPointOne
        );
        assert_eq!(
            ChannelLayout::from_channel_count(4),
            ChannelLayout::FourPointZero
        );
        assert_eq!(
            ChannelLayout::from_channel_count(5),
            ChannelLayout::FourPointOne
        );
        assert_eq!(
            ChannelLayout::from_channel_count(6),
            ChannelLayout::FivePointOne
        );
        assert_eq!(
            ChannelLayout::from_channel_count(8),
            ChannelLayout::SevenPointOne
        );
    }

    #[test]
    fn seven_channels_is_unknown_not_coerced() {
        assert_eq!(ChannelLayout::from_channel_count(7), ChannelLayout::Unknown);
        assert_eq!(
            ChannelLayout::from_channel_count(16),
            ChannelLayout::Unknown
        );
    }

    #[test]
    fn sample_formats_map_including_planar() {
        assert_eq!(
            SampleFormat::from_native(Sample::I16(Type::Packed)),
            SampleFormat::S16
        );
        assert_eq!(
            SampleFormat::from_native(Sample::F32(Type::Planar)),
            SampleFormat::F32Planar
        );
        assert!(SampleFormat::from_native(Sample::F32(Type::Planar)).is_planar());
        assert!(!SampleFormat::from_native(Sample::U8(Type::Packed)).is_planar());
    }

    #[test]
    fn unsupported_sample_formats_are_unknown() {
        assert_eq!(
            SampleFormat::from_native(Sample::F64(Type::Packed)),
            SampleFormat::Unknown
        );
        assert_eq!(
            SampleFormat::from_native(Sample::I64(Type::Planar)),
            SampleFormat::Unknown
        );
        assert_eq!(SampleFormat::from_native(Sample::None), SampleFormat::Unknown);
    }

    #[test]
    fn start_of_frame_stamps_never_decrease() {
        let mut timestamps = Timestamps::new(TimestampPolicy::StartOfFrame);
        let mut last = 0u64;
        for _ in 0..20 {
            // a 32 ms frame duration exceeds the elapsed time early on, so
            // this also covers the saturating start
            let ts = timestamps.stamp(1536, 48_000);
            assert!(ts >= last);
            last = ts;
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn fixed_base_stamps_start_near_zero_and_grow() {
        let mut timestamps = Timestamps::new(TimestampPolicy::FixedBase);
        let first = timestamps.stamp(1536, 48_000);
        assert!(first < 1_000_000, "first stamp should be near zero");

        thread::sleep(Duration::from_millis(5));
        let second = timestamps.stamp(1536, 48_000);
        assert!(second >= first);
        assert!(second >= 4_000_000);
    }
}
