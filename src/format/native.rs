//! Host-native extensible wave format and negotiation against [`PcmFormat`].
//!
//! The host describes streams with an extensible wave format: channel count,
//! speaker-position bitmask, bit depth, and a PCM/float sub-format. The
//! channel layout mapping is a fixed table keyed by `(channels, mask)`.

use std::fmt;

use crate::format::{ChannelLayout, PcmFormat, SampleType};
use crate::host::AudioClient;
use crate::StreamDeviceError;

/// Speaker position bits.
pub mod speaker {
    /// Front left.
    pub const FRONT_LEFT: u32 = 0x1;
    /// Front right.
    pub const FRONT_RIGHT: u32 = 0x2;
    /// Front center.
    pub const FRONT_CENTER: u32 = 0x4;
    /// Low-frequency effects.
    pub const LOW_FREQUENCY: u32 = 0x8;
    /// Back left.
    pub const BACK_LEFT: u32 = 0x10;
    /// Back right.
    pub const BACK_RIGHT: u32 = 0x20;
    /// Front left of center.
    pub const FRONT_LEFT_OF_CENTER: u32 = 0x40;
    /// Front right of center.
    pub const FRONT_RIGHT_OF_CENTER: u32 = 0x80;
    /// Back center.
    pub const BACK_CENTER: u32 = 0x100;
    /// Side left.
    pub const SIDE_LEFT: u32 = 0x200;
    /// Side right.
    pub const SIDE_RIGHT: u32 = 0x400;
}

use speaker::{
    BACK_CENTER, BACK_LEFT, BACK_RIGHT, FRONT_CENTER, FRONT_LEFT, FRONT_LEFT_OF_CENTER,
    FRONT_RIGHT, FRONT_RIGHT_OF_CENTER, LOW_FREQUENCY, SIDE_LEFT, SIDE_RIGHT,
};

const MASK_MONO: u32 = FRONT_CENTER;
const MASK_STEREO: u32 = FRONT_LEFT | FRONT_RIGHT;
const MASK_QUAD: u32 = FRONT_LEFT | FRONT_RIGHT | BACK_LEFT | BACK_RIGHT;
const MASK_X51: u32 = FRONT_LEFT | FRONT_RIGHT | FRONT_CENTER | LOW_FREQUENCY | SIDE_LEFT | SIDE_RIGHT;
const MASK_X51_REAR: u32 =
    FRONT_LEFT | FRONT_RIGHT | FRONT_CENTER | LOW_FREQUENCY | BACK_LEFT | BACK_RIGHT;
const MASK_X61: u32 = FRONT_LEFT
    | FRONT_RIGHT
    | FRONT_CENTER
    | LOW_FREQUENCY
    | BACK_CENTER
    | SIDE_LEFT
    | SIDE_RIGHT;
const MASK_X71: u32 = FRONT_LEFT
    | FRONT_RIGHT
    | FRONT_CENTER
    | LOW_FREQUENCY
    | BACK_LEFT
    | BACK_RIGHT
    | SIDE_LEFT
    | SIDE_RIGHT;
const MASK_X71_WIDE: u32 = FRONT_LEFT
    | FRONT_RIGHT
    | FRONT_CENTER
    | LOW_FREQUENCY
    | BACK_LEFT
    | BACK_RIGHT
    | FRONT_LEFT_OF_CENTER
    | FRONT_RIGHT_OF_CENTER;

/// The `(channels, mask)` table. Lookups in both directions go through here.
const LAYOUT_TABLE: [(ChannelLayout, u16, u32); 8] = [
    (ChannelLayout::Mono, 1, MASK_MONO),
    (ChannelLayout::Stereo, 2, MASK_STEREO),
    (ChannelLayout::Quad, 4, MASK_QUAD),
    (ChannelLayout::X51, 6, MASK_X51),
    (ChannelLayout::X51Rear, 6, MASK_X51_REAR),
    (ChannelLayout::X61, 7, MASK_X61),
    (ChannelLayout::X71, 8, MASK_X71),
    (ChannelLayout::X71Wide, 8, MASK_X71_WIDE),
];

/// Speaker mask of a layout.
#[must_use]
pub fn layout_mask(layout: ChannelLayout) -> u32 {
    LAYOUT_TABLE
        .iter()
        .find(|(l, _, _)| *l == layout)
        .map_or(MASK_STEREO, |(_, _, mask)| *mask)
}

/// Mask of the first table layout with `channels` channels, or 0.
///
/// For hosts that report a channel count without speaker positions.
#[must_use]
pub fn default_mask(channels: u16) -> u32 {
    LAYOUT_TABLE
        .iter()
        .find(|(_, c, _)| *c == channels)
        .map_or(0, |(_, _, mask)| *mask)
}

/// Exact table lookup.
#[must_use]
pub fn layout_from_mask(channels: u16, mask: u32) -> Option<ChannelLayout> {
    LAYOUT_TABLE
        .iter()
        .find(|(_, c, m)| *c == channels && *m == mask)
        .map(|(layout, _, _)| *layout)
}

/// Closest table layout for an arbitrary `(channels, mask)` pair.
///
/// Prefers a layout with the same channel count, choosing the one sharing
/// the most speaker positions. Otherwise takes the widest layout that has
/// fewer channels. Zero channels snap to stereo.
#[must_use]
pub fn nearest_layout(channels: u16, mask: u32) -> ChannelLayout {
    if let Some(layout) = layout_from_mask(channels, mask) {
        return layout;
    }

    // `rev` so ties resolve to the earlier table entry.
    let same_count = LAYOUT_TABLE
        .iter()
        .rev()
        .filter(|(_, c, _)| *c == channels)
        .max_by_key(|(_, _, m)| (m & mask).count_ones())
        .map(|(layout, _, _)| *layout);
    if let Some(layout) = same_count {
        return layout;
    }

    LAYOUT_TABLE
        .iter()
        .rev()
        .filter(|(_, c, _)| *c <= channels)
        .max_by_key(|(_, c, _)| *c)
        .map_or(ChannelLayout::Stereo, |(layout, _, _)| *layout)
}

/// Sample sub-format of a native wave format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubFormat {
    /// Integer PCM (8-bit is unsigned, wider is signed).
    Pcm,
    /// IEEE float.
    IeeeFloat,
}

/// The host's extensible wave format.
///
/// `block_align` and `bytes_per_second` are derived at construction, so
/// `block_align * sample_rate == bytes_per_second` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFormat {
    sub_format: SubFormat,
    channels: u16,
    channel_mask: u32,
    sample_rate: u32,
    bits_per_sample: u16,
    valid_bits_per_sample: u16,
    block_align: u16,
    bytes_per_second: u32,
}

impl NativeFormat {
    /// Builds a native format and derives its block alignment and byte rate.
    #[must_use]
    pub fn new(
        sub_format: SubFormat,
        bits_per_sample: u16,
        channels: u16,
        channel_mask: u32,
        sample_rate: u32,
    ) -> Self {
        let block_align = channels * bits_per_sample / 8;
        Self {
            sub_format,
            channels,
            channel_mask,
            sample_rate,
            bits_per_sample,
            valid_bits_per_sample: bits_per_sample,
            block_align,
            bytes_per_second: sample_rate * u32::from(block_align),
        }
    }

    /// PCM or float.
    #[must_use]
    pub fn sub_format(&self) -> SubFormat {
        self.sub_format
    }

    /// Interleaved channel count.
    #[must_use]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Speaker position bitmask.
    #[must_use]
    pub fn channel_mask(&self) -> u32 {
        self.channel_mask
    }

    /// Frames per second.
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Container size of one sample.
    #[must_use]
    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    /// Significant bits within the container.
    #[must_use]
    pub fn valid_bits_per_sample(&self) -> u16 {
        self.valid_bits_per_sample
    }

    /// Bytes per frame.
    #[must_use]
    pub fn block_align(&self) -> u16 {
        self.block_align
    }

    /// Bytes per second of audio.
    #[must_use]
    pub fn bytes_per_second(&self) -> u32 {
        self.bytes_per_second
    }

    /// Sample type this native encoding maps to, if it is one we handle.
    #[must_use]
    pub fn sample_type(&self) -> Option<SampleType> {
        match (self.sub_format, self.bits_per_sample) {
            (SubFormat::Pcm, 8) => Some(SampleType::U8),
            (SubFormat::Pcm, 16) => Some(SampleType::I16),
            (SubFormat::Pcm, 32) => Some(SampleType::I32),
            (SubFormat::IeeeFloat, 32) => Some(SampleType::F32),
            _ => None,
        }
    }
}

impl fmt::Display for NativeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.sub_format {
            SubFormat::Pcm => "pcm",
            SubFormat::IeeeFloat => "float",
        };
        write!(
            f,
            "{kind}{} {}ch mask 0x{:x} {}Hz",
            self.bits_per_sample, self.channels, self.channel_mask, self.sample_rate
        )
    }
}

/// Maps an abstract format onto the host's wave format.
///
/// Unsigned 16/32-bit and signed 8-bit requests have no native wire type of
/// their own; they go out as the native type of the same width and the
/// signedness is fixed up by the conversion pipeline.
#[must_use]
pub fn to_native(format: &PcmFormat) -> NativeFormat {
    let (sub_format, bits) = match format.sample_type {
        SampleType::U8 | SampleType::I8 => (SubFormat::Pcm, 8),
        SampleType::I16 | SampleType::U16 => (SubFormat::Pcm, 16),
        SampleType::I32 | SampleType::U32 => (SubFormat::Pcm, 32),
        SampleType::F32 => (SubFormat::IeeeFloat, 32),
    };
    NativeFormat::new(
        sub_format,
        bits,
        format.channels(),
        layout_mask(format.layout),
        format.sample_rate,
    )
}

/// Maps a native format back to the abstract format.
///
/// # Errors
///
/// Fails if the `(channels, mask)` pair is not in the layout table or the
/// sample encoding is not one we stream.
pub fn from_native(native: &NativeFormat) -> Result<PcmFormat, StreamDeviceError> {
    let layout = layout_from_mask(native.channels, native.channel_mask).ok_or(
        StreamDeviceError::UnsupportedChannelLayout {
            channels: native.channels,
            mask: native.channel_mask,
        },
    )?;
    let sample_type = native
        .sample_type()
        .ok_or_else(|| StreamDeviceError::FormatNegotiation {
            reason: format!("unhandled sample encoding {native}"),
        })?;
    Ok(PcmFormat::new(sample_type, layout, native.sample_rate))
}

/// Derives a usable format from whatever the host accepted.
///
/// Unrecognized layouts snap to [`nearest_layout`], unrecognized integer
/// depths to 16-bit and unrecognized float depths to 32-bit float. Each
/// adjustment is logged as a warning.
#[must_use]
pub fn coerce_native(native: &NativeFormat) -> PcmFormat {
    let layout = layout_from_mask(native.channels, native.channel_mask).unwrap_or_else(|| {
        let snapped = nearest_layout(native.channels, native.channel_mask);
        tracing::warn!(
            channels = native.channels,
            mask = native.channel_mask,
            %snapped,
            "Unhandled channel configuration, using nearest layout"
        );
        snapped
    });

    let sample_type = native.sample_type().unwrap_or_else(|| {
        let fallback = match native.sub_format {
            SubFormat::Pcm => SampleType::I16,
            SubFormat::IeeeFloat => SampleType::F32,
        };
        tracing::warn!(
            bits = native.bits_per_sample,
            %fallback,
            "Unhandled sample encoding, using fallback"
        );
        fallback
    });

    PcmFormat::new(sample_type, layout, native.sample_rate)
}

/// Settles on a native format for a client.
///
/// Builds the requested native format and asks the client whether it is
/// supported; if not, falls back to the client's mix format. Returns the
/// abstract format derived from what was accepted and the native format
/// rebuilt from it, which is what the client should be initialized with.
///
/// # Errors
///
/// Propagates host failures from the support query or the mix format query.
pub fn negotiate(
    client: &dyn AudioClient,
    requested: &PcmFormat,
) -> Result<(PcmFormat, NativeFormat), StreamDeviceError> {
    let wanted = to_native(requested);
    let accepted = if client.is_format_supported(&wanted)? {
        wanted
    } else {
        let mix = client.mix_format()?;
        tracing::debug!(requested = %wanted, fallback = %mix, "Requested format not supported, using mix format");
        mix
    };

    let effective = coerce_native(&accepted);
    Ok((effective, to_native(&effective)))
}
