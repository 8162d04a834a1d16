//! PCM format descriptors, native wave-format negotiation, and conversion.
//!
//! - [`PcmFormat`]: the abstract format the application works in
//! - [`native`]: mapping to and from the host's extensible wave format
//! - [`convert`]: per-sample codecs and channel conversion
//! - [`resample`]: sample type and rate conversion for capture

pub mod convert;
pub mod native;
pub mod resample;

use std::fmt;

/// Sample encoding of one channel of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    I8,
    /// Signed 16-bit.
    I16,
    /// Unsigned 16-bit.
    U16,
    /// Signed 32-bit.
    I32,
    /// Unsigned 32-bit.
    U32,
    /// 32-bit IEEE float, nominal range [-1.0, 1.0].
    F32,
}

impl SampleType {
    /// Size of one sample in bytes.
    #[must_use]
    pub const fn bytes(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
        }
    }

    /// Size of one sample in bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        (self.bytes() * 8) as u16
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::U16 => "u16",
            Self::I32 => "i32",
            Self::U32 => "u32",
            Self::F32 => "f32",
        };
        f.write_str(name)
    }
}

/// Logical speaker arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    /// Front center.
    Mono,
    /// Front left, front right.
    Stereo,
    /// Front pair and back pair.
    Quad,
    /// 5.1 using side speakers.
    X51,
    /// 5.1 using back speakers.
    X51Rear,
    /// 6.1 with a back center.
    X61,
    /// 7.1 with side and back pairs.
    X71,
    /// 7.1 with front-of-center pair instead of sides.
    X71Wide,
}

impl ChannelLayout {
    /// All layouts, in ascending channel order.
    pub const ALL: [Self; 8] = [
        Self::Mono,
        Self::Stereo,
        Self::Quad,
        Self::X51,
        Self::X51Rear,
        Self::X61,
        Self::X71,
        Self::X71Wide,
    ];

    /// Number of interleaved channels in a frame.
    #[must_use]
    pub const fn channels(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Stereo => 2,
            Self::Quad => 4,
            Self::X51 | Self::X51Rear => 6,
            Self::X61 => 7,
            Self::X71 | Self::X71Wide => 8,
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mono => "mono",
            Self::Stereo => "stereo",
            Self::Quad => "quad",
            Self::X51 => "5.1",
            Self::X51Rear => "5.1 rear",
            Self::X61 => "6.1",
            Self::X71 => "7.1",
            Self::X71Wide => "7.1 wide",
        };
        f.write_str(name)
    }
}

/// Abstract PCM format: sample type, channel layout, and rate.
///
/// # Example
///
/// ```
/// use stream_device::{ChannelLayout, PcmFormat, SampleType};
///
/// let format = PcmFormat::new(SampleType::I16, ChannelLayout::Stereo, 48000);
/// assert_eq!(format.frame_size(), 4);
/// assert_eq!(format.to_string(), "i16 stereo 48000Hz");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmFormat {
    /// Encoding of each sample.
    pub sample_type: SampleType,
    /// Speaker arrangement; determines the channel count.
    pub layout: ChannelLayout,
    /// Frames per second.
    pub sample_rate: u32,
}

impl PcmFormat {
    /// Creates a format descriptor.
    #[must_use]
    pub const fn new(sample_type: SampleType, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self {
            sample_type,
            layout,
            sample_rate,
        }
    }

    /// Number of channels per frame.
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.layout.channels()
    }

    /// Bytes per interleaved frame.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.sample_type.bytes() * self.layout.channels() as usize
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(SampleType::F32, ChannelLayout::Stereo, 44100)
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}Hz",
            self.sample_type, self.layout, self.sample_rate
        )
    }
}
