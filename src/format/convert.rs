//! Sample encoding and channel conversion.
//!
//! All buffers are interleaved native-endian bytes; samples pass through
//! `f32` in the nominal range [-1.0, 1.0] when they change encoding.

use crate::format::{ChannelLayout, SampleType};

/// Largest channel count of any supported layout.
pub const MAX_CHANNELS: usize = 8;

/// Converts an f32 sample to i16.
///
/// Scales by 32768 and rounds, so every i16 survives a trip through
/// [`i16_to_f32`] unchanged. +1.0 clamps to 32767.
#[inline]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32.
#[inline]
#[must_use]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[inline]
fn f32_to_i32(sample: f32) -> i32 {
    (f64::from(sample) * 2_147_483_647.0).clamp(-2_147_483_648.0, 2_147_483_647.0) as i32
}

#[inline]
fn f32_to_i8(sample: f32) -> i8 {
    (sample * 127.0).clamp(-128.0, 127.0) as i8
}

/// Reads one sample of `sample_type` from the start of `bytes`.
///
/// `bytes` must hold at least `sample_type.bytes()` bytes.
#[inline]
#[must_use]
pub fn read_sample(sample_type: SampleType, bytes: &[u8]) -> f32 {
    match sample_type {
        SampleType::U8 => (f32::from(bytes[0]) - 128.0) / 128.0,
        SampleType::I8 => f32::from(bytes[0] as i8) / 128.0,
        SampleType::I16 => i16_to_f32(i16::from_ne_bytes([bytes[0], bytes[1]])),
        SampleType::U16 => {
            let raw = u16::from_ne_bytes([bytes[0], bytes[1]]);
            (f32::from(raw) - 32768.0) / 32768.0
        }
        SampleType::I32 => {
            let raw = i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            (f64::from(raw) / 2_147_483_648.0) as f32
        }
        SampleType::U32 => {
            let raw = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            ((f64::from(raw) - 2_147_483_648.0) / 2_147_483_648.0) as f32
        }
        SampleType::F32 => f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}

/// Writes one sample of `sample_type` to the start of `out`.
///
/// Values outside [-1.0, 1.0] are clamped.
#[inline]
pub fn write_sample(sample_type: SampleType, value: f32, out: &mut [u8]) {
    match sample_type {
        SampleType::U8 => out[0] = (i16::from(f32_to_i8(value)) + 128) as u8,
        SampleType::I8 => out[0] = f32_to_i8(value) as u8,
        SampleType::I16 => out[..2].copy_from_slice(&f32_to_i16(value).to_ne_bytes()),
        SampleType::U16 => {
            let raw = (i32::from(f32_to_i16(value)) + 32768) as u16;
            out[..2].copy_from_slice(&raw.to_ne_bytes());
        }
        SampleType::I32 => out[..4].copy_from_slice(&f32_to_i32(value).to_ne_bytes()),
        SampleType::U32 => {
            let raw = (i64::from(f32_to_i32(value)) + 2_147_483_648) as u32;
            out[..4].copy_from_slice(&raw.to_ne_bytes());
        }
        SampleType::F32 => out[..4].copy_from_slice(&value.to_ne_bytes()),
    }
}

/// Decodes one interleaved frame into `frame`, returning the channel count.
#[inline]
pub fn read_frame(sample_type: SampleType, bytes: &[u8], frame: &mut [f32]) -> usize {
    let size = sample_type.bytes();
    for (slot, sample) in frame.iter_mut().zip(bytes.chunks_exact(size)) {
        *slot = read_sample(sample_type, sample);
    }
    bytes.len() / size
}

/// Encodes one interleaved frame from `frame` into `out`.
#[inline]
pub fn write_frame(sample_type: SampleType, frame: &[f32], out: &mut [u8]) {
    let size = sample_type.bytes();
    for (value, sample) in frame.iter().zip(out.chunks_exact_mut(size)) {
        write_sample(sample_type, *value, sample);
    }
}

/// Converts between mono and stereo at the capture boundary.
///
/// Output is always f32; a sample converter placed after it must therefore
/// expect f32 input whatever the hardware delivers.
#[derive(Debug, Clone)]
pub struct ChannelConverter {
    src_type: SampleType,
    src_channels: usize,
    dst_channels: usize,
}

impl ChannelConverter {
    /// Creates a converter for a mono↔stereo mismatch.
    ///
    /// Returns `None` for any other pair of layouts.
    #[must_use]
    pub fn new(src_type: SampleType, from: ChannelLayout, to: ChannelLayout) -> Option<Self> {
        match (from, to) {
            (ChannelLayout::Mono, ChannelLayout::Stereo)
            | (ChannelLayout::Stereo, ChannelLayout::Mono) => Some(Self {
                src_type,
                src_channels: usize::from(from.channels()),
                dst_channels: usize::from(to.channels()),
            }),
            _ => None,
        }
    }

    /// Bytes per output frame.
    #[must_use]
    pub fn dst_frame_size(&self) -> usize {
        self.dst_channels * SampleType::F32.bytes()
    }

    /// Converts `frames` frames from `src` into f32 frames in `dst`.
    ///
    /// Stereo to mono averages the pair; mono to stereo duplicates.
    pub fn convert(&self, src: &[u8], dst: &mut [u8], frames: usize) {
        let src_frame = self.src_channels * self.src_type.bytes();
        let dst_frame = self.dst_frame_size();
        let src_frames = src.chunks_exact(src_frame).take(frames);
        let dst_frames = dst.chunks_exact_mut(dst_frame);

        for (input, output) in src_frames.zip(dst_frames) {
            if self.src_channels == 2 {
                let left = read_sample(self.src_type, input);
                let right = read_sample(self.src_type, &input[self.src_type.bytes()..]);
                write_sample(SampleType::F32, (left + right) * 0.5, output);
            } else {
                let value = read_sample(self.src_type, input);
                write_sample(SampleType::F32, value, output);
                write_sample(SampleType::F32, value, &mut output[4..]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_bytes(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn to_f32(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32768);
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(0.5), 16384);
    }

    #[test]
    fn test_i16_survives_f32() {
        for original in [i16::MIN, -1000, -1, 0, 1, 100, 1000, i16::MAX] {
            assert_eq!(f32_to_i16(i16_to_f32(original)), original);
        }
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_i16_to_f32_full_range() {
        let max = i16_to_f32(32767);
        assert!((max - 0.99997).abs() < 0.001);

        let min = i16_to_f32(-32768);
        assert!((min - (-1.0)).abs() < 0.001);

        assert_eq!(i16_to_f32(0), 0.0);
    }

    #[test]
    fn test_unsigned_midpoint_is_silence() {
        assert_eq!(read_sample(SampleType::U8, &[128]), 0.0);
        assert_eq!(read_sample(SampleType::U16, &32768u16.to_ne_bytes()), 0.0);
        assert_eq!(
            read_sample(SampleType::U32, &2_147_483_648u32.to_ne_bytes()),
            0.0
        );
    }

    #[test]
    fn test_write_then_read_each_type() {
        let types = [
            SampleType::U8,
            SampleType::I8,
            SampleType::I16,
            SampleType::U16,
            SampleType::I32,
            SampleType::U32,
            SampleType::F32,
        ];
        for sample_type in types {
            let mut buf = [0u8; 4];
            for value in [-0.5f32, 0.0, 0.25, 0.75] {
                write_sample(sample_type, value, &mut buf);
                let back = read_sample(sample_type, &buf);
                assert!(
                    (back - value).abs() < 0.02,
                    "{sample_type}: wrote {value}, read {back}"
                );
            }
        }
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let conv =
            ChannelConverter::new(SampleType::I16, ChannelLayout::Stereo, ChannelLayout::Mono)
                .unwrap();
        let src = i16_bytes(&[16384, 0, -16384, -16384]);
        let mut dst = vec![0u8; 2 * 4];
        conv.convert(&src, &mut dst, 2);

        let out = to_f32(&dst);
        assert!((out[0] - 0.25).abs() < 0.001);
        assert!((out[1] + 0.5).abs() < 0.001);
    }

    #[test]
    fn test_stereo_to_mono_cancellation() {
        let conv =
            ChannelConverter::new(SampleType::F32, ChannelLayout::Stereo, ChannelLayout::Mono)
                .unwrap();
        let src = f32_bytes(&[0.5, -0.5]);
        let mut dst = vec![0u8; 4];
        conv.convert(&src, &mut dst, 1);
        assert_eq!(to_f32(&dst), vec![0.0]);
    }

    #[test]
    fn test_mono_to_stereo_duplicates() {
        let conv =
            ChannelConverter::new(SampleType::F32, ChannelLayout::Mono, ChannelLayout::Stereo)
                .unwrap();
        let src = f32_bytes(&[0.1, 0.2]);
        let mut dst = vec![0u8; 4 * 4];
        conv.convert(&src, &mut dst, 2);
        assert_eq!(to_f32(&dst), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_no_converter_for_other_layouts() {
        assert!(
            ChannelConverter::new(SampleType::I16, ChannelLayout::Quad, ChannelLayout::Stereo)
                .is_none()
        );
        assert!(
            ChannelConverter::new(SampleType::I16, ChannelLayout::Stereo, ChannelLayout::Stereo)
                .is_none()
        );
    }

    #[test]
    fn test_frame_helpers() {
        let src = i16_bytes(&[16384, -16384]);
        let mut frame = [0f32; MAX_CHANNELS];
        assert_eq!(read_frame(SampleType::I16, &src, &mut frame), 2);
        assert!((frame[0] - 0.5).abs() < 0.001);

        let mut out = [0u8; 8];
        write_frame(SampleType::F32, &frame[..2], &mut out);
        let back = to_f32(&out);
        assert!((back[1] + 0.5).abs() < 0.001);
    }
}
