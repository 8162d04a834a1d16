//! Sample type and sample rate conversion.
//!
//! Uses linear interpolation, which is fast and adequate for capture paths
//! where the rate change is usually small (44.1k ↔ 48k).

use crate::format::convert::{read_frame, write_frame, MAX_CHANNELS};
use crate::format::SampleType;

/// Streaming converter between two sample types and rates.
///
/// State carries across calls so the output is continuous when the input
/// arrives in packets and the output lands in split ring buffer segments.
/// The converter holds back one input frame to interpolate against, so the
/// most recent frame only appears once the next one arrives.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    src_type: SampleType,
    dst_type: SampleType,
    channels: usize,
    step: f64,
    pos: f64,
    last: [f32; MAX_CHANNELS],
    primed: bool,
}

impl SampleConverter {
    /// Creates a converter for interleaved frames of `channels` channels.
    ///
    /// `channels` is clamped to [`MAX_CHANNELS`].
    #[must_use]
    pub fn new(
        src_type: SampleType,
        dst_type: SampleType,
        channels: u16,
        src_rate: u32,
        dst_rate: u32,
    ) -> Self {
        Self {
            src_type,
            dst_type,
            channels: usize::from(channels).clamp(1, MAX_CHANNELS),
            step: f64::from(src_rate) / f64::from(dst_rate.max(1)),
            pos: 0.0,
            last: [0.0; MAX_CHANNELS],
            primed: false,
        }
    }

    /// Input sample type.
    #[must_use]
    pub fn src_type(&self) -> SampleType {
        self.src_type
    }

    /// Output sample type.
    #[must_use]
    pub fn dst_type(&self) -> SampleType {
        self.dst_type
    }

    /// Bytes per input frame.
    #[must_use]
    pub fn src_frame_size(&self) -> usize {
        self.channels * self.src_type.bytes()
    }

    /// Bytes per output frame.
    #[must_use]
    pub fn dst_frame_size(&self) -> usize {
        self.channels * self.dst_type.bytes()
    }

    /// Forgets the interpolation history.
    pub fn reset(&mut self) {
        self.pos = 0.0;
        self.primed = false;
    }

    /// Converts up to `src_frames` input frames into at most `dst_frames`
    /// output frames.
    ///
    /// Returns `(consumed, produced)`. Input frames that were not consumed
    /// must be offered again on the next call.
    pub fn convert(
        &mut self,
        src: &[u8],
        src_frames: usize,
        dst: &mut [u8],
        dst_frames: usize,
    ) -> (usize, usize) {
        let src_size = self.src_frame_size();
        let dst_size = self.dst_frame_size();
        let channels = self.channels;
        let src_frames = src_frames.min(src.len() / src_size);
        let dst_frames = dst_frames.min(dst.len() / dst_size);

        let mut consumed = 0;
        if !self.primed {
            if src_frames == 0 {
                return (0, 0);
            }
            read_frame(self.src_type, &src[..src_size], &mut self.last[..channels]);
            consumed = 1;
            self.primed = true;
        }

        let mut next = [0f32; MAX_CHANNELS];
        let mut out = [0f32; MAX_CHANNELS];
        let mut produced = 0;
        loop {
            while self.pos >= 1.0 && consumed < src_frames {
                let at = consumed * src_size;
                read_frame(
                    self.src_type,
                    &src[at..at + src_size],
                    &mut self.last[..channels],
                );
                consumed += 1;
                self.pos -= 1.0;
            }
            if self.pos >= 1.0 || consumed >= src_frames || produced >= dst_frames {
                break;
            }

            let at = consumed * src_size;
            read_frame(self.src_type, &src[at..at + src_size], &mut next[..channels]);
            let frac = self.pos as f32;
            for c in 0..channels {
                out[c] = self.last[c] + (next[c] - self.last[c]) * frac;
            }
            let at = produced * dst_size;
            write_frame(self.dst_type, &out[..channels], &mut dst[at..at + dst_size]);

            produced += 1;
            self.pos += self.step;
        }

        (consumed, produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn from_i16_bytes(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    /// Feeds all of `src` through in one go and returns the output samples.
    fn run(conv: &mut SampleConverter, src: &[i16], channels: usize) -> Vec<i16> {
        let frames = src.len() / channels;
        let bytes = i16_bytes(src);
        let mut dst = vec![0u8; frames * 4 * channels * 2];
        let (consumed, produced) = conv.convert(&bytes, frames, &mut dst, frames * 4);
        assert_eq!(consumed, frames);
        from_i16_bytes(&dst[..produced * channels * 2])
    }

    #[test]
    fn test_same_rate_passthrough_lags_one_frame() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::I16, 1, 16000, 16000);
        let out = run(&mut conv, &[100, 200, 300, 400], 1);
        assert_eq!(out, vec![100, 200, 300]);

        // The held-back frame comes out once more input arrives
        let out = run(&mut conv, &[500], 1);
        assert_eq!(out, vec![400]);
    }

    #[test]
    fn test_empty_input() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::F32, 2, 48000, 44100);
        let mut dst = [0u8; 64];
        assert_eq!(conv.convert(&[], 0, &mut dst, 8), (0, 0));
    }

    #[test]
    fn test_downsample_length() {
        // 48kHz to 16kHz = 3:1 ratio
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::I16, 1, 48000, 16000);
        let src: Vec<i16> = (0..480).map(|i| (i * 10) as i16).collect();
        let out = run(&mut conv, &src, 1);
        assert_eq!(out.len(), 160);
        assert_eq!(out[1], 30);
    }

    #[test]
    fn test_upsample_interpolates() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::I16, 1, 1, 2);
        let out = run(&mut conv, &[0, 1000, 2000], 1);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], 0);
        assert!(out[1] > 0 && out[1] < 1000);
        assert_eq!(out[2], 1000);
    }

    #[test]
    fn test_stereo_channels_stay_separate() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::I16, 2, 8000, 8000);
        let out = run(&mut conv, &[100, -100, 200, -200, 300, -300], 2);
        assert_eq!(out, vec![100, -100, 200, -200]);
    }

    #[test]
    fn test_output_limit_leaves_input_unconsumed() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::I16, 1, 8000, 8000);
        let src = i16_bytes(&[1, 2, 3, 4, 5, 6]);
        let mut dst = vec![0u8; 4];
        let (consumed, produced) = conv.convert(&src, 6, &mut dst, 2);
        assert_eq!(produced, 2);
        assert!(consumed < 6);

        // Continue with the remainder; output is continuous
        let rest = &src[consumed * 2..];
        let mut dst2 = vec![0u8; 16];
        let (_, produced2) = conv.convert(rest, 6 - consumed, &mut dst2, 8);
        let mut all = from_i16_bytes(&dst);
        all.extend(from_i16_bytes(&dst2[..produced2 * 2]));
        assert_eq!(all, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_type_conversion_to_f32() {
        let mut conv = SampleConverter::new(SampleType::I16, SampleType::F32, 1, 8000, 8000);
        let src = i16_bytes(&[16384, 16384]);
        let mut dst = [0u8; 8];
        let (_, produced) = conv.convert(&src, 2, &mut dst, 2);
        assert_eq!(produced, 1);
        let value = f32::from_ne_bytes([dst[0], dst[1], dst[2], dst[3]]);
        assert!((value - 0.5).abs() < 0.001);
    }
}
