//! Capture stream thread: drains hardware packets, converts them to the
//! application format, and writes them into the capture ring.

use std::sync::atomic::Ordering;

use crate::format::convert::ChannelConverter;
use crate::format::resample::SampleConverter;
use crate::host::CaptureService;
use crate::pipeline::{RingProducer, StreamContext};
use crate::HostError;

/// The pieces of a capture session the stream thread borrows while it runs.
pub(crate) struct CaptureParts {
    pub service: Box<dyn CaptureService>,
    pub producer: RingProducer,
    /// Present on a mono/stereo mismatch; outputs f32.
    pub channel: Option<ChannelConverter>,
    /// Present when sample type or rate differ.
    pub sample: Option<SampleConverter>,
}

pub(crate) struct CaptureStream {
    pub ctx: StreamContext,
    pub parts: CaptureParts,
}

impl CaptureStream {
    /// Runs until stopped or the hardware fails, then hands the parts back.
    pub fn run(self) -> CaptureParts {
        let Self { ctx, mut parts } = self;
        let mut scratch = Vec::new();
        let mut timeouts = 0;

        tracing::debug!(
            device = %ctx.device,
            channel_conversion = parts.channel.is_some(),
            sample_conversion = parts.sample.is_some(),
            "Capture thread started"
        );

        while !ctx.should_stop() {
            let available = match parts.service.next_packet_size() {
                Ok(frames) => frames,
                Err(e) => {
                    ctx.disconnect(&e);
                    break;
                }
            };
            if available == 0 {
                if !ctx.wait(&mut timeouts) {
                    break;
                }
                continue;
            }

            match capture_packet(&mut parts, &mut scratch) {
                Ok(written) => {
                    ctx.shared
                        .frames_done
                        .fetch_add(written as u64, Ordering::Relaxed);
                    timeouts = 0;
                }
                Err(e) => {
                    ctx.disconnect(&e);
                    break;
                }
            }
        }

        tracing::debug!(device = %ctx.device, "Capture thread exiting");
        parts
    }
}

/// Moves one hardware packet into the ring, returning the frames written.
///
/// Frames that do not fit are dropped; the packet is released either way.
fn capture_packet(parts: &mut CaptureParts, scratch: &mut Vec<u8>) -> Result<usize, HostError> {
    let CaptureParts {
        service,
        producer,
        channel,
        sample,
    } = parts;

    let (data, frames) = service.get_buffer()?;
    let count = frames as usize;

    let src: &[u8] = match channel {
        Some(converter) => {
            scratch.clear();
            scratch.resize(count * converter.dst_frame_size(), 0);
            converter.convert(data, scratch, count);
            scratch.as_slice()
        }
        None => data,
    };

    let written = match sample {
        Some(converter) => convert_into(converter, src, count, producer),
        None => copy_into(src, count, producer),
    };
    producer.commit_write(written);

    service.release_buffer(frames)?;
    Ok(written)
}

/// Runs the sample converter into the ring's free space.
///
/// The free space may wrap, so the converter runs a second time into the
/// second segment when it filled the first and input remains.
fn convert_into(
    converter: &mut SampleConverter,
    src: &[u8],
    frames: usize,
    producer: &mut RingProducer,
) -> usize {
    let dst_size = converter.dst_frame_size();
    let src_size = converter.src_frame_size();
    let vector = producer.write_vector();

    let first_frames = vector.first.len() / dst_size;
    let (consumed, mut produced) = converter.convert(src, frames, vector.first, first_frames);

    if produced == first_frames && consumed < frames && !vector.second.is_empty() {
        let second_frames = vector.second.len() / dst_size;
        let rest = &src[consumed * src_size..];
        let (_, more) = converter.convert(rest, frames - consumed, vector.second, second_frames);
        produced += more;
    }
    produced
}

/// Copies frames unchanged into the ring's free space.
fn copy_into(src: &[u8], frames: usize, producer: &mut RingProducer) -> usize {
    let frame_size = producer.frame_size();
    let mut remaining = &src[..(frames * frame_size).min(src.len())];
    let mut written = 0;

    let vector = producer.write_vector();
    for segment in [vector.first, vector.second] {
        let len = segment.len().min(remaining.len()) / frame_size * frame_size;
        segment[..len].copy_from_slice(&remaining[..len]);
        remaining = &remaining[len..];
        written += len / frame_size;
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::native::to_native;
    use crate::format::{ChannelLayout, PcmFormat, SampleType};
    use crate::host::mock::MockHost;
    use crate::event::DeviceEvent;
    use crate::host::{AudioHost, Direction, NotifyEvent};
    use crate::pipeline::ring_buffer;
    use crate::pipeline::test_support::context;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn i16_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn capture_service(
        host: &mut MockHost,
        format: &PcmFormat,
        event: NotifyEvent,
    ) -> Box<dyn CaptureService> {
        let id = host.endpoints(Direction::Capture).unwrap().remove(0);
        let mut client = host.activate(&id, Direction::Capture).unwrap();
        client.initialize(&to_native(format), 960, event).unwrap();
        client.capture_service().unwrap()
    }

    #[test]
    fn test_copy_into_wraps() {
        let (mut producer, mut consumer) = ring_buffer(4, 2);
        producer.write(&[0; 6]);
        let mut sink = [0u8; 6];
        consumer.read(&mut sink, 3);

        let src = i16_bytes(&[1, 2, 3]);
        let written = copy_into(&src, 3, &mut producer);
        assert_eq!(written, 3);
        producer.commit_write(written);

        let mut out = [0u8; 6];
        assert_eq!(consumer.read(&mut out, 3), 3);
        assert_eq!(out.to_vec(), src);
    }

    #[test]
    fn test_copy_into_drops_overflow() {
        let (mut producer, _consumer) = ring_buffer(2, 2);
        let src = i16_bytes(&[1, 2, 3, 4]);
        assert_eq!(copy_into(&src, 4, &mut producer), 2);
    }

    #[test]
    fn test_convert_into_runs_twice_across_wrap() {
        let (mut producer, mut consumer) = ring_buffer(4, 4);
        producer.write(&[0; 12]);
        let mut sink = [0u8; 12];
        consumer.read(&mut sink, 3);

        // Cursor at frame 3: one frame before the wrap, three after
        let mut converter = SampleConverter::new(SampleType::I16, SampleType::F32, 1, 8000, 8000);
        let src = i16_bytes(&[0, 8192, 16384, -16384, 0]);
        let written = convert_into(&mut converter, &src, 5, &mut producer);
        assert_eq!(written, 4);
        producer.commit_write(written);

        let mut out = [0u8; 16];
        assert_eq!(consumer.read(&mut out, 4), 4);
        let values: Vec<f32> = out
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        assert_eq!(values, vec![0.0, 0.25, 0.5, -0.5]);
    }

    #[test]
    fn test_stream_converts_mono_i16_to_stereo_f32() {
        let hw = PcmFormat::new(SampleType::I16, ChannelLayout::Mono, 8000);
        let mut host = MockHost::new()
            .with_endpoint(Direction::Capture, "Mic", "{m}")
            .with_capture_data(i16_bytes(&[16384]));
        let (ctx, _events) = context(0);
        let service = capture_service(&mut host, &hw, ctx.event.clone());
        let kill = Arc::clone(&ctx.kill);
        let shared = Arc::clone(&ctx.shared);

        let (producer, mut consumer) = ring_buffer(1024, 8);
        let parts = CaptureParts {
            service,
            producer,
            channel: ChannelConverter::new(
                SampleType::I16,
                ChannelLayout::Mono,
                ChannelLayout::Stereo,
            ),
            sample: None,
        };
        let handle = thread::spawn(move || CaptureStream { ctx, parts }.run());

        thread::sleep(Duration::from_millis(50));
        kill.store(true, Ordering::Release);
        let parts = handle.join().unwrap();
        assert!(parts.channel.is_some());

        let available = consumer.read_space();
        assert!(available > 0);
        assert_eq!(shared.frames_done.load(Ordering::Relaxed), available as u64);

        let mut out = vec![0u8; available * 8];
        consumer.read(&mut out, available);
        let first = f32::from_ne_bytes([out[0], out[1], out[2], out[3]]);
        let second = f32::from_ne_bytes([out[4], out[5], out[6], out[7]]);
        assert!((first - 0.5).abs() < 1e-6);
        assert!((second - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stream_failure_disconnects() {
        let hw = PcmFormat::new(SampleType::F32, ChannelLayout::Stereo, 48000);
        let mut host = MockHost::new().with_endpoint(Direction::Capture, "Mic", "{m}");
        let (ctx, events) = context(0);
        let service = capture_service(&mut host, &hw, ctx.event.clone());
        let shared = Arc::clone(&ctx.shared);
        host.fail_capture_after(4);

        let (producer, _consumer) = ring_buffer(4800, 8);
        let parts = CaptureParts {
            service,
            producer,
            channel: None,
            sample: None,
        };
        thread::spawn(move || CaptureStream { ctx, parts }.run())
            .join()
            .unwrap();

        assert_eq!(host.capture_calls(), 5);
        assert!(!shared.connected.load(Ordering::Acquire));
        assert_eq!(events.lock().len(), 1);
    }

    /// Never signals; has a packet ready on every other query.
    struct SilentDriver {
        queries: u32,
        packet: Vec<u8>,
    }

    impl CaptureService for SilentDriver {
        fn next_packet_size(&mut self) -> Result<u32, HostError> {
            self.queries += 1;
            Ok(if self.queries % 2 == 0 { 4 } else { 0 })
        }

        fn get_buffer(&mut self) -> Result<(&[u8], u32), HostError> {
            Ok((&self.packet, 4))
        }

        fn release_buffer(&mut self, _frames: u32) -> Result<(), HostError> {
            Ok(())
        }
    }

    #[test]
    fn test_scattered_timeouts_do_not_disconnect() {
        let (ctx, events) = context(3);
        let kill = Arc::clone(&ctx.kill);
        let shared = Arc::clone(&ctx.shared);

        let (producer, _consumer) = ring_buffer(4800, 4);
        let parts = CaptureParts {
            service: Box::new(SilentDriver {
                queries: 0,
                packet: vec![0; 16],
            }),
            producer,
            channel: None,
            sample: None,
        };
        let handle = thread::spawn(move || CaptureStream { ctx, parts }.run());

        thread::sleep(Duration::from_millis(60));
        kill.store(true, Ordering::Release);
        handle.join().unwrap();

        assert!(shared.connected.load(Ordering::Acquire));
        assert!(shared.frames_done.load(Ordering::Relaxed) > 12);
        let events = events.lock();
        assert!(events.len() > 3);
        assert!(events.iter().all(|e| matches!(
            e,
            DeviceEvent::WaitTimedOut { consecutive: 1, .. }
        )));
    }
}
