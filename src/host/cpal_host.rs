//! Real audio endpoints through CPAL.
//!
//! CPAL exposes callback-driven streams rather than a shared-mode client, so
//! the client is emulated: a byte ring sits between the stream callback and
//! the render/capture service, the callback signals the notify event each
//! time it runs, and stream errors mark the endpoint invalidated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::format::native::{default_mask, layout_from_mask, NativeFormat, SubFormat};
use crate::host::{
    AudioClient, AudioHost, CaptureService, Direction, EndpointId, NotifyEvent, RenderService,
};
use crate::HostError;

/// CPAL does not report a processing period; this matches the usual
/// shared-mode default.
const DEVICE_PERIOD: Duration = Duration::from_millis(10);

/// Audio host backed by the platform's default CPAL host.
///
/// Endpoint ids have the form `host:direction:index:name`. CPAL exposes no
/// endpoint GUIDs, so GUID lookups always fail and directory entries carry
/// the unknown-GUID sentinel.
pub struct CpalHost {
    host: cpal::Host,
    devices: HashMap<EndpointId, Device>,
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalHost {
    /// Uses the platform's default CPAL host.
    #[must_use]
    pub fn new() -> Self {
        Self::with_host(cpal::default_host())
    }

    /// Uses a specific CPAL host.
    #[must_use]
    pub fn with_host(host: cpal::Host) -> Self {
        Self {
            host,
            devices: HashMap::new(),
        }
    }

    fn endpoint_id(&self, direction: Direction, slot: &str, name: &str) -> EndpointId {
        EndpointId::new(format!("{}:{direction}:{slot}:{name}", self.host.id().name()))
    }

    fn list(&self, direction: Direction) -> Result<Vec<Device>, HostError> {
        let devices = match direction {
            Direction::Playback => self
                .host
                .output_devices()
                .map_err(|e| HostError::Unavailable(e.to_string()))?
                .collect(),
            Direction::Capture => self
                .host
                .input_devices()
                .map_err(|e| HostError::Unavailable(e.to_string()))?
                .collect(),
        };
        Ok(devices)
    }
}

impl AudioHost for CpalHost {
    fn initialize(&mut self) -> Result<(), HostError> {
        tracing::debug!(host = self.host.id().name(), "CPAL host ready");
        Ok(())
    }

    fn uninitialize(&mut self) {
        self.devices.clear();
    }

    fn default_endpoint(&mut self, direction: Direction) -> Result<Option<EndpointId>, HostError> {
        let device = match direction {
            Direction::Playback => self.host.default_output_device(),
            Direction::Capture => self.host.default_input_device(),
        };
        let Some(device) = device else {
            return Ok(None);
        };
        let Ok(name) = device.name() else {
            let id = self.endpoint_id(direction, "default", "?");
            self.devices.insert(id.clone(), device);
            return Ok(Some(id));
        };

        // Prefer the id the device has in the full collection
        let ids = self.endpoints(direction)?;
        let listed = ids.into_iter().find(|id| {
            self.devices
                .get(id)
                .and_then(|d| d.name().ok())
                .is_some_and(|n| n == name)
        });
        if let Some(id) = listed {
            return Ok(Some(id));
        }

        let id = self.endpoint_id(direction, "default", &name);
        self.devices.insert(id.clone(), device);
        Ok(Some(id))
    }

    fn endpoints(&mut self, direction: Direction) -> Result<Vec<EndpointId>, HostError> {
        let devices = self.list(direction)?;
        let mut ids = Vec::with_capacity(devices.len());
        for (index, device) in devices.into_iter().enumerate() {
            let name = device.name().unwrap_or_else(|_| "?".to_string());
            let id = self.endpoint_id(direction, &index.to_string(), &name);
            self.devices.insert(id.clone(), device);
            ids.push(id);
        }
        Ok(ids)
    }

    fn friendly_name(&mut self, id: &EndpointId) -> Result<String, HostError> {
        let device = self.devices.get(id).ok_or(HostError::DeviceInvalidated)?;
        device.name().map_err(|e| {
            tracing::debug!(endpoint = %id, error = %e, "Device name lookup failed");
            HostError::PropertyUnavailable {
                property: "friendly name",
            }
        })
    }

    fn endpoint_guid(&mut self, _id: &EndpointId) -> Result<String, HostError> {
        Err(HostError::PropertyUnavailable { property: "guid" })
    }

    fn activate(
        &mut self,
        id: &EndpointId,
        direction: Direction,
    ) -> Result<Box<dyn AudioClient>, HostError> {
        let device = self
            .devices
            .get(id)
            .cloned()
            .ok_or(HostError::DeviceInvalidated)?;
        Ok(Box::new(CpalClient {
            device,
            direction,
            stream: None,
            buffer_frames: 0,
            service: None,
        }))
    }
}

fn sample_format_of(format: &NativeFormat) -> Option<SampleFormat> {
    match (format.sub_format(), format.bits_per_sample()) {
        (SubFormat::Pcm, 8) => Some(SampleFormat::U8),
        (SubFormat::Pcm, 16) => Some(SampleFormat::I16),
        (SubFormat::Pcm, 32) => Some(SampleFormat::I32),
        (SubFormat::IeeeFloat, 32) => Some(SampleFormat::F32),
        _ => None,
    }
}

fn native_of(sample_format: SampleFormat, channels: u16, sample_rate: u32) -> NativeFormat {
    let (sub_format, bits) = match sample_format {
        SampleFormat::F32 => (SubFormat::IeeeFloat, 32),
        SampleFormat::F64 => (SubFormat::IeeeFloat, 64),
        SampleFormat::I8 | SampleFormat::U8 => (SubFormat::Pcm, 8),
        SampleFormat::I32 | SampleFormat::U32 => (SubFormat::Pcm, 32),
        SampleFormat::I64 | SampleFormat::U64 => (SubFormat::Pcm, 64),
        _ => (SubFormat::Pcm, 16),
    };
    NativeFormat::new(
        sub_format,
        bits,
        channels,
        default_mask(channels),
        sample_rate,
    )
}

fn backend(e: impl std::fmt::Display) -> HostError {
    HostError::backend(e.to_string())
}

enum PendingService {
    Render(CpalRender),
    Capture(CpalCapture),
}

struct CpalClient {
    device: Device,
    direction: Direction,
    stream: Option<Stream>,
    buffer_frames: u32,
    service: Option<PendingService>,
}

impl CpalClient {
    fn matches_range(
        range: &cpal::SupportedStreamConfigRange,
        sample_format: SampleFormat,
        format: &NativeFormat,
    ) -> bool {
        range.sample_format() == sample_format
            && range.channels() == format.channels()
            && range.min_sample_rate().0 <= format.sample_rate()
            && format.sample_rate() <= range.max_sample_rate().0
    }
}

impl AudioClient for CpalClient {
    fn is_format_supported(&self, format: &NativeFormat) -> Result<bool, HostError> {
        let Some(sample_format) = sample_format_of(format) else {
            return Ok(false);
        };
        if layout_from_mask(format.channels(), format.channel_mask()).is_none() {
            return Ok(false);
        }
        let supported = match self.direction {
            Direction::Playback => self
                .device
                .supported_output_configs()
                .map_err(backend)?
                .any(|range| Self::matches_range(&range, sample_format, format)),
            Direction::Capture => self
                .device
                .supported_input_configs()
                .map_err(backend)?
                .any(|range| Self::matches_range(&range, sample_format, format)),
        };
        Ok(supported)
    }

    fn mix_format(&self) -> Result<NativeFormat, HostError> {
        let config = match self.direction {
            Direction::Playback => self.device.default_output_config(),
            Direction::Capture => self.device.default_input_config(),
        }
        .map_err(backend)?;
        Ok(native_of(
            config.sample_format(),
            config.channels(),
            config.sample_rate().0,
        ))
    }

    fn device_period(&self) -> Result<Duration, HostError> {
        Ok(DEVICE_PERIOD)
    }

    fn initialize(
        &mut self,
        format: &NativeFormat,
        buffer_frames: u32,
        event: NotifyEvent,
    ) -> Result<(), HostError> {
        if self.stream.is_some() {
            return Err(HostError::backend("client already initialized"));
        }
        let sample_format = sample_format_of(format).ok_or(HostError::UnsupportedFormat)?;
        let config = StreamConfig {
            channels: format.channels(),
            sample_rate: SampleRate(format.sample_rate()),
            buffer_size: BufferSize::Default,
        };
        let block_align = usize::from(format.block_align()).max(1);
        let frames = buffer_frames.max(1);
        let (producer, consumer) = HeapRb::<u8>::new(frames as usize * block_align).split();
        let failed = Arc::new(AtomicBool::new(false));

        let on_error = {
            let failed = Arc::clone(&failed);
            let event = event.clone();
            move |err: cpal::StreamError| {
                tracing::error!(error = %err, "Audio stream error");
                failed.store(true, Ordering::SeqCst);
                event.set();
            }
        };

        let (stream, service) = match self.direction {
            Direction::Playback => {
                let silence = if sample_format == SampleFormat::U8 {
                    0x80
                } else {
                    0
                };
                let stream = build_render_stream(
                    &self.device,
                    &config,
                    sample_format,
                    consumer,
                    silence,
                    event,
                    on_error,
                )?;
                let service = PendingService::Render(CpalRender {
                    producer,
                    block_align,
                    failed,
                    scratch: Vec::new(),
                });
                (stream, service)
            }
            Direction::Capture => {
                let stream = build_capture_stream(
                    &self.device,
                    &config,
                    sample_format,
                    producer,
                    block_align,
                    event,
                    on_error,
                )?;
                let service = PendingService::Capture(CpalCapture {
                    consumer,
                    block_align,
                    failed,
                    scratch: Vec::new(),
                });
                (stream, service)
            }
        };

        self.stream = Some(stream);
        self.service = Some(service);
        self.buffer_frames = frames;
        Ok(())
    }

    fn buffer_size(&self) -> Result<u32, HostError> {
        if self.stream.is_none() {
            return Err(HostError::NotInitialized);
        }
        Ok(self.buffer_frames)
    }

    fn start(&mut self) -> Result<(), HostError> {
        let stream = self.stream.as_ref().ok_or(HostError::NotInitialized)?;
        stream.play().map_err(backend)
    }

    fn stop(&mut self) -> Result<(), HostError> {
        let stream = self.stream.as_ref().ok_or(HostError::NotInitialized)?;
        stream.pause().map_err(backend)
    }

    fn render_service(&mut self) -> Result<Box<dyn RenderService>, HostError> {
        match self.service.take() {
            Some(PendingService::Render(render)) => Ok(Box::new(render)),
            other => {
                self.service = other;
                Err(HostError::NotInitialized)
            }
        }
    }

    fn capture_service(&mut self) -> Result<Box<dyn CaptureService>, HostError> {
        match self.service.take() {
            Some(PendingService::Capture(capture)) => Ok(Box::new(capture)),
            other => {
                self.service = other;
                Err(HostError::NotInitialized)
            }
        }
    }
}

fn build_render_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut consumer: HeapCons<u8>,
    silence: u8,
    event: NotifyEvent,
    on_error: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, HostError> {
    device
        .build_output_stream_raw(
            config,
            sample_format,
            move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                let out = data.bytes_mut();
                let filled = consumer.pop_slice(out);
                // Underrun: play silence for whatever the ring could not cover
                out[filled..].fill(silence);
                event.set();
            },
            on_error,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => HostError::DeviceInvalidated,
            cpal::BuildStreamError::StreamConfigNotSupported => HostError::UnsupportedFormat,
            other => backend(other),
        })
}

fn build_capture_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut producer: HeapProd<u8>,
    block_align: usize,
    event: NotifyEvent,
    on_error: impl FnMut(cpal::StreamError) + Send + 'static,
) -> Result<Stream, HostError> {
    device
        .build_input_stream_raw(
            config,
            sample_format,
            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                let bytes = data.bytes();
                // Whole frames only; drops on overflow
                let room = producer.vacant_len() / block_align * block_align;
                let whole = bytes.len() / block_align * block_align;
                producer.push_slice(&bytes[..whole.min(room)]);
                event.set();
            },
            on_error,
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => HostError::DeviceInvalidated,
            cpal::BuildStreamError::StreamConfigNotSupported => HostError::UnsupportedFormat,
            other => backend(other),
        })
}

/// Writer side of the emulated render buffer.
struct CpalRender {
    producer: HeapProd<u8>,
    block_align: usize,
    failed: Arc<AtomicBool>,
    scratch: Vec<u8>,
}

impl CpalRender {
    fn check(&self) -> Result<(), HostError> {
        if self.failed.load(Ordering::SeqCst) {
            Err(HostError::DeviceInvalidated)
        } else {
            Ok(())
        }
    }
}

impl RenderService for CpalRender {
    fn padding(&mut self) -> Result<u32, HostError> {
        self.check()?;
        Ok((self.producer.occupied_len() / self.block_align) as u32)
    }

    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8], HostError> {
        self.check()?;
        self.scratch.clear();
        self.scratch.resize(frames as usize * self.block_align, 0);
        Ok(self.scratch.as_mut_slice())
    }

    fn release_buffer(&mut self, frames: u32) -> Result<(), HostError> {
        self.check()?;
        let len = (frames as usize * self.block_align).min(self.scratch.len());
        self.producer.push_slice(&self.scratch[..len]);
        Ok(())
    }
}

/// Reader side of the emulated capture buffer.
struct CpalCapture {
    consumer: HeapCons<u8>,
    block_align: usize,
    failed: Arc<AtomicBool>,
    scratch: Vec<u8>,
}

impl CaptureService for CpalCapture {
    fn next_packet_size(&mut self) -> Result<u32, HostError> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(HostError::DeviceInvalidated);
        }
        Ok((self.consumer.occupied_len() / self.block_align) as u32)
    }

    fn get_buffer(&mut self) -> Result<(&[u8], u32), HostError> {
        let frames = self.consumer.occupied_len() / self.block_align;
        self.scratch.clear();
        self.scratch.resize(frames * self.block_align, 0);
        self.consumer.pop_slice(&mut self.scratch);
        Ok((self.scratch.as_slice(), frames as u32))
    }

    fn release_buffer(&mut self, _frames: u32) -> Result<(), HostError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::native::to_native;
    use crate::format::{ChannelLayout, PcmFormat, SampleType};

    #[test]
    fn test_sample_format_mapping() {
        let format = to_native(&PcmFormat::new(SampleType::I16, ChannelLayout::Stereo, 48000));
        assert_eq!(sample_format_of(&format), Some(SampleFormat::I16));

        let format = NativeFormat::new(SubFormat::Pcm, 24, 2, 0x3, 48000);
        assert_eq!(sample_format_of(&format), None);
    }

    #[test]
    fn test_native_of_uses_canonical_mask() {
        let native = native_of(SampleFormat::F32, 2, 48000);
        assert_eq!(native.channel_mask(), 0x3);
        assert_eq!(native.sub_format(), SubFormat::IeeeFloat);
        assert_eq!(native.block_align(), 8);
    }

    #[test]
    fn test_enumeration_doesnt_panic() {
        // May be empty in CI, but shouldn't panic
        let mut host = CpalHost::new();
        let _ = host.endpoints(Direction::Playback);
        let _ = host.default_endpoint(Direction::Capture);
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_activate_default_output() {
        let mut host = CpalHost::new();
        let id = host.default_endpoint(Direction::Playback).unwrap().unwrap();
        let client = host.activate(&id, Direction::Playback).unwrap();
        println!("Mix format: {}", client.mix_format().unwrap());
    }
}
