//! Worker-owned lifecycle state of one opened device.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{DeviceParams, EffectiveParams, RuntimeConfig};
use crate::directory::Endpoint;
use crate::event::{emit, DeviceEvent, EventCallback};
use crate::format::convert::ChannelConverter;
use crate::format::native::{negotiate, NativeFormat};
use crate::format::resample::SampleConverter;
use crate::format::SampleType;
use crate::host::{AudioClient, AudioHost, Direction, NotifyEvent, RenderService};
use crate::pipeline::{
    ring_buffer, CaptureParts, CaptureStream, PlaybackStream, SharedMixer, StreamContext,
    StreamShared,
};
use crate::StreamDeviceError;

/// Handle the worker hands out for an open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SessionId(pub u64);

/// Frames in one hardware period at `rate`, rounded up.
pub(crate) fn period_frames(period: Duration, rate: u32) -> u32 {
    let frames = (period.as_nanos() * u128::from(rate)).div_ceil(1_000_000_000);
    u32::try_from(frames).unwrap_or(u32::MAX).max(1)
}

/// Converts a frame count between sample rates, rounding up.
pub(crate) fn scale_frames(frames: u32, from_rate: u32, to_rate: u32) -> u32 {
    let scaled = (u64::from(frames) * u64::from(to_rate)).div_ceil(u64::from(from_rate.max(1)));
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Picks the update size for a hardware buffer.
///
/// The result is a whole multiple of `period` (at least one), as close to
/// `requested` from above as the buffer allows, and never more than half of
/// `buffer`.
///
/// # Errors
///
/// [`StreamDeviceError::BufferSizing`] if two periods do not fit the buffer.
pub(crate) fn compute_update_size(
    period: u32,
    requested: u32,
    buffer: u32,
) -> Result<u32, StreamDeviceError> {
    let period = period.max(1);
    let max_multiple = (buffer / 2) / period;
    if max_multiple == 0 {
        return Err(StreamDeviceError::BufferSizing { period, buffer });
    }
    let multiple = requested.div_ceil(period).clamp(1, max_multiple);
    Ok(period * multiple)
}

/// Spawns `run(value)` on a new thread.
///
/// On a spawn failure the value is handed back with the error instead of
/// being dropped with the closure.
pub(crate) fn spawn_stream<T, R>(
    builder: thread::Builder,
    value: T,
    run: fn(T) -> R,
) -> Result<JoinHandle<Option<R>>, (Option<T>, io::Error)>
where
    T: Send + 'static,
    R: Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(value)));
    let theirs = Arc::clone(&slot);
    builder
        .spawn(move || {
            let value = theirs.lock().take();
            value.map(run)
        })
        .map_err(|e| (slot.lock().take(), e))
}

pub(crate) struct PlaybackSession {
    mixer: SharedMixer,
    service: Option<Box<dyn RenderService>>,
    thread: Option<JoinHandle<Option<Box<dyn RenderService>>>>,
}

pub(crate) struct CaptureSession {
    parts: Option<CaptureParts>,
    thread: Option<JoinHandle<Option<CaptureParts>>>,
}

/// Kind-specific state, dispatched on at each lifecycle entry point.
pub(crate) enum SessionKind {
    Playback(PlaybackSession),
    Capture(CaptureSession),
}

impl SessionKind {
    pub fn playback(mixer: SharedMixer) -> Self {
        Self::Playback(PlaybackSession {
            mixer,
            service: None,
            thread: None,
        })
    }

    pub fn capture() -> Self {
        Self::Capture(CaptureSession {
            parts: None,
            thread: None,
        })
    }

    pub fn direction(&self) -> Direction {
        match self {
            Self::Playback(_) => Direction::Playback,
            Self::Capture(_) => Direction::Capture,
        }
    }

    fn is_configured(&self) -> bool {
        match self {
            Self::Playback(p) => p.service.is_some(),
            Self::Capture(c) => c.parts.is_some(),
        }
    }

    fn release_streaming(&mut self) {
        match self {
            Self::Playback(p) => p.service = None,
            Self::Capture(c) => c.parts = None,
        }
    }
}

pub(crate) struct Session {
    endpoint: Endpoint,
    client: Box<dyn AudioClient>,
    client_initialized: bool,
    running: bool,
    event: NotifyEvent,
    kill: Arc<AtomicBool>,
    shared: Arc<StreamShared>,
    callback: Option<EventCallback>,
    kind: SessionKind,
    update_size: u32,
    buffer_size: u32,
}

impl Session {
    pub fn new(
        endpoint: Endpoint,
        client: Box<dyn AudioClient>,
        shared: Arc<StreamShared>,
        callback: Option<EventCallback>,
        kind: SessionKind,
    ) -> Self {
        Self {
            endpoint,
            client,
            client_initialized: false,
            running: false,
            event: NotifyEvent::new(),
            kill: Arc::new(AtomicBool::new(false)),
            shared,
            callback,
            kind,
            update_size: 0,
            buffer_size: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.endpoint.name
    }

    fn direction(&self) -> Direction {
        self.kind.direction()
    }

    fn state_name(&self) -> &'static str {
        if self.running {
            "running"
        } else if self.kind.is_configured() {
            "stopped"
        } else {
            "unconfigured"
        }
    }

    /// Negotiates a format and (re)initializes the client.
    ///
    /// An initialized client cannot be initialized again, so a repeat reset
    /// activates a fresh one.
    pub fn reset(
        &mut self,
        host: &mut dyn AudioHost,
        params: &DeviceParams,
        config: &RuntimeConfig,
    ) -> Result<EffectiveParams, StreamDeviceError> {
        self.reap_failed();
        if self.running {
            return Err(StreamDeviceError::InvalidState {
                operation: "reset",
                state: "running",
            });
        }

        self.kind.release_streaming();
        *self.shared.consumer.lock() = None;
        if self.client_initialized {
            self.client = host
                .activate(&self.endpoint.id, self.direction())
                .map_err(|source| StreamDeviceError::Activation {
                    name: self.endpoint.name.clone(),
                    source,
                })?;
            self.client_initialized = false;
        }

        let effective = match self.direction() {
            Direction::Playback => self.reset_playback(params)?,
            Direction::Capture => self.reset_capture(params, config)?,
        };

        self.update_size = effective.update_size;
        self.buffer_size = effective.buffer_size;
        *self.shared.format.lock() = Some(effective.format);
        self.shared.frames_done.store(0, Ordering::Relaxed);
        self.shared.padding.store(0, Ordering::Release);
        self.shared.connected.store(true, Ordering::Release);

        tracing::info!(
            device = %self.endpoint.name,
            format = %effective.format,
            update_size = effective.update_size,
            buffer_size = effective.buffer_size,
            "Device reset"
        );
        Ok(effective)
    }

    fn reset_playback(
        &mut self,
        params: &DeviceParams,
    ) -> Result<EffectiveParams, StreamDeviceError> {
        let requested = params.format;
        let (effective, native) = negotiate(self.client.as_ref(), &requested)?;
        if effective != requested {
            tracing::info!(
                device = %self.endpoint.name,
                %requested,
                %effective,
                "Device format changed"
            );
            emit(
                self.callback.as_ref(),
                DeviceEvent::FormatChanged {
                    device: self.endpoint.name.clone(),
                    requested,
                    effective,
                },
            );
        }

        let update_request =
            scale_frames(params.update_size, requested.sample_rate, effective.sample_rate);
        let (update_size, buffer_size) =
            self.initialize_client(&native, update_request, params.num_updates)?;
        let service = self.client.render_service()?;
        if let SessionKind::Playback(playback) = &mut self.kind {
            playback.service = Some(service);
        }

        Ok(EffectiveParams {
            format: effective,
            update_size,
            buffer_size,
            num_updates: buffer_size / update_size,
        })
    }

    /// Capture always delivers the requested format; the hardware format is
    /// bridged by converters.
    fn reset_capture(
        &mut self,
        params: &DeviceParams,
        config: &RuntimeConfig,
    ) -> Result<EffectiveParams, StreamDeviceError> {
        let app = params.format;
        let (hardware, native) = negotiate(self.client.as_ref(), &app)?;

        let channel = if hardware.layout == app.layout {
            None
        } else {
            let converter = ChannelConverter::new(hardware.sample_type, hardware.layout, app.layout)
                .ok_or_else(|| StreamDeviceError::FormatNegotiation {
                    reason: format!("cannot capture {} as {}", hardware.layout, app.layout),
                })?;
            Some(converter)
        };
        // Channel conversion always outputs f32
        let src_type = if channel.is_some() {
            SampleType::F32
        } else {
            hardware.sample_type
        };
        let sample = (src_type != app.sample_type || hardware.sample_rate != app.sample_rate)
            .then(|| {
                SampleConverter::new(
                    src_type,
                    app.sample_type,
                    app.channels(),
                    hardware.sample_rate,
                    app.sample_rate,
                )
            });
        if hardware != app {
            tracing::debug!(
                device = %self.endpoint.name,
                %hardware,
                application = %app,
                "Converting captured audio"
            );
        }

        let update_request = scale_frames(params.update_size, app.sample_rate, hardware.sample_rate);
        let (update_hw, buffer_hw) =
            self.initialize_client(&native, update_request, params.num_updates)?;
        let service = self.client.capture_service()?;

        // Both sizes round up independently, so the update is clamped again
        let buffer_size = scale_frames(buffer_hw, hardware.sample_rate, app.sample_rate);
        let update_size = scale_frames(update_hw, hardware.sample_rate, app.sample_rate)
            .min(buffer_size / 2)
            .max(1);
        let num_updates = (buffer_size / update_size).max(1);

        let ring_min = (config.capture_ring_duration.as_secs_f64() * f64::from(app.sample_rate))
            .ceil() as usize;
        let ring_frames = (update_size as usize * params.num_updates.max(num_updates) as usize)
            .max(buffer_size as usize)
            .max(ring_min);
        let (producer, consumer) = ring_buffer(ring_frames, app.frame_size());
        *self.shared.consumer.lock() = Some(consumer);

        if let SessionKind::Capture(capture) = &mut self.kind {
            capture.parts = Some(CaptureParts {
                service,
                producer,
                channel,
                sample,
            });
        }

        Ok(EffectiveParams {
            format: app,
            update_size,
            buffer_size,
            num_updates,
        })
    }

    /// Initializes the client and sizes the update period, in hardware frames.
    fn initialize_client(
        &mut self,
        native: &NativeFormat,
        update_request: u32,
        num_updates: u32,
    ) -> Result<(u32, u32), StreamDeviceError> {
        let period = self.client.device_period()?;
        let buffer_request = update_request.max(1).saturating_mul(num_updates.max(1));

        self.client_initialized = true;
        self.client
            .initialize(native, buffer_request, self.event.clone())?;
        let buffer = self.client.buffer_size()?;

        let period = period_frames(period, native.sample_rate());
        let update = compute_update_size(period, update_request, buffer)?;
        tracing::debug!(
            device = %self.endpoint.name,
            period,
            update,
            buffer,
            "Buffer sizing"
        );
        Ok((update, buffer))
    }

    /// Starts the hardware stream and its thread.
    ///
    /// A failed thread spawn stops the hardware again and keeps the session
    /// configured, so start can simply be retried.
    pub fn start(&mut self, config: &RuntimeConfig) -> Result<(), StreamDeviceError> {
        self.reap_failed();
        if self.running {
            return Ok(());
        }
        if !self.kind.is_configured() {
            return Err(StreamDeviceError::InvalidState {
                operation: "start",
                state: self.state_name(),
            });
        }

        self.event.reset();
        self.kill.store(false, Ordering::Release);
        self.shared.connected.store(true, Ordering::Release);
        self.client.start()?;

        let ctx = StreamContext {
            device: self.endpoint.name.clone(),
            event: self.event.clone(),
            kill: Arc::clone(&self.kill),
            shared: Arc::clone(&self.shared),
            callback: self.callback.clone(),
            notify_timeout: config.notify_timeout,
            max_consecutive_timeouts: config.max_consecutive_timeouts,
        };

        let spawned = match &mut self.kind {
            SessionKind::Playback(playback) => match playback.service.take() {
                Some(service) => {
                    let stream = PlaybackStream {
                        ctx,
                        service,
                        mixer: Arc::clone(&playback.mixer),
                        buffer_size: self.buffer_size,
                        update_size: self.update_size,
                    };
                    let builder = thread::Builder::new().name("stream-device-playback".to_string());
                    match spawn_stream(builder, stream, PlaybackStream::run) {
                        Ok(handle) => {
                            playback.thread = Some(handle);
                            Ok(())
                        }
                        Err((stream, e)) => {
                            playback.service = stream.map(|s| s.service);
                            Err(e.to_string())
                        }
                    }
                }
                None => Err("render service missing".to_string()),
            },
            SessionKind::Capture(capture) => match capture.parts.take() {
                Some(parts) => {
                    let stream = CaptureStream { ctx, parts };
                    let builder = thread::Builder::new().name("stream-device-capture".to_string());
                    match spawn_stream(builder, stream, CaptureStream::run) {
                        Ok(handle) => {
                            capture.thread = Some(handle);
                            Ok(())
                        }
                        Err((stream, e)) => {
                            capture.parts = stream.map(|s| s.parts);
                            Err(e.to_string())
                        }
                    }
                }
                None => Err("capture service missing".to_string()),
            },
        };

        if let Err(reason) = spawned {
            tracing::error!(device = %self.endpoint.name, %reason, "Failed to spawn stream thread");
            if let Err(e) = self.client.stop() {
                tracing::warn!(device = %self.endpoint.name, error = %e, "Failed to stop hardware stream");
            }
            return Err(StreamDeviceError::StreamStart { reason });
        }

        self.running = true;
        tracing::info!(device = %self.endpoint.name, direction = %self.direction(), "Stream started");
        Ok(())
    }

    /// Stops a session whose stream thread exited on a hardware failure.
    ///
    /// The session then counts as stopped, so it can be reset and started
    /// again.
    fn reap_failed(&mut self) {
        if !self.running {
            return;
        }
        let finished = match &self.kind {
            SessionKind::Playback(p) => p.thread.as_ref().map_or(true, JoinHandle::is_finished),
            SessionKind::Capture(c) => c.thread.as_ref().map_or(true, JoinHandle::is_finished),
        };
        if finished || !self.shared.connected.load(Ordering::Acquire) {
            tracing::debug!(device = %self.endpoint.name, "Reaping failed stream");
            self.stop();
        }
    }

    /// Stops the stream thread and the hardware. No-op when not running.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.kill.store(true, Ordering::Release);
        self.event.set();

        match &mut self.kind {
            SessionKind::Playback(playback) => {
                if let Some(handle) = playback.thread.take() {
                    match handle.join() {
                        Ok(service) => playback.service = service,
                        Err(_) => tracing::error!(device = %self.endpoint.name, "Playback thread panicked"),
                    }
                }
            }
            SessionKind::Capture(capture) => {
                if let Some(handle) = capture.thread.take() {
                    match handle.join() {
                        Ok(parts) => capture.parts = parts,
                        Err(_) => tracing::error!(device = %self.endpoint.name, "Capture thread panicked"),
                    }
                }
            }
        }

        if let Err(e) = self.client.stop() {
            tracing::warn!(device = %self.endpoint.name, error = %e, "Failed to stop hardware stream");
        }
        self.running = false;
        self.shared.padding.store(0, Ordering::Release);
        tracing::info!(device = %self.endpoint.name, "Stream stopped");
    }

    /// Stops if running and releases the client.
    pub fn close(mut self) {
        self.stop();
        self.kind.release_streaming();
        tracing::info!(device = %self.endpoint.name, "Device closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_frames_rounds_up() {
        assert_eq!(period_frames(Duration::from_millis(10), 44100), 441);
        assert_eq!(period_frames(Duration::from_millis(10), 48000), 480);
        assert_eq!(period_frames(Duration::from_micros(3), 44100), 1);
        assert_eq!(period_frames(Duration::ZERO, 44100), 1);
    }

    #[test]
    fn test_scale_frames() {
        assert_eq!(scale_frames(1024, 48000, 44100), 941);
        assert_eq!(scale_frames(480, 48000, 48000), 480);
        assert_eq!(scale_frames(441, 44100, 48000), 480);
    }

    #[test]
    fn test_update_size_scales_period_up() {
        // 1024 requested over a 441 period: ceil(1024/441) = 3 periods
        assert_eq!(compute_update_size(441, 1024, 4410).unwrap(), 1323);
    }

    #[test]
    fn test_update_size_capped_at_half_buffer() {
        assert_eq!(compute_update_size(480, 4800, 1920).unwrap(), 960);
        assert_eq!(compute_update_size(480, 4800, 1000).unwrap(), 480);
    }

    #[test]
    fn test_update_size_at_least_one_period() {
        assert_eq!(compute_update_size(480, 0, 4800).unwrap(), 480);
        assert_eq!(compute_update_size(480, 100, 4800).unwrap(), 480);
    }

    #[test]
    fn test_update_size_rejects_tiny_buffer() {
        assert!(matches!(
            compute_update_size(480, 480, 959),
            Err(StreamDeviceError::BufferSizing {
                period: 480,
                buffer: 959
            })
        ));
    }

    #[test]
    fn test_update_size_invariant() {
        for period in [1, 7, 64, 441, 480, 1024] {
            for buffer in [2 * period, 3 * period + 1, 4410, 9600, 65536] {
                for requested in [0, 1, 100, 512, 1024, 4096, 100_000] {
                    let Ok(update) = compute_update_size(period, requested, buffer) else {
                        continue;
                    };
                    assert!(update > 0);
                    assert_eq!(update % period, 0);
                    assert!(update <= buffer / 2, "{period} {requested} {buffer}");
                }
            }
        }
    }

    #[test]
    fn test_spawn_stream_runs_value() {
        let handle = spawn_stream(thread::Builder::new(), 21u32, |v| v * 2).unwrap();
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_spawn_failure_returns_value() {
        // No address space can hold this stack
        let builder = thread::Builder::new().stack_size(1 << 50);
        let Err((value, _)) = spawn_stream(builder, String::from("parts"), |v| v) else {
            panic!("spawn with an impossible stack succeeded");
        };
        assert_eq!(value.as_deref(), Some("parts"));
    }
}
