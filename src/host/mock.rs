//! Mock audio host for testing without hardware.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::format::native::{to_native, NativeFormat};
use crate::format::{ChannelLayout, PcmFormat, SampleType};
use crate::host::{
    AudioClient, AudioHost, CaptureService, Direction, EndpointId, NotifyEvent, RenderService,
};
use crate::HostError;

/// How long each mock stream query pretends the hardware takes.
const QUERY_DELAY: Duration = Duration::from_millis(1);

/// A scriptable in-memory audio host.
///
/// Clones share state, so a test keeps one handle for scripting and
/// inspection while the device worker owns another. This lets the full
/// worker, playback, and capture paths run in CI.
///
/// # Example
///
/// ```
/// use stream_device::host::mock::MockHost;
/// use stream_device::host::Direction;
///
/// let host = MockHost::new()
///     .with_endpoint(Direction::Playback, "Speakers", "{guid-1}")
///     .with_endpoint(Direction::Playback, "Speakers", "{guid-2}");
///
/// assert_eq!(host.subsystem_inits(), 0);
/// ```
#[derive(Clone, Default)]
pub struct MockHost {
    state: Arc<MockState>,
}

#[derive(Clone)]
struct MockEndpoint {
    id: EndpointId,
    name: Option<String>,
    guid: Option<String>,
}

struct MockConfig {
    playback: Vec<MockEndpoint>,
    capture: Vec<MockEndpoint>,
    default_playback: Option<usize>,
    default_capture: Option<usize>,
    supported: Option<Vec<NativeFormat>>,
    mix_format: NativeFormat,
    period: Duration,
    buffer_frames: Option<u32>,
    capture_data: Vec<u8>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            playback: Vec::new(),
            capture: Vec::new(),
            default_playback: None,
            default_capture: None,
            supported: None,
            mix_format: to_native(&PcmFormat::new(
                SampleType::F32,
                ChannelLayout::Stereo,
                48000,
            )),
            period: Duration::from_millis(10),
            buffer_frames: None,
            capture_data: Vec::new(),
        }
    }
}

#[derive(Default)]
struct MockState {
    config: Mutex<MockConfig>,

    fail_enumeration: AtomicBool,
    fail_activation: AtomicBool,
    fail_start: AtomicBool,
    fail_render_after: Mutex<Option<u64>>,
    fail_capture_after: Mutex<Option<u64>>,

    subsystem_inits: AtomicU32,
    subsystem_releases: AtomicU32,
    active_clients: AtomicU32,
    start_calls: AtomicU32,
    stop_calls: AtomicU32,
    render_calls: AtomicU64,
    capture_calls: AtomicU64,
    rendered_frames: AtomicU64,
    rendered: Mutex<Vec<u8>>,
}

impl MockHost {
    /// Creates a host with no endpoints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an endpoint. The first endpoint of each direction becomes the
    /// default.
    #[must_use]
    pub fn with_endpoint(
        self,
        direction: Direction,
        name: impl Into<String>,
        guid: impl Into<String>,
    ) -> Self {
        self.push_endpoint(direction, Some(name.into()), Some(guid.into()));
        self
    }

    /// Adds an endpoint whose name and GUID lookups fail.
    #[must_use]
    pub fn with_unnamed_endpoint(self, direction: Direction) -> Self {
        self.push_endpoint(direction, None, None);
        self
    }

    /// Makes the endpoint at `index` (in insertion order) the default.
    #[must_use]
    pub fn with_default(self, direction: Direction, index: usize) -> Self {
        let mut config = self.state.config.lock();
        match direction {
            Direction::Playback => config.default_playback = Some(index),
            Direction::Capture => config.default_capture = Some(index),
        }
        drop(config);
        self
    }

    /// Removes the default endpoint for a direction.
    #[must_use]
    pub fn without_default(self, direction: Direction) -> Self {
        let mut config = self.state.config.lock();
        match direction {
            Direction::Playback => config.default_playback = None,
            Direction::Capture => config.default_capture = None,
        }
        drop(config);
        self
    }

    /// Restricts the formats clients accept. By default any format is.
    #[must_use]
    pub fn with_supported_formats(self, formats: Vec<NativeFormat>) -> Self {
        self.state.config.lock().supported = Some(formats);
        self
    }

    /// Sets the mix format clients report. Default: f32 stereo 48000Hz.
    #[must_use]
    pub fn with_mix_format(self, format: NativeFormat) -> Self {
        self.state.config.lock().mix_format = format;
        self
    }

    /// Sets the hardware period. Default: 10ms.
    #[must_use]
    pub fn with_period(self, period: Duration) -> Self {
        self.state.config.lock().period = period;
        self
    }

    /// Forces the hardware buffer size instead of honoring the request.
    #[must_use]
    pub fn with_buffer_frames(self, frames: u32) -> Self {
        self.state.config.lock().buffer_frames = Some(frames);
        self
    }

    /// Bytes the capture service delivers, looped. Default: silence.
    #[must_use]
    pub fn with_capture_data(self, data: Vec<u8>) -> Self {
        self.state.config.lock().capture_data = data;
        self
    }

    /// Makes endpoint enumeration fail.
    pub fn fail_enumeration(&self, fail: bool) {
        self.state.fail_enumeration.store(fail, Ordering::SeqCst);
    }

    /// Makes endpoint activation fail.
    pub fn fail_activation(&self, fail: bool) {
        self.state.fail_activation.store(fail, Ordering::SeqCst);
    }

    /// Makes client start fail.
    pub fn fail_start(&self, fail: bool) {
        self.state.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Makes render calls fail once `calls` of them have succeeded.
    pub fn fail_render_after(&self, calls: u64) {
        *self.state.fail_render_after.lock() = Some(calls);
    }

    /// Makes capture calls fail once `calls` of them have succeeded.
    pub fn fail_capture_after(&self, calls: u64) {
        *self.state.fail_capture_after.lock() = Some(calls);
    }

    /// Lets render and capture calls succeed again.
    pub fn clear_stream_failures(&self) {
        *self.state.fail_render_after.lock() = None;
        *self.state.fail_capture_after.lock() = None;
    }

    /// Times the subsystem was initialized.
    #[must_use]
    pub fn subsystem_inits(&self) -> u32 {
        self.state.subsystem_inits.load(Ordering::SeqCst)
    }

    /// Times the subsystem was torn down.
    #[must_use]
    pub fn subsystem_releases(&self) -> u32 {
        self.state.subsystem_releases.load(Ordering::SeqCst)
    }

    /// Whether the subsystem is currently up.
    #[must_use]
    pub fn subsystem_active(&self) -> bool {
        self.subsystem_inits() > self.subsystem_releases()
    }

    /// Clients activated and not yet dropped.
    #[must_use]
    pub fn active_clients(&self) -> u32 {
        self.state.active_clients.load(Ordering::SeqCst)
    }

    /// Successful client starts.
    #[must_use]
    pub fn start_calls(&self) -> u32 {
        self.state.start_calls.load(Ordering::SeqCst)
    }

    /// Client stops.
    #[must_use]
    pub fn stop_calls(&self) -> u32 {
        self.state.stop_calls.load(Ordering::SeqCst)
    }

    /// Calls made on render services, including failed ones.
    #[must_use]
    pub fn render_calls(&self) -> u64 {
        self.state.render_calls.load(Ordering::SeqCst)
    }

    /// Calls made on capture services, including failed ones.
    #[must_use]
    pub fn capture_calls(&self) -> u64 {
        self.state.capture_calls.load(Ordering::SeqCst)
    }

    /// Frames handed to the hardware by render services.
    #[must_use]
    pub fn rendered_frames(&self) -> u64 {
        self.state.rendered_frames.load(Ordering::SeqCst)
    }

    /// Takes the bytes rendered so far, clearing the record.
    #[must_use]
    pub fn take_rendered(&self) -> Vec<u8> {
        std::mem::take(&mut *self.state.rendered.lock())
    }

    fn push_endpoint(&self, direction: Direction, name: Option<String>, guid: Option<String>) {
        let mut guard = self.state.config.lock();
        let config = &mut *guard;
        let (list, default) = match direction {
            Direction::Playback => (&mut config.playback, &mut config.default_playback),
            Direction::Capture => (&mut config.capture, &mut config.default_capture),
        };
        let index = list.len();
        list.push(MockEndpoint {
            id: EndpointId::new(format!("mock:{direction}:{index}")),
            name,
            guid,
        });
        if index == 0 {
            *default = Some(0);
        }
    }

    fn find(&self, id: &EndpointId) -> Option<MockEndpoint> {
        let config = self.state.config.lock();
        config
            .playback
            .iter()
            .chain(config.capture.iter())
            .find(|e| e.id == *id)
            .cloned()
    }
}

impl MockState {
    fn render_call(&self) -> Result<(), HostError> {
        let calls = self.render_calls.fetch_add(1, Ordering::SeqCst);
        match *self.fail_render_after.lock() {
            Some(limit) if calls >= limit => Err(HostError::DeviceInvalidated),
            _ => Ok(()),
        }
    }

    fn capture_call(&self) -> Result<(), HostError> {
        let calls = self.capture_calls.fetch_add(1, Ordering::SeqCst);
        match *self.fail_capture_after.lock() {
            Some(limit) if calls >= limit => Err(HostError::DeviceInvalidated),
            _ => Ok(()),
        }
    }
}

impl AudioHost for MockHost {
    fn initialize(&mut self) -> Result<(), HostError> {
        self.state.subsystem_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn uninitialize(&mut self) {
        self.state.subsystem_releases.fetch_add(1, Ordering::SeqCst);
    }

    fn default_endpoint(&mut self, direction: Direction) -> Result<Option<EndpointId>, HostError> {
        let config = self.state.config.lock();
        let (list, default) = match direction {
            Direction::Playback => (&config.playback, config.default_playback),
            Direction::Capture => (&config.capture, config.default_capture),
        };
        Ok(default.and_then(|i| list.get(i)).map(|e| e.id.clone()))
    }

    fn endpoints(&mut self, direction: Direction) -> Result<Vec<EndpointId>, HostError> {
        if self.state.fail_enumeration.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("mock enumeration failure".to_string()));
        }
        let config = self.state.config.lock();
        let list = match direction {
            Direction::Playback => &config.playback,
            Direction::Capture => &config.capture,
        };
        Ok(list.iter().map(|e| e.id.clone()).collect())
    }

    fn friendly_name(&mut self, id: &EndpointId) -> Result<String, HostError> {
        self.find(id)
            .and_then(|e| e.name)
            .ok_or(HostError::PropertyUnavailable {
                property: "friendly name",
            })
    }

    fn endpoint_guid(&mut self, id: &EndpointId) -> Result<String, HostError> {
        self.find(id)
            .and_then(|e| e.guid)
            .ok_or(HostError::PropertyUnavailable { property: "guid" })
    }

    fn activate(
        &mut self,
        id: &EndpointId,
        direction: Direction,
    ) -> Result<Box<dyn AudioClient>, HostError> {
        if self.state.fail_activation.load(Ordering::SeqCst) {
            return Err(HostError::backend("mock activation failure"));
        }
        if self.find(id).is_none() {
            return Err(HostError::DeviceInvalidated);
        }
        self.state.active_clients.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient {
            state: Arc::clone(&self.state),
            direction,
            format: None,
            buffer_frames: 0,
            event: None,
            service_taken: false,
        }))
    }
}

struct MockClient {
    state: Arc<MockState>,
    direction: Direction,
    format: Option<NativeFormat>,
    buffer_frames: u32,
    event: Option<NotifyEvent>,
    service_taken: bool,
}

impl MockClient {
    fn period_frames(&self, rate: u32) -> u32 {
        let period = self.state.config.lock().period;
        let frames = (period.as_nanos() * u128::from(rate)).div_ceil(1_000_000_000);
        u32::try_from(frames).unwrap_or(u32::MAX).max(1)
    }

    fn initialized(&self) -> Result<(NativeFormat, NotifyEvent), HostError> {
        match (&self.format, &self.event) {
            (Some(format), Some(event)) => Ok((*format, event.clone())),
            _ => Err(HostError::NotInitialized),
        }
    }
}

impl Drop for MockClient {
    fn drop(&mut self) {
        self.state.active_clients.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AudioClient for MockClient {
    fn is_format_supported(&self, format: &NativeFormat) -> Result<bool, HostError> {
        let config = self.state.config.lock();
        Ok(config
            .supported
            .as_ref()
            .map_or(true, |formats| formats.contains(format)))
    }

    fn mix_format(&self) -> Result<NativeFormat, HostError> {
        Ok(self.state.config.lock().mix_format)
    }

    fn device_period(&self) -> Result<Duration, HostError> {
        Ok(self.state.config.lock().period)
    }

    fn initialize(
        &mut self,
        format: &NativeFormat,
        buffer_frames: u32,
        event: NotifyEvent,
    ) -> Result<(), HostError> {
        if self.format.is_some() {
            return Err(HostError::backend("client already initialized"));
        }
        if !self.is_format_supported(format)? {
            return Err(HostError::UnsupportedFormat);
        }
        let forced = self.state.config.lock().buffer_frames;
        let min = self.period_frames(format.sample_rate()) * 2;
        self.buffer_frames = forced.unwrap_or_else(|| buffer_frames.max(min));
        self.format = Some(*format);
        self.event = Some(event);
        Ok(())
    }

    fn buffer_size(&self) -> Result<u32, HostError> {
        self.initialized()?;
        Ok(self.buffer_frames)
    }

    fn start(&mut self) -> Result<(), HostError> {
        let (_, event) = self.initialized()?;
        if self.state.fail_start.load(Ordering::SeqCst) {
            return Err(HostError::backend("mock start failure"));
        }
        self.state.start_calls.fetch_add(1, Ordering::SeqCst);
        event.set();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HostError> {
        self.state.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn render_service(&mut self) -> Result<Box<dyn RenderService>, HostError> {
        let (format, event) = self.initialized()?;
        if self.direction != Direction::Playback || self.service_taken {
            return Err(HostError::NotInitialized);
        }
        self.service_taken = true;
        Ok(Box::new(MockRender {
            state: Arc::clone(&self.state),
            event,
            block_align: usize::from(format.block_align()),
            drain: self.period_frames(format.sample_rate()),
            padding: 0,
            scratch: Vec::new(),
        }))
    }

    fn capture_service(&mut self) -> Result<Box<dyn CaptureService>, HostError> {
        let (format, event) = self.initialized()?;
        if self.direction != Direction::Capture || self.service_taken {
            return Err(HostError::NotInitialized);
        }
        self.service_taken = true;
        let source = self.state.config.lock().capture_data.clone();
        Ok(Box::new(MockCapture {
            state: Arc::clone(&self.state),
            event,
            block_align: usize::from(format.block_align()),
            packet_frames: self.period_frames(format.sample_rate()),
            source,
            cursor: 0,
            ready: true,
            scratch: Vec::new(),
        }))
    }
}

/// Drains `drain` frames of padding per query, as if the hardware played
/// one period between calls.
struct MockRender {
    state: Arc<MockState>,
    event: NotifyEvent,
    block_align: usize,
    drain: u32,
    padding: u32,
    scratch: Vec<u8>,
}

impl RenderService for MockRender {
    fn padding(&mut self) -> Result<u32, HostError> {
        self.state.render_call()?;
        thread::sleep(QUERY_DELAY);
        self.padding = self.padding.saturating_sub(self.drain);
        self.event.set();
        Ok(self.padding)
    }

    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8], HostError> {
        self.state.render_call()?;
        self.scratch.clear();
        self.scratch.resize(frames as usize * self.block_align, 0);
        Ok(self.scratch.as_mut_slice())
    }

    fn release_buffer(&mut self, frames: u32) -> Result<(), HostError> {
        self.state.render_call()?;
        self.padding += frames;
        self.state
            .rendered_frames
            .fetch_add(u64::from(frames), Ordering::SeqCst);
        let len = (frames as usize * self.block_align).min(self.scratch.len());
        self.state
            .rendered
            .lock()
            .extend_from_slice(&self.scratch[..len]);
        Ok(())
    }
}

/// Delivers one period-sized packet, then reports nothing until the next
/// query, so the capture thread exercises both its read and wait paths.
struct MockCapture {
    state: Arc<MockState>,
    event: NotifyEvent,
    block_align: usize,
    packet_frames: u32,
    source: Vec<u8>,
    cursor: usize,
    ready: bool,
    scratch: Vec<u8>,
}

impl CaptureService for MockCapture {
    fn next_packet_size(&mut self) -> Result<u32, HostError> {
        self.state.capture_call()?;
        thread::sleep(QUERY_DELAY);
        if self.ready {
            Ok(self.packet_frames)
        } else {
            self.ready = true;
            self.event.set();
            Ok(0)
        }
    }

    fn get_buffer(&mut self) -> Result<(&[u8], u32), HostError> {
        self.state.capture_call()?;
        let len = self.packet_frames as usize * self.block_align;
        self.scratch.clear();
        if self.source.is_empty() {
            self.scratch.resize(len, 0);
        } else {
            while self.scratch.len() < len {
                let take = (len - self.scratch.len()).min(self.source.len() - self.cursor);
                self.scratch
                    .extend_from_slice(&self.source[self.cursor..self.cursor + take]);
                self.cursor = (self.cursor + take) % self.source.len();
            }
        }
        Ok((self.scratch.as_slice(), self.packet_frames))
    }

    fn release_buffer(&mut self, _frames: u32) -> Result<(), HostError> {
        self.state.capture_call()?;
        self.ready = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_i16() -> NativeFormat {
        to_native(&PcmFormat::new(SampleType::I16, ChannelLayout::Stereo, 44100))
    }

    #[test]
    fn test_first_endpoint_is_default() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Playback, "A", "{a}")
            .with_endpoint(Direction::Playback, "B", "{b}");
        let default = host.default_endpoint(Direction::Playback).unwrap().unwrap();
        assert_eq!(host.friendly_name(&default).unwrap(), "A");
        assert!(host.default_endpoint(Direction::Capture).unwrap().is_none());
    }

    #[test]
    fn test_unnamed_endpoint_property_failures() {
        let mut host = MockHost::new().with_unnamed_endpoint(Direction::Capture);
        let ids = host.endpoints(Direction::Capture).unwrap();
        assert!(host.friendly_name(&ids[0]).is_err());
        assert!(host.endpoint_guid(&ids[0]).is_err());
    }

    #[test]
    fn test_supported_formats_restrict_clients() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Playback, "A", "{a}")
            .with_supported_formats(vec![stereo_i16()]);
        let id = host.endpoints(Direction::Playback).unwrap().remove(0);
        let client = host.activate(&id, Direction::Playback).unwrap();

        assert!(client.is_format_supported(&stereo_i16()).unwrap());
        let float = to_native(&PcmFormat::default());
        assert!(!client.is_format_supported(&float).unwrap());
    }

    #[test]
    fn test_client_counts_follow_drops() {
        let mut host = MockHost::new().with_endpoint(Direction::Playback, "A", "{a}");
        let id = host.endpoints(Direction::Playback).unwrap().remove(0);
        let client = host.activate(&id, Direction::Playback).unwrap();
        assert_eq!(host.active_clients(), 1);
        drop(client);
        assert_eq!(host.active_clients(), 0);
    }

    #[test]
    fn test_render_padding_and_failure() {
        let mut host = MockHost::new().with_endpoint(Direction::Playback, "A", "{a}");
        let id = host.endpoints(Direction::Playback).unwrap().remove(0);
        let mut client = host.activate(&id, Direction::Playback).unwrap();
        client
            .initialize(&stereo_i16(), 4410, NotifyEvent::new())
            .unwrap();
        let mut render = client.render_service().unwrap();

        assert_eq!(render.padding().unwrap(), 0);
        render.get_buffer(1000).unwrap().fill(1);
        render.release_buffer(1000).unwrap();
        // 10ms at 44100Hz drains 441 frames per query
        assert_eq!(render.padding().unwrap(), 559);
        assert_eq!(host.rendered_frames(), 1000);
        assert_eq!(host.take_rendered().len(), 4000);

        host.fail_render_after(host.render_calls());
        assert_eq!(render.padding(), Err(HostError::DeviceInvalidated));
    }

    #[test]
    fn test_capture_loops_source_data() {
        let mut host = MockHost::new()
            .with_endpoint(Direction::Capture, "Mic", "{m}")
            .with_period(Duration::from_millis(1))
            .with_capture_data(vec![1, 2, 3, 4]);
        let id = host.endpoints(Direction::Capture).unwrap().remove(0);
        let mut client = host.activate(&id, Direction::Capture).unwrap();
        let format = to_native(&PcmFormat::new(SampleType::I16, ChannelLayout::Mono, 8000));
        client.initialize(&format, 80, NotifyEvent::new()).unwrap();
        let mut capture = client.capture_service().unwrap();

        assert_eq!(capture.next_packet_size().unwrap(), 8);
        let (bytes, frames) = capture.get_buffer().unwrap();
        assert_eq!(frames, 8);
        assert_eq!(&bytes[..6], &[1, 2, 3, 4, 1, 2]);
        capture.release_buffer(frames).unwrap();
        assert_eq!(capture.next_packet_size().unwrap(), 0);
    }

    #[test]
    fn test_client_initializes_once() {
        let mut host = MockHost::new().with_endpoint(Direction::Playback, "A", "{a}");
        let id = host.endpoints(Direction::Playback).unwrap().remove(0);
        let mut client = host.activate(&id, Direction::Playback).unwrap();
        client
            .initialize(&stereo_i16(), 4410, NotifyEvent::new())
            .unwrap();
        assert!(client
            .initialize(&stereo_i16(), 4410, NotifyEvent::new())
            .is_err());
    }
}
