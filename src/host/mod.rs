//! Host audio subsystem abstraction.
//!
//! The device worker talks to the operating system only through these
//! traits. Lifecycle objects ([`AudioHost`], [`AudioClient`]) never leave the
//! worker thread; the streaming halves ([`RenderService`], [`CaptureService`])
//! are `Send` so the realtime threads can own them while a stream runs.
//!
//! Two backends ship with the crate:
//! - [`MockHost`](mock::MockHost): scriptable in-memory host for tests
//! - [`CpalHost`](cpal_host::CpalHost): real endpoints through CPAL
//!   (`cpal-host` feature)

#[cfg(feature = "cpal-host")]
pub mod cpal_host;
pub mod mock;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::format::native::NativeFormat;
use crate::HostError;

/// Whether an endpoint renders or captures audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Output endpoint.
    Playback,
    /// Input endpoint.
    Capture,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Playback => f.write_str("playback"),
            Self::Capture => f.write_str("capture"),
        }
    }
}

/// Opaque host identifier of an endpoint.
///
/// Stable for as long as the endpoint exists; its string form is what device
/// selection matches against as a last resort.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointId(String);

impl EndpointId {
    /// Wraps a host-specific identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The host audio subsystem: process-wide setup plus endpoint discovery.
///
/// Lives on the device worker thread for its whole life, so implementations
/// need not be `Send`.
pub trait AudioHost {
    /// Brings the subsystem up. Called on the first session open.
    fn initialize(&mut self) -> Result<(), HostError>;

    /// Tears the subsystem down. Called when the last session closes.
    fn uninitialize(&mut self);

    /// The system default endpoint, if one is configured.
    fn default_endpoint(&mut self, direction: Direction) -> Result<Option<EndpointId>, HostError>;

    /// All active endpoints for a direction.
    fn endpoints(&mut self, direction: Direction) -> Result<Vec<EndpointId>, HostError>;

    /// Human-readable name of an endpoint.
    fn friendly_name(&mut self, id: &EndpointId) -> Result<String, HostError>;

    /// Globally unique identifier of an endpoint.
    fn endpoint_guid(&mut self, id: &EndpointId) -> Result<String, HostError>;

    /// Creates a fresh, uninitialized client for an endpoint.
    fn activate(
        &mut self,
        id: &EndpointId,
        direction: Direction,
    ) -> Result<Box<dyn AudioClient>, HostError>;
}

/// A shared-mode stream client bound to one endpoint.
///
/// A client is initialized at most once; reconfiguring means activating a
/// new one.
pub trait AudioClient {
    /// Whether the endpoint accepts `format` in shared mode.
    fn is_format_supported(&self, format: &NativeFormat) -> Result<bool, HostError>;

    /// The format the endpoint's mixer runs at.
    fn mix_format(&self) -> Result<NativeFormat, HostError>;

    /// The hardware processing period.
    fn device_period(&self) -> Result<Duration, HostError>;

    /// Initializes the client for event-driven streaming.
    ///
    /// `buffer_frames` is a request; the host may round it.
    /// `event` is signalled whenever the hardware wants attention.
    fn initialize(
        &mut self,
        format: &NativeFormat,
        buffer_frames: u32,
        event: NotifyEvent,
    ) -> Result<(), HostError>;

    /// Actual hardware buffer size in frames.
    fn buffer_size(&self) -> Result<u32, HostError>;

    /// Starts the hardware stream.
    fn start(&mut self) -> Result<(), HostError>;

    /// Stops the hardware stream.
    fn stop(&mut self) -> Result<(), HostError>;

    /// Takes the render half of an initialized playback client.
    fn render_service(&mut self) -> Result<Box<dyn RenderService>, HostError>;

    /// Takes the capture half of an initialized capture client.
    fn capture_service(&mut self) -> Result<Box<dyn CaptureService>, HostError>;
}

/// Render half of a playback client, driven from the playback thread.
pub trait RenderService: Send {
    /// Frames queued in the hardware buffer and not yet played.
    fn padding(&mut self) -> Result<u32, HostError>;

    /// Borrows `frames` frames of hardware buffer for writing.
    fn get_buffer(&mut self, frames: u32) -> Result<&mut [u8], HostError>;

    /// Hands `frames` written frames to the hardware.
    fn release_buffer(&mut self, frames: u32) -> Result<(), HostError>;
}

/// Capture half of a capture client, driven from the capture thread.
pub trait CaptureService: Send {
    /// Frames in the next captured packet, zero if none is ready.
    fn next_packet_size(&mut self) -> Result<u32, HostError>;

    /// Borrows the next captured packet as `(bytes, frames)`.
    fn get_buffer(&mut self) -> Result<(&[u8], u32), HostError>;

    /// Returns a packet obtained from [`get_buffer`](Self::get_buffer).
    fn release_buffer(&mut self, frames: u32) -> Result<(), HostError>;
}

/// Auto-reset event the hardware signals when a buffer needs service.
///
/// A successful wait consumes the signal.
#[derive(Clone, Default)]
pub struct NotifyEvent {
    inner: Arc<EventInner>,
}

#[derive(Default)]
struct EventInner {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl NotifyEvent {
    /// Creates an unsignalled event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the event, waking one waiter.
    pub fn set(&self) {
        *self.inner.signaled.lock() = true;
        self.inner.cond.notify_one();
    }

    /// Clears a pending signal.
    pub fn reset(&self) {
        *self.inner.signaled.lock() = false;
    }

    /// Waits for the event. Returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.inner.signaled.lock();
        self.inner
            .cond
            .wait_while_for(&mut signaled, |signaled| !*signaled, timeout);
        std::mem::replace(&mut *signaled, false)
    }
}

impl fmt::Debug for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyEvent")
            .field("signaled", &*self.inner.signaled.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Playback.to_string(), "playback");
        assert_eq!(Direction::Capture.to_string(), "capture");
    }

    #[test]
    fn test_event_times_out_when_unsignalled() {
        let event = NotifyEvent::new();
        let start = Instant::now();
        assert!(!event.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_event_auto_resets() {
        let event = NotifyEvent::new();
        event.set();
        assert!(event.wait_timeout(Duration::from_millis(10)));
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_event_reset_clears_signal() {
        let event = NotifyEvent::new();
        event.set();
        event.reset();
        assert!(!event.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_event_wakes_waiter() {
        let event = NotifyEvent::new();
        let signaller = event.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.set();
        });
        assert!(event.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
