//! Application handle for an opened endpoint.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::builder::DeviceBuilder;
use crate::config::{DeviceParams, EffectiveParams};
use crate::host::Direction;
use crate::pipeline::StreamShared;
use crate::worker::{Opened, SessionId};
use crate::{AudioRuntime, StreamDeviceError};

/// Stream clock and output latency at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockLatency {
    /// Audio handed to (playback) or captured from (capture) the hardware
    /// since the last reset.
    pub clock_time: Duration,
    /// Playback: audio queued in the hardware buffer. Capture: audio
    /// waiting in the capture ring.
    pub latency: Duration,
}

/// An opened playback or capture endpoint.
///
/// Lifecycle calls (`reset`, `start`, `stop`, `close`) are forwarded to the
/// device worker and block until it answers. Reading captured audio and
/// querying the clock go straight to shared state and never block on the
/// worker.
///
/// Dropping the device closes it.
pub struct Device {
    runtime: AudioRuntime,
    session: SessionId,
    direction: Direction,
    name: String,
    shared: Arc<StreamShared>,
    params: Option<EffectiveParams>,
    closed: bool,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("params", &self.params)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Creates a builder for opening a device on `runtime`.
    pub fn builder(runtime: &AudioRuntime) -> DeviceBuilder {
        DeviceBuilder::new(runtime)
    }

    pub(crate) fn new(runtime: AudioRuntime, direction: Direction, opened: Opened) -> Self {
        Self {
            runtime,
            session: opened.session,
            direction,
            name: opened.name,
            shared: opened.shared,
            params: None,
            closed: false,
        }
    }

    /// Display name of the endpoint, unique among its direction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is a playback or capture device.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Parameters from the last successful reset.
    #[must_use]
    pub fn params(&self) -> Option<&EffectiveParams> {
        self.params.as_ref()
    }

    /// Negotiates a format and sizes the hardware buffer.
    ///
    /// Playback may settle on a different format than requested; capture
    /// always delivers the requested one.
    ///
    /// # Errors
    ///
    /// Returns [`StreamDeviceError::InvalidState`] while running or after
    /// close, or a negotiation/sizing error from the worker.
    pub fn reset(&mut self, params: &DeviceParams) -> Result<EffectiveParams, StreamDeviceError> {
        self.ensure_open("reset")?;
        let effective = self.runtime.reset(self.session, *params)?;
        self.params = Some(effective);
        Ok(effective)
    }

    /// Starts streaming.
    ///
    /// # Errors
    ///
    /// Returns [`StreamDeviceError::InvalidState`] before the first reset
    /// or after close, or [`StreamDeviceError::StreamStart`] if the stream
    /// thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), StreamDeviceError> {
        self.ensure_open("start")?;
        self.runtime.start(self.session)
    }

    /// Stops streaming. Safe to call at any time, any number of times.
    pub fn stop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.runtime.stop(self.session) {
            tracing::debug!(device = %self.name, error = %e, "Stop not delivered");
        }
    }

    /// Stops streaming and releases the endpoint. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.runtime.close(self.session) {
            tracing::debug!(device = %self.name, error = %e, "Close not delivered");
        }
    }

    /// Whether the stream is still healthy.
    ///
    /// Cleared when the stream thread hits a hardware failure; set again by
    /// the next reset or start.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.closed && self.shared.connected.load(Ordering::Acquire)
    }

    /// Captured frames ready to read. Always 0 for playback devices.
    #[must_use]
    pub fn available_samples(&self) -> usize {
        self.shared
            .consumer
            .lock()
            .as_ref()
            .map_or(0, |consumer| consumer.read_space())
    }

    /// Reads up to `frames` captured frames into `buffer`.
    ///
    /// Returns the number of frames read, which is less than `frames` when
    /// fewer are available or `buffer` is too small. Never blocks on the
    /// capture thread.
    pub fn capture_samples(&self, buffer: &mut [u8], frames: usize) -> usize {
        self.shared
            .consumer
            .lock()
            .as_mut()
            .map_or(0, |consumer| consumer.read(buffer, frames))
    }

    /// Current stream clock and latency.
    #[must_use]
    pub fn clock_latency(&self) -> ClockLatency {
        let Some(format) = *self.shared.format.lock() else {
            return ClockLatency::default();
        };
        let rate = f64::from(format.sample_rate.max(1));

        let frames_done = self.shared.frames_done.load(Ordering::Relaxed);
        let queued = match self.direction {
            Direction::Playback => u64::from(self.shared.padding.load(Ordering::Acquire)),
            Direction::Capture => self.available_samples() as u64,
        };

        ClockLatency {
            clock_time: Duration::from_secs_f64(frames_done as f64 / rate),
            latency: Duration::from_secs_f64(queued as f64 / rate),
        }
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), StreamDeviceError> {
        if self.closed {
            return Err(StreamDeviceError::InvalidState {
                operation,
                state: "closed",
            });
        }
        Ok(())
    }
}

impl Drop for Device {
    /// Queues the close without waiting for it, unlike [`close`](Self::close).
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.runtime.close_detached(self.session) {
            tracing::debug!(device = %self.name, error = %e, "Close not delivered");
        }
    }
}
