//! Configuration types for the runtime and for opened devices.

use std::time::Duration;

use crate::format::PcmFormat;

/// Configuration for the device worker and its realtime threads.
///
/// Use [`RuntimeConfig::default()`] for sensible defaults, or customize with
/// the `with_*` setters.
///
/// # Example
///
/// ```
/// use stream_device::RuntimeConfig;
/// use std::time::Duration;
///
/// let config = RuntimeConfig::default()
///     .with_notify_timeout(Duration::from_millis(500))
///     .with_max_consecutive_timeouts(0);
/// assert_eq!(config.max_consecutive_timeouts, 0);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// How long a stream thread waits for a hardware notification before
    /// checking again.
    ///
    /// Also bounds how long `stop` can take.
    /// Default: 2 seconds
    pub notify_timeout: Duration,

    /// Consecutive notification timeouts after which the stream is treated
    /// as disconnected.
    ///
    /// 0 disables escalation; timeouts are then only reported as
    /// [`DeviceEvent::WaitTimedOut`].
    /// Default: 5
    ///
    /// [`DeviceEvent::WaitTimedOut`]: crate::DeviceEvent::WaitTimedOut
    pub max_consecutive_timeouts: u32,

    /// Name given to the device worker thread.
    ///
    /// Default: `"stream-device-worker"`
    pub worker_thread_name: String,

    /// Minimum amount of audio the capture ring buffer holds.
    ///
    /// The ring is never smaller than the hardware buffer, whatever this is
    /// set to.
    /// Default: 100ms
    pub capture_ring_duration: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            notify_timeout: Duration::from_secs(2),
            max_consecutive_timeouts: 5,
            worker_thread_name: "stream-device-worker".to_string(),
            capture_ring_duration: Duration::from_millis(100),
        }
    }
}

impl RuntimeConfig {
    /// Sets the notification wait timeout.
    #[must_use]
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Sets the timeout escalation threshold (0 = never).
    #[must_use]
    pub fn with_max_consecutive_timeouts(mut self, count: u32) -> Self {
        self.max_consecutive_timeouts = count;
        self
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn with_worker_thread_name(mut self, name: impl Into<String>) -> Self {
        self.worker_thread_name = name.into();
        self
    }

    /// Sets the minimum capture ring duration.
    #[must_use]
    pub fn with_capture_ring_duration(mut self, duration: Duration) -> Self {
        self.capture_ring_duration = duration;
        self
    }
}

/// What the application asks for when configuring a device.
///
/// `update_size` is in frames at `format.sample_rate`; the hardware buffer
/// is requested as `update_size * num_updates` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceParams {
    /// Desired stream format.
    ///
    /// Default: f32 stereo 44100Hz
    pub format: PcmFormat,

    /// Frames per update period.
    ///
    /// Default: 1024
    pub update_size: u32,

    /// Update periods per hardware buffer.
    ///
    /// Default: 3
    pub num_updates: u32,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            format: PcmFormat::default(),
            update_size: 1024,
            num_updates: 3,
        }
    }
}

impl DeviceParams {
    /// Params for `format` with default buffer sizing.
    #[must_use]
    pub fn new(format: PcmFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    /// Total requested buffer in frames.
    #[must_use]
    pub fn buffer_frames(&self) -> u32 {
        self.update_size.max(1).saturating_mul(self.num_updates.max(1))
    }
}

/// What a device actually settled on after `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveParams {
    /// Format the application reads or writes.
    pub format: PcmFormat,
    /// Frames per update period.
    pub update_size: u32,
    /// Hardware buffer size in frames.
    pub buffer_size: u32,
    /// Whole update periods per hardware buffer.
    pub num_updates: u32,
}
