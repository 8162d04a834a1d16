//! Realtime streaming pipeline.
//!
//! Each running session owns exactly one stream thread:
//!
//! ```text
//! Playback: Mixer → PlaybackStream → RenderService (hardware)
//! Capture:  CaptureService (hardware) → converters → RingBuffer → application
//! ```
//!
//! Stream threads never touch lifecycle objects. They share only a
//! [`StreamShared`] block with the rest of the crate: padding and frame
//! counters, the connected flag, and the capture ring's reading half.

mod capture;
mod playback;
pub mod ring_buffer;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub(crate) use capture::{CaptureParts, CaptureStream};
pub use playback::{Mixer, SharedMixer};
pub(crate) use playback::PlaybackStream;
pub use ring_buffer::{ring_buffer, RingConsumer, RingProducer, WriteVector};

use crate::event::{emit, DeviceEvent, EventCallback};
use crate::format::PcmFormat;
use crate::host::NotifyEvent;
use crate::HostError;

/// State a session shares between the worker, its stream thread, and the
/// application's device handle.
pub(crate) struct StreamShared {
    /// Last padding published by the playback thread; 0 when not streaming.
    pub padding: AtomicU32,
    /// Frames handed to the mixer or written to the capture ring.
    pub frames_done: AtomicU64,
    /// Cleared when the stream thread hits a hardware failure.
    pub connected: AtomicBool,
    /// Format the application sees, once reset.
    pub format: Mutex<Option<PcmFormat>>,
    /// Reading half of the capture ring, once reset.
    pub consumer: Mutex<Option<RingConsumer>>,
}

impl StreamShared {
    pub fn new() -> Self {
        Self {
            padding: AtomicU32::new(0),
            frames_done: AtomicU64::new(0),
            connected: AtomicBool::new(true),
            format: Mutex::new(None),
            consumer: Mutex::new(None),
        }
    }
}

/// Everything a stream thread needs besides its hardware service.
pub(crate) struct StreamContext {
    pub device: String,
    pub event: NotifyEvent,
    pub kill: Arc<AtomicBool>,
    pub shared: Arc<StreamShared>,
    pub callback: Option<EventCallback>,
    pub notify_timeout: Duration,
    pub max_consecutive_timeouts: u32,
}

impl StreamContext {
    pub fn should_stop(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    /// Waits for the hardware notification.
    ///
    /// Returns `false` once enough consecutive timeouts have piled up that
    /// the stream must be treated as disconnected.
    pub fn wait(&self, consecutive: &mut u32) -> bool {
        if self.event.wait_timeout(self.notify_timeout) {
            *consecutive = 0;
            return true;
        }
        if self.should_stop() {
            return true;
        }

        *consecutive += 1;
        tracing::warn!(
            device = %self.device,
            consecutive = *consecutive,
            "Timed out waiting for hardware notification"
        );
        emit(
            self.callback.as_ref(),
            DeviceEvent::WaitTimedOut {
                device: self.device.clone(),
                consecutive: *consecutive,
            },
        );

        if self.max_consecutive_timeouts > 0 && *consecutive >= self.max_consecutive_timeouts {
            self.disconnect(&HostError::backend(format!(
                "no hardware notification after {consecutive} waits"
            )));
            return false;
        }
        true
    }

    /// Marks the session disconnected and tells the application.
    pub fn disconnect(&self, err: &HostError) {
        tracing::error!(device = %self.device, error = %err, "Stream failed, device disconnected");
        self.shared.connected.store(false, Ordering::Release);
        emit(
            self.callback.as_ref(),
            DeviceEvent::Disconnected {
                device: self.device.clone(),
                reason: err.to_string(),
            },
        );
    }
}
