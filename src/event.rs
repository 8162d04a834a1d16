//! Runtime events for monitoring device health.
//!
//! Events are asynchronous notifications raised by the worker and the
//! realtime stream threads. Apart from [`DeviceEvent::Disconnected`] they are
//! informational; a disconnect means the stream thread has exited and the
//! application should run a full `reset`/`start` cycle.

use std::sync::Arc;

use crate::format::PcmFormat;

/// Runtime events emitted by an open device.
///
/// # Example
///
/// ```
/// use stream_device::DeviceEvent;
///
/// fn handle_event(event: DeviceEvent) {
///     match event {
///         DeviceEvent::Disconnected { device, reason } => {
///             eprintln!("{device} disconnected: {reason}");
///         }
///         DeviceEvent::WaitTimedOut { device, consecutive } => {
///             eprintln!("{device}: no hardware notification ({consecutive} in a row)");
///         }
///         DeviceEvent::FormatChanged { device, requested, effective } => {
///             eprintln!("{device}: asked for {requested}, got {effective}");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device failed while streaming and the stream thread has exited.
    Disconnected {
        /// Display name of the device.
        device: String,
        /// The host failure that ended the stream.
        reason: String,
    },

    /// Waiting for the hardware notification event timed out.
    ///
    /// A slow driver is tolerated while the stream keeps making progress.
    /// Once `max_consecutive_timeouts` waits in a row time out with no buffer
    /// serviced in between, the stream is treated as disconnected.
    WaitTimedOut {
        /// Display name of the device.
        device: String,
        /// Number of timeouts in a row, including this one.
        consecutive: u32,
    },

    /// `reset` settled on a different format than the one requested.
    FormatChanged {
        /// Display name of the device.
        device: String,
        /// What the application asked for.
        requested: PcmFormat,
        /// What the endpoint accepted.
        effective: PcmFormat,
    },
}

/// Callback type for receiving runtime events.
///
/// Callbacks run on the worker or a realtime stream thread, so they should
/// return quickly.
pub type EventCallback = Arc<dyn Fn(DeviceEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_device::{event_callback, DeviceEvent};
///
/// let callback = event_callback(|event: DeviceEvent| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(DeviceEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Sends an event to an optional callback.
pub(crate) fn emit(callback: Option<&EventCallback>, event: DeviceEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}
