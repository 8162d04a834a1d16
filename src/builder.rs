//! Builder for opening a [`Device`].

use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::Device;
use crate::pipeline::{Mixer, SharedMixer};
use crate::worker::OpenKind;
use crate::{
    event_callback, AudioRuntime, DeviceEvent, DeviceParams, EventCallback, PcmFormat,
    StreamDeviceError,
};

/// Specifies which endpoint to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) enum DeviceSelection {
    /// The system default endpoint for the direction.
    #[default]
    SystemDefault,
    /// An endpoint by display name, GUID, or device id.
    ByName(String),
}

impl DeviceSelection {
    fn into_selector(self) -> Option<String> {
        match self {
            Self::SystemDefault => None,
            Self::ByName(name) => Some(name),
        }
    }
}

/// Builder for opening playback and capture devices.
///
/// Use [`Device::builder()`] to create one.
///
/// # Example
///
/// ```
/// use stream_device::host::mock::MockHost;
/// use stream_device::host::Direction;
/// use stream_device::{AudioRuntime, Device, RuntimeConfig};
///
/// let host = MockHost::new().with_endpoint(Direction::Capture, "Microphone", "{mic}");
/// let runtime = AudioRuntime::spawn(RuntimeConfig::default(), move || host)?;
///
/// let device = Device::builder(&runtime)
///     .device("Microphone")
///     .on_event(|e| tracing::warn!(?e, "device event"))
///     .open_capture()?;
/// assert_eq!(device.name(), "Microphone");
/// # Ok::<(), stream_device::StreamDeviceError>(())
/// ```
///
/// [`Device::builder()`]: crate::Device::builder
#[must_use]
pub struct DeviceBuilder {
    runtime: AudioRuntime,
    device: DeviceSelection,
    /// Explicit params; capture falls back to the defaults.
    params: Option<DeviceParams>,
    event_callback: Option<EventCallback>,
}

impl DeviceBuilder {
    pub(crate) fn new(runtime: &AudioRuntime) -> Self {
        Self {
            runtime: runtime.clone(),
            device: DeviceSelection::default(),
            params: None,
            event_callback: None,
        }
    }

    /// Open a specific endpoint by display name, GUID, or device id.
    ///
    /// An empty name selects the system default.
    pub fn device(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.device = if name.is_empty() {
            DeviceSelection::SystemDefault
        } else {
            DeviceSelection::ByName(name)
        };
        self
    }

    /// Open the system default endpoint. This is the default.
    pub fn default_device(mut self) -> Self {
        self.device = DeviceSelection::SystemDefault;
        self
    }

    /// Set the stream parameters applied when the device is opened.
    pub fn params(mut self, params: DeviceParams) -> Self {
        self.params = Some(params);
        self
    }

    /// Set only the stream format, keeping default buffer sizing.
    pub fn format(mut self, format: PcmFormat) -> Self {
        let mut params = self.params.unwrap_or_default();
        params.format = format;
        self.params = Some(params);
        self
    }

    /// Set a callback to receive runtime events.
    ///
    /// Events include disconnects, notification timeouts, and format changes.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(callback));
        self
    }

    /// Open a playback device fed by `mixer`.
    ///
    /// If params were set the device is also reset with them; otherwise it
    /// stays unconfigured until [`Device::reset`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint matches, or there is no default endpoint
    /// - The endpoint cannot be activated
    /// - Explicit params were set and the reset fails
    pub fn open_playback<M: Mixer + 'static>(self, mixer: M) -> Result<Device, StreamDeviceError> {
        self.open_playback_shared(Arc::new(Mutex::new(mixer)))
    }

    /// Like [`open_playback`](Self::open_playback), keeping a handle on the
    /// mixer for the application.
    pub fn open_playback_shared(self, mixer: SharedMixer) -> Result<Device, StreamDeviceError> {
        let params = self.params;
        let mut device = self.open(OpenKind::Playback(mixer))?;
        if let Some(params) = params {
            device.reset(&params)?;
        }
        Ok(device)
    }

    /// Open a capture device and configure it.
    ///
    /// Capture always delivers the requested format, converting from
    /// whatever the hardware settles on.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No endpoint matches, or there is no default endpoint
    /// - The endpoint cannot be activated
    /// - The hardware format cannot be converted to the requested one
    pub fn open_capture(self) -> Result<Device, StreamDeviceError> {
        let params = self.params.unwrap_or_default();
        let mut device = self.open(OpenKind::Capture)?;
        device.reset(&params)?;
        Ok(device)
    }

    fn open(self, kind: OpenKind) -> Result<Device, StreamDeviceError> {
        let direction = kind.direction();
        let opened = self.runtime.open(
            kind,
            self.device.into_selector(),
            self.event_callback,
        )?;
        Ok(Device::new(self.runtime, direction, opened))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleType};
    use crate::host::mock::MockHost;
    use crate::RuntimeConfig;

    fn runtime() -> AudioRuntime {
        AudioRuntime::spawn(RuntimeConfig::default(), MockHost::new).unwrap()
    }

    #[test]
    fn test_builder_default() {
        let builder = Device::builder(&runtime());
        assert_eq!(builder.device, DeviceSelection::SystemDefault);
        assert!(builder.params.is_none());
        assert!(builder.event_callback.is_none());
    }

    #[test]
    fn test_builder_device_selection() {
        let runtime = runtime();
        let builder = Device::builder(&runtime).device("Speakers");
        assert_eq!(builder.device, DeviceSelection::ByName("Speakers".to_string()));

        let builder = builder.device("");
        assert_eq!(builder.device, DeviceSelection::SystemDefault);

        let builder = Device::builder(&runtime).device("Mic").default_device();
        assert_eq!(builder.device.into_selector(), None);
    }

    #[test]
    fn test_builder_format_keeps_sizing() {
        let format = PcmFormat::new(SampleType::I16, ChannelLayout::Mono, 16000);
        let builder = Device::builder(&runtime())
            .params(DeviceParams {
                update_size: 256,
                ..DeviceParams::default()
            })
            .format(format);

        let params = builder.params.unwrap();
        assert_eq!(params.format, format);
        assert_eq!(params.update_size, 256);
    }
}
