//! Error types for stream-device.
//!
//! Errors are split into two categories:
//! - **Lifecycle errors** ([`StreamDeviceError`]): returned synchronously from
//!   `open`/`reset`/`start` and enumeration
//! - **Runtime failures**: raised while streaming, surfaced via
//!   [`EventCallback`](crate::EventCallback) as a disconnect

use crate::host::Direction;

/// Failures reported by a host backend.
///
/// These are the "HRESULT" level of the stack: a backend maps whatever its
/// platform returns onto one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The host audio subsystem cannot be reached.
    #[error("audio subsystem unavailable: {0}")]
    Unavailable(String),

    /// The endpoint went away (unplugged, disabled, or reconfigured).
    #[error("device invalidated")]
    DeviceInvalidated,

    /// The client rejected the requested wave format.
    #[error("unsupported format")]
    UnsupportedFormat,

    /// A streaming call was made before the client was initialized.
    #[error("audio client not initialized")]
    NotInitialized,

    /// A property of an endpoint could not be read.
    #[error("property unavailable: {property}")]
    PropertyUnavailable {
        /// Name of the property that failed.
        property: &'static str,
    },

    /// Any other backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

impl HostError {
    /// Creates a backend error from anything displayable.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Fatal errors returned by lifecycle operations.
///
/// A lifecycle call that fails leaves no partially-built session behind:
/// whatever was acquired before the failure is released again.
#[derive(Debug, thiserror::Error)]
pub enum StreamDeviceError {
    /// No endpoint matched the requested name, GUID, or device id.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Selector that matched nothing.
        name: String,
    },

    /// The host has no default endpoint for this direction.
    #[error("no default {direction} device configured")]
    NoDefaultDevice {
        /// Direction that was requested.
        direction: Direction,
    },

    /// The endpoint collection could not be queried.
    #[error("failed to enumerate {direction} devices: {reason}")]
    Enumeration {
        /// Direction that was being enumerated.
        direction: Direction,
        /// Why enumeration failed.
        reason: String,
    },

    /// The endpoint was found but could not be activated.
    #[error("failed to activate '{name}': {source}")]
    Activation {
        /// Display name of the endpoint.
        name: String,
        /// The underlying host failure.
        #[source]
        source: HostError,
    },

    /// No usable format could be agreed with the endpoint.
    #[error("format negotiation failed: {reason}")]
    FormatNegotiation {
        /// Description of the mismatch.
        reason: String,
    },

    /// A `(channels, mask)` pair does not correspond to a known layout.
    #[error("unsupported channel layout: {channels} channels, mask 0x{mask:x}")]
    UnsupportedChannelLayout {
        /// Channel count reported by the host.
        channels: u16,
        /// Speaker position mask reported by the host.
        mask: u32,
    },

    /// The hardware period does not fit twice into the hardware buffer.
    #[error("hardware period of {period} frames does not fit a {buffer} frame buffer")]
    BufferSizing {
        /// Hardware period quantum in frames.
        period: u32,
        /// Hardware buffer size in frames.
        buffer: u32,
    },

    /// The realtime stream thread could not be started.
    #[error("failed to start stream: {reason}")]
    StreamStart {
        /// Why the start failed.
        reason: String,
    },

    /// The operation is not valid in the session's current state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the session was in.
        state: &'static str,
    },

    /// The session handle does not refer to an open session.
    #[error("unknown session")]
    UnknownSession,

    /// The device worker has shut down.
    #[error("device worker is not running")]
    WorkerUnavailable,

    /// The device worker thread could not be spawned.
    #[error("failed to spawn device worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// A host call failed outside of activation.
    #[error("audio host error: {0}")]
    Host(#[from] HostError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_not_found_display() {
        let err = StreamDeviceError::DeviceNotFound {
            name: "USB Speakers".to_string(),
        };
        assert_eq!(err.to_string(), "device not found: USB Speakers");
    }

    #[test]
    fn test_no_default_device_display() {
        let err = StreamDeviceError::NoDefaultDevice {
            direction: Direction::Capture,
        };
        assert_eq!(err.to_string(), "no default capture device configured");
    }

    #[test]
    fn test_activation_keeps_source() {
        use std::error::Error;

        let err = StreamDeviceError::Activation {
            name: "Speakers".to_string(),
            source: HostError::DeviceInvalidated,
        };
        assert!(err.to_string().contains("Speakers"));
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("device invalidated".to_string())
        );
    }

    #[test]
    fn test_host_error_converts() {
        let err: StreamDeviceError = HostError::backend("boom").into();
        assert!(matches!(err, StreamDeviceError::Host(HostError::Backend(_))));
        assert_eq!(err.to_string(), "audio host error: boom");
    }

    #[test]
    fn test_channel_layout_display_is_hex() {
        let err = StreamDeviceError::UnsupportedChannelLayout {
            channels: 3,
            mask: 0x107,
        };
        assert_eq!(
            err.to_string(),
            "unsupported channel layout: 3 channels, mask 0x107"
        );
    }
}
