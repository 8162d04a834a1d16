//! # stream-device
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Shared-mode audio endpoint engine: enumerate playback and capture
//! endpoints, negotiate a stream format, and run realtime playback and
//! capture streams.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_device::{AudioRuntime, Device, DeviceParams, PcmFormat, SampleType, ChannelLayout};
//!
//! # #[cfg(feature = "cpal-host")]
//! # {
//! let runtime = AudioRuntime::global()?;
//!
//! let mut device = Device::builder(&runtime)
//!     .on_event(|e| tracing::warn!(?e, "device event"))
//!     .open_playback(|buffer: &mut [u8], _frames: u32| buffer.fill(0))?;
//!
//! let format = PcmFormat::new(SampleType::F32, ChannelLayout::Stereo, 48000);
//! let params = device.reset(&DeviceParams::new(format))?;
//! println!("playing {} in updates of {} frames", params.format, params.update_size);
//!
//! device.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! device.stop();
//! # }
//! # Ok::<(), stream_device::StreamDeviceError>(())
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Device worker**: one thread owns the host and every session; all
//!   lifecycle calls (open, reset, start, stop, close) are queued to it
//! - **Stream threads**: one per running session, woken by the hardware
//!   notification; they never touch lifecycle state
//! - **Capture ring**: lock-free SPSC buffer between the capture thread and
//!   the application
//!
//! A hardware failure while streaming never panics or blocks the
//! application: the stream thread exits and reports
//! [`DeviceEvent::Disconnected`].

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod config;
mod device;
pub mod directory;
mod error;
mod event;
pub mod format;
pub mod host;
pub mod pipeline;
mod worker;

pub use builder::DeviceBuilder;
pub use config::{DeviceParams, EffectiveParams, RuntimeConfig};
pub use device::{ClockLatency, Device};
pub use directory::{DeviceDirectory, Endpoint};
pub use error::{HostError, StreamDeviceError};
pub use event::{event_callback, DeviceEvent, EventCallback};
pub use format::{ChannelLayout, PcmFormat, SampleType};
pub use host::Direction;
pub use pipeline::{Mixer, SharedMixer};
pub use worker::AudioRuntime;

/// Lists playback endpoint names, system default first.
///
/// Uses the [global runtime](AudioRuntime::global).
#[cfg(feature = "cpal-host")]
pub fn list_output_devices() -> Result<Vec<String>, StreamDeviceError> {
    let directory = AudioRuntime::global()?.enumerate(Direction::Playback)?;
    Ok(directory.names().map(str::to_string).collect())
}

/// Lists capture endpoint names, system default first.
///
/// Uses the [global runtime](AudioRuntime::global).
#[cfg(feature = "cpal-host")]
pub fn list_input_devices() -> Result<Vec<String>, StreamDeviceError> {
    let directory = AudioRuntime::global()?.enumerate(Direction::Capture)?;
    Ok(directory.names().map(str::to_string).collect())
}
