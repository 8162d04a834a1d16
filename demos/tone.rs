//! Plays a 440Hz sine tone on the default output for two seconds.
//!
//! Run with: cargo run --example tone [device name]

use std::f32::consts::TAU;
use std::time::Duration;

use stream_device::{
    AudioRuntime, ChannelLayout, Device, DeviceParams, PcmFormat, SampleType,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = AudioRuntime::global()?;
    let requested = PcmFormat::new(SampleType::F32, ChannelLayout::Stereo, 48000);

    let mut builder = Device::builder(&runtime)
        .params(DeviceParams::new(requested))
        .on_event(|e| tracing::warn!(?e, "device event"));
    if let Some(name) = std::env::args().nth(1) {
        builder = builder.device(name);
    }

    // The mixer writes f32 only
    let mut phase = 0.0f32;
    let step = TAU * 440.0 / requested.sample_rate as f32;
    let channels = requested.channels() as usize;
    let mut device = builder.open_playback(move |buffer: &mut [u8], _frames: u32| {
        for frame in buffer.chunks_exact_mut(4 * channels) {
            let value = (phase.sin() * 0.2).to_ne_bytes();
            for sample in frame.chunks_exact_mut(4) {
                sample.copy_from_slice(&value);
            }
            phase = (phase + step) % TAU;
        }
    })?;

    let params = *device.params().ok_or("device not configured")?;
    if params.format != requested {
        return Err(format!("device settled on {}, wanted {requested}", params.format).into());
    }

    println!(
        "Playing on {} ({}, {} frames per update)",
        device.name(),
        params.format,
        params.update_size
    );
    device.start()?;
    std::thread::sleep(Duration::from_secs(2));

    let clock = device.clock_latency();
    println!("Played {:?}, latency {:?}", clock.clock_time, clock.latency);
    device.close();

    Ok(())
}
