//! Captures from the default input for three seconds and reports levels.
//!
//! Run with: cargo run --example record [device name]

use std::time::Duration;

use stream_device::{AudioRuntime, ChannelLayout, Device, PcmFormat, SampleType};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = AudioRuntime::global()?;
    // 16kHz mono, converted from whatever the hardware runs at
    let format = PcmFormat::new(SampleType::I16, ChannelLayout::Mono, 16000);

    let mut builder = Device::builder(&runtime)
        .format(format)
        .on_event(|e| tracing::warn!(?e, "device event"));
    if let Some(name) = std::env::args().nth(1) {
        builder = builder.device(name);
    }
    let mut device = builder.open_capture()?;

    println!("Recording from {} as {format}", device.name());
    device.start()?;

    let mut buffer = vec![0u8; 1600 * format.frame_size()];
    let mut total = 0usize;
    for _ in 0..30 {
        std::thread::sleep(Duration::from_millis(100));
        let frames = device.capture_samples(&mut buffer, 1600);
        total += frames;

        let peak = buffer[..frames * 2]
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]).unsigned_abs())
            .max()
            .unwrap_or(0);
        println!("{frames:5} frames, peak {peak:5}");
    }

    device.close();
    println!("Captured {total} frames");

    Ok(())
}
