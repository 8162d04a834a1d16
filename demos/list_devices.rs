//! Lists playback and capture endpoints.
//!
//! Run with: cargo run --example list_devices

use stream_device::{AudioRuntime, Direction};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let runtime = AudioRuntime::global()?;

    for direction in [Direction::Playback, Direction::Capture] {
        let directory = runtime.enumerate(direction)?;
        println!("\n{direction} devices:");
        println!("------------------------");
        if directory.is_empty() {
            println!("  (none)");
        }
        for (i, endpoint) in directory.endpoints().iter().enumerate() {
            let marker = if i == 0 && directory.default_endpoint().is_some() {
                " [default]"
            } else {
                ""
            };
            println!("  {}. {}{}", i + 1, endpoint.name, marker);
        }
    }

    Ok(())
}
