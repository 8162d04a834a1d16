//! Playback stream thread: keeps the hardware buffer topped up from the
//! application's mixer.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host::RenderService;
use crate::pipeline::StreamContext;

/// Source of playback audio, implemented by the application.
///
/// Called from the realtime playback thread; it must not block.
///
/// # Example
///
/// ```
/// use stream_device::Mixer;
///
/// struct Silence;
///
/// impl Mixer for Silence {
///     fn mix(&mut self, buffer: &mut [u8], _frames: u32) {
///         buffer.fill(0);
///     }
/// }
/// ```
pub trait Mixer: Send {
    /// Fills `buffer` with `frames` interleaved frames in the device's
    /// effective format.
    fn mix(&mut self, buffer: &mut [u8], frames: u32);
}

impl<F> Mixer for F
where
    F: FnMut(&mut [u8], u32) + Send,
{
    fn mix(&mut self, buffer: &mut [u8], frames: u32) {
        self(buffer, frames);
    }
}

/// A mixer shared between a playback device and its stream thread.
pub type SharedMixer = Arc<Mutex<dyn Mixer>>;

pub(crate) struct PlaybackStream {
    pub ctx: StreamContext,
    pub service: Box<dyn RenderService>,
    pub mixer: SharedMixer,
    pub buffer_size: u32,
    pub update_size: u32,
}

impl PlaybackStream {
    /// Runs until stopped or the hardware fails, then hands the render
    /// service back for the next start.
    pub fn run(self) -> Box<dyn RenderService> {
        let Self {
            ctx,
            mut service,
            mixer,
            buffer_size,
            update_size,
        } = self;
        let update_size = update_size.max(1);
        let mut timeouts = 0;

        tracing::debug!(device = %ctx.device, buffer_size, update_size, "Playback thread started");

        while !ctx.should_stop() {
            let padding = match service.padding() {
                Ok(padding) => padding,
                Err(e) => {
                    ctx.disconnect(&e);
                    break;
                }
            };
            ctx.shared.padding.store(padding, Ordering::Release);

            let free = buffer_size.saturating_sub(padding);
            if free < update_size {
                if !ctx.wait(&mut timeouts) {
                    break;
                }
                continue;
            }

            let frames = free - free % update_size;
            let buffer = match service.get_buffer(frames) {
                Ok(buffer) => buffer,
                Err(e) => {
                    ctx.disconnect(&e);
                    break;
                }
            };
            mixer.lock().mix(buffer, frames);
            ctx.shared
                .padding
                .store(padding + frames, Ordering::Release);
            ctx.shared
                .frames_done
                .fetch_add(u64::from(frames), Ordering::Relaxed);

            if let Err(e) = service.release_buffer(frames) {
                ctx.disconnect(&e);
                break;
            }
            timeouts = 0;
        }

        ctx.shared.padding.store(0, Ordering::Release);
        tracing::debug!(device = %ctx.device, "Playback thread exiting");
        service
    }
}
