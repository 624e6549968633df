//! Output sink binding: the buffer-queue audio source the stream controller
//! feeds.
//!
//! The model is a single playback source with a FIFO of queued buffers.
//! Buffers are created once, filled with [`OutputSink::submit_data`],
//! queued, and come back as *processed* once the source has played them;
//! only processed buffers can be unqueued and refilled.
//!
//! Implementations:
//! - [`DeviceSink`]: real audio output through cpal
//! - [`MemorySink`]: in-process source driven by the caller (tests, offline renders)

mod device;
mod memory;

pub use device::DeviceSink;
pub use memory::{MemorySink, Submitted};

use super::MusicError;

/// Handle of one sink-owned output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

/// PCM layout of a submitted buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleLayout {
    Mono16,
    Stereo16,
}

impl SampleLayout {
    pub fn channels(self) -> u16 {
        match self {
            SampleLayout::Mono16 => 1,
            SampleLayout::Stereo16 => 2,
        }
    }
}

/// Playback state of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Device/source/buffer primitives consumed by the stream controller.
pub trait OutputSink {
    /// Allocate `count` empty buffers.
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, MusicError>;

    /// Set the source's linear gain (0.0 - 1.0).
    fn set_gain(&mut self, gain: f32);

    /// Replace a buffer's contents with little-endian 16-bit PCM.
    fn submit_data(&mut self, buffer: BufferId, layout: SampleLayout, data: &[u8], rate: u32);

    /// Append buffers to the source's queue, in order.
    fn queue_buffers(&mut self, buffers: &[BufferId]);

    /// Remove the oldest processed buffer from the queue.
    fn unqueue_buffer(&mut self) -> Option<BufferId>;

    /// Buffers queued and not yet played.
    fn queued_count(&mut self) -> usize;

    /// Buffers played and waiting to be unqueued.
    fn processed_count(&mut self) -> usize;

    fn state(&self) -> SourceState;

    /// Start or resume playback. A source with nothing queued stops at once.
    fn play(&mut self);

    fn pause(&mut self);

    /// Stop playback; every queued buffer becomes processed.
    fn stop(&mut self);
}

/// Convert little-endian 16-bit PCM bytes to `f32` samples.
pub(crate) fn pcm_to_f32(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
}
