//! In-process sink whose "playback" is driven explicitly by the caller.

use std::collections::VecDeque;

use super::{BufferId, OutputSink, SampleLayout, SourceState};
use crate::music::MusicError;

/// Contents of one submitted buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub layout: SampleLayout,
    pub rate: u32,
    pub data: Vec<u8>,
}

/// Sink that records everything and plays buffers only when told to.
///
/// [`consume`](MemorySink::consume) stands in for the passage of time: it
/// marks queued buffers as played, and running the queue dry while playing
/// stops the source the same way a real device underruns.
#[derive(Debug)]
pub struct MemorySink {
    buffers: Vec<Option<Submitted>>,
    queued: VecDeque<BufferId>,
    processed: VecDeque<BufferId>,
    state: SourceState,
    gain: f32,
    available: bool,
    play_calls: usize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            buffers: Vec::new(),
            queued: VecDeque::new(),
            processed: VecDeque::new(),
            state: SourceState::Initial,
            gain: 1.0,
            available: true,
            play_calls: 0,
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose buffer allocation always fails.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// How many times playback was (re)started.
    pub fn play_calls(&self) -> usize {
        self.play_calls
    }

    /// Last data submitted to `buffer`.
    pub fn buffer(&self, buffer: BufferId) -> Option<&Submitted> {
        self.buffers.get(buffer.0 as usize)?.as_ref()
    }

    /// Queued buffers, oldest first.
    pub fn queued(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.queued.iter().copied()
    }

    /// Play the `count` oldest queued buffers, returning their contents.
    pub fn consume(&mut self, count: usize) -> Vec<Submitted> {
        if self.state != SourceState::Playing {
            return Vec::new();
        }

        let mut played = Vec::new();
        for _ in 0..count {
            let Some(id) = self.queued.pop_front() else {
                break;
            };
            if let Some(data) = self.buffer(id) {
                played.push(data.clone());
            }
            self.processed.push_back(id);
        }

        if self.queued.is_empty() {
            self.state = SourceState::Stopped;
        }
        played
    }
}

impl OutputSink for MemorySink {
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, MusicError> {
        if !self.available {
            return Err(MusicError::CannotOpenDevice("memory sink disabled".to_string()));
        }
        let first = self.buffers.len() as u32;
        self.buffers.extend(std::iter::repeat_n(None, count));
        Ok((first..first + count as u32).map(BufferId).collect())
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    fn submit_data(&mut self, buffer: BufferId, layout: SampleLayout, data: &[u8], rate: u32) {
        match self.buffers.get_mut(buffer.0 as usize) {
            Some(slot) => {
                *slot = Some(Submitted {
                    layout,
                    rate,
                    data: data.to_vec(),
                })
            }
            None => tracing::warn!("submit to unknown buffer {:?}", buffer),
        }
    }

    fn queue_buffers(&mut self, buffers: &[BufferId]) {
        self.queued.extend(buffers.iter().copied());
    }

    fn unqueue_buffer(&mut self) -> Option<BufferId> {
        self.processed.pop_front()
    }

    fn queued_count(&mut self) -> usize {
        self.queued.len()
    }

    fn processed_count(&mut self) -> usize {
        self.processed.len()
    }

    fn state(&self) -> SourceState {
        self.state
    }

    fn play(&mut self) {
        self.play_calls += 1;
        self.state = if self.queued.is_empty() {
            SourceState::Stopped
        } else {
            SourceState::Playing
        };
    }

    fn pause(&mut self) {
        if self.state == SourceState::Playing {
            self.state = SourceState::Paused;
        }
    }

    fn stop(&mut self) {
        self.processed.extend(self.queued.drain(..));
        self.state = SourceState::Stopped;
    }
}
