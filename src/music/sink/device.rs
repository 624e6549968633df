//! Audio device sink using cpal.
//!
//! The game thread converts each submitted buffer to the device's channel
//! count and sample rate up front, so the real-time callback only copies
//! samples and applies gain. Queued buffers travel to the callback over a
//! channel; the callback reports each fully played buffer back over a
//! second channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;

use super::{BufferId, OutputSink, SampleLayout, SourceState, pcm_to_f32};
use crate::music::MusicError;
use crate::music::resampler::Resampler;

/// State shared with the audio callback.
#[derive(Debug)]
struct SourceShared {
    state: SourceState,
    gain: f32,
    /// Bumped on every stop; chunks from older generations are dropped
    generation: u64,
}

/// A queued buffer on its way to the callback.
struct DeviceChunk {
    id: BufferId,
    generation: u64,
    samples: Arc<[f32]>,
}

/// Output sink playing through a cpal device.
pub struct DeviceSink {
    _stream: Stream,
    shared: Arc<RwLock<SourceShared>>,
    chunk_tx: Sender<DeviceChunk>,
    /// Game-side handle on the chunk queue, used to flush it on stop
    chunk_rx: Receiver<DeviceChunk>,
    done_rx: Receiver<(u64, BufferId)>,
    buffers: HashMap<BufferId, Arc<[f32]>>,
    in_flight: VecDeque<BufferId>,
    processed: VecDeque<BufferId>,
    next_id: u32,
    generation: u64,
    device_rate: u32,
    device_channels: u16,
    resampler: Option<Resampler>,
}

impl DeviceSink {
    /// Open the named output device, or the default one when `device_name`
    /// is empty or not found.
    pub fn open(device_name: &str) -> Result<Self, MusicError> {
        let host = cpal::default_host();
        let device = select_device(&host, device_name)?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::info!("Using audio device: {}", name);

        let supported = device
            .default_output_config()
            .map_err(|e| MusicError::CannotOpenDevice(e.to_string()))?;

        let device_rate = supported.sample_rate().0;
        let device_channels = supported.channels();
        tracing::info!("Audio format: {}Hz, {} channels", device_rate, device_channels);

        let config = StreamConfig {
            channels: device_channels,
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::new(RwLock::new(SourceShared {
            state: SourceState::Initial,
            gain: 1.0,
            generation: 0,
        }));
        let (chunk_tx, chunk_rx) = unbounded::<DeviceChunk>();
        let (done_tx, done_rx) = unbounded();

        let callback = Callback {
            shared: Arc::clone(&shared),
            chunk_rx: chunk_rx.clone(),
            done_tx,
            current: None,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, callback),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, callback),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, callback),
            format => {
                return Err(MusicError::CannotOpenDevice(format!(
                    "Unsupported sample format: {:?}",
                    format
                )));
            }
        }
        .map_err(|e| MusicError::CannotOpenDevice(e.to_string()))?;

        stream
            .play()
            .map_err(|e| MusicError::CannotOpenDevice(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            shared,
            chunk_tx,
            chunk_rx,
            done_rx,
            buffers: HashMap::new(),
            in_flight: VecDeque::new(),
            processed: VecDeque::new(),
            next_id: 0,
            generation: 0,
            device_rate,
            device_channels,
            resampler: None,
        })
    }

    /// Collect buffers the callback has finished with.
    fn collect_done(&mut self) {
        while let Ok((generation, id)) = self.done_rx.try_recv() {
            if generation != self.generation {
                continue;
            }
            if let Some(pos) = self.in_flight.iter().position(|b| *b == id) {
                self.in_flight.remove(pos);
                self.processed.push_back(id);
            }
        }
    }

    /// Map interleaved source samples onto the device's channel layout.
    fn remix(&self, samples: impl Iterator<Item = f32>, channels: u16) -> Vec<f32> {
        let samples: Vec<f32> = samples.collect();
        let out_channels = self.device_channels as usize;
        let in_channels = channels as usize;
        let frames = samples.len() / in_channels;

        let mut output = Vec::with_capacity(frames * out_channels);
        for frame in samples.chunks_exact(in_channels) {
            match (in_channels, out_channels) {
                (1, n) => output.extend(std::iter::repeat_n(frame[0], n)),
                (_, 1) => output.push((frame[0] + frame[1]) * 0.5),
                (_, n) => {
                    output.push(frame[0]);
                    output.push(frame[1]);
                    output.extend(std::iter::repeat_n(0.0, n - 2));
                }
            }
        }
        output
    }

    fn resample(&mut self, samples: Vec<f32>, rate: u32) -> Vec<f32> {
        if rate == self.device_rate {
            return samples;
        }

        let reuse = self
            .resampler
            .as_ref()
            .is_some_and(|r| r.matches(rate, self.device_channels));
        if !reuse {
            match Resampler::new(rate, self.device_rate, self.device_channels) {
                Ok(r) => self.resampler = Some(r),
                Err(e) => {
                    tracing::warn!("Cannot resample {}Hz: {}", rate, e);
                    self.resampler = None;
                    return samples;
                }
            }
        }

        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&samples),
            None => samples,
        }
    }
}

impl OutputSink for DeviceSink {
    fn create_buffers(&mut self, count: usize) -> Result<Vec<BufferId>, MusicError> {
        let ids: Vec<BufferId> = (self.next_id..self.next_id + count as u32)
            .map(BufferId)
            .collect();
        self.next_id += count as u32;
        for id in &ids {
            self.buffers.insert(*id, Arc::from(Vec::new()));
        }
        Ok(ids)
    }

    fn set_gain(&mut self, gain: f32) {
        self.shared.write().gain = gain.clamp(0.0, 1.0);
    }

    fn submit_data(&mut self, buffer: BufferId, layout: SampleLayout, data: &[u8], rate: u32) {
        if !self.buffers.contains_key(&buffer) {
            tracing::warn!("submit to unknown buffer {:?}", buffer);
            return;
        }
        let remixed = self.remix(pcm_to_f32(data), layout.channels());
        let samples = self.resample(remixed, rate);
        self.buffers.insert(buffer, Arc::from(samples));
    }

    fn queue_buffers(&mut self, buffers: &[BufferId]) {
        for id in buffers {
            let Some(samples) = self.buffers.get(id) else {
                tracing::warn!("queue of unknown buffer {:?}", id);
                continue;
            };
            let chunk = DeviceChunk {
                id: *id,
                generation: self.generation,
                samples: Arc::clone(samples),
            };
            if self.chunk_tx.send(chunk).is_ok() {
                self.in_flight.push_back(*id);
            }
        }
    }

    fn unqueue_buffer(&mut self) -> Option<BufferId> {
        self.collect_done();
        self.processed.pop_front()
    }

    fn queued_count(&mut self) -> usize {
        self.collect_done();
        self.in_flight.len()
    }

    fn processed_count(&mut self) -> usize {
        self.collect_done();
        self.processed.len()
    }

    fn state(&self) -> SourceState {
        self.shared.read().state
    }

    fn play(&mut self) {
        self.collect_done();
        let mut shared = self.shared.write();
        shared.state = if self.in_flight.is_empty() {
            SourceState::Stopped
        } else {
            SourceState::Playing
        };
    }

    fn pause(&mut self) {
        let mut shared = self.shared.write();
        if shared.state == SourceState::Playing {
            shared.state = SourceState::Paused;
        }
    }

    fn stop(&mut self) {
        self.generation += 1;
        {
            let mut shared = self.shared.write();
            shared.state = SourceState::Stopped;
            shared.generation = self.generation;
        }
        while self.chunk_rx.try_recv().is_ok() {}
        while self.done_rx.try_recv().is_ok() {}
        self.processed.extend(self.in_flight.drain(..));
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }
}

/// Pick the configured device by name, falling back to the default.
fn select_device(host: &cpal::Host, name: &str) -> Result<Device, MusicError> {
    if !name.is_empty() {
        let devices = host
            .output_devices()
            .map_err(|e| MusicError::CannotOpenDevice(e.to_string()))?;
        for device in devices {
            if device.name().is_ok_and(|n| n == name) {
                return Ok(device);
            }
        }
        tracing::warn!("Audio device {:?} not found, using default", name);
    }

    host.default_output_device()
        .ok_or_else(|| MusicError::CannotOpenDevice("No output device found".to_string()))
}

/// Real-time side of the sink.
struct Callback {
    shared: Arc<RwLock<SourceShared>>,
    chunk_rx: Receiver<DeviceChunk>,
    done_tx: Sender<(u64, BufferId)>,
    current: Option<(DeviceChunk, usize)>,
}

impl Callback {
    fn render<T>(&mut self, data: &mut [T])
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let (state, gain, generation) = {
            let shared = self.shared.read();
            (shared.state, shared.gain, shared.generation)
        };

        if self
            .current
            .as_ref()
            .is_some_and(|(chunk, _)| chunk.generation != generation)
        {
            self.current = None;
        }

        if state != SourceState::Playing {
            silence(data);
            return;
        }

        let mut pos = 0;
        while pos < data.len() {
            if self.current.is_none() {
                self.current = self.next_chunk(generation);
            }

            let Some((chunk, offset)) = self.current.as_mut() else {
                // Ran dry: the source stops until the game thread restarts it
                let mut shared = self.shared.write();
                if shared.generation == generation && shared.state == SourceState::Playing {
                    shared.state = SourceState::Stopped;
                }
                silence(&mut data[pos..]);
                return;
            };

            let count = (chunk.samples.len() - *offset).min(data.len() - pos);
            for (out, sample) in data[pos..pos + count]
                .iter_mut()
                .zip(&chunk.samples[*offset..*offset + count])
            {
                *out = T::from_sample(sample * gain);
            }
            *offset += count;
            pos += count;

            if *offset >= chunk.samples.len() {
                let _ = self.done_tx.send((chunk.generation, chunk.id));
                self.current = None;
            }
        }
    }

    fn next_chunk(&mut self, generation: u64) -> Option<(DeviceChunk, usize)> {
        while let Ok(chunk) = self.chunk_rx.try_recv() {
            if chunk.generation != generation {
                continue;
            }
            if chunk.samples.is_empty() {
                let _ = self.done_tx.send((chunk.generation, chunk.id));
                continue;
            }
            return Some((chunk, 0));
        }
        None
    }
}

fn silence<T: cpal::SizedSample + cpal::FromSample<f32>>(data: &mut [T]) {
    for sample in data.iter_mut() {
        *sample = T::from_sample(0.0f32);
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut callback: Callback,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| callback.render(data),
        |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )
}
