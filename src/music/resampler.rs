//! Sample rate conversion using rubato.
//!
//! Songs arrive at whatever rate they were encoded at (22.05kHz, 44.1kHz,
//! 48kHz...) while the output device runs at one fixed rate.

use rubato::{FftFixedIn, Resampler as RubatoResampler, ResamplerConstructionError};

/// Frames fed to rubato per call.
const CHUNK_FRAMES: usize = 1024;

/// Streaming resampler for interleaved `f32` audio.
pub struct Resampler {
    resampler: Option<FftFixedIn<f32>>,
    input_rate: u32,
    channels: usize,
    /// Per-channel input not yet resampled
    input_buffer: Vec<Vec<f32>>,
}

impl Resampler {
    /// Create a resampler. Matching rates give a passthrough.
    pub fn new(
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<Self, ResamplerConstructionError> {
        let channels = channels.max(1) as usize;

        let resampler = if input_rate == output_rate {
            None
        } else {
            tracing::info!(
                "Resampler: {}Hz → {}Hz ({} channels)",
                input_rate,
                output_rate,
                channels
            );
            Some(FftFixedIn::<f32>::new(
                input_rate as usize,
                output_rate as usize,
                CHUNK_FRAMES,
                2,
                channels,
            )?)
        };

        Ok(Self {
            resampler,
            input_rate,
            channels,
            input_buffer: vec![Vec::new(); channels],
        })
    }

    /// Whether this resampler converts between `input_rate` and the output
    /// rate for `channels` channels.
    pub fn matches(&self, input_rate: u32, channels: u16) -> bool {
        self.input_rate == input_rate && self.channels == channels.max(1) as usize
    }

    /// Resample interleaved input. Output lags input by up to one chunk;
    /// the remainder is carried into the next call.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return input.to_vec();
        };

        for (i, sample) in input.iter().enumerate() {
            self.input_buffer[i % self.channels].push(*sample);
        }

        let mut output = Vec::new();
        while self.input_buffer[0].len() >= CHUNK_FRAMES {
            let chunks: Vec<Vec<f32>> = self
                .input_buffer
                .iter_mut()
                .map(|ch| ch.drain(..CHUNK_FRAMES).collect())
                .collect();

            match resampler.process(&chunks, None) {
                Ok(resampled) => interleave(&resampled, &mut output),
                Err(e) => tracing::warn!("Resampling error: {}", e),
            }
        }
        output
    }

    /// Drop buffered input and filter state.
    pub fn reset(&mut self) {
        for ch in &mut self.input_buffer {
            ch.clear();
        }
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }
}

fn interleave(planes: &[Vec<f32>], output: &mut Vec<f32>) {
    let Some(first) = planes.first() else {
        return;
    };
    for frame in 0..first.len() {
        for plane in planes {
            output.push(plane[frame]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_when_rates_match() {
        let mut resampler = Resampler::new(48000, 48000, 2).unwrap();
        let input = vec![0.1, 0.2, 0.3, 0.4];
        assert_eq!(resampler.process(&input), input);
    }

    #[test]
    fn test_matches_input_format() {
        let resampler = Resampler::new(22050, 44100, 1).unwrap();
        assert!(resampler.matches(22050, 1));
        assert!(!resampler.matches(44100, 1));
        assert!(!resampler.matches(22050, 2));
    }

    #[test]
    fn test_output_after_full_chunk() {
        let mut resampler = Resampler::new(22050, 44100, 1).unwrap();
        // Less than one chunk is held back
        assert!(resampler.process(&[0.0; 512]).is_empty());
        let out = resampler.process(&[0.0; 1536]);
        assert!(!out.is_empty());
    }
}
