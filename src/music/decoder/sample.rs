//! PCM sample conversion and the per-frame playback cursor.
//!
//! Every codec family hands its decoded frames to a [`PcmFrame`], which
//! stores them as interleaved signed 16-bit samples and tracks how much of
//! the frame has already been copied out to the stream controller.

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::sample::i24;

/// Fractional bits of the MAD fixed-point sample type.
pub const MAD_F_FRACBITS: u32 = 28;

/// 1.0 in MAD fixed-point.
pub const MAD_F_ONE: i64 = 1 << MAD_F_FRACBITS;

/// Round, clip and quantize a fixed-point sample to 16 bits.
///
/// `frac_bits` is the number of fractional bits in `sample` and must be in
/// `16..=62`. The representable range is `[-1.0, 1.0)`: values at or above
/// 1.0 saturate to `i16::MAX`, values below -1.0 saturate to `i16::MIN`.
#[inline]
pub fn scale_fixed(sample: i64, frac_bits: u32) -> i16 {
    debug_assert!((16..=62).contains(&frac_bits));
    let one = 1i64 << frac_bits;

    // round
    let mut sample = sample.saturating_add(1i64 << (frac_bits - 16));

    // clip
    if sample >= one {
        sample = one - 1;
    } else if sample < -one {
        sample = -one;
    }

    // quantize
    (sample >> (frac_bits + 1 - 16)) as i16
}

/// Float counterpart of [`scale_fixed`]: round to nearest, clip to
/// `[-1.0, 1.0)`, scale by 32768.
#[inline]
pub fn scale_float(sample: f32) -> i16 {
    let scaled = (sample as f64 * 32768.0 + 0.5).floor();
    // NaN casts to 0
    scaled.clamp(-32768.0, 32767.0) as i16
}

/// Interleave a decoded symphonia buffer into 16-bit samples.
///
/// Integer planes go through the fixed-point transform with their native
/// fractional width; float planes through the float transform. Formats with
/// no direct mapping are converted to `f32` first.
pub fn interleave_into(decoded: &AudioBufferRef, out: &mut Vec<i16>) {
    out.clear();
    match decoded {
        AudioBufferRef::F32(buf) => {
            interleave(buf.planes().planes(), out, |s| scale_float(s))
        }
        AudioBufferRef::F64(buf) => {
            interleave(buf.planes().planes(), out, |s| scale_float(s as f32))
        }
        AudioBufferRef::S16(buf) => interleave(buf.planes().planes(), out, |s| s),
        AudioBufferRef::S24(buf) => interleave(buf.planes().planes(), out, |s: i24| {
            scale_fixed(s.inner() as i64, 23)
        }),
        AudioBufferRef::S32(buf) => {
            interleave(buf.planes().planes(), out, |s| scale_fixed(s as i64, 31))
        }
        other => {
            let mut converted = other.make_equivalent::<f32>();
            other.convert(&mut converted);
            interleave(converted.planes().planes(), out, scale_float);
        }
    }
}

fn interleave<T: Copy>(planes: &[&[T]], out: &mut Vec<i16>, convert: impl Fn(T) -> i16) {
    let Some(first) = planes.first() else {
        return;
    };
    let frames = first.len();
    out.reserve(frames * planes.len());
    for frame in 0..frames {
        for plane in planes {
            out.push(convert(plane[frame]));
        }
    }
}

/// One synthesized frame of interleaved PCM plus the read position in it.
#[derive(Debug, Clone)]
pub struct PcmFrame {
    samples: Vec<i16>,
    pos: usize,
    channels: usize,
}

impl PcmFrame {
    /// Create an empty frame for `channels` interleaved channels.
    pub fn new(channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            pos: 0,
            channels: channels.max(1) as usize,
        }
    }

    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels * 2
    }

    /// Whether every sample of the frame has been copied out.
    pub fn is_drained(&self) -> bool {
        self.pos >= self.samples.len()
    }

    /// Samples not yet copied out.
    pub fn remaining(&self) -> usize {
        self.samples.len().saturating_sub(self.pos)
    }

    /// Replace the frame contents with a freshly decoded buffer and rewind.
    pub fn load(&mut self, decoded: &AudioBufferRef) {
        interleave_into(decoded, &mut self.samples);
        self.pos = 0;
    }

    /// Replace the frame contents with already-interleaved samples and rewind.
    pub fn load_samples(&mut self, samples: &[i16]) {
        self.samples.clear();
        self.samples.extend_from_slice(samples);
        self.pos = 0;
    }

    /// Copy whole sample frames out as little-endian bytes.
    ///
    /// Never writes more than `out.len()` bytes and never splits a sample
    /// frame across calls.
    pub fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let frames = (out.len() / self.frame_bytes()).min(self.remaining() / self.channels);
        let count = frames * self.channels;

        for (chunk, sample) in out
            .chunks_exact_mut(2)
            .zip(&self.samples[self.pos..self.pos + count])
        {
            chunk.copy_from_slice(&sample.to_le_bytes());
        }

        self.pos += count;
        count * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_mad_one_maps_to_max() {
        assert_eq!(scale_fixed(MAD_F_ONE, MAD_F_FRACBITS), 32767);
        assert_eq!(scale_fixed(MAD_F_ONE * 4, MAD_F_FRACBITS), 32767);
    }

    #[test]
    fn test_mad_negative_one_maps_to_min() {
        assert_eq!(scale_fixed(-MAD_F_ONE, MAD_F_FRACBITS), -32768);
        assert_eq!(scale_fixed(-MAD_F_ONE * 3, MAD_F_FRACBITS), -32768);
    }

    #[test]
    fn test_mad_rounding() {
        // One output step is 1 << 13 in MAD fixed-point
        let step = 1i64 << (MAD_F_FRACBITS + 1 - 16);
        assert_eq!(scale_fixed(0, MAD_F_FRACBITS), 0);
        assert_eq!(scale_fixed(step, MAD_F_FRACBITS), 1);
        assert_eq!(scale_fixed(step / 2, MAD_F_FRACBITS), 1);
        assert_eq!(scale_fixed(step / 2 - 1, MAD_F_FRACBITS), 0);
        assert_eq!(scale_fixed(-step, MAD_F_FRACBITS), -1);
    }

    #[test]
    fn test_full_scale_i32() {
        assert_eq!(scale_fixed(i32::MAX as i64, 31), 32767);
        assert_eq!(scale_fixed(i32::MIN as i64, 31), -32768);
    }

    #[test]
    fn test_float_boundaries() {
        assert_eq!(scale_float(1.0), 32767);
        assert_eq!(scale_float(-1.0), -32768);
        assert_eq!(scale_float(0.0), 0);
        assert_eq!(scale_float(2.5), 32767);
        assert_eq!(scale_float(f32::NAN), 0);
    }

    #[test]
    fn test_drain_never_splits_a_frame() {
        let mut frame = PcmFrame::new(2);
        frame.load_samples(&[1, 2, 3, 4, 5, 6]);

        let mut out = [0u8; 6];
        assert_eq!(frame.drain_into(&mut out), 4);
        assert_eq!(&out[..4], &[1, 0, 2, 0]);
        assert_eq!(frame.remaining(), 4);

        let mut out = [0u8; 2];
        assert_eq!(frame.drain_into(&mut out), 0);

        let mut out = [0u8; 64];
        assert_eq!(frame.drain_into(&mut out), 8);
        assert!(frame.is_drained());
    }

    proptest! {
        #[test]
        fn prop_fixed_matches_float(sample in -(2 * MAD_F_ONE)..(2 * MAD_F_ONE)) {
            let as_float = sample as f64 / MAD_F_ONE as f64;
            let expected = (as_float * 32768.0 + 0.5).floor().clamp(-32768.0, 32767.0) as i16;
            prop_assert_eq!(scale_fixed(sample, MAD_F_FRACBITS), expected);
        }

        #[test]
        fn prop_drain_respects_capacity(len in 0usize..512, cap in 0usize..300, channels in 1u16..=2) {
            let mut frame = PcmFrame::new(channels);
            frame.load_samples(&vec![7i16; len - len % channels as usize]);
            let mut out = vec![0u8; cap];
            let written = frame.drain_into(&mut out);
            prop_assert!(written <= cap);
            prop_assert_eq!(written % (2 * channels as usize), 0);
        }
    }
}
