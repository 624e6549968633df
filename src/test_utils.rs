//! Test utilities and fixtures for bgm-stream tests.
//!
//! Stream tests use a synthetic "raw PCM" codec instead of real MP3/OGG
//! files (the codec modules build their own silent fixtures). Its files are:
//!
//! ```text
//! [channels: u8][sample rate: u32 LE][interleaved i16 LE samples...]
//! ```
//!
//! # Example
//!
//! ```ignore
//! let dir = tempfile::tempdir().unwrap();
//! let song = write_raw_song(dir.path(), "a.ogg", 2, 44100, &ramp(0, 1000));
//! let codecs = CodecSet::empty().with(RawPcmCodec::new("ogg"));
//! ```

use std::path::{Path, PathBuf};

use crate::music::MusicError;
use crate::music::decoder::{Codec, Decode, StreamSpec};
use crate::music::playlist::PLAYLIST_FILE;

/// Codec for raw PCM fixtures, registered under any extension.
pub struct RawPcmCodec {
    extension: &'static str,
    max_read: Option<usize>,
}

impl RawPcmCodec {
    pub fn new(extension: &'static str) -> Self {
        Self {
            extension,
            max_read: None,
        }
    }

    /// A codec whose reads return at most `max_read` bytes (rounded down to
    /// whole frames, but never less than one frame).
    pub fn with_max_read(extension: &'static str, max_read: usize) -> Self {
        Self {
            extension,
            max_read: Some(max_read),
        }
    }
}

impl Codec for RawPcmCodec {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn extension(&self) -> &'static str {
        self.extension
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Decode>, MusicError> {
        let bytes = std::fs::read(path).map_err(|source| MusicError::CannotOpenFile {
            path: path.to_path_buf(),
            source,
        })?;
        if bytes.len() < 5 {
            return Err(MusicError::Decoder {
                recoverable: false,
                message: format!("{}: truncated header", path.display()),
            });
        }

        let channels = bytes[0] as u16;
        if !(1..=2).contains(&channels) {
            return Err(MusicError::UnsupportedChannelMode {
                path: path.to_path_buf(),
                channels: channels as usize,
            });
        }
        let sample_rate = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let spec = StreamSpec {
            channels,
            sample_rate,
        };

        let frame = spec.frame_bytes();
        let max_read = self.max_read.map(|n| (n / frame * frame).max(frame));

        Ok(Box::new(RawPcmDecoder {
            pcm: bytes[5..].to_vec(),
            pos: 0,
            spec,
            max_read,
        }))
    }
}

struct RawPcmDecoder {
    pcm: Vec<u8>,
    pos: usize,
    spec: StreamSpec,
    max_read: Option<usize>,
}

impl Decode for RawPcmDecoder {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn read_samples(&mut self, out: &mut [u8]) -> usize {
        let frame = self.spec.frame_bytes();
        let mut n = (out.len() / frame * frame).min(self.pcm.len() - self.pos);
        if let Some(max) = self.max_read {
            n = n.min(max);
        }
        out[..n].copy_from_slice(&self.pcm[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

/// Write a raw PCM fixture and return its path.
pub fn write_raw_song(
    dir: &Path,
    name: &str,
    channels: u8,
    sample_rate: u32,
    samples: &[i16],
) -> PathBuf {
    let mut bytes = Vec::with_capacity(5 + samples.len() * 2);
    bytes.push(channels);
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }

    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("Failed to write song fixture");
    path
}

/// Write a playlist descriptor into `dir`.
pub fn write_playlist(dir: &Path, contents: &str) -> PathBuf {
    let path = dir.join(PLAYLIST_FILE);
    std::fs::write(&path, contents).expect("Failed to write playlist");
    path
}

/// `len` consecutive sample values starting at `start`, wrapping at the
/// i16 range. Makes sample positions easy to recognise in assertions.
pub fn ramp(start: i16, len: usize) -> Vec<i16> {
    (0..len).map(|i| start.wrapping_add(i as i16)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_codec_reads_whole_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw_song(dir.path(), "x.ogg", 2, 8000, &[1, 2, 3, 4, 5, 6]);

        let mut decoder = RawPcmCodec::new("ogg").open(&path).unwrap();
        assert_eq!(decoder.spec(), StreamSpec { channels: 2, sample_rate: 8000 });

        let mut out = [0u8; 7];
        assert_eq!(decoder.read_samples(&mut out), 4);
        assert_eq!(&out[..4], &[1, 0, 2, 0]);
        assert_eq!(decoder.read_samples(&mut out), 4);
        assert_eq!(decoder.read_samples(&mut out), 4);
        assert_eq!(decoder.read_samples(&mut out), 0);
    }

    #[test]
    fn test_raw_codec_rejects_surround() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_raw_song(dir.path(), "x.ogg", 6, 48000, &[0; 12]);
        let result = RawPcmCodec::new("ogg").open(&path);
        assert!(matches!(
            result,
            Err(MusicError::UnsupportedChannelMode { channels: 6, .. })
        ));
    }

    #[test]
    fn test_ramp_wraps() {
        assert_eq!(ramp(i16::MAX, 2), vec![i16::MAX, i16::MIN]);
    }
}
