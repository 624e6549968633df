//! Song decoders producing fixed-size chunks of interleaved 16-bit PCM.
//!
//! A [`Codec`] knows how to open one family of files (selected by filename
//! extension) and returns a boxed [`Decode`] session. Which families exist
//! is a build-time choice:
//! - MP3 (feature `mp3`)
//! - OGG Vorbis (feature `ogg`)
//!
//! [`CodecSet`] does the runtime dispatch over whatever was compiled in, and
//! [`DecoderSession`] owns the single live decoder of the stream controller.

#[cfg(feature = "mp3")]
pub mod mp3;
#[cfg(feature = "ogg")]
pub mod ogg;
pub mod sample;
pub mod staging;

use std::fmt;
use std::path::{Path, PathBuf};

use super::MusicError;
use super::sink::SampleLayout;
use super::stream::StreamConfig;

/// Channel count and rate negotiated when a song is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub channels: u16,
    pub sample_rate: u32,
}

impl StreamSpec {
    /// Output layout for the sink. Only mono and stereo are ever opened.
    pub fn layout(&self) -> SampleLayout {
        if self.channels == 1 {
            SampleLayout::Mono16
        } else {
            SampleLayout::Stereo16
        }
    }

    /// Bytes per interleaved sample frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * 2
    }
}

impl fmt::Display for StreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz / {}ch", self.sample_rate, self.channels)
    }
}

/// An open song producing PCM on demand.
pub trait Decode {
    /// Format of the samples produced by the most recent read.
    fn spec(&self) -> StreamSpec;

    /// Write up to `out.len()` bytes of interleaved little-endian i16 PCM.
    ///
    /// Returns 0 only at end-of-stream or after an unrecoverable decode
    /// error. A short non-zero read may happen at a format change; the
    /// next read continues in the new format.
    fn read_samples(&mut self, out: &mut [u8]) -> usize;
}

/// One compiled-in codec family.
pub trait Codec {
    /// Short name for logs ("mp3", "ogg").
    fn name(&self) -> &'static str;

    /// Filename extension handled by this codec, without the dot.
    fn extension(&self) -> &'static str;

    /// Open `path` and decode enough to know its channel count and rate.
    fn open(&self, path: &Path) -> Result<Box<dyn Decode>, MusicError>;
}

/// The active set of codec families.
pub struct CodecSet {
    codecs: Vec<Box<dyn Codec>>,
}

impl CodecSet {
    /// A set with no codecs; every open fails with `UnsupportedFormat`.
    pub fn empty() -> Self {
        Self { codecs: Vec::new() }
    }

    /// Every codec family enabled at build time.
    #[cfg_attr(not(feature = "mp3"), allow(unused_variables))]
    pub fn compiled(config: &StreamConfig) -> Self {
        #[allow(unused_mut)]
        let mut set = Self::empty();
        #[cfg(feature = "mp3")]
        {
            set = set.with(mp3::Mp3Codec::new(config.mp3_staging_size));
        }
        #[cfg(feature = "ogg")]
        {
            set = set.with(ogg::OggCodec);
        }
        set
    }

    /// Add a codec. Earlier codecs win when two claim the same extension.
    pub fn with(mut self, codec: impl Codec + 'static) -> Self {
        self.codecs.push(Box::new(codec));
        self
    }

    /// The codec handling `path`, matched case-insensitively on extension.
    pub fn find(&self, path: &Path) -> Option<&dyn Codec> {
        let ext = path.extension()?.to_str()?;
        self.codecs
            .iter()
            .find(|c| c.extension().eq_ignore_ascii_case(ext))
            .map(|c| c.as_ref())
    }

    /// Open `path` with the matching codec.
    pub fn open(&self, path: &Path) -> Result<Box<dyn Decode>, MusicError> {
        let codec = self
            .find(path)
            .ok_or_else(|| MusicError::UnsupportedFormat(path.to_path_buf()))?;
        tracing::debug!("Opening {} with {} decoder", path.display(), codec.name());
        codec.open(path)
    }
}

impl fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.codecs.iter().map(|c| c.name()))
            .finish()
    }
}

/// The currently open song, if any.
///
/// Either fully open (file and decoder state constructed) or closed; a
/// failed open leaves it closed.
#[derive(Default)]
pub struct DecoderSession {
    decoder: Option<Box<dyn Decode>>,
    path: Option<PathBuf>,
}

impl DecoderSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close any open song, then open `path`.
    pub fn open(&mut self, codecs: &CodecSet, path: &Path) -> Result<StreamSpec, MusicError> {
        self.close();
        let decoder = codecs.open(path)?;
        let spec = decoder.spec();
        self.decoder = Some(decoder);
        self.path = Some(path.to_path_buf());
        Ok(spec)
    }

    /// Release the decoder and its file. No-op when nothing is open.
    pub fn close(&mut self) {
        self.decoder = None;
        self.path = None;
    }

    pub fn is_open(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn spec(&self) -> Option<StreamSpec> {
        self.decoder.as_ref().map(|d| d.spec())
    }

    /// Read PCM from the open song; 0 when closed or at end-of-stream.
    pub fn read_samples(&mut self, out: &mut [u8]) -> usize {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.read_samples(out).min(out.len()),
            None => 0,
        }
    }
}

impl fmt::Debug for DecoderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderSession")
            .field("path", &self.path)
            .field("spec", &self.spec())
            .finish()
    }
}
