//! OGG Vorbis decoding through symphonia's container reader and codec.

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::sample::PcmFrame;
use super::{Codec, Decode, StreamSpec};
use crate::music::MusicError;

/// OGG Vorbis codec family.
#[derive(Debug, Clone, Copy, Default)]
pub struct OggCodec;

impl Codec for OggCodec {
    fn name(&self) -> &'static str {
        "ogg"
    }

    fn extension(&self) -> &'static str {
        "ogg"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Decode>, MusicError> {
        Ok(Box::new(OggDecoder::open(path)?))
    }
}

/// An open OGG song.
pub struct OggDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    frame: PcmFrame,
    /// Format of the samples most recently handed out
    spec: StreamSpec,
    /// Format of the samples in `frame`
    frame_spec: StreamSpec,
    finished: bool,
}

impl OggDecoder {
    pub fn open(path: &Path) -> Result<Self, MusicError> {
        let file = File::open(path).map_err(|source| MusicError::CannotOpenFile {
            path: path.to_path_buf(),
            source,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        hint.with_extension("ogg");

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| fatal(path, e))?;

        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| MusicError::Decoder {
                recoverable: false,
                message: format!("{}: no audio stream", path.display()),
            })?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(0);
        if !(1..=2).contains(&channels) {
            return Err(MusicError::UnsupportedChannelMode {
                path: path.to_path_buf(),
                channels,
            });
        }

        let sample_rate = codec_params.sample_rate.ok_or_else(|| MusicError::Decoder {
            recoverable: false,
            message: format!("{}: unknown sample rate", path.display()),
        })?;

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| fatal(path, e))?;

        let spec = StreamSpec {
            channels: channels as u16,
            sample_rate,
        };

        let mut ogg = Self {
            reader,
            decoder,
            track_id,
            frame: PcmFrame::new(spec.channels),
            spec,
            frame_spec: spec,
            finished: false,
        };

        if !ogg.synthesize_next() {
            return Err(MusicError::Decoder {
                recoverable: false,
                message: format!("{}: no decodable audio packet", path.display()),
            });
        }
        ogg.spec = ogg.frame_spec;

        tracing::debug!("OGG {}: {}", path.display(), ogg.spec);
        Ok(ogg)
    }

    /// Decode the next packet into `self.frame`, picking up any change of
    /// rate or channel count. Returns false at end of stream.
    fn synthesize_next(&mut self) -> bool {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return false;
                }
                Err(SymphoniaError::ResetRequired) => {
                    // A chained stream begins with its own serial and codec setup
                    if !self.select_chained_track() {
                        return false;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::warn!("OGG read failed: {}", e);
                    return false;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("Skipping bad OGG packet: {}", e);
                    continue;
                }
                Err(e) => {
                    tracing::warn!("OGG decode failed: {}", e);
                    return false;
                }
            };

            let signal = decoded.spec();
            let channels = signal.channels.count();
            if !(1..=2).contains(&channels) {
                tracing::warn!("OGG stream switched to {} channels, stopping", channels);
                return false;
            }
            let spec = StreamSpec {
                channels: channels as u16,
                sample_rate: signal.rate,
            };
            if spec.channels != self.frame_spec.channels {
                self.frame = PcmFrame::new(spec.channels);
            }
            self.frame_spec = spec;

            self.frame.load(&decoded);
            if !self.frame.is_drained() {
                return true;
            }
        }
    }

    /// Switch to the first audio track of the physical stream the reader
    /// just started.
    fn select_chained_track(&mut self) -> bool {
        let Some(track) = self
            .reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        else {
            tracing::warn!("OGG chained stream has no audio track");
            return false;
        };

        match symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())
        {
            Ok(decoder) => {
                tracing::debug!("OGG chained stream, serial {:#x}", track.id);
                self.track_id = track.id;
                self.decoder = decoder;
                true
            }
            Err(e) => {
                tracing::warn!("OGG chained stream cannot be decoded: {}", e);
                false
            }
        }
    }
}

impl Decode for OggDecoder {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn read_samples(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.frame.is_drained() && (self.finished || !self.synthesize_next()) {
                self.finished = true;
                break;
            }
            if self.frame_spec != self.spec {
                if written > 0 {
                    // Hand back what was written in the old format first
                    break;
                }
                tracing::debug!("OGG format change: {} -> {}", self.spec, self.frame_spec);
                self.spec = self.frame_spec;
            }
            let n = self.frame.drain_into(&mut out[written..]);
            if n == 0 {
                break;
            }
            written += n;
        }
        written
    }
}

fn fatal(path: &Path, e: SymphoniaError) -> MusicError {
    MusicError::Decoder {
        recoverable: false,
        message: format!("{}: {}", path.display(), e),
    }
}
