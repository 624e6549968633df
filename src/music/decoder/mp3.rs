//! MPEG audio decoding.
//!
//! Compressed bytes are staged in a [`StagingBuffer`]; frames are located by
//! their sync word, cut out whole and handed to symphonia's MPEG audio codec
//! one packet at a time. When the staged data ends mid-frame the unconsumed
//! tail is compacted to the front and topped off from the file.

use std::fs::File;
use std::io;
use std::path::Path;

use symphonia::core::audio::Channels;
use symphonia::core::codecs::{
    CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CodecParameters, CodecType, Decoder,
    DecoderOptions,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::Packet;

use super::sample::PcmFrame;
use super::staging::StagingBuffer;
use super::{Codec, Decode, StreamSpec};
use crate::music::MusicError;

/// Smallest staging buffer that always holds one complete frame.
pub const MIN_STAGING_SIZE: usize = 4096;

/// MP3 codec family.
#[derive(Debug, Clone)]
pub struct Mp3Codec {
    staging_size: usize,
}

impl Mp3Codec {
    pub fn new(staging_size: usize) -> Self {
        Self {
            staging_size: staging_size.max(MIN_STAGING_SIZE),
        }
    }
}

impl Codec for Mp3Codec {
    fn name(&self) -> &'static str {
        "mp3"
    }

    fn extension(&self) -> &'static str {
        "mp3"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Decode>, MusicError> {
        Ok(Box::new(Mp3Decoder::open(path, self.staging_size)?))
    }
}

// ============================================================================
// Frame headers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    I,
    II,
    III,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    SingleChannel,
}

impl ChannelMode {
    pub fn channels(self) -> u16 {
        match self {
            ChannelMode::SingleChannel => 1,
            _ => 2,
        }
    }
}

/// Why four bytes are not a usable frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than four bytes available
    Truncated,
    /// No sync word
    NoSync,
    /// Reserved version, layer, bitrate or sample rate
    Reserved,
    /// Free-format bitrate, which has no fixed frame length
    FreeFormat,
}

const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

const BITRATES_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

const SAMPLE_RATES: [[u32; 3]; 3] = [
    [44100, 48000, 32000],
    [22050, 24000, 16000],
    [11025, 12000, 8000],
];

/// A parsed MPEG audio frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: Layer,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub mode: ChannelMode,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, HeaderError> {
        let [b0, b1, b2, b3] = match bytes.get(..4) {
            Some(&[b0, b1, b2, b3]) => [b0, b1, b2, b3],
            _ => return Err(HeaderError::Truncated),
        };

        if b0 != 0xFF || b1 & 0xE0 != 0xE0 {
            return Err(HeaderError::NoSync);
        }

        let version = match (b1 >> 3) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return Err(HeaderError::Reserved),
        };

        let layer = match (b1 >> 1) & 0b11 {
            0b01 => Layer::III,
            0b10 => Layer::II,
            0b11 => Layer::I,
            _ => return Err(HeaderError::Reserved),
        };

        let bitrate_index = (b2 >> 4) as usize;
        if bitrate_index == 0 {
            return Err(HeaderError::FreeFormat);
        }
        if bitrate_index == 0x0F {
            return Err(HeaderError::Reserved);
        }
        let bitrate_kbps = match (version, layer) {
            (MpegVersion::Mpeg1, Layer::I) => BITRATES_V1[0][bitrate_index],
            (MpegVersion::Mpeg1, Layer::II) => BITRATES_V1[1][bitrate_index],
            (MpegVersion::Mpeg1, Layer::III) => BITRATES_V1[2][bitrate_index],
            (_, Layer::I) => BITRATES_V2[0][bitrate_index],
            (_, _) => BITRATES_V2[1][bitrate_index],
        };

        let rate_index = ((b2 >> 2) & 0b11) as usize;
        if rate_index == 3 {
            return Err(HeaderError::Reserved);
        }
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES[0][rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES[1][rate_index],
            MpegVersion::Mpeg25 => SAMPLE_RATES[2][rate_index],
        };

        let mode = match b3 >> 6 {
            0b00 => ChannelMode::Stereo,
            0b01 => ChannelMode::JointStereo,
            0b10 => ChannelMode::DualChannel,
            _ => ChannelMode::SingleChannel,
        };

        Ok(Self {
            version,
            layer,
            bitrate_kbps,
            sample_rate,
            padding: b2 & 0b10 != 0,
            mode,
        })
    }

    /// Total frame length in bytes, header included.
    pub fn frame_len(&self) -> usize {
        let bitrate = self.bitrate_kbps as usize * 1000;
        let rate = self.sample_rate as usize;
        let padding = self.padding as usize;
        match (self.layer, self.version) {
            (Layer::I, _) => (12 * bitrate / rate + padding) * 4,
            (Layer::III, MpegVersion::Mpeg2 | MpegVersion::Mpeg25) => 72 * bitrate / rate + padding,
            _ => 144 * bitrate / rate + padding,
        }
    }

    /// PCM samples per channel in one frame.
    pub fn samples_per_frame(&self) -> usize {
        match (self.layer, self.version) {
            (Layer::I, _) => 384,
            (Layer::III, MpegVersion::Mpeg2 | MpegVersion::Mpeg25) => 576,
            _ => 1152,
        }
    }

    pub fn channels(&self) -> u16 {
        self.mode.channels()
    }

    fn codec_type(&self) -> CodecType {
        match self.layer {
            Layer::I => CODEC_TYPE_MP1,
            Layer::II => CODEC_TYPE_MP2,
            Layer::III => CODEC_TYPE_MP3,
        }
    }
}

/// Total size of an ID3v2 tag given its 10-byte header.
fn id3v2_len(header: &[u8]) -> usize {
    let size = header[6..10]
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | (*b & 0x7F) as usize);
    let footer = if header[5] & 0x10 != 0 { 10 } else { 0 };
    10 + size + footer
}

// ============================================================================
// Frame reader
// ============================================================================

/// Locates whole frames in a file through the staging buffer.
struct FrameReader {
    file: File,
    staging: StagingBuffer,
    /// Bytes of an oversized tag still to skip
    skip: usize,
    eof: bool,
}

enum Scan {
    Frame(FrameHeader, usize),
    Underrun,
}

impl FrameReader {
    fn new(file: File, staging_size: usize) -> Self {
        Self {
            file,
            staging: StagingBuffer::new(staging_size),
            skip: 0,
            eof: false,
        }
    }

    /// Find the next complete frame, reading more of the file as needed.
    /// `None` once the file is exhausted.
    fn peek(&mut self) -> Option<(FrameHeader, usize)> {
        loop {
            match self.scan() {
                Scan::Frame(header, len) => return Some((header, len)),
                Scan::Underrun => {
                    if !self.refill() {
                        return None;
                    }
                }
            }
        }
    }

    /// The bytes of a frame returned by [`peek`](Self::peek).
    fn frame(&self, len: usize) -> &[u8] {
        &self.staging.pending()[..len]
    }

    fn advance(&mut self, len: usize) {
        self.staging.consume(len);
    }

    fn refill(&mut self) -> bool {
        if self.eof {
            return false;
        }
        match self.staging.top_off(&mut self.file) {
            Ok(0) => {
                self.eof = true;
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("MP3 read error: {}", e);
                self.eof = true;
                false
            }
        }
    }

    fn scan(&mut self) -> Scan {
        loop {
            if self.skip > 0 {
                let n = self.skip.min(self.staging.len());
                self.staging.consume(n);
                self.skip -= n;
                if self.skip > 0 {
                    return Scan::Underrun;
                }
            }

            let pending = self.staging.pending();
            if pending.len() < 10 && (pending.len() < 4 || pending.starts_with(b"ID3")) {
                return self.underrun();
            }

            if pending.starts_with(b"ID3") {
                self.skip = id3v2_len(pending);
                continue;
            }

            match FrameHeader::parse(pending) {
                Ok(header) => {
                    let len = header.frame_len();
                    if pending.len() < len {
                        return self.underrun();
                    }
                    return Scan::Frame(header, len);
                }
                Err(HeaderError::Truncated) => return self.underrun(),
                Err(e) => {
                    // Lost sync: resume at the next candidate sync byte
                    let next = pending[1..]
                        .iter()
                        .position(|&b| b == 0xFF)
                        .map_or(pending.len(), |p| p + 1);
                    tracing::trace!("MP3 resync ({:?}), skipping {} bytes", e, next);
                    self.staging.consume(next);
                }
            }
        }
    }

    fn underrun(&mut self) -> Scan {
        if self.staging.is_full() {
            // A "frame" larger than the whole buffer is a false sync
            self.staging.consume(1);
        }
        Scan::Underrun
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// An open MP3 song.
pub struct Mp3Decoder {
    reader: FrameReader,
    decoder: Box<dyn Decoder>,
    frame: PcmFrame,
    spec: StreamSpec,
    ts: u64,
    finished: bool,
}

impl Mp3Decoder {
    /// Open `path`, decode its first frame and report its channel layout.
    pub fn open(path: &Path, staging_size: usize) -> Result<Self, MusicError> {
        let file = File::open(path).map_err(|source| MusicError::CannotOpenFile {
            path: path.to_path_buf(),
            source,
        })?;

        let mut reader = FrameReader::new(file, staging_size);
        let (header, _) = reader.peek().ok_or_else(|| MusicError::Decoder {
            recoverable: false,
            message: format!("{}: no MPEG audio frame found", path.display()),
        })?;

        let spec = StreamSpec {
            channels: header.channels(),
            sample_rate: header.sample_rate,
        };

        let channels = match spec.channels {
            1 => Channels::FRONT_LEFT,
            2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
            n => {
                return Err(MusicError::UnsupportedChannelMode {
                    path: path.to_path_buf(),
                    channels: n as usize,
                });
            }
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(header.codec_type())
            .with_sample_rate(header.sample_rate)
            .with_channels(channels);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| MusicError::Decoder {
                recoverable: false,
                message: format!("{}: {}", path.display(), e),
            })?;

        let mut mp3 = Self {
            reader,
            decoder,
            frame: PcmFrame::new(spec.channels),
            spec,
            ts: 0,
            finished: false,
        };

        if !mp3.synthesize_next() {
            return Err(MusicError::Decoder {
                recoverable: false,
                message: format!("{}: no decodable MPEG audio frame", path.display()),
            });
        }

        tracing::debug!(
            "MP3 {}: {:?} {:?} {}kbps, {}",
            path.display(),
            header.version,
            header.layer,
            header.bitrate_kbps,
            spec
        );
        Ok(mp3)
    }

    /// Decode the next frame into `self.frame`. Returns false at end of
    /// stream or on an unrecoverable error.
    fn synthesize_next(&mut self) -> bool {
        loop {
            let Some((header, len)) = self.reader.peek() else {
                return false;
            };

            if header.channels() != self.spec.channels {
                tracing::trace!("Skipping MP3 frame with {} channels", header.channels());
                self.reader.advance(len);
                continue;
            }

            let duration = header.samples_per_frame() as u64;
            let packet = Packet::new_from_slice(0, self.ts, duration, self.reader.frame(len));
            self.reader.advance(len);
            self.ts += duration;

            let reset = match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    self.frame.load(&decoded);
                    if !self.frame.is_drained() {
                        return true;
                    }
                    false
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!("Skipping bad MP3 frame: {}", e);
                    false
                }
                Err(SymphoniaError::ResetRequired) => true,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return false;
                }
                Err(e) => {
                    tracing::warn!("MP3 decode failed: {}", e);
                    return false;
                }
            };
            if reset {
                self.decoder.reset();
            }
        }
    }
}

impl Decode for Mp3Decoder {
    fn spec(&self) -> StreamSpec {
        self.spec
    }

    fn read_samples(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.frame.is_drained() {
                if self.finished || !self.synthesize_next() {
                    self.finished = true;
                    break;
                }
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
