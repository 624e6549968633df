//! Background music streaming for the game loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   MusicPlayer (Game Thread)                     │
//! │   play_track / stop / pause / volume, update() once per frame   │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       StreamController                          │
//! │  Playlist cursor, DecoderSession (MP3 | OGG), 6 x 16 KiB pool  │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ queue / unqueue / submit
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         OutputSink                              │
//! │        DeviceSink (cpal) or MemorySink (tests, rendering)       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! There is no audio thread of our own: decoding happens inside
//! [`MusicPlayer::update`], bounded by one buffer per finished buffer.

pub mod decoder;
pub mod playlist;
pub mod resampler;
pub mod sink;
pub mod state;
pub mod stream;

pub use decoder::{Codec, CodecSet, Decode, DecoderSession, StreamSpec};
pub use playlist::{Playlist, TrackList};
pub use sink::{BufferId, DeviceSink, MemorySink, OutputSink, SampleLayout, SourceState};
pub use state::{StreamState, StreamStatus};
pub use stream::{StreamConfig, StreamController};

use std::path::PathBuf;

use crate::config::{Config, MusicConfig};

/// The music subsystem: a stream controller bound to one output sink.
pub struct MusicPlayer<S: OutputSink> {
    controller: StreamController<S>,
}

impl<S: OutputSink> MusicPlayer<S> {
    /// Bring up the subsystem on `sink` with every compiled-in codec.
    ///
    /// Fails with `Playlist` when no music directory has a playlist and with
    /// `CannotOpenDevice` when the sink cannot provide buffers. Either way
    /// the game is expected to carry on without music.
    pub fn open(config: &Config, sink: S) -> Result<Self, MusicError> {
        let stream_config = config.stream.clone().validated();
        let codecs = CodecSet::compiled(&stream_config);
        Self::with_codecs(config, sink, codecs)
    }

    /// Like [`open`](Self::open) with an explicit codec set.
    pub fn with_codecs(config: &Config, sink: S, codecs: CodecSet) -> Result<Self, MusicError> {
        let playlist = load_playlist(&config.music)?;
        let mut controller = StreamController::new(sink, codecs, playlist, &config.stream)?;
        controller.set_volume(i32::from(config.audio.volume));

        tracing::info!(
            "Music ready: {} tracks, volume {}",
            controller.playlist().track_count(),
            controller.volume()
        );
        Ok(Self { controller })
    }

    /// Stop playback and release the sink.
    pub fn close(mut self) {
        self.controller.close_track();
        tracing::info!("Music closed");
    }

    pub fn play_track(&mut self, track: usize) -> Result<(), MusicError> {
        tracing::info!("Playing track {}", track);
        self.controller.play_track(track)
    }

    pub fn stop(&mut self) {
        self.controller.stop();
    }

    pub fn pause(&mut self) {
        self.controller.pause();
    }

    pub fn resume(&mut self) {
        self.controller.resume();
    }

    /// Per-frame tick.
    pub fn update(&mut self) {
        self.controller.update();
    }

    /// Volume on a 0-100 scale.
    pub fn volume(&self) -> u8 {
        self.controller.volume()
    }

    /// Set the volume (0-100, clamped).
    pub fn set_volume(&mut self, percent: i32) {
        self.controller.set_volume(percent);
    }

    pub fn status(&self) -> StreamStatus {
        self.controller.status()
    }

    pub fn playlist(&self) -> &Playlist {
        self.controller.playlist()
    }

    pub fn controller(&self) -> &StreamController<S> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut StreamController<S> {
        &mut self.controller
    }
}

impl MusicPlayer<DeviceSink> {
    /// Open the configured audio device and bring up the subsystem on it.
    pub fn open_device(config: &Config) -> Result<Self, MusicError> {
        let sink = DeviceSink::open(&config.audio.output_device)?;
        Self::open(config, sink)
    }
}

/// Read the playlist of every configured music directory, user directory
/// first. Songs from later directories are appended to the same slots.
pub fn load_playlist(music: &MusicConfig) -> Result<Playlist, MusicError> {
    let mut playlist = Playlist::new(music.track_count);
    let mut found = false;

    for dir in music.search_dirs() {
        match playlist.read_named(&dir, &music.playlist_file) {
            Ok(()) => found = true,
            Err(e) => tracing::debug!("No playlist: {}", e),
        }
    }

    if !found {
        return Err(MusicError::Playlist(format!(
            "no {} found in {}",
            music.playlist_file,
            music
                .search_dirs()
                .iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    Ok(playlist)
}

/// List available audio output devices.
pub fn list_audio_devices() -> Vec<String> {
    use cpal::traits::{DeviceTrait, HostTrait};
    let host = cpal::default_host();
    host.output_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

/// Music subsystem errors.
#[derive(Debug, thiserror::Error)]
pub enum MusicError {
    #[error("Cannot open audio device: {0}")]
    CannotOpenDevice(String),

    #[error("Cannot open {}: {source}", .path.display())]
    CannotOpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported channel mode in {}: {channels} channels", .path.display())]
    UnsupportedChannelMode { path: PathBuf, channels: usize },

    #[error("No decoder for {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Decoder error: {message}")]
    Decoder { recoverable: bool, message: String },

    #[error("Nothing playable in track {track}")]
    PlaylistExhausted { track: usize },

    #[error("Playlist error: {0}")]
    Playlist(String),
}
