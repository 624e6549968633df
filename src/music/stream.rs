//! The stream controller: keeps a small pool of output buffers full from the
//! current song and advances through the playlist when a song ends.
//!
//! ```text
//!   game loop ──update()──▶ StreamController ──fill──▶ DecoderSession
//!                                │    ▲                    │ 0 bytes
//!                  queue/unqueue │    │ processed          ▼
//!                                ▼    │               Playlist::next_song()
//!                             OutputSink
//! ```
//!
//! Everything runs on the caller's thread. `update()` must be called more
//! often than one buffer takes to play (about 93 ms for 16 KiB of 44.1kHz
//! stereo); slower callers get underruns, which are detected and recovered
//! from by restarting the source.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::MusicError;
use super::decoder::{CodecSet, DecoderSession, StreamSpec};
use super::playlist::Playlist;
use super::sink::{BufferId, OutputSink, SourceState};
use super::state::{StreamState, StreamStatus};

/// Buffer pool and decoder tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Number of output buffers cycled through the sink
    pub buffer_count: usize,
    /// Capacity of each output buffer in bytes
    pub buffer_size: usize,
    /// Compressed-data staging size for MP3 decoding
    pub mp3_staging_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_count: 6,
            buffer_size: 16384,
            mp3_staging_size: 16384,
        }
    }
}

impl StreamConfig {
    /// Replace out-of-range values with defaults.
    pub fn validated(self) -> Self {
        let defaults = Self::default();
        let mut config = self;
        if config.buffer_count == 0 {
            tracing::warn!("buffer_count must be at least 1, using {}", defaults.buffer_count);
            config.buffer_count = defaults.buffer_count;
        }
        if config.buffer_size < 4 || config.buffer_size % 4 != 0 {
            tracing::warn!(
                "buffer_size {} is not a positive multiple of 4, using {}",
                config.buffer_size,
                defaults.buffer_size
            );
            config.buffer_size = defaults.buffer_size;
        }
        if config.mp3_staging_size < 4096 {
            tracing::warn!(
                "mp3_staging_size {} is below 4096, using {}",
                config.mp3_staging_size,
                defaults.mp3_staging_size
            );
            config.mp3_staging_size = defaults.mp3_staging_size;
        }
        config
    }
}

/// Owns the open song, the buffer pool and the track-advance policy.
pub struct StreamController<S: OutputSink> {
    sink: S,
    codecs: CodecSet,
    playlist: Playlist,
    session: DecoderSession,
    buffers: Vec<BufferId>,
    /// Staging area for one buffer's worth of PCM
    scratch: Vec<u8>,
    track: Option<usize>,
    state: StreamState,
    paused: bool,
    volume: f32,
    underruns: u32,
}

impl<S: OutputSink> StreamController<S> {
    /// Allocate the buffer pool on `sink`. Fails with `CannotOpenDevice`
    /// when the sink cannot provide buffers.
    pub fn new(
        mut sink: S,
        codecs: CodecSet,
        playlist: Playlist,
        config: &StreamConfig,
    ) -> Result<Self, MusicError> {
        let config = config.clone().validated();
        let buffers = sink.create_buffers(config.buffer_count)?;
        let volume = 0.5;
        sink.set_gain(volume);

        tracing::debug!(
            "Stream controller: {} x {} byte buffers, codecs {:?}",
            config.buffer_count,
            config.buffer_size,
            codecs
        );

        Ok(Self {
            sink,
            codecs,
            playlist,
            session: DecoderSession::new(),
            buffers,
            scratch: vec![0; config.buffer_size],
            track: None,
            state: StreamState::Idle,
            paused: false,
            volume,
            underruns: 0,
        })
    }

    /// Open a song, replacing whatever was open. On failure nothing is left
    /// open.
    pub fn open_track(&mut self, path: &Path) -> Result<StreamSpec, MusicError> {
        match self.session.open(&self.codecs, path) {
            Ok(spec) => {
                self.state = StreamState::TrackOpen;
                tracing::debug!("Opened {} ({})", path.display(), spec);
                Ok(spec)
            }
            Err(e) => {
                self.state = StreamState::Idle;
                tracing::warn!("Skipping {}: {}", path.display(), e);
                Err(e)
            }
        }
    }

    /// Stop the sink, reclaim every buffer and close the song. Safe to call
    /// any number of times.
    pub fn close_track(&mut self) {
        // An exhausted track has no handle but its tail may still be queued
        if self.track.is_some() || self.sink_holds_buffers() {
            self.sink.stop();
            while self.sink.unqueue_buffer().is_some() {}
        }
        self.track = None;
        self.session.close();
        self.paused = false;
        if self.state == StreamState::TrackOpen {
            self.state = StreamState::Idle;
        }
    }

    fn sink_holds_buffers(&mut self) -> bool {
        self.sink.queued_count() + self.sink.processed_count() > 0
    }

    /// Open the next song of the current track, trying each song at most
    /// once. Clears the track handle when none opens.
    fn advance(&mut self) -> bool {
        for _ in 0..self.playlist.song_count() {
            let Some(song) = self.playlist.next_song().map(Path::to_path_buf) else {
                break;
            };
            if self.open_track(&song).is_ok() {
                tracing::info!("Now playing {}", song.display());
                return true;
            }
        }
        self.exhausted();
        false
    }

    fn exhausted(&mut self) {
        tracing::info!(
            "Nothing playable left in track {}",
            self.playlist.current_track()
        );
        self.session.close();
        self.track = None;
        self.state = StreamState::Exhausted;
    }

    /// Decode one buffer's worth of PCM and submit it to `buffer`.
    ///
    /// Songs that end mid-fill are followed seamlessly by the next song of
    /// the track. Returns the number of bytes submitted, or
    /// `PlaylistExhausted` when nothing at all could be produced.
    ///
    /// The buffer is tagged with the format of its last segment. When a
    /// mono song is followed by a stereo one inside the same buffer, the
    /// free space can end up smaller than one stereo frame; the buffer is
    /// then submitted up to 2 bytes short of capacity and the next buffer
    /// continues the stream without a gap.
    pub fn fill_buffer(&mut self, buffer: BufferId) -> Result<usize, MusicError> {
        let capacity = self.scratch.len();
        let mut size = 0;
        let mut spec = None;

        while size < capacity {
            let Some(current) = self.session.spec() else {
                break;
            };
            // Only whole sample frames are ever written
            let frame = current.frame_bytes();
            let room = (capacity - size) / frame * frame;
            if room == 0 {
                break;
            }

            let n = self.session.read_samples(&mut self.scratch[size..size + room]);
            if n > 0 {
                size += n;
                spec = self.session.spec();
            } else if !self.advance() {
                break;
            }
        }

        let Some(spec) = spec.filter(|_| size > 0) else {
            return Err(MusicError::PlaylistExhausted {
                track: self.playlist.current_track(),
            });
        };

        tracing::trace!("Filled {:?} with {} bytes ({})", buffer, size, spec);
        self.sink
            .submit_data(buffer, spec.layout(), &self.scratch[..size], spec.sample_rate);
        Ok(size)
    }

    /// Start playing a playlist track from its first playable song.
    ///
    /// Pre-fills the whole buffer pool before starting the sink. Fails
    /// without starting playback when no song opens or the pool cannot be
    /// filled.
    pub fn play_track(&mut self, track: usize) -> Result<(), MusicError> {
        self.close_track();
        self.playlist.set_track(track);

        let mut candidate = self.playlist.current_song().map(Path::to_path_buf);
        let mut opened = false;
        for _ in 0..self.playlist.song_count() {
            let Some(song) = candidate.take() else {
                break;
            };
            if self.open_track(&song).is_ok() {
                tracing::info!("Now playing {}", song.display());
                opened = true;
                break;
            }
            candidate = self.playlist.next_song().map(Path::to_path_buf);
        }

        if !opened {
            self.exhausted();
            return Err(MusicError::PlaylistExhausted { track });
        }
        self.track = Some(track);

        for buffer in self.buffers.clone() {
            if let Err(e) = self.fill_buffer(buffer) {
                self.session.close();
                self.track = None;
                self.state = StreamState::Exhausted;
                return Err(e);
            }
        }

        self.sink.queue_buffers(&self.buffers);
        self.sink.play();
        Ok(())
    }

    /// Refill and requeue every buffer the sink has finished playing, and
    /// restart the sink if it ran dry. Does nothing while stopped, paused or
    /// muted.
    pub fn update(&mut self) {
        if self.track.is_none() || self.paused || self.volume == 0.0 {
            return;
        }

        let processed = self.sink.processed_count();
        for _ in 0..processed {
            let Some(buffer) = self.sink.unqueue_buffer() else {
                break;
            };
            match self.fill_buffer(buffer) {
                Ok(_) => self.sink.queue_buffers(&[buffer]),
                Err(e) => tracing::debug!("Not requeueing {:?}: {}", buffer, e),
            }
        }

        if self.sink.state() != SourceState::Playing {
            self.underruns += 1;
            tracing::warn!("Music source not playing, restarting");
            self.sink.play();
        }
    }

    pub fn stop(&mut self) {
        self.close_track();
    }

    /// Pause the sink; `update` stays idle until [`resume`](Self::resume).
    pub fn pause(&mut self) {
        if self.track.is_some() && !self.paused {
            self.sink.pause();
            self.paused = true;
        }
    }

    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.sink.play();
        }
    }

    /// Set the volume on a 0-100 scale, clamping out-of-range values.
    pub fn set_volume(&mut self, percent: i32) {
        self.volume = percent.clamp(0, 100) as f32 / 100.0;
        self.sink.set_gain(self.volume);
    }

    /// Volume on a 0-100 scale.
    pub fn volume(&self) -> u8 {
        (self.volume * 100.0).round() as u8
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn track(&self) -> Option<usize> {
        self.track
    }

    pub fn song(&self) -> Option<&Path> {
        self.session.path()
    }

    pub fn buffers(&self) -> &[BufferId] {
        &self.buffers
    }

    pub fn buffer_size(&self) -> usize {
        self.scratch.len()
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn status(&self) -> StreamStatus {
        StreamStatus {
            state: self.state,
            track: self.track,
            song: self.session.path().map(PathBuf::from),
            spec: self.session.spec(),
            source: self.sink.state(),
            paused: self.paused,
            volume: self.volume(),
            underruns: self.underruns,
        }
    }
}

impl<S: OutputSink> Drop for StreamController<S> {
    fn drop(&mut self) {
        self.close_track();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::music::sink::{MemorySink, SampleLayout};
    use crate::test_utils::{RawPcmCodec, ramp, write_raw_song};
    use proptest::prelude::*;
    use tempfile::TempDir;

    const BUF: usize = 4096;

    fn config() -> StreamConfig {
        StreamConfig {
            buffer_count: 6,
            buffer_size: BUF,
            ..StreamConfig::default()
        }
    }

    fn controller(playlist: Playlist) -> StreamController<MemorySink> {
        let codecs = CodecSet::empty().with(RawPcmCodec::new("ogg"));
        StreamController::new(MemorySink::new(), codecs, playlist, &config()).unwrap()
    }

    /// Track 1 = [a.ogg, b.ogg]; a is 3000 stereo frames, b is 5000.
    fn two_song_setup() -> (TempDir, StreamController<MemorySink>, Vec<i16>, Vec<i16>) {
        let dir = tempfile::tempdir().unwrap();
        let a = ramp(0, 6000);
        let b = ramp(10000, 10000);
        let a_path = write_raw_song(dir.path(), "a.ogg", 2, 44100, &a);
        let b_path = write_raw_song(dir.path(), "b.ogg", 2, 44100, &b);

        let mut playlist = Playlist::default();
        playlist.add_song(1, a_path);
        playlist.add_song(1, b_path);
        (dir, controller(playlist), a, b)
    }

    fn to_samples(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    fn queued_pcm(ctl: &StreamController<MemorySink>) -> Vec<i16> {
        ctl.sink()
            .queued()
            .flat_map(|id| to_samples(&ctl.sink().buffer(id).unwrap().data))
            .collect()
    }

    #[test]
    fn test_play_track_fills_and_queues_pool() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.play_track(1).unwrap();

        assert_eq!(ctl.track(), Some(1));
        assert_eq!(ctl.state(), StreamState::TrackOpen);
        assert_eq!(ctl.sink_mut().queued_count(), 6);
        assert_eq!(ctl.sink().state(), SourceState::Playing);
        for id in ctl.sink().queued() {
            let buffer = ctl.sink().buffer(id).unwrap();
            assert_eq!(buffer.data.len(), BUF);
            assert_eq!(buffer.layout, SampleLayout::Stereo16);
            assert_eq!(buffer.rate, 44100);
        }
    }

    #[test]
    fn test_song_end_continues_into_next_song() {
        let (_dir, mut ctl, a, b) = two_song_setup();
        ctl.play_track(1).unwrap();

        // a.ogg is 12000 bytes: buffers 0-1 hold a, buffer 2 holds a's tail
        // followed by b's head
        let pcm = queued_pcm(&ctl);
        assert_eq!(&pcm[..a.len()], &a[..]);
        assert_eq!(&pcm[a.len()..a.len() + 1000], &b[..1000]);

        let third = ctl.sink().buffer(ctl.buffers()[2]).unwrap();
        let third = to_samples(&third.data);
        assert_eq!(third[..(a.len() - 2 * BUF / 2)], a[2 * BUF / 2..]);

        assert_eq!(ctl.track(), Some(1));
        assert!(ctl.song().unwrap().ends_with("b.ogg"));
        assert!(ctl.playlist().current_song().unwrap().ends_with("b.ogg"));
    }

    #[test]
    fn test_single_song_loops() {
        let dir = tempfile::tempdir().unwrap();
        let song = ramp(0, 1000);
        let path = write_raw_song(dir.path(), "loop.ogg", 1, 22050, &song);
        let mut playlist = Playlist::default();
        playlist.add_song(1, path);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();

        // Every queued byte is the song, repeated
        let pcm = queued_pcm(&ctl);
        assert_eq!(pcm.len(), 6 * BUF / 2);
        for (i, sample) in pcm.iter().enumerate() {
            assert_eq!(*sample, song[i % song.len()]);
        }
        let first = ctl.sink().buffer(ctl.buffers()[0]).unwrap();
        assert_eq!(first.layout, SampleLayout::Mono16);
        assert_eq!(first.rate, 22050);
    }

    #[test]
    fn test_unopenable_songs_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = ramp(0, 4000);
        let good_path = write_raw_song(dir.path(), "good.ogg", 2, 44100, &good);

        let mut playlist = Playlist::default();
        playlist.add_song(1, dir.path().join("missing.ogg"));
        playlist.add_song(1, dir.path().join("theme.mp3"));
        playlist.add_song(1, good_path);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();
        assert!(ctl.song().unwrap().ends_with("good.ogg"));
        assert_eq!(&queued_pcm(&ctl)[..good.len()], &good[..]);
    }

    #[test]
    fn test_empty_track_fails_without_session() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        let err = ctl.play_track(2).unwrap_err();
        assert!(matches!(err, MusicError::PlaylistExhausted { track: 2 }));
        assert_eq!(ctl.track(), None);
        assert!(ctl.song().is_none());
        assert_eq!(ctl.state(), StreamState::Exhausted);
        assert_eq!(ctl.sink().play_calls(), 0);
    }

    #[test]
    fn test_all_songs_unopenable_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut playlist = Playlist::default();
        playlist.add_song(1, dir.path().join("gone1.ogg"));
        playlist.add_song(1, dir.path().join("gone2.ogg"));

        let mut ctl = controller(playlist);
        assert!(ctl.play_track(1).is_err());
        assert_eq!(ctl.track(), None);
        assert_eq!(ctl.sink_mut().queued_count(), 0);
    }

    #[test]
    fn test_update_refills_processed_buffers() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.play_track(1).unwrap();

        let played = ctl.sink_mut().consume(2);
        assert_eq!(played.len(), 2);
        assert_eq!(ctl.sink_mut().processed_count(), 2);

        ctl.update();
        assert_eq!(ctl.sink_mut().processed_count(), 0);
        assert_eq!(ctl.sink_mut().queued_count(), 6);
        assert_eq!(ctl.sink().state(), SourceState::Playing);
    }

    #[test]
    fn test_update_restarts_after_underrun() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.play_track(1).unwrap();

        ctl.sink_mut().consume(6);
        assert_eq!(ctl.sink().state(), SourceState::Stopped);

        ctl.update();
        assert_eq!(ctl.sink().state(), SourceState::Playing);
        assert_eq!(ctl.sink_mut().queued_count(), 6);
        assert_eq!(ctl.status().underruns, 1);
    }

    #[test]
    fn test_exhaustion_mid_fill_keeps_partial_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let song = ramp(0, 3000);
        let path = write_raw_song(dir.path(), "once.ogg", 2, 44100, &song);
        let mut playlist = Playlist::default();
        playlist.add_song(1, &path);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();
        // The only song vanishes: reopening it at its end fails
        std::fs::remove_file(&path).unwrap();

        ctl.sink_mut().consume(6);
        ctl.update();

        // The pool holds the song four times over plus 576 bytes. Refilling
        // drains the open session (4096 + 1328 bytes), then the reopen fails
        // and the remaining buffers stay unqueued.
        assert_eq!(ctl.track(), None);
        assert_eq!(ctl.state(), StreamState::Exhausted);
        let queued: Vec<_> = ctl.sink().queued().collect();
        assert_eq!(queued.len(), 2);
        assert_eq!(ctl.sink().buffer(queued[0]).unwrap().data.len(), BUF);
        assert_eq!(ctl.sink().buffer(queued[1]).unwrap().data.len(), 1328);

        // Nothing left to play; later updates do nothing
        ctl.sink_mut().consume(2);
        ctl.update();
        assert_eq!(ctl.sink_mut().queued_count(), 0);
    }

    #[test]
    fn test_stop_after_exhaustion_reclaims_tail() {
        let dir = tempfile::tempdir().unwrap();
        let song = ramp(0, 3000);
        let path = write_raw_song(dir.path(), "once.ogg", 2, 44100, &song);
        let mut playlist = Playlist::default();
        playlist.add_song(1, &path);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();
        std::fs::remove_file(&path).unwrap();
        ctl.sink_mut().consume(6);
        ctl.update();
        assert_eq!(ctl.track(), None);
        assert_eq!(ctl.sink_mut().queued_count(), 2);

        ctl.stop();
        assert_eq!(ctl.sink().state(), SourceState::Stopped);
        assert_eq!(ctl.sink_mut().queued_count(), 0);
        assert_eq!(ctl.sink_mut().processed_count(), 0);

        // Replaying queues every pool buffer exactly once
        write_raw_song(dir.path(), "once.ogg", 2, 44100, &song);
        ctl.play_track(1).unwrap();
        let mut queued: Vec<_> = ctl.sink().queued().collect();
        assert_eq!(queued.len(), 6);
        queued.sort_by_key(|id| id.0);
        queued.dedup();
        assert_eq!(queued.len(), 6);
    }

    #[test]
    fn test_replay_after_exhaustion_without_stop() {
        let dir = tempfile::tempdir().unwrap();
        let song = ramp(0, 3000);
        let path = write_raw_song(dir.path(), "once.ogg", 2, 44100, &song);
        let mut playlist = Playlist::default();
        playlist.add_song(1, &path);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();
        std::fs::remove_file(&path).unwrap();
        ctl.sink_mut().consume(6);
        ctl.update();

        write_raw_song(dir.path(), "once.ogg", 2, 44100, &song);
        ctl.play_track(1).unwrap();
        assert_eq!(ctl.sink_mut().queued_count(), 6);
        assert_eq!(ctl.sink_mut().processed_count(), 0);
    }

    #[test]
    fn test_mono_to_stereo_buffer_ends_short() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw_song(dir.path(), "a.ogg", 1, 44100, &ramp(0, 1001));
        let b = write_raw_song(dir.path(), "b.ogg", 2, 44100, &ramp(0, 40_000));
        let mut playlist = Playlist::default();
        playlist.add_song(1, a);
        playlist.add_song(1, b);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();

        // 2002 mono bytes leave 2094, of which 523 stereo frames fit
        let first = ctl.sink().buffer(ctl.buffers()[0]).unwrap();
        assert_eq!(first.data.len(), BUF - 2);
        assert_eq!(first.layout, SampleLayout::Stereo16);

        // The stereo song carries on from the next frame
        let second = to_samples(&ctl.sink().buffer(ctl.buffers()[1]).unwrap().data);
        assert_eq!(second.len(), BUF / 2);
        assert_eq!(second[0], 523 * 2);
    }

    #[test]
    fn test_close_track_is_idempotent() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.play_track(1).unwrap();

        ctl.close_track();
        let once = ctl.status();
        ctl.close_track();
        assert_eq!(ctl.status(), once);

        assert_eq!(once.track, None);
        assert_eq!(once.song, None);
        assert_eq!(once.state, StreamState::Idle);
        assert_eq!(ctl.sink_mut().queued_count(), 0);
        assert_eq!(ctl.sink_mut().processed_count(), 0);
    }

    #[test]
    fn test_close_without_track_is_noop() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.close_track();
        assert_eq!(ctl.state(), StreamState::Idle);
        assert_eq!(ctl.sink().state(), SourceState::Initial);
    }

    #[test]
    fn test_volume_clamps_and_mute_pauses_update() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.set_volume(150);
        assert_eq!(ctl.volume(), 100);
        assert_eq!(ctl.sink().gain(), 1.0);
        ctl.set_volume(-10);
        assert_eq!(ctl.volume(), 0);
        assert_eq!(ctl.sink().gain(), 0.0);

        ctl.set_volume(0);
        ctl.play_track(1).unwrap();
        ctl.sink_mut().consume(3);
        ctl.update();
        assert_eq!(ctl.sink_mut().processed_count(), 3);

        ctl.set_volume(40);
        ctl.update();
        assert_eq!(ctl.sink_mut().processed_count(), 0);
        assert_eq!(ctl.volume(), 40);
    }

    #[test]
    fn test_pause_and_resume() {
        let (_dir, mut ctl, _, _) = two_song_setup();
        ctl.play_track(1).unwrap();

        ctl.pause();
        assert_eq!(ctl.sink().state(), SourceState::Paused);
        ctl.update();
        assert_eq!(ctl.sink().state(), SourceState::Paused);
        assert!(!ctl.status().is_playing());

        ctl.resume();
        assert_eq!(ctl.sink().state(), SourceState::Playing);
    }

    #[test]
    fn test_format_change_inside_buffer_tags_latest_segment() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_raw_song(dir.path(), "a.ogg", 2, 44100, &ramp(0, 1000));
        let b = write_raw_song(dir.path(), "b.ogg", 1, 22050, &ramp(0, 100_000));
        let mut playlist = Playlist::default();
        playlist.add_song(1, a);
        playlist.add_song(1, b);

        let mut ctl = controller(playlist);
        ctl.play_track(1).unwrap();

        let first = ctl.sink().buffer(ctl.buffers()[0]).unwrap();
        assert_eq!(first.layout, SampleLayout::Mono16);
        assert_eq!(first.rate, 22050);
        assert_eq!(first.data.len(), BUF);
    }

    #[test]
    fn test_invalid_config_falls_back() {
        let config = StreamConfig {
            buffer_count: 0,
            buffer_size: 1001,
            mp3_staging_size: 10,
        }
        .validated();
        assert_eq!(config, StreamConfig::default());
    }

    #[test]
    fn test_controller_needs_buffers() {
        let result = StreamController::new(
            MemorySink::unavailable(),
            CodecSet::empty(),
            Playlist::default(),
            &StreamConfig::default(),
        );
        assert!(matches!(result, Err(MusicError::CannotOpenDevice(_))));
    }

    proptest! {
        #[test]
        fn prop_fill_never_exceeds_capacity(
            frames_a in 1usize..5000,
            frames_b in 1usize..5000,
            chunk in 1usize..3000,
            mono_b in any::<bool>(),
        ) {
            let dir = tempfile::tempdir().unwrap();
            let a = write_raw_song(dir.path(), "a.ogg", 2, 44100, &ramp(0, frames_a * 2));
            let b_channels = if mono_b { 1 } else { 2 };
            let b = write_raw_song(dir.path(), "b.ogg", b_channels, 44100, &ramp(0, frames_b * b_channels as usize));
            let mut playlist = Playlist::default();
            playlist.add_song(1, a);
            playlist.add_song(1, b);

            let codecs = CodecSet::empty().with(RawPcmCodec::with_max_read("ogg", chunk));
            let mut ctl = StreamController::new(MemorySink::new(), codecs, playlist, &config()).unwrap();
            ctl.play_track(1).unwrap();

            for id in ctl.buffers().to_vec() {
                let size = ctl.sink().buffer(id).unwrap().data.len();
                prop_assert!(size <= BUF);
                prop_assert!(size > 0);
            }
        }
    }
}
