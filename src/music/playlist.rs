//! Track playlists loaded from `music.wpl` descriptors.
//!
//! A descriptor lists songs per track slot:
//!
//! ```text
//! [track1]
//! path=.
//! shuffle=no
//! menu.ogg
//! intro.mp3
//!
//! [track2]
//! path=/opt/game/battle
//! shuffle=yes
//! battle1.ogg
//! battle2.ogg
//! ```
//!
//! `path=` sets the directory prefix for the songs that follow (`.` meaning
//! the directory the descriptor was read from); a new `[trackN]` header
//! clears it.

use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};

use super::MusicError;

/// Number of track slots in a default playlist.
pub const DEFAULT_TRACK_COUNT: usize = 3;

/// File name of the playlist descriptor inside a music directory.
pub const PLAYLIST_FILE: &str = "music.wpl";

/// Songs of one track slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackList {
    pub songs: Vec<PathBuf>,
    pub shuffle: bool,
}

/// Fixed set of track slots with a current-track/current-song cursor.
#[derive(Debug, Clone)]
pub struct Playlist {
    tracks: Vec<TrackList>,
    current_track: usize,
    current_song: usize,
}

impl Default for Playlist {
    fn default() -> Self {
        Self::new(DEFAULT_TRACK_COUNT)
    }
}

impl Playlist {
    /// Create a playlist with `track_count` empty slots.
    pub fn new(track_count: usize) -> Self {
        Self {
            tracks: vec![TrackList::default(); track_count.max(1)],
            current_track: 0,
            current_song: 0,
        }
    }

    /// Read `<dir>/music.wpl`, appending its songs to the slots.
    pub fn read(&mut self, dir: &Path) -> Result<(), MusicError> {
        self.read_named(dir, PLAYLIST_FILE)
    }

    /// Read a descriptor called `file_name` inside `dir`.
    pub fn read_named(&mut self, dir: &Path, file_name: &str) -> Result<(), MusicError> {
        let path = dir.join(file_name);
        let bytes = std::fs::read(&path)
            .map_err(|e| MusicError::Playlist(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Reading playlist {}", path.display());
        self.parse(&utf8_lines(&bytes, &path), dir);
        Ok(())
    }

    /// Parse descriptor text. `base_dir` is what `path=.` refers to.
    pub fn parse(&mut self, contents: &str, base_dir: &Path) {
        let mut slot = 0;
        let mut prefix: Option<PathBuf> = None;

        for line in contents.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') {
                match parse_track_header(line) {
                    Some(n) if n < self.tracks.len() => {
                        tracing::debug!("Track {}", n);
                        slot = n;
                        prefix = None;
                    }
                    _ => tracing::warn!("Ignoring playlist section {:?}", line),
                }
            } else if let Some(dir) = line.strip_prefix("path=") {
                let dir = if dir == "." {
                    base_dir.to_path_buf()
                } else {
                    PathBuf::from(dir)
                };
                tracing::debug!("  path = {}", dir.display());
                prefix = Some(dir);
            } else if let Some(flag) = line.strip_prefix("shuffle=") {
                let shuffle = flag == "yes";
                tracing::debug!("  shuffle = {}", if shuffle { "yes" } else { "no" });
                self.tracks[slot].shuffle = shuffle;
            } else {
                let song = match &prefix {
                    Some(dir) => dir.join(line),
                    None => PathBuf::from(line),
                };
                tracing::debug!("  adding song {}", song.display());
                self.tracks[slot].songs.push(song);
            }
        }
    }

    /// Append a song to a slot. Out-of-range slots are ignored.
    pub fn add_song(&mut self, track: usize, song: impl Into<PathBuf>) {
        if let Some(list) = self.tracks.get_mut(track) {
            list.songs.push(song.into());
        }
    }

    /// Select a track slot (out-of-range selects slot 0) and rewind to its
    /// first song. Shuffled slots get a fresh song order.
    pub fn set_track(&mut self, track: usize) {
        self.current_track = if track < self.tracks.len() { track } else { 0 };
        self.current_song = 0;

        let list = &mut self.tracks[self.current_track];
        if list.shuffle {
            list.songs.shuffle(&mut rand::rng());
        }
    }

    pub fn current_track(&self) -> usize {
        self.current_track
    }

    /// The song under the cursor, if the current slot has any.
    pub fn current_song(&self) -> Option<&Path> {
        self.tracks[self.current_track]
            .songs
            .get(self.current_song)
            .map(PathBuf::as_path)
    }

    /// Advance the cursor (wrapping) and return the new current song.
    pub fn next_song(&mut self) -> Option<&Path> {
        let count = self.song_count();
        self.current_song += 1;
        if self.current_song >= count {
            self.current_song = 0;
        }
        self.current_song()
    }

    /// Songs in the current slot.
    pub fn song_count(&self) -> usize {
        self.tracks[self.current_track].songs.len()
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, track: usize) -> Option<&TrackList> {
        self.tracks.get(track)
    }

    pub fn tracks(&self) -> &[TrackList] {
        &self.tracks
    }

    /// Whether no slot has any songs.
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.songs.is_empty())
    }
}

/// Keep the UTF-8 lines of a descriptor; other lines are logged and dropped.
fn utf8_lines(bytes: &[u8], path: &Path) -> String {
    let mut text = String::with_capacity(bytes.len());
    for (number, line) in bytes.split(|b| *b == b'\n').enumerate() {
        match std::str::from_utf8(line) {
            Ok(line) => {
                text.push_str(line);
                text.push('\n');
            }
            Err(_) => tracing::warn!(
                "Skipping line {} of {}: not valid UTF-8",
                number + 1,
                path.display()
            ),
        }
    }
    text
}

/// `[trackN]` -> `N`
fn parse_track_header(line: &str) -> Option<usize> {
    line.strip_prefix("[track")?
        .strip_suffix(']')?
        .trim()
        .parse()
        .ok()
}
