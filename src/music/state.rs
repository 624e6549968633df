//! Stream controller state and status snapshot types.

use std::path::PathBuf;

use super::decoder::StreamSpec;
use super::sink::SourceState;

/// Lifecycle of the stream controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    /// No song open
    #[default]
    Idle,
    /// A song is open and feeding the buffer pool
    TrackOpen,
    /// The last play attempt found nothing openable in its track
    Exhausted,
}

/// Point-in-time view of the controller, for UIs and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamStatus {
    pub state: StreamState,
    /// Playlist track being played, if any
    pub track: Option<usize>,
    /// Song currently being decoded
    pub song: Option<PathBuf>,
    pub spec: Option<StreamSpec>,
    pub source: SourceState,
    pub paused: bool,
    /// Volume on the 0-100 scale
    pub volume: u8,
    /// Times playback had to be restarted after running dry
    pub underruns: u32,
}

impl StreamStatus {
    pub fn is_playing(&self) -> bool {
        self.track.is_some() && !self.paused
    }

    /// One-line description, e.g. `track 1: menu.ogg (44100Hz / 2ch)`.
    pub fn describe(&self) -> String {
        match (self.track, &self.song) {
            (Some(track), Some(song)) => {
                let name = song
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| song.display().to_string());
                match self.spec {
                    Some(spec) => format!("track {}: {} ({})", track, name, spec),
                    None => format!("track {}: {}", track, name),
                }
            }
            _ => "stopped".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> StreamStatus {
        StreamStatus {
            state: StreamState::TrackOpen,
            track: Some(1),
            song: Some(PathBuf::from("/music/menu.ogg")),
            spec: Some(StreamSpec {
                channels: 2,
                sample_rate: 44100,
            }),
            source: SourceState::Playing,
            paused: false,
            volume: 50,
            underruns: 0,
        }
    }

    #[test]
    fn test_describe_playing() {
        assert_eq!(status().describe(), "track 1: menu.ogg (44100Hz / 2ch)");
        assert!(status().is_playing());
    }

    #[test]
    fn test_describe_stopped() {
        let stopped = StreamStatus {
            track: None,
            ..status()
        };
        assert_eq!(stopped.describe(), "stopped");
        assert!(!stopped.is_playing());
    }
}
