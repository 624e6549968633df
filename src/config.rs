//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\bgm-stream\config.toml
//! - macOS: ~/Library/Application Support/bgm-stream/config.toml
//! - Linux: ~/.config/bgm-stream/config.toml
//!
//! ```toml
//! [music]
//! user_dir = "/home/me/.game/music"
//! fallback_dir = "music"
//!
//! [audio]
//! volume = 50
//!
//! [stream]
//! buffer_count = 6
//! buffer_size = 16384
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::music::playlist::{DEFAULT_TRACK_COUNT, PLAYLIST_FILE};
pub use crate::music::stream::StreamConfig;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where playlists and songs are found
    pub music: MusicConfig,

    /// Output device settings
    pub audio: AudioConfig,

    /// Buffer pool tuning
    pub stream: StreamConfig,
}

impl Config {
    /// Replace out-of-range values with defaults.
    pub fn validated(mut self) -> Self {
        self.stream = self.stream.validated();
        if self.audio.volume > 100 {
            tracing::warn!("volume {} is above 100, clamping", self.audio.volume);
            self.audio.volume = 100;
        }
        if self.music.track_count == 0 {
            tracing::warn!("track_count must be at least 1, using {}", DEFAULT_TRACK_COUNT);
            self.music.track_count = DEFAULT_TRACK_COUNT;
        }
        self
    }
}

/// Music directory settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    /// Per-user music directory, searched first
    pub user_dir: Option<PathBuf>,

    /// Music directory shipped with the game
    pub fallback_dir: PathBuf,

    /// Playlist descriptor file name inside each directory
    pub playlist_file: String,

    /// Number of track slots
    pub track_count: usize,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            user_dir: None,
            fallback_dir: PathBuf::from("music"),
            playlist_file: PLAYLIST_FILE.to_string(),
            track_count: DEFAULT_TRACK_COUNT,
        }
    }
}

impl MusicConfig {
    /// Directories to read playlists from, in order.
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::with_capacity(2);
        if let Some(dir) = &self.user_dir {
            dirs.push(dir.clone());
        }
        if self.user_dir.as_ref() != Some(&self.fallback_dir) {
            dirs.push(self.fallback_dir.clone());
        }
        dirs
    }
}

/// Audio output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Selected output device name (empty = system default)
    pub output_device: String,

    /// Initial volume (0 - 100)
    pub volume: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            output_device: String::new(),
            volume: 50,
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bgm-stream"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from the default location.
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from `path`, falling back to defaults.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<Config>(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config.validated()
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to the default location.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

/// Save configuration to `path`, creating its directory if needed.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write to temp, then rename
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
