//! CLI command definitions and handlers.
//!
//! Each subcommand is implemented as a function that takes the parsed arguments
//! and returns an `anyhow::Result<()>`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::{self, Config};
use crate::music::{
    self, CodecSet, DecoderSession, MemorySink, MusicPlayer, SampleLayout, StreamState,
};

/// Interval between `update()` ticks while playing.
const TICK: Duration = Duration::from_millis(20);

/// Background music streamer
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: OS config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Play a playlist track on the audio device
    Play {
        /// Track slot to play
        #[arg(short, long, default_value = "1")]
        track: usize,
        /// Music directory (overrides the configured ones)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Volume (0-100)
        #[arg(long)]
        volume: Option<i32>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// List track slots and their songs
    Tracks {
        /// Music directory (overrides the configured ones)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Open one song and print its format
    Probe {
        /// Path to the song
        path: PathBuf,
    },
    /// Stream a track into a WAV file instead of the audio device
    Render {
        /// Track slot to render
        #[arg(short, long, default_value = "1")]
        track: usize,
        /// Output WAV file
        #[arg(short, long)]
        out: PathBuf,
        /// Length of audio to render
        #[arg(long, default_value = "30")]
        seconds: u64,
        /// Music directory (overrides the configured ones)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// List audio output devices
    Devices,
    /// Show the effective configuration
    Config {
        /// Save it to the config file
        #[arg(long)]
        write: bool,
    },
}

/// Run the parsed command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };

    match &cli.command {
        Commands::Play {
            track,
            dir,
            volume,
            seconds,
        } => cmd_play(with_dir(config, dir.as_deref()), *track, *volume, *seconds),
        Commands::Tracks { dir, json } => cmd_tracks(&with_dir(config, dir.as_deref()), *json),
        Commands::Probe { path } => cmd_probe(&config, path),
        Commands::Render {
            track,
            out,
            seconds,
            dir,
        } => cmd_render(&with_dir(config, dir.as_deref()), *track, out, *seconds),
        Commands::Devices => {
            cmd_devices();
            Ok(())
        }
        Commands::Config { write } => cmd_config(&config, cli.config.as_deref(), *write),
    }
}

/// Point the config at a single music directory.
fn with_dir(mut config: Config, dir: Option<&Path>) -> Config {
    if let Some(dir) = dir {
        config.music.user_dir = None;
        config.music.fallback_dir = dir.to_path_buf();
    }
    config
}

// ============================================================================
// Individual command implementations
// ============================================================================

fn cmd_play(
    config: Config,
    track: usize,
    volume: Option<i32>,
    seconds: Option<u64>,
) -> anyhow::Result<()> {
    let mut player = MusicPlayer::open_device(&config).context("Failed to start music")?;
    if let Some(volume) = volume {
        player.set_volume(volume);
    }

    player
        .play_track(track)
        .with_context(|| format!("Failed to play track {}", track))?;
    println!("{}", player.status().describe());

    let started = Instant::now();
    let limit = seconds.map(Duration::from_secs);
    let mut last = player.status().song;

    loop {
        std::thread::sleep(TICK);
        player.update();

        let status = player.status();
        if status.song != last {
            println!("{}", status.describe());
            last = status.song.clone();
        }
        if status.state == StreamState::Exhausted && status.source != music::SourceState::Playing {
            info!("Playlist exhausted");
            break;
        }
        if limit.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
    }

    let underruns = player.status().underruns;
    if underruns > 0 {
        warn!("{} underruns during playback", underruns);
    }
    player.close();
    Ok(())
}

#[derive(Serialize)]
struct TrackListing {
    track: usize,
    shuffle: bool,
    songs: Vec<PathBuf>,
}

fn cmd_tracks(config: &Config, json: bool) -> anyhow::Result<()> {
    let playlist = music::load_playlist(&config.music)?;
    let listing: Vec<TrackListing> = playlist
        .tracks()
        .iter()
        .enumerate()
        .map(|(track, list)| TrackListing {
            track,
            shuffle: list.shuffle,
            songs: list.songs.clone(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    for entry in &listing {
        let shuffle = if entry.shuffle { " (shuffle)" } else { "" };
        println!("[track{}]{}", entry.track, shuffle);
        if entry.songs.is_empty() {
            println!("  (empty)");
        }
        for song in &entry.songs {
            println!("  {}", song.display());
        }
    }
    Ok(())
}

fn cmd_probe(config: &Config, path: &Path) -> anyhow::Result<()> {
    let codecs = CodecSet::compiled(&config.stream.clone().validated());
    let mut session = DecoderSession::new();
    let spec = session.open(&codecs, path)?;
    println!("{}: {} ({:?})", path.display(), spec, spec.layout());
    session.close();
    Ok(())
}

fn cmd_render(config: &Config, track: usize, out: &Path, seconds: u64) -> anyhow::Result<()> {
    let mut player = MusicPlayer::open(config, MemorySink::new())?;
    let summary = render_track(&mut player, track, out, seconds)?;
    println!(
        "Rendered {} frames ({:.1}s at {}Hz, {}ch) to {}",
        summary.frames,
        summary.frames as f64 / summary.sample_rate as f64,
        summary.sample_rate,
        summary.channels,
        out.display()
    );
    Ok(())
}

fn cmd_devices() {
    let devices = music::list_audio_devices();
    if devices.is_empty() {
        println!("No audio output devices found");
    }
    for name in devices {
        println!("{}", name);
    }
}

fn cmd_config(config: &Config, path: Option<&Path>, write: bool) -> anyhow::Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if write {
        let saved = write_config(config, path)?;
        println!("# saved to {}", saved.display());
    }
    Ok(())
}

/// Save `config` to `path`, or to the default location when `path` is None.
fn write_config(config: &Config, path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match path {
        Some(path) => {
            config::save_to(config, path)?;
            Ok(path.to_path_buf())
        }
        None => {
            config::save(config)?;
            config::config_path().context("Could not determine config directory")
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// What [`render_track`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderSummary {
    pub frames: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Play `track` against a [`MemorySink`], writing every buffer the sink
/// "plays" to a 16-bit WAV file, until `seconds` of audio are written or
/// the track runs out.
///
/// The WAV format is taken from the first buffer. Later buffers with a
/// different channel layout are remixed; a different rate is written as-is.
pub fn render_track(
    player: &mut MusicPlayer<MemorySink>,
    track: usize,
    out: &Path,
    seconds: u64,
) -> anyhow::Result<RenderSummary> {
    player.play_track(track)?;

    let mut writer: Option<hound::WavWriter<_>> = None;
    let mut summary = RenderSummary {
        frames: 0,
        sample_rate: 0,
        channels: 0,
    };
    let mut warned_rate = false;

    loop {
        let played = player.controller_mut().sink_mut().consume(1);
        let Some(buffer) = played.into_iter().next() else {
            break;
        };

        if writer.is_none() {
            let spec = hound::WavSpec {
                channels: buffer.layout.channels(),
                sample_rate: buffer.rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            writer = Some(
                hound::WavWriter::create(out, spec)
                    .with_context(|| format!("Failed to create {}", out.display()))?,
            );
            summary.sample_rate = buffer.rate;
            summary.channels = spec.channels;
        }
        let Some(wav) = writer.as_mut() else {
            break;
        };

        if buffer.rate != summary.sample_rate && !warned_rate {
            warn!(
                "Song rate {}Hz differs from output {}Hz; writing unconverted",
                buffer.rate, summary.sample_rate
            );
            warned_rate = true;
        }

        let limit = seconds * summary.sample_rate as u64;
        for frame in remix(&buffer.data, buffer.layout, summary.channels) {
            if summary.frames >= limit {
                break;
            }
            for sample in frame {
                wav.write_sample(sample)?;
            }
            summary.frames += 1;
        }
        if summary.frames >= limit {
            break;
        }

        player.update();
    }

    if let Some(wav) = writer {
        wav.finalize()?;
    } else {
        anyhow::bail!("Track {} produced no audio", track);
    }
    player.stop();
    Ok(summary)
}

/// Split little-endian PCM into frames of `out_channels` samples.
fn remix(data: &[u8], layout: SampleLayout, out_channels: u16) -> Vec<Vec<i16>> {
    let samples: Vec<i16> = data
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();

    samples
        .chunks_exact(layout.channels() as usize)
        .map(|frame| match (frame.len(), out_channels) {
            (1, 2) => vec![frame[0], frame[0]],
            (2, 1) => vec![((frame[0] as i32 + frame[1] as i32) / 2) as i16],
            _ => frame.to_vec(),
        })
        .collect()
}
