//! Command-line interface for bgm-stream.
//!
//! This module provides commands for playing, inspecting and rendering
//! playlist tracks outside the game.

mod commands;

pub use commands::{Cli, Commands, RenderSummary, render_track, run_command};
