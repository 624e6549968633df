//! bgm-stream - streaming background music for games.
//!
//! The [`music`] module is the subsystem a game embeds: open a
//! [`music::MusicPlayer`], call `play_track` when the scene changes and
//! `update` once per frame. [`config`] and [`cli`] wrap it into a small
//! standalone player.

pub mod cli;
pub mod config;
pub mod music;
#[cfg(test)]
pub mod test_utils;
