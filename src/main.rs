//! bgm-stream - play, inspect and render game music playlists.

use bgm_stream::cli;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("bgm_stream=info".parse()?))
        .init();

    cli::run_command(&args)
}
