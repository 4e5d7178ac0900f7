// SPDX-License-Identifier: GPL-3.0-only

use clap::{Args, Parser, Subcommand};
use movie_input::constants::synthetic;
use movie_input::{BackendPreference, ConversionMatrix, Orientation};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "movie-input")]
#[command(about = "Play NV12 movie frames through the GPU conversion and rotation pipeline")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every playback command
#[derive(Args, Debug, Clone)]
pub struct PlaybackArgs {
    /// JSON pump configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display orientation (upright, upside-down, rotated-left, rotated-right)
    #[arg(short, long)]
    orientation: Option<Orientation>,

    /// Pace playback to the stream's timestamps
    #[arg(long)]
    actual_speed: bool,

    /// Request looped playback (accepted, the stream still ends once)
    #[arg(long = "loop")]
    loop_playback: bool,

    /// Log per-frame processing times
    #[arg(long)]
    benchmark: bool,

    /// Render backend (auto, wgpu, software)
    #[arg(long)]
    backend: Option<BackendPreference>,

    /// YUV to RGB matrix (bt601-full, bt601-video, bt709-video)
    #[arg(long)]
    matrix: Option<ConversionMatrix>,

    /// Write every published frame as a PNG into this directory
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a generated colour-bar test pattern
    Synthetic {
        /// Number of frames to generate
        #[arg(short, long, default_value_t = synthetic::FRAMES)]
        frames: usize,

        #[arg(long, default_value_t = synthetic::WIDTH)]
        width: u32,

        #[arg(long, default_value_t = synthetic::HEIGHT)]
        height: u32,

        /// Frame rate of the generated timestamps
        #[arg(long, default_value_t = synthetic::FPS)]
        fps: u32,

        #[command(flatten)]
        playback: PlaybackArgs,
    },

    /// Play a movie file (requires the `gstreamer` feature)
    Play {
        /// Path to the movie file
        path: PathBuf,

        #[command(flatten)]
        playback: PlaybackArgs,
    },

    /// Show which render backend would be used
    Adapters {
        /// Render backend (auto, wgpu, software)
        #[arg(long, default_value = "auto")]
        backend: BackendPreference,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=movie_input=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Synthetic {
            frames,
            width,
            height,
            fps,
            playback,
        } => cli::play_synthetic(frames, width, height, fps, &playback),
        Commands::Play { path, playback } => cli::play_file(&path, &playback),
        Commands::Adapters { backend } => cli::show_adapters(backend),
    }
}
