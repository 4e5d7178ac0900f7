// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for playback
//!
//! This module provides command-line functionality for:
//! - Playing a generated test pattern
//! - Playing a movie file
//! - Reporting the render backend

use crate::PlaybackArgs;
use movie_input::gpu::create_backend;
use movie_input::pipeline::BenchmarkStats;
use movie_input::readers::{MemoryReader, MovieReader, test_pattern};
use movie_input::sinks::{FrameCollector, PngSnapshotSink};
use movie_input::{BackendPreference, FramePump, PumpConfig, PumpState};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Build the effective configuration: file first, then flags
fn resolve_config(args: &PlaybackArgs) -> Result<PumpConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => PumpConfig::load(path)?,
        None => PumpConfig::default(),
    };
    if let Some(orientation) = args.orientation {
        config = config.with_orientation(orientation);
    }
    if args.actual_speed {
        config = config.with_actual_speed(true);
    }
    if args.loop_playback {
        config = config.with_loop(true);
    }
    if args.benchmark {
        config = config.with_benchmark(true);
    }
    if let Some(backend) = args.backend {
        config = config.with_backend(backend);
    }
    if let Some(matrix) = args.matrix {
        config = config.with_conversion_matrix(matrix);
    }
    Ok(config)
}

/// Play a generated test pattern
pub fn play_synthetic(
    frames: usize,
    width: u32,
    height: u32,
    fps: u32,
    args: &PlaybackArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    if width == 0 || height == 0 || fps == 0 {
        return Err("Width, height and fps must be non-zero".into());
    }
    println!(
        "Generating {} frames of {}x{} at {} fps",
        frames, width, height, fps
    );
    let reader = MemoryReader::new(test_pattern(width, height, frames, fps));
    run(Box::new(reader), args)
}

/// Play a movie file through the GStreamer reader
#[cfg(feature = "gstreamer")]
pub fn play_file(path: &Path, args: &PlaybackArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("File not found: {}", path.display()).into());
    }
    let reader = movie_input::readers::GstMovieReader::new(path)?;
    println!("Playing: {}", path.display());
    run(Box::new(reader), args)
}

#[cfg(not(feature = "gstreamer"))]
pub fn play_file(path: &Path, _args: &PlaybackArgs) -> Result<(), Box<dyn std::error::Error>> {
    Err(format!(
        "Cannot play {}: built without the `gstreamer` feature",
        path.display()
    )
    .into())
}

/// Report the backend a pump would render with
pub fn show_adapters(preference: BackendPreference) -> Result<(), Box<dyn std::error::Error>> {
    let backend = create_backend(preference)?;
    println!("Backend: {}", backend.kind());
    println!("Adapter: {}", backend.adapter_name());
    Ok(())
}

fn run(reader: Box<dyn MovieReader>, args: &PlaybackArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = resolve_config(args)?;
    let mut pump = FramePump::with_reader(reader, config)?;
    println!(
        "Rendering on {} ({}), orientation {}",
        pump.queue().backend_kind(),
        pump.queue().adapter_name(),
        config.orientation
    );

    let collector = Arc::new(FrameCollector::new());
    pump.add_target(collector.clone(), 0);
    if let Some(dir) = &args.snapshot_dir {
        pump.add_target(Arc::new(PngSnapshotSink::new(dir)?), 0);
        println!("Writing snapshots to {}", dir.display());
    }

    let started = Instant::now();
    pump.start(Some(Box::new(|| println!("Playback complete"))));
    pump.wait();
    let elapsed = started.elapsed();

    let frames = collector.frames();
    if let Some(last) = frames.last() {
        println!("Output size: {}x{}", last.width, last.height);
    }
    println!(
        "Published {} frames in {:.2}s",
        frames.len(),
        elapsed.as_secs_f64()
    );
    if config.run_benchmark {
        print_benchmark(&pump.benchmark());
    }

    match pump.state() {
        PumpState::Completed => Ok(()),
        state => Err(format!("Playback ended in state {:?}", state).into()),
    }
}

fn print_benchmark(stats: &BenchmarkStats) {
    println!(
        "Average frame time: {:.3} ms over {} frames",
        stats.average.as_secs_f64() * 1000.0,
        stats.frames
    );
    println!(
        "Last frame time: {:.3} ms",
        stats.last.as_secs_f64() * 1000.0
    );
}
