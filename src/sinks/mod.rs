// SPDX-License-Identifier: GPL-3.0-only

//! Ready-made frame consumers
//!
//! - [`FrameCollector`]: records what arrived and when, for diagnostics and
//!   tests
//! - [`PngSnapshotSink`]: writes every frame to disk as a PNG

mod collector;
mod snapshot;

pub use collector::{CollectedFrame, FrameCollector};
pub use snapshot::PngSnapshotSink;
