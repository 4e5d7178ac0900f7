// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame processing time statistics

use std::time::Duration;
use tracing::info;

/// Running frame processing statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BenchmarkStats {
    /// Frames measured so far
    pub frames: u64,
    /// Mean processing time over all measured frames
    pub average: Duration,
    /// Processing time of the most recent frame
    pub last: Duration,
    total: Duration,
}

impl BenchmarkStats {
    /// Add one frame's processing time and log the running figures
    pub fn record(&mut self, frame_time: Duration) {
        self.frames += 1;
        self.total += frame_time;
        self.last = frame_time;
        self.average = self.total.div_f64(self.frames as f64);

        info!(
            frames = self.frames,
            average_ms = self.average.as_secs_f64() * 1000.0,
            current_ms = frame_time.as_secs_f64() * 1000.0,
            "Frame processing time"
        );
    }
}
