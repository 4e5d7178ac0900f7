// SPDX-License-Identifier: GPL-3.0-only

//! Real-time playback pacing
//!
//! Compares the presentation-time delta between two frames with the
//! wall-clock time that actually passed and sleeps off the difference, so
//! playback runs at the speed the stream was recorded at.

use crate::media::MediaTime;
use std::thread;
use std::time::{Duration, Instant};
use tracing::trace;

/// Pacing state carried across frames of one pump
#[derive(Debug, Clone)]
pub struct FramePacer {
    previous_frame_time: MediaTime,
    previous_actual_frame_time: Instant,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            previous_frame_time: MediaTime::ZERO,
            previous_actual_frame_time: Instant::now(),
        }
    }

    /// Delay needed before a frame at `sample_time` may be processed at `now`
    ///
    /// `None` when the stream is already behind the wall clock.
    pub fn delay(&self, sample_time: MediaTime, now: Instant) -> Option<Duration> {
        let frame_delta = (sample_time - self.previous_frame_time).seconds();
        let actual_delta = now
            .saturating_duration_since(self.previous_actual_frame_time)
            .as_secs_f64();

        if frame_delta > actual_delta {
            Some(Duration::from_secs_f64(frame_delta - actual_delta))
        } else {
            None
        }
    }

    /// Remember `sample_time` as the last frame handed on at `now`
    pub fn record(&mut self, sample_time: MediaTime, now: Instant) {
        self.previous_frame_time = sample_time;
        self.previous_actual_frame_time = now;
    }

    /// Sleep the calling thread until the frame at `sample_time` is due
    pub fn pace(&mut self, sample_time: MediaTime) {
        if let Some(delay) = self.delay(sample_time, Instant::now()) {
            trace!(delay_us = delay.as_micros() as u64, pts = %sample_time, "Pacing frame");
            thread::sleep(delay);
        }
        self.record(sample_time, Instant::now());
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}
