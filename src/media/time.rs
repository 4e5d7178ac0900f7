// SPDX-License-Identifier: GPL-3.0-only

//! Rational presentation timestamps

use serde::{Deserialize, Serialize};
use std::ops::Sub;

/// A presentation time expressed as `value / timescale` seconds
///
/// Timestamps from containers are rational; keeping them exact avoids drift
/// when frame deltas are computed over long streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    /// Time zero (stream start)
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a new timestamp. A zero timescale is treated as one.
    pub fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: timescale.max(1),
        }
    }

    /// Timestamp of frame `index` in a constant-rate stream of `fps` frames per second
    pub fn from_frame_index(index: u64, fps: u32) -> Self {
        Self::new(index as i64, fps)
    }

    /// Timestamp in nanoseconds (GStreamer clock units)
    pub fn from_nanos(nanos: u64) -> Self {
        Self::new(nanos as i64, 1_000_000_000)
    }

    /// Value in seconds
    pub fn seconds(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Convert to another timescale, rounding to the nearest tick
    pub fn convert_scale(&self, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return *self;
        }
        let scaled = (self.value as i128 * timescale as i128 * 2 + self.timescale as i128)
            .div_euclid(self.timescale as i128 * 2);
        Self::new(scaled as i64, timescale)
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    /// Difference expressed in the left-hand side's timescale
    fn sub(self, rhs: MediaTime) -> MediaTime {
        let rhs = rhs.convert_scale(self.timescale);
        MediaTime::new(self.value - rhs.value, self.timescale)
    }
}

impl std::fmt::Display for MediaTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.seconds())
    }
}
