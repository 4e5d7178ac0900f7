// SPDX-License-Identifier: GPL-3.0-only

use crate::errors::ConfigResult;
use crate::gpu::BackendPreference;
use crate::media::Orientation;
use crate::shaders::ConversionMatrix;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Frame pump configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Sleep between frames so playback follows presentation timestamps
    pub play_at_actual_speed: bool,
    /// Accepted for compatibility; playback does not restart
    #[serde(rename = "loop")]
    pub loop_playback: bool,
    /// Display orientation applied by the rotation stage
    pub orientation: Orientation,
    /// Log per-frame processing times
    pub run_benchmark: bool,
    /// YUV to RGB matrix used by the conversion stage
    pub conversion_matrix: ConversionMatrix,
    /// Render backend selection
    pub backend: BackendPreference,
}

impl PumpConfig {
    /// Read a configuration from a JSON file. Missing fields take their
    /// defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        debug!(path = %path.display(), ?config, "Loaded pump configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn with_orientation(mut self, orientation: Orientation) -> Self {
        self.orientation = orientation;
        self
    }

    pub fn with_actual_speed(mut self, enabled: bool) -> Self {
        self.play_at_actual_speed = enabled;
        self
    }

    pub fn with_loop(mut self, enabled: bool) -> Self {
        self.loop_playback = enabled;
        self
    }

    pub fn with_benchmark(mut self, enabled: bool) -> Self {
        self.run_benchmark = enabled;
        self
    }

    pub fn with_conversion_matrix(mut self, matrix: ConversionMatrix) -> Self {
        self.conversion_matrix = matrix;
        self
    }

    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }
}
