// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline-wide constants

/// Background colour every render destination is cleared to (RGBA)
pub const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Maximum number of input textures a shader program may bind
pub const MAX_SHADER_INPUTS: usize = 4;

/// Thread names for the two execution contexts
pub mod threads {
    /// Serial context owning all GPU state
    pub const PROCESSING: &str = "movie-input-gpu";
    /// Context hosting the blocking read loop
    pub const READ_LOOP: &str = "movie-input-reader";
}

/// Defaults for the generated test pattern source
pub mod synthetic {
    pub const WIDTH: u32 = 640;
    pub const HEIGHT: u32 = 480;
    pub const FRAMES: usize = 90;
    pub const FPS: u32 = 30;
}
