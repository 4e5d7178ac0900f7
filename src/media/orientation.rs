// SPDX-License-Identifier: GPL-3.0-only

//! Display orientations and the rotations between them
//!
//! Source sensor frames are natively landscape. The rotation stage maps each
//! of the four orientations to a fixed angle and, for the two portrait
//! orientations, swaps the output width and height.

use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};
use std::str::FromStr;

/// Intended display orientation of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// Portrait, home edge down
    #[default]
    Upright,
    /// Portrait, rotated 180 degrees
    UpsideDown,
    /// Landscape, device rotated to the left
    RotatedLeft,
    /// Landscape, device rotated to the right
    RotatedRight,
}

/// Angle and dimension swap applied by the rotation stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationTransform {
    /// Rotation of the sampling coordinates in radians
    pub angle: f32,
    /// Whether output width/height are the input's height/width
    pub swaps_dimensions: bool,
}

impl OrientationTransform {
    /// Output framebuffer size for an input of `width` x `height`
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.swaps_dimensions {
            (height, width)
        } else {
            (width, height)
        }
    }
}

impl Orientation {
    /// All orientations, for iteration
    pub const ALL: [Orientation; 4] = [
        Orientation::Upright,
        Orientation::UpsideDown,
        Orientation::RotatedLeft,
        Orientation::RotatedRight,
    ];

    /// Fixed rotation table used by the rotation stage
    pub fn transform(&self) -> OrientationTransform {
        match self {
            Orientation::Upright => OrientationTransform {
                angle: FRAC_PI_2,
                swaps_dimensions: true,
            },
            Orientation::UpsideDown => OrientationTransform {
                angle: -FRAC_PI_2,
                swaps_dimensions: true,
            },
            Orientation::RotatedLeft => OrientationTransform {
                angle: PI,
                swaps_dimensions: false,
            },
            Orientation::RotatedRight => OrientationTransform {
                angle: 0.0,
                swaps_dimensions: false,
            },
        }
    }

    /// Clockwise quarter turns from upright
    fn quarter_turns(&self) -> u8 {
        match self {
            Orientation::Upright => 0,
            Orientation::RotatedRight => 1,
            Orientation::UpsideDown => 2,
            Orientation::RotatedLeft => 3,
        }
    }

    /// Rotation needed to present an image tagged with `self` in a
    /// framebuffer tagged with `target`
    pub fn rotation_needed_for(&self, target: Orientation) -> Rotation {
        match (target.quarter_turns() + 4 - self.quarter_turns()) % 4 {
            0 => Rotation::None,
            1 => Rotation::Clockwise,
            2 => Rotation::Rotate180,
            _ => Rotation::Counterclockwise,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Orientation::Upright => "upright",
            Orientation::UpsideDown => "upside-down",
            Orientation::RotatedLeft => "rotated-left",
            Orientation::RotatedRight => "rotated-right",
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "upright" | "portrait" => Ok(Orientation::Upright),
            "upside-down" | "portrait-upside-down" => Ok(Orientation::UpsideDown),
            "rotated-left" | "left" | "landscape-left" => Ok(Orientation::RotatedLeft),
            "rotated-right" | "right" | "landscape-right" => Ok(Orientation::RotatedRight),
            other => Err(format!(
                "Unknown orientation '{}' (expected upright, upside-down, rotated-left or rotated-right)",
                other
            )),
        }
    }
}

/// Quarter-turn rotation of texture coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    None,
    Clockwise,
    Counterclockwise,
    Rotate180,
}

impl Rotation {
    /// Texture coordinates for the quad corners, in vertex order
    /// (first row start, first row end, last row start, last row end)
    pub fn texture_coordinates(&self) -> [[f32; 2]; 4] {
        match self {
            Rotation::None => [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            Rotation::Counterclockwise => [[0.0, 1.0], [0.0, 0.0], [1.0, 1.0], [1.0, 0.0]],
            Rotation::Clockwise => [[1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [0.0, 1.0]],
            Rotation::Rotate180 => [[1.0, 1.0], [0.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
        }
    }
}
