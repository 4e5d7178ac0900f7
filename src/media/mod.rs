// SPDX-License-Identifier: GPL-3.0-only

//! Media types shared by the reader, the GPU stages and the frame pump
//!
//! # Frames
//!
//! Decoded samples arrive as biplanar 4:2:0 pixel buffers (a full-resolution
//! luma plane followed by an interleaved half-resolution chroma plane).
//! [`Frame`] wraps such a buffer together with its presentation timestamp.
//!
//! # Orientation
//!
//! [`Orientation`] selects one of the four fixed display orientations and
//! maps to the rotation angle and output size used by the rotation stage.

pub mod frame;
pub mod orientation;
pub mod time;

pub use frame::{Frame, LockedFrame, Nv12Buffer, PixelBuffer, Plane};
pub use orientation::{Orientation, OrientationTransform, Rotation};
pub use time::MediaTime;
