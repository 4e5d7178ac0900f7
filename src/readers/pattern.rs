// SPDX-License-Identifier: GPL-3.0-only

//! Generated NV12 test pattern

use crate::media::{Frame, LockedFrame, MediaTime, Nv12Buffer};

/// Full-range YUV values of the eight colour bars, left to right:
/// white, yellow, cyan, green, magenta, red, blue, black
const BARS: [(u8, u8, u8); 8] = [
    (255, 128, 128),
    (226, 0, 149),
    (179, 170, 0),
    (150, 44, 21),
    (105, 212, 235),
    (76, 85, 255),
    (29, 255, 107),
    (0, 128, 128),
];

/// Pixels the luma ramp moves per frame
const RAMP_STEP: u32 = 8;

fn bar_at(x: u32, width: u32) -> (u8, u8, u8) {
    let index = (x as usize * BARS.len()) / width.max(1) as usize;
    BARS[index.min(BARS.len() - 1)]
}

/// Colour bars over the top three quarters and a horizontally moving grey
/// ramp along the bottom quarter
fn pattern_frame(width: u32, height: u32, index: u64) -> Vec<u8> {
    let (chroma_width, chroma_height) = LockedFrame::chroma_size(width, height);
    let y_size = width as usize * height as usize;
    let mut data = vec![0u8; y_size + (chroma_width * chroma_height * 2) as usize];
    let ramp_start = height - height / 4;
    let shift = (index * RAMP_STEP as u64 % width.max(1) as u64) as u32;

    let (luma, chroma) = data.split_at_mut(y_size);
    for y in 0..height {
        let row = &mut luma[(y * width) as usize..((y + 1) * width) as usize];
        for (x, value) in row.iter_mut().enumerate() {
            let x = x as u32;
            *value = if y >= ramp_start {
                (((x + shift) % width) * 255 / (width - 1).max(1)) as u8
            } else {
                bar_at(x, width).0
            };
        }
    }

    for cy in 0..chroma_height {
        for cx in 0..chroma_width {
            let offset = ((cy * chroma_width + cx) * 2) as usize;
            let (u, v) = if cy * 2 >= ramp_start {
                (128, 128)
            } else {
                let (_, u, v) = bar_at(cx * 2, width);
                (u, v)
            };
            chroma[offset] = u;
            chroma[offset + 1] = v;
        }
    }

    data
}

/// `frames` NV12 frames of a `width` x `height` test pattern at `fps`
pub fn test_pattern(width: u32, height: u32, frames: usize, fps: u32) -> Vec<Frame> {
    (0..frames as u64)
        .map(|index| {
            Frame::new(
                width,
                height,
                MediaTime::from_frame_index(index, fps),
                Nv12Buffer::new(width, height, pattern_frame(width, height, index)),
            )
        })
        .collect()
}
