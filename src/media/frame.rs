// SPDX-License-Identifier: GPL-3.0-only

//! Decoded video frames handed over by the reader

use super::time::MediaTime;
use crate::errors::FrameError;
use std::sync::Arc;

/// Borrowed view of one plane of a locked pixel buffer
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows
    pub stride: u32,
}

impl<'a> Plane<'a> {
    /// Check that the plane holds `rows` rows of `row_bytes` bytes each
    pub fn validate(&self, index: usize, row_bytes: u32, rows: u32) -> Result<(), FrameError> {
        if rows == 0 || row_bytes == 0 {
            return Ok(());
        }
        let required = self.stride as usize * (rows as usize - 1) + row_bytes as usize;
        if self.stride < row_bytes || self.data.len() < required {
            return Err(FrameError::MissingPlane(index));
        }
        Ok(())
    }
}

/// Planar pixel storage produced by a reader
///
/// Memory must be locked before the planes are read on the CPU and unlocked
/// once they have been uploaded. Readers backed by mapped memory implement
/// the lock hooks; plain owned buffers can rely on the defaults.
pub trait PixelBuffer: Send {
    /// Make the base address valid for CPU access
    fn lock_base_address(&mut self) -> Result<(), FrameError> {
        Ok(())
    }

    /// Release CPU access taken by [`PixelBuffer::lock_base_address`]
    fn unlock_base_address(&mut self) {}

    /// Plane `index` (0 = luma, 1 = interleaved chroma). Only valid while locked.
    fn plane(&self, index: usize) -> Option<Plane<'_>>;

    /// Release the underlying sample back to its producer
    fn invalidate(&mut self) {}
}

/// A decoded frame: pixel buffer plus presentation timestamp
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub presentation_time: MediaTime,
    buffer: Option<Box<dyn PixelBuffer>>,
}

impl Frame {
    pub fn new<B>(width: u32, height: u32, presentation_time: MediaTime, buffer: B) -> Self
    where
        B: PixelBuffer + 'static,
    {
        Self {
            width,
            height,
            presentation_time,
            buffer: Some(Box::new(buffer)),
        }
    }

    /// A sample whose image buffer is missing. Processing it fails and the
    /// frame is dropped.
    pub fn without_image_buffer(width: u32, height: u32, presentation_time: MediaTime) -> Self {
        Self {
            width,
            height,
            presentation_time,
            buffer: None,
        }
    }

    pub fn has_image_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    /// Lock the pixel buffer for CPU access. The lock is released when the
    /// returned guard is dropped.
    pub fn lock(&mut self) -> Result<LockedFrame<'_>, FrameError> {
        let buffer = self
            .buffer
            .as_deref_mut()
            .ok_or(FrameError::MissingImageBuffer)?;
        buffer.lock_base_address()?;
        Ok(LockedFrame {
            buffer,
            width: self.width,
            height: self.height,
        })
    }

    /// Release the frame's sample immediately
    pub fn invalidate(mut self) {
        if let Some(buffer) = self.buffer.as_deref_mut() {
            buffer.invalidate();
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("presentation_time", &self.presentation_time)
            .field("has_image_buffer", &self.buffer.is_some())
            .finish()
    }
}

/// A frame whose pixel buffer is locked for CPU access
pub struct LockedFrame<'a> {
    buffer: &'a mut (dyn PixelBuffer + 'static),
    width: u32,
    height: u32,
}

impl<'a> LockedFrame<'a> {
    /// Size of the chroma plane for a 4:2:0 frame of `width` x `height`
    ///
    /// Odd dimensions are truncated: a 101x101 frame has a 50x50 chroma plane.
    pub fn chroma_size(width: u32, height: u32) -> (u32, u32) {
        (width / 2, height / 2)
    }

    /// Full-resolution luma plane (one byte per pixel)
    pub fn luma(&self) -> Result<Plane<'_>, FrameError> {
        let plane = self.buffer.plane(0).ok_or(FrameError::MissingPlane(0))?;
        plane.validate(0, self.width, self.height)?;
        Ok(plane)
    }

    /// Interleaved chroma plane (two bytes per sample)
    pub fn chroma(&self) -> Result<Plane<'_>, FrameError> {
        let (width, height) = Self::chroma_size(self.width, self.height);
        let plane = self.buffer.plane(1).ok_or(FrameError::MissingPlane(1))?;
        plane.validate(1, width * 2, height)?;
        Ok(plane)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for LockedFrame<'_> {
    fn drop(&mut self) {
        self.buffer.unlock_base_address();
    }
}

/// Owned NV12 buffer: luma plane followed by the interleaved UV plane
#[derive(Debug, Clone)]
pub struct Nv12Buffer {
    data: Arc<[u8]>,
    y_stride: u32,
    uv_stride: u32,
    uv_offset: usize,
}

impl Nv12Buffer {
    /// Tightly packed buffer for a `width` x `height` frame
    pub fn new(width: u32, height: u32, data: impl Into<Arc<[u8]>>) -> Self {
        let uv_stride = (width / 2) * 2;
        Self::with_layout(data, width, uv_stride, width as usize * height as usize)
    }

    /// Buffer with explicit strides and chroma offset
    pub fn with_layout(
        data: impl Into<Arc<[u8]>>,
        y_stride: u32,
        uv_stride: u32,
        uv_offset: usize,
    ) -> Self {
        Self {
            data: data.into(),
            y_stride,
            uv_stride,
            uv_offset,
        }
    }

    /// Buffer filled with a single YUV colour
    pub fn solid(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let (chroma_width, chroma_height) = LockedFrame::chroma_size(width, height);
        let y_size = width as usize * height as usize;
        let mut data = vec![y; y_size + (chroma_width * chroma_height * 2) as usize];
        for pair in data[y_size..].chunks_exact_mut(2) {
            pair[0] = u;
            pair[1] = v;
        }
        Self::new(width, height, data)
    }
}

impl PixelBuffer for Nv12Buffer {
    fn plane(&self, index: usize) -> Option<Plane<'_>> {
        let offset = self.uv_offset.min(self.data.len());
        match index {
            0 => Some(Plane {
                data: &self.data[..offset],
                stride: self.y_stride,
            }),
            1 => Some(Plane {
                data: &self.data[offset..],
                stride: self.uv_stride,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        locks: AtomicUsize,
        unlocks: AtomicUsize,
        invalidations: AtomicUsize,
    }

    struct TrackedBuffer {
        inner: Nv12Buffer,
        counters: Arc<Counters>,
    }

    impl PixelBuffer for TrackedBuffer {
        fn lock_base_address(&mut self) -> Result<(), FrameError> {
            self.counters.locks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unlock_base_address(&mut self) {
            self.counters.unlocks.fetch_add(1, Ordering::SeqCst);
        }

        fn plane(&self, index: usize) -> Option<Plane<'_>> {
            self.inner.plane(index)
        }

        fn invalidate(&mut self) {
            self.counters.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_chroma_size_truncates_odd_dimensions() {
        assert_eq!(LockedFrame::chroma_size(101, 101), (50, 50));
        assert_eq!(LockedFrame::chroma_size(640, 480), (320, 240));
        assert_eq!(LockedFrame::chroma_size(1, 1), (0, 0));
    }

    #[test]
    fn test_lock_guard_unlocks_on_drop() {
        let counters = Arc::new(Counters::default());
        let mut frame = Frame::new(
            4,
            4,
            MediaTime::ZERO,
            TrackedBuffer {
                inner: Nv12Buffer::solid(4, 4, 16, 128, 128),
                counters: Arc::clone(&counters),
            },
        );

        {
            let locked = frame.lock().unwrap();
            assert_eq!(locked.luma().unwrap().data.len(), 16);
            assert_eq!(locked.chroma().unwrap().data.len(), 8);
            assert_eq!(counters.unlocks.load(Ordering::SeqCst), 0);
        }

        assert_eq!(counters.locks.load(Ordering::SeqCst), 1);
        assert_eq!(counters.unlocks.load(Ordering::SeqCst), 1);

        frame.invalidate();
        assert_eq!(counters.invalidations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_image_buffer() {
        let mut frame = Frame::without_image_buffer(4, 4, MediaTime::ZERO);
        assert!(!frame.has_image_buffer());
        assert_eq!(frame.lock().err(), Some(FrameError::MissingImageBuffer));
    }

    #[test]
    fn test_short_plane_is_rejected() {
        let mut frame = Frame::new(4, 4, MediaTime::ZERO, Nv12Buffer::new(4, 4, vec![0u8; 18]));
        let locked = frame.lock().unwrap();
        assert!(locked.luma().is_ok());
        assert_eq!(locked.chroma().err(), Some(FrameError::MissingPlane(1)));
    }

    #[test]
    fn test_strided_layout() {
        // 4x2 luma with 8-byte stride, chroma 2x1 pairs with 8-byte stride
        let data = vec![0u8; 8 * 2 + 8];
        let mut frame = Frame::new(
            4,
            2,
            MediaTime::ZERO,
            Nv12Buffer::with_layout(data, 8, 8, 16),
        );
        let locked = frame.lock().unwrap();
        assert_eq!(locked.luma().unwrap().stride, 8);
        assert_eq!(locked.chroma().unwrap().stride, 8);
    }
}
