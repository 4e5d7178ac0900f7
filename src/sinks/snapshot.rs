// SPDX-License-Identifier: GPL-3.0-only

use crate::gpu::{Framebuffer, RenderContext, TextureFormat};
use crate::pipeline::ImageConsumer;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Consumer writing each received frame to `frame_NNNNN.png`
///
/// Readback and encoding happen on the GPU thread, so this sink slows the
/// pump down; it is meant for inspection, not for recording.
pub struct PngSnapshotSink {
    directory: PathBuf,
    written: AtomicUsize,
}

impl PngSnapshotSink {
    /// Write snapshots into `directory`, creating it if needed
    pub fn new(directory: impl Into<PathBuf>) -> std::io::Result<Self> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            written: AtomicUsize::new(0),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of PNG files written so far
    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    fn save(&self, framebuffer: &Framebuffer, context: &mut RenderContext) -> Result<PathBuf, String> {
        if framebuffer.format() != TextureFormat::Rgba {
            return Err(format!("Unsupported format {:?}", framebuffer.format()));
        }
        let pixels = context
            .read_pixels(framebuffer)
            .map_err(|e| format!("Failed to read frame: {}", e))?;
        let img = RgbaImage::from_raw(framebuffer.width(), framebuffer.height(), pixels)
            .ok_or("Failed to create RGBA image from frame data")?;

        let index = self.written.load(Ordering::SeqCst);
        let path = self.directory.join(format!("frame_{:05}.png", index));
        img.save_with_format(&path, image::ImageFormat::Png)
            .map_err(|e| format!("Failed to save {}: {}", path.display(), e))?;
        self.written.fetch_add(1, Ordering::SeqCst);
        Ok(path)
    }
}

impl ImageConsumer for PngSnapshotSink {
    fn new_framebuffer_available(
        &self,
        framebuffer: Framebuffer,
        _slot: usize,
        context: &mut RenderContext,
    ) {
        match self.save(&framebuffer, context) {
            Ok(path) => debug!(path = %path.display(), timestamp = ?framebuffer.timestamp(), "Saved frame"),
            Err(e) => warn!(error = %e, "Snapshot failed"),
        }
        framebuffer.unlock();
    }
}
