// SPDX-License-Identifier: GPL-3.0-only

//! State owned by the GPU processing context

use super::{
    BackendKind, Framebuffer, FramebufferKey, FramebufferPool, PoolStats, ProgramId, QuadDraw,
    RenderBackend, TextureFormat,
};
use crate::errors::PipelineResult;
use crate::media::{Orientation, Plane};
use crate::shaders::ProgramSource;

/// Render backend plus framebuffer pool
///
/// Only reachable from jobs running on the [`super::ProcessingQueue`], so
/// every GPU operation in the pipeline is serialised.
pub struct RenderContext {
    backend: Box<dyn RenderBackend>,
    pool: FramebufferPool,
}

impl RenderContext {
    pub fn new(backend: Box<dyn RenderBackend>) -> Self {
        Self {
            backend,
            pool: FramebufferPool::new(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn adapter_name(&self) -> String {
        self.backend.adapter_name()
    }

    pub fn compile_program(&mut self, source: &ProgramSource) -> PipelineResult<ProgramId> {
        self.backend.compile_program(source)
    }

    /// Fetch a locked framebuffer from the pool
    pub fn acquire_framebuffer(
        &mut self,
        width: u32,
        height: u32,
        orientation: Orientation,
        texture_only: bool,
        format: TextureFormat,
    ) -> PipelineResult<Framebuffer> {
        self.pool.acquire(
            self.backend.as_mut(),
            FramebufferKey {
                width,
                height,
                orientation,
                texture_only,
                format,
            },
        )
    }

    pub fn upload_plane(&mut self, framebuffer: &Framebuffer, plane: Plane<'_>) -> PipelineResult<()> {
        self.backend.upload_plane(framebuffer.texture(), plane)
    }

    pub(crate) fn draw(&mut self, draw: &QuadDraw<'_>) -> PipelineResult<()> {
        self.backend.render_quad(draw)
    }

    /// Tightly packed texels of `framebuffer`, rows top to bottom
    pub fn read_pixels(&mut self, framebuffer: &Framebuffer) -> PipelineResult<Vec<u8>> {
        self.backend.read_pixels(framebuffer.texture())
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Release GPU memory held by buffers nobody has locked
    pub fn purge_unused_framebuffers(&mut self) -> usize {
        self.pool.purge_unused(self.backend.as_mut())
    }
}
