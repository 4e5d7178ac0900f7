// SPDX-License-Identifier: GPL-3.0-only

//! GPU-owning side of the pipeline
//!
//! All GPU state lives behind the [`RenderBackend`] trait and is driven from a
//! single serial [`ProcessingQueue`]. Two backends are provided:
//!
//! - [`WgpuBackend`]: render pipelines on the system GPU
//! - [`SoftwareBackend`]: CPU reference renderer, used when no adapter is
//!   available and by tests
//!
//! Framebuffers are handed out by the [`FramebufferPool`] and reused once
//! their lock count drops to zero.

mod context;
mod framebuffer;
mod pool;
mod queue;
pub mod software;
pub mod wgpu_backend;

pub use context::RenderContext;
pub use framebuffer::{Framebuffer, FramebufferKey};
pub use pool::{FramebufferPool, PoolStats};
pub use queue::ProcessingQueue;
pub use software::SoftwareBackend;
pub use wgpu_backend::WgpuBackend;

/// Re-export wgpu for callers that share a device with the pipeline
pub use wgpu;

use crate::errors::PipelineResult;
use crate::media::Plane;
use crate::shaders::{ProgramSource, ShaderUniforms};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Opaque texture handle issued by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) u64);

/// Opaque compiled-program handle issued by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub(crate) u64);

/// Texel layouts used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Single 8-bit channel (luma plane)
    Luminance,
    /// Two interleaved 8-bit channels (chroma plane)
    LuminanceAlpha,
    /// 8-bit RGBA (converted and rotated frames)
    Rgba,
}

impl TextureFormat {
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Luminance => 1,
            TextureFormat::LuminanceAlpha => 2,
            TextureFormat::Rgba => 4,
        }
    }

    pub(crate) fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Luminance => wgpu::TextureFormat::R8Unorm,
            TextureFormat::LuminanceAlpha => wgpu::TextureFormat::Rg8Unorm,
            TextureFormat::Rgba => wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

/// Texture allocation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Whether the texture can be rendered into
    pub render_target: bool,
}

/// A texture bound to one input slot of a program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundTexture {
    pub texture: TextureId,
    /// Texture coordinates at the quad corners
    pub coordinates: [[f32; 2]; 4],
}

/// One full-frame quad draw
#[derive(Debug)]
pub struct QuadDraw<'a> {
    pub program: ProgramId,
    pub inputs: &'a [BoundTexture],
    pub uniforms: &'a ShaderUniforms,
    pub destination: TextureId,
    pub clear_color: [f32; 4],
}

/// Which implementation backs a render context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Wgpu,
    Software,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Wgpu => write!(f, "wgpu"),
            BackendKind::Software => write!(f, "software"),
        }
    }
}

/// Backend selection requested by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// GPU when an adapter is available, software renderer otherwise
    #[default]
    Auto,
    Wgpu,
    Software,
}

impl std::str::FromStr for BackendPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(BackendPreference::Auto),
            "wgpu" | "gpu" => Ok(BackendPreference::Wgpu),
            "software" | "cpu" => Ok(BackendPreference::Software),
            other => Err(format!("Unknown backend '{}'", other)),
        }
    }
}

/// Operations the GPU-owning context performs
///
/// Implementations are only ever driven from one thread at a time (the
/// processing queue), so they need no internal synchronisation.
pub trait RenderBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Human-readable adapter name for diagnostics
    fn adapter_name(&self) -> String;

    /// Compile a vertex/fragment program pair
    fn compile_program(&mut self, source: &ProgramSource) -> PipelineResult<ProgramId>;

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> PipelineResult<TextureId>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Replace the contents of `texture` with a CPU plane
    fn upload_plane(&mut self, texture: TextureId, plane: Plane<'_>) -> PipelineResult<()>;

    /// Clear the destination, then draw a full-frame quad into it
    fn render_quad(&mut self, draw: &QuadDraw<'_>) -> PipelineResult<()>;

    /// Tightly packed texel bytes of `texture`, rows top to bottom
    fn read_pixels(&mut self, texture: TextureId) -> PipelineResult<Vec<u8>>;
}

/// Create a render backend according to `preference`
///
/// `Auto` tries the GPU first and falls back to the software renderer.
pub fn create_backend(preference: BackendPreference) -> PipelineResult<Box<dyn RenderBackend>> {
    match preference {
        BackendPreference::Software => Ok(Box::new(SoftwareBackend::new())),
        BackendPreference::Wgpu => {
            let backend = pollster::block_on(WgpuBackend::new("movie_input"))?;
            Ok(Box::new(backend))
        }
        BackendPreference::Auto => match pollster::block_on(WgpuBackend::new("movie_input")) {
            Ok(backend) => Ok(Box::new(backend)),
            Err(e) => {
                debug!(error = %e, "GPU backend unavailable, falling back to software renderer");
                info!("Using software renderer");
                Ok(Box::new(SoftwareBackend::new()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(TextureFormat::Luminance.bytes_per_pixel(), 1);
        assert_eq!(TextureFormat::LuminanceAlpha.bytes_per_pixel(), 2);
        assert_eq!(TextureFormat::Rgba.bytes_per_pixel(), 4);
    }

    #[test]
    fn test_backend_preference_parse() {
        assert_eq!("auto".parse(), Ok(BackendPreference::Auto));
        assert_eq!("GPU".parse(), Ok(BackendPreference::Wgpu));
        assert_eq!("cpu".parse(), Ok(BackendPreference::Software));
        assert!("opengl".parse::<BackendPreference>().is_err());
    }

    #[test]
    fn test_software_preference_never_touches_gpu() {
        let backend = create_backend(BackendPreference::Software).unwrap();
        assert_eq!(backend.kind(), BackendKind::Software);
    }
}
