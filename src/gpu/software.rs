// SPDX-License-Identifier: GPL-3.0-only

//! CPU reference renderer
//!
//! Mirrors the wgpu backend's behaviour closely enough for tests and for
//! machines without a usable adapter: textures are plain byte vectors,
//! sampling is bilinear with clamp-to-edge addressing, and each program's
//! fragment stage runs as a CPU function per destination pixel.

use super::{
    BackendKind, ProgramId, QuadDraw, RenderBackend, TextureDescriptor, TextureFormat, TextureId,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::Plane;
use crate::shaders::{FragmentInput, ProgramSource, TextureSampler};
use std::collections::HashMap;
use tracing::debug;

struct SoftwareTexture {
    descriptor: TextureDescriptor,
    data: Vec<u8>,
}

impl SoftwareTexture {
    fn new(descriptor: TextureDescriptor) -> Self {
        let len = descriptor.width as usize
            * descriptor.height as usize
            * descriptor.format.bytes_per_pixel() as usize;
        Self {
            descriptor,
            data: vec![0; len],
        }
    }

    /// Texel at integer coordinates, expanded the way the GPU exposes it
    /// (missing channels read as 0, missing alpha as 1)
    fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let bpp = self.descriptor.format.bytes_per_pixel() as usize;
        let offset = (y as usize * self.descriptor.width as usize + x as usize) * bpp;
        let px = &self.data[offset..offset + bpp];
        let norm = |v: u8| v as f32 / 255.0;
        match self.descriptor.format {
            TextureFormat::Luminance => [norm(px[0]), 0.0, 0.0, 1.0],
            TextureFormat::LuminanceAlpha => [norm(px[0]), norm(px[1]), 0.0, 1.0],
            TextureFormat::Rgba => [norm(px[0]), norm(px[1]), norm(px[2]), norm(px[3])],
        }
    }

    fn store(&mut self, x: u32, y: u32, color: [f32; 4]) {
        let bpp = self.descriptor.format.bytes_per_pixel() as usize;
        let offset = (y as usize * self.descriptor.width as usize + x as usize) * bpp;
        for (channel, value) in color.iter().take(bpp).enumerate() {
            self.data[offset + channel] = (value.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
}

impl TextureSampler for SoftwareTexture {
    fn sample(&self, coordinate: [f32; 2]) -> [f32; 4] {
        let width = self.descriptor.width;
        let height = self.descriptor.height;
        let x = coordinate[0] * width as f32 - 0.5;
        let y = coordinate[1] * height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;

        let clamp_x = |v: f32| (v as i64).clamp(0, width as i64 - 1) as u32;
        let clamp_y = |v: f32| (v as i64).clamp(0, height as i64 - 1) as u32;
        let (xa, xb) = (clamp_x(x0), clamp_x(x0 + 1.0));
        let (ya, yb) = (clamp_y(y0), clamp_y(y0 + 1.0));

        let top_left = self.texel(xa, ya);
        let top_right = self.texel(xb, ya);
        let bottom_left = self.texel(xa, yb);
        let bottom_right = self.texel(xb, yb);

        let mut out = [0.0; 4];
        for c in 0..4 {
            let top = top_left[c] + (top_right[c] - top_left[c]) * fx;
            let bottom = bottom_left[c] + (bottom_right[c] - bottom_left[c]) * fx;
            out[c] = top + (bottom - top) * fy;
        }
        out
    }
}

/// Bilinear interpolation of the four quad corners at normalized
/// destination position (s, t)
fn interpolate_corners(corners: &[[f32; 2]; 4], s: f32, t: f32) -> [f32; 2] {
    let weights = [(1.0 - s) * (1.0 - t), s * (1.0 - t), (1.0 - s) * t, s * t];
    let mut out = [0.0; 2];
    for (corner, weight) in corners.iter().zip(weights) {
        out[0] += corner[0] * weight;
        out[1] += corner[1] * weight;
    }
    out
}

/// Render backend that runs entirely on the CPU
#[derive(Default)]
pub struct SoftwareBackend {
    programs: HashMap<ProgramId, ProgramSource>,
    textures: HashMap<TextureId, SoftwareTexture>,
    next_handle: u64,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Number of live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}

impl RenderBackend for SoftwareBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn adapter_name(&self) -> String {
        "CPU reference renderer".to_string()
    }

    fn compile_program(&mut self, source: &ProgramSource) -> PipelineResult<ProgramId> {
        if source.inputs > crate::constants::MAX_SHADER_INPUTS {
            return Err(PipelineError::ShaderCompilation {
                label: source.label.to_string(),
                message: format!("{} inputs exceeds the supported maximum", source.inputs),
            });
        }
        let id = ProgramId(self.next_handle());
        debug!(label = source.label, inputs = source.inputs, "Registered CPU program");
        self.programs.insert(id, *source);
        Ok(id)
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> PipelineResult<TextureId> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(PipelineError::Allocation(format!(
                "zero-sized texture {}x{}",
                descriptor.width, descriptor.height
            )));
        }
        let id = TextureId(self.next_handle());
        self.textures.insert(id, SoftwareTexture::new(*descriptor));
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture);
    }

    fn upload_plane(&mut self, texture: TextureId, plane: Plane<'_>) -> PipelineResult<()> {
        let entry = self
            .textures
            .get_mut(&texture)
            .ok_or_else(|| PipelineError::UnknownHandle(format!("texture {}", texture.0)))?;
        let TextureDescriptor {
            width,
            height,
            format,
            ..
        } = entry.descriptor;
        let row_bytes = (width * format.bytes_per_pixel()) as usize;
        plane
            .validate(0, row_bytes as u32, height)
            .map_err(|_| {
                PipelineError::Upload(format!(
                    "plane of {} bytes (stride {}) is too small for {}x{} {:?}",
                    plane.data.len(),
                    plane.stride,
                    width,
                    height,
                    format
                ))
            })?;

        for row in 0..height as usize {
            let src = row * plane.stride as usize;
            let dst = row * row_bytes;
            entry.data[dst..dst + row_bytes].copy_from_slice(&plane.data[src..src + row_bytes]);
        }
        Ok(())
    }

    fn render_quad(&mut self, draw: &QuadDraw<'_>) -> PipelineResult<()> {
        let program = *self
            .programs
            .get(&draw.program)
            .ok_or_else(|| PipelineError::UnknownHandle(format!("program {}", draw.program.0)))?;
        program.check_inputs(draw.inputs.len())?;
        draw.uniforms.check_layout(program.uniforms)?;

        if draw.inputs.iter().any(|i| i.texture == draw.destination) {
            return Err(PipelineError::UnknownHandle(
                "destination texture is also bound as an input".to_string(),
            ));
        }
        let mut destination = self.textures.remove(&draw.destination).ok_or_else(|| {
            PipelineError::UnknownHandle(format!("texture {}", draw.destination.0))
        })?;
        let result = self.rasterize(&program, draw, &mut destination);
        self.textures.insert(draw.destination, destination);
        result
    }

    fn read_pixels(&mut self, texture: TextureId) -> PipelineResult<Vec<u8>> {
        self.textures
            .get(&texture)
            .map(|t| t.data.clone())
            .ok_or_else(|| PipelineError::UnknownHandle(format!("texture {}", texture.0)))
    }
}

impl SoftwareBackend {
    fn rasterize(
        &self,
        program: &ProgramSource,
        draw: &QuadDraw<'_>,
        destination: &mut SoftwareTexture,
    ) -> PipelineResult<()> {
        if !destination.descriptor.render_target {
            return Err(PipelineError::TextureOnlyDestination);
        }

        let samplers = draw
            .inputs
            .iter()
            .map(|input| {
                self.textures
                    .get(&input.texture)
                    .map(|t| t as &dyn TextureSampler)
                    .ok_or_else(|| PipelineError::UnknownHandle(format!("texture {}", input.texture.0)))
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        let width = destination.descriptor.width;
        let height = destination.descriptor.height;
        let mut coordinates = vec![[0.0f32; 2]; draw.inputs.len()];

        for y in 0..height {
            let t = (y as f32 + 0.5) / height as f32;
            for x in 0..width {
                let s = (x as f32 + 0.5) / width as f32;
                for (slot, input) in coordinates.iter_mut().zip(draw.inputs) {
                    *slot = interpolate_corners(&input.coordinates, s, t);
                }
                let fragment = FragmentInput::new(&coordinates, &samplers, draw.uniforms);
                let color = (program.cpu_fragment)(&fragment);
                destination.store(x, y, color);
            }
        }
        Ok(())
    }
}
