// SPDX-License-Identifier: GPL-3.0-only

//! Orientation rotation stage

use super::program::{FragmentInput, ProgramSource, ShaderProgram};
use super::uniforms::{ShaderUniforms, UniformDecl, UniformKind};
use crate::errors::PipelineResult;
use crate::gpu::{Framebuffer, RenderContext, TextureFormat};
use crate::media::Orientation;

const ANGLE_UNIFORM: &str = "angle";

fn rotate_fragment(input: &FragmentInput<'_>) -> [f32; 4] {
    let (sin_factor, cos_factor) = input.uniforms().float(ANGLE_UNIFORM).sin_cos();
    let [x, y] = input.texture_coordinate(0);
    let (dx, dy) = (x - 0.5, y - 0.5);
    input.sample_at(
        0,
        [
            dx * cos_factor + dy * sin_factor + 0.5,
            -dx * sin_factor + dy * cos_factor + 0.5,
        ],
    )
}

const UNIFORMS: &[UniformDecl] = &[UniformDecl {
    name: ANGLE_UNIFORM,
    kind: UniformKind::Float,
}];

/// Single-input program rotating a frame into its display orientation
#[derive(Debug, Clone)]
pub struct RotationStage {
    program: ShaderProgram,
}

impl RotationStage {
    pub fn program_source() -> ProgramSource {
        ProgramSource {
            label: "orientation_rotation",
            inputs: 1,
            fragment_wgsl: include_str!("rotation.wgsl"),
            uniforms: UNIFORMS,
            cpu_fragment: rotate_fragment,
        }
    }

    pub fn new(context: &mut RenderContext) -> PipelineResult<Self> {
        Ok(Self {
            program: ShaderProgram::compile(context, &Self::program_source())?,
        })
    }

    /// Render `input` rotated for `orientation` into a new framebuffer
    ///
    /// Portrait orientations swap the output dimensions. The input is left
    /// untouched; the returned buffer holds one lock owned by the caller.
    pub fn rotate(
        &self,
        context: &mut RenderContext,
        input: &Framebuffer,
        orientation: Orientation,
    ) -> PipelineResult<Framebuffer> {
        let transform = orientation.transform();
        let (width, height) = transform.output_size(input.width(), input.height());

        let output =
            context.acquire_framebuffer(width, height, Orientation::Upright, false, TextureFormat::Rgba)?;

        let mut uniforms = ShaderUniforms::new();
        uniforms.set_float(ANGLE_UNIFORM, transform.angle);

        if let Err(e) = self.program.render(context, &uniforms, &[input], &output) {
            output.unlock();
            return Err(e);
        }
        Ok(output)
    }
}
