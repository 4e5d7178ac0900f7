// SPDX-License-Identifier: GPL-3.0-only

//! Generic full-frame shader stage
//!
//! A program is a fragment shader plus a generated vertex stage that draws a
//! quad covering the destination and forwards one set of texture
//! coordinates per input. Each input's coordinates come from the rotation
//! between that input's orientation and the destination's, so a stage never
//! has to care which way its inputs are stored.

use super::uniforms::{ShaderUniforms, UniformDecl};
use crate::constants::{CLEAR_COLOR, MAX_SHADER_INPUTS};
use crate::errors::{PipelineError, PipelineResult};
use crate::gpu::{BoundTexture, Framebuffer, ProgramId, QuadDraw, RenderContext};
use std::fmt::Write;

/// CPU implementation of a fragment stage, used by the software renderer
pub type FragmentFn = fn(&FragmentInput<'_>) -> [f32; 4];

/// Sampling interface the CPU fragment stage reads inputs through
pub trait TextureSampler {
    /// Bilinear sample at normalized coordinates, clamped to the edge
    fn sample(&self, coordinate: [f32; 2]) -> [f32; 4];
}

/// Per-pixel inputs for a CPU fragment function
pub struct FragmentInput<'a> {
    coordinates: &'a [[f32; 2]],
    samplers: &'a [&'a dyn TextureSampler],
    uniforms: &'a ShaderUniforms,
}

impl<'a> FragmentInput<'a> {
    pub fn new(
        coordinates: &'a [[f32; 2]],
        samplers: &'a [&'a dyn TextureSampler],
        uniforms: &'a ShaderUniforms,
    ) -> Self {
        Self {
            coordinates,
            samplers,
            uniforms,
        }
    }

    /// Interpolated texture coordinate for input `index`
    pub fn texture_coordinate(&self, index: usize) -> [f32; 2] {
        self.coordinates[index]
    }

    /// Sample input `index` at its interpolated coordinate
    pub fn sample(&self, index: usize) -> [f32; 4] {
        self.samplers[index].sample(self.coordinates[index])
    }

    /// Sample input `index` at an arbitrary coordinate
    pub fn sample_at(&self, index: usize, coordinate: [f32; 2]) -> [f32; 4] {
        self.samplers[index].sample(coordinate)
    }

    pub fn uniforms(&self) -> &ShaderUniforms {
        self.uniforms
    }
}

/// Source of one shader program
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource {
    pub label: &'static str,
    /// Number of input textures
    pub inputs: usize,
    /// WGSL defining `fs_main`. The generated vertex stage declares
    /// `VertexOutput`, `input_sampler` and `input_texture0..N`.
    pub fragment_wgsl: &'static str,
    /// Members of the group 1 uniform struct, in declaration order
    pub uniforms: &'static [UniformDecl],
    pub cpu_fragment: FragmentFn,
}

impl ProgramSource {
    /// Complete WGSL module: generated vertex stage plus fragment stage
    pub fn wgsl(&self) -> String {
        let mut source = vertex_shader_for_inputs(self.inputs);
        source.push('\n');
        source.push_str(self.fragment_wgsl);
        source
    }

    pub fn check_inputs(&self, actual: usize) -> PipelineResult<()> {
        if actual != self.inputs {
            return Err(PipelineError::InputCountMismatch {
                expected: self.inputs,
                actual,
            });
        }
        Ok(())
    }
}

/// Generate the vertex stage and shared bindings for a program with
/// `inputs` input textures
///
/// The quad is a four-vertex triangle strip in memory order: first row
/// start, first row end, last row start, last row end.
pub fn vertex_shader_for_inputs(inputs: usize) -> String {
    let inputs = inputs.max(1);
    let mut wgsl = String::new();

    let _ = writeln!(wgsl, "struct QuadCoordinates {{");
    let _ = writeln!(wgsl, "    corners: array<vec4<f32>, {}>,", inputs * 2);
    let _ = writeln!(wgsl, "}};\n");

    let _ = writeln!(wgsl, "struct VertexOutput {{");
    let _ = writeln!(wgsl, "    @builtin(position) position: vec4<f32>,");
    for index in 0..inputs {
        let _ = writeln!(
            wgsl,
            "    @location({index}) texture_coordinate{index}: vec2<f32>,"
        );
    }
    let _ = writeln!(wgsl, "}};\n");

    let _ = writeln!(wgsl, "@group(0) @binding(0) var<uniform> quad: QuadCoordinates;");
    let _ = writeln!(wgsl, "@group(0) @binding(1) var input_sampler: sampler;");
    for index in 0..inputs {
        let _ = writeln!(
            wgsl,
            "@group(0) @binding({}) var input_texture{}: texture_2d<f32>;",
            index + 2,
            index
        );
    }

    wgsl.push_str(
        r#"
fn quad_coordinate(slot: u32, corner: u32) -> vec2<f32> {
    let packed = quad.corners[slot * 2u + corner / 2u];
    if (corner % 2u == 0u) {
        return packed.xy;
    }
    return packed.zw;
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 4>(
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
    );

    var out: VertexOutput;
    out.position = vec4<f32>(positions[vertex_index], 0.0, 1.0);
"#,
    );
    for index in 0..inputs {
        let _ = writeln!(
            wgsl,
            "    out.texture_coordinate{index} = quad_coordinate({index}u, vertex_index);"
        );
    }
    wgsl.push_str("    return out;\n}\n");
    wgsl
}

/// Pack per-input corner coordinates for the quad uniform: two vec4 per
/// input holding corners (0, 1) and (2, 3)
pub fn pack_quad_coordinates(inputs: &[BoundTexture]) -> Vec<f32> {
    let mut packed = Vec::with_capacity(inputs.len().max(1) * 8);
    for input in inputs {
        for corner in input.coordinates {
            packed.extend_from_slice(&corner);
        }
    }
    if packed.is_empty() {
        packed.resize(8, 0.0);
    }
    packed
}

/// A program compiled on the processing context
#[derive(Debug, Clone, Copy)]
pub struct ShaderProgram {
    id: ProgramId,
    source: ProgramSource,
}

/// One shader input: a framebuffer sampled with its orientation-adjusted
/// coordinates
pub type ShaderInput<'a> = &'a Framebuffer;

impl ShaderProgram {
    /// Compile `source` on the context's backend
    pub fn compile(context: &mut RenderContext, source: &ProgramSource) -> PipelineResult<Self> {
        if source.inputs > MAX_SHADER_INPUTS {
            return Err(PipelineError::ShaderCompilation {
                label: source.label.to_string(),
                message: format!(
                    "{} inputs exceeds the maximum of {}",
                    source.inputs, MAX_SHADER_INPUTS
                ),
            });
        }
        let id = context.compile_program(source)?;
        Ok(Self {
            id,
            source: *source,
        })
    }

    pub fn label(&self) -> &'static str {
        self.source.label
    }

    pub fn source(&self) -> &ProgramSource {
        &self.source
    }

    /// Render the full-frame quad into `destination`
    ///
    /// The destination is cleared first. It must be a renderable buffer,
    /// and exactly as many inputs as the program declares must be bound.
    pub fn render(
        &self,
        context: &mut RenderContext,
        uniforms: &ShaderUniforms,
        inputs: &[ShaderInput<'_>],
        destination: &Framebuffer,
    ) -> PipelineResult<()> {
        if destination.is_texture_only() {
            return Err(PipelineError::TextureOnlyDestination);
        }
        self.source.check_inputs(inputs.len())?;

        let bound = inputs
            .iter()
            .map(|input| input.bound_for(destination.orientation()))
            .collect::<Vec<_>>();

        context.draw(&QuadDraw {
            program: self.id,
            inputs: &bound,
            uniforms,
            destination: destination.texture(),
            clear_color: CLEAR_COLOR,
        })
    }
}
