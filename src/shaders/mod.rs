// SPDX-License-Identifier: GPL-3.0-only
//! Shader programs and the stages built from them
//!
//! Every stage is a full-frame quad draw through a [`ShaderProgram`]:
//!
//! - [`ColorConversionStage`]: NV12 planes to RGB
//! - [`RotationStage`]: RGB to display orientation

mod color_conversion;
mod program;
mod rotation;
mod uniforms;

pub use color_conversion::{ColorConversionStage, ConversionMatrix};
pub use program::{
    FragmentFn, FragmentInput, ProgramSource, ShaderInput, ShaderProgram, TextureSampler,
    pack_quad_coordinates, vertex_shader_for_inputs,
};
pub use rotation::RotationStage;
pub use uniforms::{ShaderUniforms, UniformDecl, UniformKind, UniformValue, pack_uniforms};
