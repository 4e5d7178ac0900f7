// SPDX-License-Identifier: GPL-3.0-only

//! Named uniform values and their std140-style packing

use crate::errors::{PipelineError, PipelineResult};
use std::collections::BTreeMap;

/// Type of a declared uniform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    /// 3x3 matrix, column-major
    Mat3,
}

impl UniformKind {
    fn name(&self) -> &'static str {
        match self {
            UniformKind::Float => "f32",
            UniformKind::Mat3 => "mat3x3<f32>",
        }
    }

    /// (alignment, size) in bytes under WGSL uniform address space rules
    fn layout(&self) -> (usize, usize) {
        match self {
            UniformKind::Float => (4, 4),
            // Three vec3 columns, each padded to 16 bytes
            UniformKind::Mat3 => (16, 48),
        }
    }
}

/// A uniform a program declares, in WGSL struct member order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: &'static str,
    pub kind: UniformKind,
}

/// Value bound to a uniform
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    /// Column-major
    Mat3([f32; 9]),
}

impl UniformValue {
    fn kind(&self) -> UniformKind {
        match self {
            UniformValue::Float(_) => UniformKind::Float,
            UniformValue::Mat3(_) => UniformKind::Mat3,
        }
    }
}

/// Uniform values for one draw, keyed by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShaderUniforms {
    values: BTreeMap<String, UniformValue>,
}

impl ShaderUniforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: UniformValue) -> &mut Self {
        self.values.insert(name.to_string(), value);
        self
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> &mut Self {
        self.set(name, UniformValue::Float(value))
    }

    pub fn set_mat3(&mut self, name: &str, columns: [f32; 9]) -> &mut Self {
        self.set(name, UniformValue::Mat3(columns))
    }

    pub fn get(&self, name: &str) -> Option<UniformValue> {
        self.values.get(name).copied()
    }

    /// Float value, 0.0 when absent or of another type
    pub fn float(&self, name: &str) -> f32 {
        match self.get(name) {
            Some(UniformValue::Float(v)) => v,
            _ => 0.0,
        }
    }

    /// Column-major matrix, identity when absent or of another type
    pub fn mat3(&self, name: &str) -> [f32; 9] {
        match self.get(name) {
            Some(UniformValue::Mat3(v)) => v,
            _ => [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// Check that every declared uniform is present with the declared type
    pub fn check_layout(&self, layout: &[UniformDecl]) -> PipelineResult<()> {
        for decl in layout {
            match self.get(decl.name) {
                None => return Err(PipelineError::MissingUniform(decl.name.to_string())),
                Some(value) if value.kind() != decl.kind => {
                    return Err(PipelineError::UniformType {
                        name: decl.name.to_string(),
                        expected: decl.kind.name(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Pack `uniforms` into a buffer matching a WGSL struct with the members of
/// `layout` in order
pub fn pack_uniforms(layout: &[UniformDecl], uniforms: &ShaderUniforms) -> PipelineResult<Vec<u8>> {
    uniforms.check_layout(layout)?;

    let mut floats: Vec<f32> = Vec::new();
    for decl in layout {
        let (align, size) = decl.kind.layout();
        let offset = (floats.len() * 4).next_multiple_of(align);
        floats.resize(offset / 4, 0.0);

        match uniforms.get(decl.name) {
            Some(UniformValue::Float(v)) => floats.push(v),
            Some(UniformValue::Mat3(m)) => {
                for column in m.chunks_exact(3) {
                    floats.extend_from_slice(column);
                    floats.push(0.0);
                }
            }
            None => {}
        }
        debug_assert_eq!(floats.len() * 4, offset + size);
    }

    // Uniform buffers are bound in 16-byte units
    let padded = (floats.len() * 4).next_multiple_of(16).max(16);
    floats.resize(padded / 4, 0.0);
    Ok(bytemuck::cast_slice(&floats).to_vec())
}
