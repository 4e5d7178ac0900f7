// SPDX-License-Identifier: GPL-3.0-only

//! NV12 to RGB conversion stage
//!
//! The luma plane is uploaded into a full-resolution single-channel buffer
//! and the interleaved chroma plane into a half-resolution two-channel
//! buffer. One draw through the conversion program then produces an RGB
//! framebuffer at the frame's size.

use super::program::{FragmentInput, ProgramSource, ShaderProgram};
use super::uniforms::{ShaderUniforms, UniformDecl, UniformKind};
use crate::errors::PipelineResult;
use crate::gpu::{Framebuffer, RenderContext, TextureFormat};
use crate::media::{LockedFrame, Orientation, Plane};
use serde::{Deserialize, Serialize};
use tracing::trace;

const MATRIX_UNIFORM: &str = "color_conversion_matrix";
const LUMINANCE_OFFSET_UNIFORM: &str = "luminance_offset";

/// Zero-difference chroma sample, uploaded when a frame has no chroma rows or
/// columns
const NEUTRAL_CHROMA: [u8; 2] = [128, 128];

/// YUV to RGB matrix applied by the conversion stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionMatrix {
    /// ITU-R BT.601, full-range luma
    #[default]
    Bt601FullRange,
    /// ITU-R BT.601, video-range luma (16..235)
    Bt601VideoRange,
    /// ITU-R BT.709, video-range luma (16..235)
    Bt709VideoRange,
}

impl ConversionMatrix {
    /// Matrix coefficients, column-major
    pub fn columns(&self) -> [f32; 9] {
        match self {
            ConversionMatrix::Bt601FullRange => {
                [1.0, 1.0, 1.0, 0.0, -0.343, 1.765, 1.4, -0.711, 0.0]
            }
            ConversionMatrix::Bt601VideoRange => {
                [1.164, 1.164, 1.164, 0.0, -0.392, 2.017, 1.596, -0.813, 0.0]
            }
            ConversionMatrix::Bt709VideoRange => {
                [1.164, 1.164, 1.164, 0.0, -0.213, 2.112, 1.793, -0.533, 0.0]
            }
        }
    }

    /// Offset subtracted from luma before the matrix is applied
    pub fn luminance_offset(&self) -> f32 {
        match self {
            ConversionMatrix::Bt601FullRange => 0.0,
            ConversionMatrix::Bt601VideoRange | ConversionMatrix::Bt709VideoRange => 16.0 / 255.0,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ConversionMatrix::Bt601FullRange => "BT.601 full range",
            ConversionMatrix::Bt601VideoRange => "BT.601 video range",
            ConversionMatrix::Bt709VideoRange => "BT.709 video range",
        }
    }

    fn uniforms(&self) -> ShaderUniforms {
        let mut uniforms = ShaderUniforms::new();
        uniforms
            .set_mat3(MATRIX_UNIFORM, self.columns())
            .set_float(LUMINANCE_OFFSET_UNIFORM, self.luminance_offset());
        uniforms
    }
}

impl std::str::FromStr for ConversionMatrix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['.', '_'], "-").as_str() {
            "bt601-full" | "bt601-full-range" | "601-full" | "full" => {
                Ok(ConversionMatrix::Bt601FullRange)
            }
            "bt601-video" | "bt601-video-range" | "601-video" | "601" => {
                Ok(ConversionMatrix::Bt601VideoRange)
            }
            "bt709-video" | "bt709-video-range" | "709-video" | "709" | "bt709" => {
                Ok(ConversionMatrix::Bt709VideoRange)
            }
            other => Err(format!("Unknown conversion matrix '{}'", other)),
        }
    }
}

fn convert_fragment(input: &FragmentInput<'_>) -> [f32; 4] {
    let uniforms = input.uniforms();
    let m = uniforms.mat3(MATRIX_UNIFORM);
    let luminance = input.sample(0)[0] - uniforms.float(LUMINANCE_OFFSET_UNIFORM);
    let chrominance = input.sample(1);
    let (u, v) = (chrominance[0] - 0.5, chrominance[1] - 0.5);

    [
        m[0] * luminance + m[3] * u + m[6] * v,
        m[1] * luminance + m[4] * u + m[7] * v,
        m[2] * luminance + m[5] * u + m[8] * v,
        1.0,
    ]
}

const UNIFORMS: &[UniformDecl] = &[
    UniformDecl {
        name: MATRIX_UNIFORM,
        kind: UniformKind::Mat3,
    },
    UniformDecl {
        name: LUMINANCE_OFFSET_UNIFORM,
        kind: UniformKind::Float,
    },
];

/// Two-input YUV to RGB program plus its matrix
#[derive(Debug, Clone)]
pub struct ColorConversionStage {
    program: ShaderProgram,
    matrix: ConversionMatrix,
    uniforms: ShaderUniforms,
}

impl ColorConversionStage {
    pub fn program_source() -> ProgramSource {
        ProgramSource {
            label: "yuv_conversion",
            inputs: 2,
            fragment_wgsl: include_str!("color_conversion.wgsl"),
            uniforms: UNIFORMS,
            cpu_fragment: convert_fragment,
        }
    }

    /// Compile the conversion program on `context`
    pub fn new(context: &mut RenderContext, matrix: ConversionMatrix) -> PipelineResult<Self> {
        let program = ShaderProgram::compile(context, &Self::program_source())?;
        Ok(Self {
            program,
            matrix,
            uniforms: matrix.uniforms(),
        })
    }

    pub fn matrix(&self) -> ConversionMatrix {
        self.matrix
    }

    /// Upload both planes of `frame` and convert them into a new RGB
    /// framebuffer
    ///
    /// The plane buffers are released before returning. The returned buffer
    /// holds one lock owned by the caller.
    pub fn convert(
        &self,
        context: &mut RenderContext,
        frame: &LockedFrame<'_>,
    ) -> PipelineResult<Framebuffer> {
        let (width, height) = frame.dimensions();
        let luma = context.acquire_framebuffer(
            width,
            height,
            Orientation::Upright,
            true,
            TextureFormat::Luminance,
        )?;
        let result = self.convert_with_luma(context, frame, &luma);
        luma.unlock();

        if result.is_ok() {
            trace!(width, height, matrix = ?self.matrix, "Converted frame to RGB");
        }
        result
    }

    fn convert_with_luma(
        &self,
        context: &mut RenderContext,
        frame: &LockedFrame<'_>,
        luma: &Framebuffer,
    ) -> PipelineResult<Framebuffer> {
        context.upload_plane(luma, frame.luma()?)?;

        let (width, height) = frame.dimensions();
        let (chroma_width, chroma_height) = LockedFrame::chroma_size(width, height);
        // A frame one pixel wide or tall has no chroma samples at all
        let has_chroma = chroma_width > 0 && chroma_height > 0;
        let (chroma_width, chroma_height) = if has_chroma {
            (chroma_width, chroma_height)
        } else {
            (1, 1)
        };
        let chroma = context.acquire_framebuffer(
            chroma_width,
            chroma_height,
            Orientation::Upright,
            true,
            TextureFormat::LuminanceAlpha,
        )?;
        let result = self.render_planes(context, frame, luma, &chroma, has_chroma);
        chroma.unlock();
        result
    }

    fn render_planes(
        &self,
        context: &mut RenderContext,
        frame: &LockedFrame<'_>,
        luma: &Framebuffer,
        chroma: &Framebuffer,
        has_chroma: bool,
    ) -> PipelineResult<Framebuffer> {
        let chroma_plane = if has_chroma {
            frame.chroma()?
        } else {
            Plane {
                data: &NEUTRAL_CHROMA,
                stride: 2,
            }
        };
        context.upload_plane(chroma, chroma_plane)?;

        let (width, height) = frame.dimensions();
        let output =
            context.acquire_framebuffer(width, height, Orientation::Upright, false, TextureFormat::Rgba)?;
        if let Err(e) = self
            .program
            .render(context, &self.uniforms, &[luma, chroma], &output)
        {
            output.unlock();
            return Err(e);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FrameError, PipelineError};
    use crate::gpu::SoftwareBackend;
    use crate::media::{Frame, MediaTime, Nv12Buffer};

    fn software_context() -> RenderContext {
        RenderContext::new(Box::new(SoftwareBackend::new()))
    }

    fn validate_wgsl(source: &str) {
        let module = naga::front::wgsl::parse_str(source).expect("WGSL should parse");
        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator.validate(&module).expect("WGSL should validate");
    }

    #[test]
    fn test_conversion_shader_validates() {
        validate_wgsl(&ColorConversionStage::program_source().wgsl());
    }

    #[test]
    fn test_full_range_primaries() {
        let m = ConversionMatrix::Bt601FullRange.columns();
        // Column 0 maps luma straight through to all channels
        assert_eq!(&m[0..3], &[1.0, 1.0, 1.0]);
        // Column 1 (U) drives blue, column 2 (V) drives red
        assert_eq!(m[5], 1.765);
        assert_eq!(m[6], 1.4);
        assert_eq!(ConversionMatrix::Bt601FullRange.luminance_offset(), 0.0);
        assert!((ConversionMatrix::Bt709VideoRange.luminance_offset() - 0.0627).abs() < 1e-3);
    }

    #[test]
    fn test_matrix_from_str() {
        assert_eq!("bt601-full".parse(), Ok(ConversionMatrix::Bt601FullRange));
        assert_eq!("BT.709".parse(), Ok(ConversionMatrix::Bt709VideoRange));
        assert_eq!("601_video".parse(), Ok(ConversionMatrix::Bt601VideoRange));
        assert!("rec2020".parse::<ConversionMatrix>().is_err());
    }

    #[test]
    fn test_grey_converts_to_grey() {
        let mut context = software_context();
        let stage = ColorConversionStage::new(&mut context, ConversionMatrix::Bt601FullRange).unwrap();

        let mut frame = Frame::new(4, 4, MediaTime::ZERO, Nv12Buffer::solid(4, 4, 200, 128, 128));
        let locked = frame.lock().unwrap();
        let output = stage.convert(&mut context, &locked).unwrap();
        assert_eq!(output.size(), (4, 4));
        assert_eq!(output.lock_count(), 1);

        let pixels = context.read_pixels(&output).unwrap();
        for pixel in pixels.chunks_exact(4) {
            for channel in &pixel[0..3] {
                assert!((*channel as i32 - 200).abs() <= 2, "pixel {:?}", pixel);
            }
            assert_eq!(pixel[3], 255);
        }
    }

    #[test]
    fn test_strong_v_is_red() {
        let mut context = software_context();
        let stage = ColorConversionStage::new(&mut context, ConversionMatrix::Bt601FullRange).unwrap();

        let mut frame = Frame::new(2, 2, MediaTime::ZERO, Nv12Buffer::solid(2, 2, 128, 128, 255));
        let locked = frame.lock().unwrap();
        let output = stage.convert(&mut context, &locked).unwrap();
        let pixels = context.read_pixels(&output).unwrap();
        // R = Y + 1.4 * (V - 0.5), G pulled down, B unchanged
        assert!(pixels[0] > 220);
        assert!(pixels[1] < 60);
        assert!((pixels[2] as i32 - 129).abs() <= 2);
    }

    #[test]
    fn test_plane_buffers_released() {
        let mut context = software_context();
        let stage = ColorConversionStage::new(&mut context, ConversionMatrix::Bt601FullRange).unwrap();

        let mut frame = Frame::new(4, 2, MediaTime::ZERO, Nv12Buffer::solid(4, 2, 16, 128, 128));
        let locked = frame.lock().unwrap();
        let output = stage.convert(&mut context, &locked).unwrap();

        // Only the RGB output is still locked
        let stats = context.pool_stats();
        assert_eq!(stats.allocated, 3);
        assert_eq!(stats.in_use, 1);
        output.unlock();
    }

    #[test]
    fn test_odd_dimensions_truncate_chroma() {
        let mut context = software_context();
        let stage = ColorConversionStage::new(&mut context, ConversionMatrix::Bt601FullRange).unwrap();

        let mut frame = Frame::new(5, 3, MediaTime::ZERO, Nv12Buffer::solid(5, 3, 100, 128, 128));
        let locked = frame.lock().unwrap();
        let output = stage.convert(&mut context, &locked).unwrap();
        assert_eq!(output.size(), (5, 3));
    }

    #[test]
    fn test_single_row_and_column_frames_convert() {
        let mut context = software_context();
        let stage = ColorConversionStage::new(&mut context, ConversionMatrix::Bt601FullRange).unwrap();

        for (width, height) in [(8, 1), (1, 8), (1, 1)] {
            let buffer = Nv12Buffer::new(width, height, vec![180u8; (width * height) as usize]);
            let mut frame = Frame::new(width, height, MediaTime::ZERO, buffer);
            let locked = frame.lock().unwrap();
            let output = stage.convert(&mut context, &locked).unwrap();
            assert_eq!(output.size(), (width, height));

            // Missing chroma reads as neutral, so luma passes straight through
            let pixels = context.read_pixels(&output).unwrap();
            for pixel in pixels.chunks_exact(4) {
                for channel in &pixel[0..3] {
                    assert!((*channel as i32 - 180).abs() <= 2, "pixel {:?}", pixel);
                }
            }
            output.unlock();
        }
        assert_eq!(context.pool_stats().in_use, 0);
    }

    #[test]
    fn test_short_chroma_plane_releases_buffers() {
        let mut context = software_context();
        let stage = ColorConversionStage::new(&mut context, ConversionMatrix::Bt601FullRange).unwrap();

        // Luma only, no chroma bytes
        let mut frame = Frame::new(4, 4, MediaTime::ZERO, Nv12Buffer::new(4, 4, vec![0u8; 16]));
        let locked = frame.lock().unwrap();
        assert_eq!(
            stage.convert(&mut context, &locked).err(),
            Some(PipelineError::Frame(FrameError::MissingPlane(1)))
        );
        assert_eq!(context.pool_stats().in_use, 0);
    }
}
