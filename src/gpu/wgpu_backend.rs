// SPDX-License-Identifier: GPL-3.0-only

//! wgpu render backend
//!
//! Each compiled program becomes a render pipeline drawing a four-vertex
//! triangle strip. Bind group 0 carries the per-input texture coordinates,
//! the shared sampler and the input textures; bind group 1 carries the
//! program's own uniforms.

use super::{
    BackendKind, BoundTexture, ProgramId, QuadDraw, RenderBackend, TextureDescriptor,
    TextureFormat, TextureId,
};
use crate::errors::{PipelineError, PipelineResult};
use crate::media::Plane;
use crate::shaders::{ProgramSource, pack_quad_coordinates, pack_uniforms};
use std::collections::HashMap;
use tracing::{debug, info};
use wgpu::util::DeviceExt;

struct WgpuProgram {
    source: ProgramSource,
    pipeline: wgpu::RenderPipeline,
    inputs_layout: wgpu::BindGroupLayout,
    uniforms_layout: Option<wgpu::BindGroupLayout>,
}

struct WgpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    descriptor: TextureDescriptor,
}

/// Render backend on a wgpu device
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    sampler: wgpu::Sampler,
    programs: HashMap<ProgramId, WgpuProgram>,
    textures: HashMap<TextureId, WgpuTexture>,
    next_handle: u64,
}

impl WgpuBackend {
    /// Request an adapter and device
    pub async fn new(label: &str) -> PipelineResult<Self> {
        info!(label = label, "Creating GPU device for frame processing");

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                PipelineError::BackendUnavailable(format!("No suitable GPU adapter: {}", e))
            })?;

        let adapter_info = adapter.get_info();
        info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "GPU adapter selected"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some(label),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                PipelineError::BackendUnavailable(format!("Failed to create GPU device: {}", e))
            })?;

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("movie_input_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Ok(Self {
            device,
            queue,
            adapter_name: adapter_info.name,
            sampler,
            programs: HashMap::new(),
            textures: HashMap::new(),
            next_handle: 1,
        })
    }

    fn next_handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn texture(&self, id: TextureId) -> PipelineResult<&WgpuTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| PipelineError::UnknownHandle(format!("texture {}", id.0)))
    }

    fn inputs_layout(&self, label: &str, inputs: usize) -> wgpu::BindGroupLayout {
        let mut entries = vec![
            // Quad texture coordinates
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            // Sampler
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ];
        for index in 0..inputs {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: 2 + index as u32,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }

        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
    }

    fn uniforms_layout(&self, label: &str) -> wgpu::BindGroupLayout {
        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            })
    }
}

impl RenderBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn adapter_name(&self) -> String {
        self.adapter_name.clone()
    }

    fn compile_program(&mut self, source: &ProgramSource) -> PipelineResult<ProgramId> {
        let wgsl = source.wgsl();

        // Shader and pipeline validation errors are reported through the
        // error scope instead of the device's uncaptured error handler
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(source.label),
                source: wgpu::ShaderSource::Wgsl(wgsl.into()),
            });

        let inputs_layout = self.inputs_layout(source.label, source.inputs);
        let uniforms_layout =
            (!source.uniforms.is_empty()).then(|| self.uniforms_layout(source.label));

        let mut bind_group_layouts = vec![&inputs_layout];
        if let Some(layout) = uniforms_layout.as_ref() {
            bind_group_layouts.push(layout);
        }

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(source.label),
                bind_group_layouts: &bind_group_layouts,
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(source.label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleStrip,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TextureFormat::Rgba.to_wgpu(),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
                cache: None,
            });

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(PipelineError::ShaderCompilation {
                label: source.label.to_string(),
                message: error.to_string(),
            });
        }

        let id = ProgramId(self.next_handle());
        debug!(label = source.label, inputs = source.inputs, "Compiled render program");
        self.programs.insert(
            id,
            WgpuProgram {
                source: *source,
                pipeline,
                inputs_layout,
                uniforms_layout,
            },
        );
        Ok(id)
    }

    fn create_texture(&mut self, descriptor: &TextureDescriptor) -> PipelineResult<TextureId> {
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(PipelineError::Allocation(format!(
                "zero-sized texture {}x{}",
                descriptor.width, descriptor.height
            )));
        }
        let limit = self.device.limits().max_texture_dimension_2d;
        if descriptor.width > limit || descriptor.height > limit {
            return Err(PipelineError::Allocation(format!(
                "{}x{} exceeds the device limit of {}",
                descriptor.width, descriptor.height, limit
            )));
        }

        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if descriptor.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("movie_input_framebuffer"),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: descriptor.format.to_wgpu(),
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = TextureId(self.next_handle());
        self.textures.insert(
            id,
            WgpuTexture {
                texture,
                view,
                descriptor: *descriptor,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn upload_plane(&mut self, texture: TextureId, plane: Plane<'_>) -> PipelineResult<()> {
        let entry = self.texture(texture)?;
        let descriptor = entry.descriptor;
        let row_bytes = descriptor.width * descriptor.format.bytes_per_pixel();
        plane
            .validate(0, row_bytes, descriptor.height)
            .map_err(|_| {
                PipelineError::Upload(format!(
                    "plane of {} bytes (stride {}) is too small for {}x{} {:?}",
                    plane.data.len(),
                    plane.stride,
                    descriptor.width,
                    descriptor.height,
                    descriptor.format
                ))
            })?;

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            plane.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(plane.stride),
                rows_per_image: Some(descriptor.height),
            },
            wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn render_quad(&mut self, draw: &QuadDraw<'_>) -> PipelineResult<()> {
        let program = self
            .programs
            .get(&draw.program)
            .ok_or_else(|| PipelineError::UnknownHandle(format!("program {}", draw.program.0)))?;
        program.source.check_inputs(draw.inputs.len())?;
        let uniform_bytes = pack_uniforms(program.source.uniforms, draw.uniforms)?;

        let destination = self.texture(draw.destination)?;
        if !destination.descriptor.render_target {
            return Err(PipelineError::TextureOnlyDestination);
        }

        let input_views = draw
            .inputs
            .iter()
            .map(|input: &BoundTexture| self.texture(input.texture).map(|t| &t.view))
            .collect::<PipelineResult<Vec<_>>>()?;

        let coordinates = pack_quad_coordinates(draw.inputs);
        let coordinates_buffer =
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("movie_input_quad_coordinates"),
                    contents: bytemuck::cast_slice(&coordinates),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: coordinates_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
        ];
        for (index, view) in input_views.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + index as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        let inputs_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.source.label),
            layout: &program.inputs_layout,
            entries: &entries,
        });

        let uniforms_bind_group = program.uniforms_layout.as_ref().map(|layout| {
            let buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("movie_input_stage_uniforms"),
                    contents: &uniform_bytes,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(program.source.label),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            })
        });

        let [r, g, b, a] = draw.clear_color;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("movie_input_render_encoder"),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(program.source.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &destination.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&program.pipeline);
            render_pass.set_bind_group(0, Some(&inputs_bind_group), &[]);
            if let Some(bind_group) = uniforms_bind_group.as_ref() {
                render_pass.set_bind_group(1, Some(bind_group), &[]);
            }
            render_pass.draw(0..4, 0..1);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureId) -> PipelineResult<Vec<u8>> {
        let entry = self.texture(texture)?;
        let TextureDescriptor {
            width,
            height,
            format,
            ..
        } = entry.descriptor;
        let row_bytes = width * format.bytes_per_pixel();
        let padded_bytes_per_row = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
            * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("movie_input_readback"),
            size: padded_bytes_per_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("movie_input_readback_encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let _ = self.device.poll(wgpu::PollType::wait_indefinitely());

        pollster::block_on(receiver)
            .map_err(|_| PipelineError::Readback("mapping callback dropped".to_string()))?
            .map_err(|e| PipelineError::Readback(format!("failed to map buffer: {:?}", e)))?;

        let data = buffer_slice.get_mapped_range();
        let mut output = Vec::with_capacity((row_bytes * height) as usize);
        for row in 0..height {
            let start = (row * padded_bytes_per_row) as usize;
            output.extend_from_slice(&data[start..start + row_bytes as usize]);
        }
        drop(data);
        staging_buffer.unmap();

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::ShaderUniforms;

    // These tests need a GPU; they are skipped when no adapter is available

    #[tokio::test]
    async fn test_create_device() {
        match WgpuBackend::new("test_device").await {
            Ok(backend) => {
                assert_eq!(backend.kind(), BackendKind::Wgpu);
                assert!(!backend.adapter_name().is_empty());
            }
            Err(e) => println!("Skipping test (no GPU): {}", e),
        }
    }

    #[tokio::test]
    async fn test_upload_then_read_back() {
        let mut backend = match WgpuBackend::new("test_device").await {
            Ok(backend) => backend,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 3,
                height: 2,
                format: TextureFormat::Luminance,
                render_target: false,
            })
            .unwrap();
        // Stride of 4 with one byte of padding per row
        let data = [1u8, 2, 3, 0, 4, 5, 6, 0];
        backend
            .upload_plane(
                texture,
                Plane {
                    data: &data,
                    stride: 4,
                },
            )
            .unwrap();
        assert_eq!(backend.read_pixels(texture).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_texture_only_destination_rejected() {
        let mut backend = match WgpuBackend::new("test_device").await {
            Ok(backend) => backend,
            Err(e) => {
                println!("Skipping test (no GPU): {}", e);
                return;
            }
        };

        let program = backend
            .compile_program(&crate::shaders::RotationStage::program_source())
            .unwrap();
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 4,
                height: 4,
                format: TextureFormat::Rgba,
                render_target: false,
            })
            .unwrap();
        let mut uniforms = ShaderUniforms::new();
        uniforms.set_float("angle", 0.0);
        let inputs = [BoundTexture {
            texture,
            coordinates: crate::media::Rotation::None.texture_coordinates(),
        }];
        let result = backend.render_quad(&QuadDraw {
            program,
            inputs: &inputs,
            uniforms: &uniforms,
            destination: texture,
            clear_color: crate::constants::CLEAR_COLOR,
        });
        assert_eq!(result, Err(PipelineError::TextureOnlyDestination));
    }
}
