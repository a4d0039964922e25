use engines::{ShaderKey, UniformMap};
use tracing::debug;
use wgpu::util::DeviceExt;

use crate::compile::{
    compile_fragment_shader, compile_vertex_shader, validate, wrap_transition_fragment,
    CompileError, ParamsLayout,
};

pub(crate) const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Objects shared by every transition program: the single bind group layout
/// (contract block, two textures, sampler, parameter block), the pipeline
/// layout and the full-screen vertex stage.
pub(crate) struct PipelineLayouts {
    pub bind_layout: wgpu::BindGroupLayout,
    pub pipeline_layout: wgpu::PipelineLayout,
    pub vertex_module: wgpu::ShaderModule,
    pub sampler: wgpu::Sampler,
}

impl PipelineLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transition layout"),
            entries: &[
                uniform_entry(0),
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                uniform_entry(4),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("transition pipeline layout"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("transition sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            bind_layout,
            pipeline_layout,
            vertex_module: compile_vertex_shader(device),
            sampler,
        }
    }
}

/// One compiled (engine, variant) program and its parameter block.
pub(crate) struct TransitionProgram {
    pub key: ShaderKey,
    pub pipeline: wgpu::RenderPipeline,
    pub params_buffer: wgpu::Buffer,
    layout: ParamsLayout,
    params: Vec<u8>,
}

impl TransitionProgram {
    pub fn build(
        device: &wgpu::Device,
        layouts: &PipelineLayouts,
        key: &ShaderKey,
        source: &str,
    ) -> Result<Self, CompileError> {
        let wrapped = wrap_transition_fragment(source);
        validate(&wrapped)?;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let label = format!("transition {key}");
        let fragment_module = compile_fragment_shader(device, &label, &wrapped);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&layouts.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &layouts.vertex_module,
                entry_point: Some("main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &fragment_module,
                entry_point: Some("main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(CompileError::Device(err.to_string()));
        }

        let layout = wrapped.layout;
        let params = vec![0u8; layout.size()];
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transition params"),
            contents: &params,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        debug!(shader = %key, params = layout.fields().len(), "compiled transition program");

        Ok(Self {
            key: key.clone(),
            pipeline,
            params_buffer,
            layout,
            params,
        })
    }

    /// Applies `uniforms` to the persistent parameter bytes and uploads them.
    pub fn write_params(&mut self, queue: &wgpu::Queue, uniforms: &UniformMap) {
        self.layout.write(&mut self.params, uniforms);
        queue.write_buffer(&self.params_buffer, 0, &self.params);
    }

    pub fn destroy(&self) {
        debug!(shader = %self.key, "releasing transition program");
        self.params_buffer.destroy();
    }
}
