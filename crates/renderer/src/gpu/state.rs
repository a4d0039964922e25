use std::collections::HashMap;

use anyhow::{anyhow, Result};
use engines::{crossfade_fragment, fallback_key, ShaderKey, UniformMap};
use image::RgbaImage;
use tracing::{debug, error, warn};
use wgpu::util::DeviceExt;

use crate::compile::{source_excerpt, CompileError};
use crate::{ActiveProgram, RendererOptions, TextureSlot};

use super::context::GpuContext;
use super::pipeline::{PipelineLayouts, TransitionProgram, TARGET_FORMAT};
use super::readback::Readback;
use super::textures::{SourceTexture, TexturePool};
use super::uniforms::ContractUniforms;

const EXCERPT_CONTEXT: usize = 3;

struct RenderTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl RenderTarget {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("transition target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

pub(crate) struct GpuSnapshot {
    pub width: u32,
    pub height: u32,
    pub adapter: String,
    pub active: Option<ShaderKey>,
    pub compiled: usize,
    pub failed: usize,
    pub active_textures: usize,
    pub pooled_textures: usize,
}

/// Every GPU object one renderer owns. Dropping it (via `destroy`) releases
/// the lot.
pub(crate) struct GpuState {
    context: GpuContext,
    layouts: PipelineLayouts,
    target: RenderTarget,
    readback: Option<Readback>,
    contract: ContractUniforms,
    contract_buffer: wgpu::Buffer,
    fallback: TransitionProgram,
    programs: HashMap<ShaderKey, TransitionProgram>,
    failed: HashMap<ShaderKey, CompileError>,
    active: Option<ShaderKey>,
    sources: [Option<SourceTexture>; 2],
    pool: TexturePool<SourceTexture>,
}

impl GpuState {
    pub(crate) fn new(width: u32, height: u32, options: &RendererOptions) -> Result<Self> {
        let context = GpuContext::new(width, height, options)?;
        let (width, height) = context.clamp_size(width, height);
        let device = &context.device;

        let layouts = PipelineLayouts::new(device);
        let fallback = TransitionProgram::build(device, &layouts, &fallback_key(), &crossfade_fragment())
            .map_err(|err| anyhow!("fallback crossfade program failed to compile: {err}"))?;
        let contract = ContractUniforms::new(width, height);
        let contract_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transition contract"),
            contents: bytemuck::bytes_of(&contract),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let target = RenderTarget::new(device, width, height);

        debug!(width, height, adapter = %context.adapter_name, "renderer ready");
        Ok(Self {
            layouts,
            target,
            readback: None,
            contract,
            contract_buffer,
            fallback,
            programs: HashMap::new(),
            failed: HashMap::new(),
            active: None,
            sources: [None, None],
            pool: TexturePool::new(options.texture_pool),
            context,
        })
    }

    /// Selects the program for `key`, compiling it on first use. Missing
    /// sources and compile failures select the crossfade fallback.
    pub(crate) fn use_program(&mut self, key: &ShaderKey, source: Option<&str>) -> ActiveProgram {
        if self.programs.contains_key(key) {
            self.active = Some(key.clone());
            return ActiveProgram::Requested;
        }
        if self.failed.contains_key(key) {
            self.active = None;
            return ActiveProgram::Fallback;
        }
        let Some(source) = source else {
            warn!(shader = %key, "no shader registered; using crossfade fallback");
            self.active = None;
            return ActiveProgram::Fallback;
        };

        match TransitionProgram::build(&self.context.device, &self.layouts, key, source) {
            Ok(program) => {
                self.programs.insert(key.clone(), program);
                self.active = Some(key.clone());
                ActiveProgram::Requested
            }
            Err(err) => {
                match err.line() {
                    Some(line) => error!(
                        shader = %key,
                        line,
                        error = %err,
                        "shader failed to compile; using crossfade fallback\n{}",
                        source_excerpt(source, line, EXCERPT_CONTEXT)
                    ),
                    None => error!(
                        shader = %key,
                        error = %err,
                        "shader failed to compile; using crossfade fallback"
                    ),
                }
                self.failed.insert(key.clone(), err);
                self.active = None;
                ActiveProgram::Fallback
            }
        }
    }

    pub(crate) fn compile_error(&self, key: &ShaderKey) -> Option<&CompileError> {
        self.failed.get(key)
    }

    /// Uploads `image` into `slot`, reusing the slot's texture when the size
    /// is unchanged and otherwise trading it through the pool.
    pub(crate) fn set_image(&mut self, slot: TextureSlot, image: &RgbaImage) {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            warn!(?slot, "ignoring empty image");
            return;
        }
        let index = slot.index();
        let reuse = self.sources[index]
            .as_ref()
            .is_some_and(|texture| texture.width == width && texture.height == height);
        if !reuse {
            if let Some(previous) = self.sources[index].take() {
                self.recycle(previous);
            }
            let texture = self
                .pool
                .acquire(width, height)
                .unwrap_or_else(|| SourceTexture::create(&self.context.device, width, height));
            self.sources[index] = Some(texture);
        }
        if let Some(texture) = &self.sources[index] {
            texture.upload(&self.context.queue, image);
        }
    }

    pub(crate) fn clear_image(&mut self, slot: TextureSlot) {
        if let Some(previous) = self.sources[slot.index()].take() {
            self.recycle(previous);
        }
    }

    fn recycle(&mut self, texture: SourceTexture) {
        let (width, height) = (texture.width, texture.height);
        if let Some(evicted) = self.pool.release(width, height, texture) {
            evicted.destroy();
        }
    }

    /// Draws one frame. Returns `false` without touching the target when no
    /// source texture has been set.
    pub(crate) fn render(
        &mut self,
        progress: f32,
        intensity: f32,
        time: f32,
        uniforms: &UniformMap,
    ) -> bool {
        let (view_a, view_b) = match (&self.sources[0], &self.sources[1]) {
            (None, None) => return false,
            (Some(a), Some(b)) => (&a.view, &b.view),
            (Some(only), None) | (None, Some(only)) => (&only.view, &only.view),
        };

        self.contract.update(progress, intensity, time);
        let queue = &self.context.queue;
        queue.write_buffer(&self.contract_buffer, 0, bytemuck::bytes_of(&self.contract));

        let program = match self
            .active
            .as_ref()
            .and_then(|key| self.programs.get_mut(key))
        {
            Some(program) => program,
            None => &mut self.fallback,
        };
        program.write_params(queue, uniforms);

        let device = &self.context.device;
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transition bind group"),
            layout: &self.layouts.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.contract_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view_a),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view_b),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.layouts.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: program.params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("transition encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("transition pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        queue.submit(Some(encoder.finish()));
        true
    }

    pub(crate) fn read_pixels(&mut self) -> Result<RgbaImage> {
        let (width, height) = (self.target.width, self.target.height);
        let device = &self.context.device;
        if !self
            .readback
            .as_ref()
            .is_some_and(|readback| readback.matches(width, height))
        {
            if let Some(stale) = self.readback.take() {
                stale.destroy();
            }
            self.readback = Some(Readback::new(device, width, height));
        }
        let readback = self
            .readback
            .as_ref()
            .ok_or_else(|| anyhow!("readback buffer unavailable"))?;
        readback.read(device, &self.context.queue, &self.target.texture)
    }

    /// Recreates the output target; source textures stay bound.
    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        let (width, height) = self.context.clamp_size(width, height);
        if width == self.target.width && height == self.target.height {
            return;
        }
        self.target.texture.destroy();
        self.target = RenderTarget::new(&self.context.device, width, height);
        self.contract.set_resolution(width, height);
        debug!(width, height, "renderer resized");
    }

    pub(crate) fn size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    pub(crate) fn snapshot(&self) -> GpuSnapshot {
        GpuSnapshot {
            width: self.target.width,
            height: self.target.height,
            adapter: self.context.adapter_name.clone(),
            active: self.active.clone(),
            compiled: self.programs.len() + 1,
            failed: self.failed.len(),
            active_textures: self.sources.iter().flatten().count(),
            pooled_textures: self.pool.len(),
        }
    }

    /// Releases every buffer and texture before the device itself drops.
    pub(crate) fn destroy(mut self) {
        for texture in self.sources.iter_mut().filter_map(Option::take) {
            texture.destroy();
        }
        for texture in self.pool.drain() {
            texture.destroy();
        }
        for program in self.programs.values() {
            program.destroy();
        }
        self.fallback.destroy();
        if let Some(readback) = self.readback.take() {
            readback.destroy();
        }
        self.contract_buffer.destroy();
        self.target.texture.destroy();
        let _ = self.context.device.poll(wgpu::PollType::Wait);
        debug!("renderer resources released");
    }
}
