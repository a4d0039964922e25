//! Offscreen transition renderer.
//!
//! A [`Renderer`] owns one headless `wgpu` device, an output target of an
//! explicit size, the two source textures ("A" and "B") and a cache of
//! compiled transition programs. One call to [`Renderer::render`] draws one
//! composited frame:
//!
//! ```text
//!   ShaderRegistry ──▶ use_variant() ──▶ wrap + naga validate ──▶ pipeline cache
//!                                              │ failure
//!                                              ▼
//!                                        crossfade fallback
//!   RgbaImage A/B ──▶ update_image() ──▶ texture pool ─┐
//!                                                      ▼
//!   progress, intensity, uniforms ──▶ render() ──▶ target ──▶ read_pixels()
//! ```
//!
//! Context creation failure is not an error for callers: the renderer stays
//! in an inert unsupported state and every operation becomes a no-op, so
//! hosts can check [`Renderer::is_supported`] once and degrade.

use std::time::Instant;

use anyhow::{anyhow, Result};
use engines::{ShaderKey, ShaderRegistry, UniformMap};
use image::RgbaImage;
use serde::Serialize;
use tracing::{debug, warn};

pub mod compile;
mod gpu;

pub use compile::{
    source_excerpt, validate, wrap_transition_fragment, CompileError, ParamField, ParamKind,
    ParamsLayout, WrappedShader,
};
pub use gpu::TexturePool;

use gpu::GpuState;

/// Texture pool size used when none is configured.
pub const DEFAULT_TEXTURE_POOL: usize = 10;

/// Adapter preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpuPower {
    Low,
    #[default]
    High,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererOptions {
    pub power: GpuPower,
    /// Requests the platform's software adapter.
    pub force_software: bool,
    pub texture_pool: usize,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            power: GpuPower::default(),
            force_software: false,
            texture_pool: DEFAULT_TEXTURE_POOL,
        }
    }
}

/// Which of the two sampler inputs a bitmap feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    A,
    B,
}

impl TextureSlot {
    pub(crate) fn index(self) -> usize {
        match self {
            TextureSlot::A => 0,
            TextureSlot::B => 1,
        }
    }
}

/// Outcome of selecting a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveProgram {
    /// The requested variant compiled and is bound.
    Requested,
    /// The crossfade fallback is bound instead.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RendererStats {
    pub supported: bool,
    pub width: u32,
    pub height: u32,
    pub active_program: Option<String>,
    pub using_fallback: bool,
    pub compiled_programs: usize,
    pub failed_programs: usize,
    pub active_textures: usize,
    pub pooled_textures: usize,
    pub adapter: Option<String>,
}

/// The compositing surface as the frame pipelines see it. [`Renderer`] is
/// the real implementation; tests substitute their own.
pub trait Compositor {
    fn is_supported(&self) -> bool;

    fn use_variant(&mut self, registry: &ShaderRegistry, key: &ShaderKey) -> ActiveProgram;

    fn update_image(&mut self, slot: TextureSlot, image: &RgbaImage);

    fn render(&mut self, progress: f32, intensity: f32, uniforms: &UniformMap) -> bool;

    fn read_pixels(&mut self) -> Result<RgbaImage>;

    /// Freezes the `time` uniform at `time` seconds, or resumes the clock
    /// with `None`.
    fn pin_time(&mut self, time: Option<f32>);

    fn dispose(&mut self);
}

enum RendererState {
    Unsupported,
    Ready(Box<GpuState>),
    Disposed,
}

pub struct Renderer {
    state: RendererState,
    width: u32,
    height: u32,
    created: Instant,
    pinned_time: Option<f32>,
}

impl Renderer {
    /// Creates a renderer with a `width`x`height` output target. Never fails;
    /// see [`Renderer::is_supported`].
    pub fn new(width: u32, height: u32, options: &RendererOptions) -> Self {
        let state = match GpuState::new(width.max(1), height.max(1), options) {
            Ok(gpu) => RendererState::Ready(Box::new(gpu)),
            Err(err) => {
                warn!(error = %err, width, height, "GPU renderer unavailable");
                RendererState::Unsupported
            }
        };
        let (width, height) = match &state {
            RendererState::Ready(gpu) => gpu.size(),
            _ => (width, height),
        };
        Self {
            state,
            width,
            height,
            created: Instant::now(),
            pinned_time: None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.state, RendererState::Ready(_))
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.state, RendererState::Disposed)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn gpu(&mut self) -> Option<&mut GpuState> {
        match &mut self.state {
            RendererState::Ready(gpu) => Some(gpu.as_mut()),
            _ => None,
        }
    }

    /// Binds the registered program for `key`, or the crossfade fallback
    /// when the key is unknown or fails to compile.
    pub fn use_variant(&mut self, registry: &ShaderRegistry, key: &ShaderKey) -> ActiveProgram {
        self.use_source(key, registry.shader_source(key))
    }

    /// Binds `source` under `key`. Programs compile once per key; a key that
    /// failed before stays on the fallback.
    pub fn use_source(&mut self, key: &ShaderKey, source: Option<&str>) -> ActiveProgram {
        match self.gpu() {
            Some(gpu) => gpu.use_program(key, source),
            None => ActiveProgram::Fallback,
        }
    }

    /// Last compile failure recorded for `key`.
    pub fn compile_error(&self, key: &ShaderKey) -> Option<CompileError> {
        match &self.state {
            RendererState::Ready(gpu) => gpu.compile_error(key).cloned(),
            _ => None,
        }
    }

    /// Uploads `image` into `slot`. The slot's texture is reused when the
    /// dimensions match the previous upload.
    pub fn update_image(&mut self, slot: TextureSlot, image: &RgbaImage) {
        if let Some(gpu) = self.gpu() {
            gpu.set_image(slot, image);
        }
    }

    pub fn clear_image(&mut self, slot: TextureSlot) {
        if let Some(gpu) = self.gpu() {
            gpu.clear_image(slot);
        }
    }

    /// Seconds since creation, or the pinned time.
    pub fn time(&self) -> f32 {
        self.pinned_time
            .unwrap_or_else(|| self.created.elapsed().as_secs_f32())
    }

    pub fn pin_time(&mut self, time: Option<f32>) {
        self.pinned_time = time;
    }

    /// Draws one frame into the target. Returns `false` when nothing was
    /// drawn: no GPU, disposed, or no source image yet.
    pub fn render(&mut self, progress: f32, intensity: f32, uniforms: &UniformMap) -> bool {
        let time = self.time();
        match self.gpu() {
            Some(gpu) => gpu.render(progress, intensity, time, uniforms),
            None => false,
        }
    }

    /// Copies the target back as RGBA with row 0 at the top.
    pub fn read_pixels(&mut self) -> Result<RgbaImage> {
        match self.gpu() {
            Some(gpu) => gpu.read_pixels(),
            None => Err(anyhow!("renderer has no GPU context")),
        }
    }

    /// Changes the output size without re-uploading source images.
    pub fn resize(&mut self, width: u32, height: u32) {
        if let Some(gpu) = self.gpu() {
            gpu.resize(width, height);
            let (width, height) = gpu.size();
            self.width = width;
            self.height = height;
        }
    }

    pub fn stats(&self) -> RendererStats {
        match &self.state {
            RendererState::Ready(gpu) => {
                let snapshot = gpu.snapshot();
                RendererStats {
                    supported: true,
                    width: snapshot.width,
                    height: snapshot.height,
                    using_fallback: snapshot.active.is_none(),
                    active_program: snapshot.active.map(|key| key.to_string()),
                    compiled_programs: snapshot.compiled,
                    failed_programs: snapshot.failed,
                    active_textures: snapshot.active_textures,
                    pooled_textures: snapshot.pooled_textures,
                    adapter: Some(snapshot.adapter),
                }
            }
            _ => RendererStats {
                supported: false,
                width: self.width,
                height: self.height,
                active_program: None,
                using_fallback: true,
                compiled_programs: 0,
                failed_programs: 0,
                active_textures: 0,
                pooled_textures: 0,
                adapter: None,
            },
        }
    }

    /// Releases every GPU object. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        match std::mem::replace(&mut self.state, RendererState::Disposed) {
            RendererState::Ready(gpu) => {
                gpu.destroy();
                debug!("renderer disposed");
            }
            RendererState::Unsupported | RendererState::Disposed => {}
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Compositor for Renderer {
    fn is_supported(&self) -> bool {
        Renderer::is_supported(self)
    }

    fn use_variant(&mut self, registry: &ShaderRegistry, key: &ShaderKey) -> ActiveProgram {
        Renderer::use_variant(self, registry, key)
    }

    fn update_image(&mut self, slot: TextureSlot, image: &RgbaImage) {
        Renderer::update_image(self, slot, image);
    }

    fn render(&mut self, progress: f32, intensity: f32, uniforms: &UniformMap) -> bool {
        Renderer::render(self, progress, intensity, uniforms)
    }

    fn read_pixels(&mut self) -> Result<RgbaImage> {
        Renderer::read_pixels(self)
    }

    fn pin_time(&mut self, time: Option<f32>) {
        Renderer::pin_time(self, time);
    }

    fn dispose(&mut self) {
        Renderer::dispose(self);
    }
}
