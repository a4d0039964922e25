use anyhow::{bail, Context as AnyhowContext, Result};

use crate::{GpuPower, RendererOptions};

/// Headless device wiring: no surface, every frame lands in an offscreen
/// target owned by `GpuState`.
pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
    pub max_dimension: u32,
}

impl GpuContext {
    pub(crate) fn new(width: u32, height: u32, options: &RendererOptions) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let power_preference = match options.power {
            GpuPower::Low => wgpu::PowerPreference::LowPower,
            GpuPower::High => wgpu::PowerPreference::HighPerformance,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            compatible_surface: None,
            force_fallback_adapter: options.force_software,
        }))
        .context("failed to find a suitable GPU adapter")?;

        let adapter_info = adapter.get_info();
        let limits = adapter.limits();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            device_type = ?adapter_info.device_type,
            "selected GPU adapter"
        );

        let max_dimension = limits.max_texture_dimension_2d;
        if width > max_dimension || height > max_dimension {
            bail!("GPU max texture dimension is {max_dimension}, requested target is {width}x{height}");
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("blendpack device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;

        Ok(Self {
            _instance: instance,
            device,
            queue,
            adapter_name: adapter_info.name,
            max_dimension,
        })
    }

    pub(crate) fn clamp_size(&self, width: u32, height: u32) -> (u32, u32) {
        (
            width.clamp(1, self.max_dimension),
            height.clamp(1, self.max_dimension),
        )
    }
}
