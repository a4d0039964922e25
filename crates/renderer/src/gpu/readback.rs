use anyhow::{anyhow, Context, Result};
use image::RgbaImage;

pub(crate) fn padded_bytes_per_row(width: u32) -> u32 {
    (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

/// Staging buffer sized for one render target.
pub(crate) struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
}

impl Readback {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let padded_row = padded_bytes_per_row(width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("transition readback"),
            size: u64::from(padded_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            width,
            height,
            padded_row,
        }
    }

    pub fn matches(&self, width: u32, height: u32) -> bool {
        self.width == width && self.height == height
    }

    /// Copies `texture` into the staging buffer and returns its pixels with
    /// row 0 at the top.
    pub fn read(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
    ) -> Result<RgbaImage> {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("transition readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(Some(encoder.finish()));

        let slice = self.buffer.slice(..);
        let (tx, rx) = crossbeam_channel::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device
            .poll(wgpu::PollType::Wait)
            .map_err(|err| anyhow!("device poll failed: {err}"))?;
        rx.recv()
            .context("readback callback dropped")?
            .map_err(|err| anyhow!("failed to map readback buffer: {err}"))?;

        let row_bytes = self.width as usize * 4;
        let mut pixels = Vec::with_capacity(row_bytes * self.height as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(self.padded_row as usize).take(self.height as usize) {
                pixels.extend_from_slice(&row[..row_bytes]);
            }
        }
        self.buffer.unmap();

        RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| anyhow!("readback produced a short buffer"))
    }

    pub fn destroy(&self) {
        self.buffer.destroy();
    }
}
