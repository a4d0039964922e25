use std::collections::VecDeque;

use image::RgbaImage;

pub(crate) const SOURCE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Bounded stash of released textures keyed by their dimensions. Releasing
/// into a full pool evicts the oldest entry and hands it back to the caller.
#[derive(Debug)]
pub struct TexturePool<T> {
    capacity: usize,
    entries: VecDeque<((u32, u32), T)>,
}

impl<T> TexturePool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Takes the most recently released texture with matching dimensions.
    pub fn acquire(&mut self, width: u32, height: u32) -> Option<T> {
        let index = self
            .entries
            .iter()
            .rposition(|(size, _)| *size == (width, height))?;
        self.entries.remove(index).map(|(_, item)| item)
    }

    pub fn release(&mut self, width: u32, height: u32, item: T) -> Option<T> {
        self.entries.push_back(((width, height), item));
        if self.entries.len() > self.capacity {
            self.entries.pop_front().map(|(_, evicted)| evicted)
        } else {
            None
        }
    }

    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|(_, item)| item)
    }
}

pub(crate) struct SourceTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl SourceTexture {
    pub fn create(device: &wgpu::Device, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("transition source texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: SOURCE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
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

    /// Uploads `image` bottom row first so `vUv.y = 1` samples the top edge.
    pub fn upload(&self, queue: &wgpu::Queue, image: &RgbaImage) {
        let flipped = image::imageops::flip_vertical(image);
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            flipped.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * self.width),
                rows_per_image: Some(self.height),
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn destroy(self) {
        self.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_matching_dimensions_only() {
        let mut pool = TexturePool::new(4);
        assert!(pool.release(64, 64, "a").is_none());
        assert!(pool.release(32, 32, "b").is_none());
        assert!(pool.release(64, 64, "c").is_none());

        assert_eq!(pool.acquire(64, 64), Some("c"));
        assert_eq!(pool.acquire(16, 16), None);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut pool = TexturePool::new(2);
        pool.release(8, 8, 1);
        pool.release(8, 8, 2);
        assert_eq!(pool.release(8, 8, 3), Some(1));
        assert_eq!(pool.drain().collect::<Vec<_>>(), vec![2, 3]);
        assert!(pool.is_empty());
    }
}
