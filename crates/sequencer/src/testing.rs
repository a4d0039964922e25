//! Fakes shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use engines::{ShaderKey, ShaderRegistry, UniformMap};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use renderer::{ActiveProgram, Compositor, TextureSlot};

use crate::media::{MediaError, MediaSource};

/// Solid-colour source whose red channel encodes the playhead in tenths
/// of a second. Seeks can be made to stall.
#[derive(Debug, Clone)]
pub struct FakeVideo {
    pub duration: Option<f64>,
    pub position: f64,
    pub size: (u32, u32),
    pub seek_delay: Duration,
    pub stall_first: usize,
    pub seeks: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    pub fps: Option<f64>,
    /// Duration reads `None` once this many seeks have happened.
    pub vanish_after: Option<usize>,
}

impl FakeVideo {
    pub fn new(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            position: 0.0,
            size: (8, 4),
            seek_delay: Duration::ZERO,
            stall_first: 0,
            seeks: Arc::new(AtomicUsize::new(0)),
            released: Arc::new(AtomicUsize::new(0)),
            fps: None,
            vanish_after: None,
        }
    }

    pub fn seek_count(&self) -> usize {
        self.seeks.load(Ordering::SeqCst)
    }
}

impl MediaSource for FakeVideo {
    fn duration(&self) -> Option<f64> {
        match self.vanish_after {
            Some(limit) if self.seek_count() >= limit => None,
            _ => self.duration,
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        self.fps
    }

    async fn seek(&mut self, time: f64) -> Result<(), MediaError> {
        let attempt = self.seeks.fetch_add(1, Ordering::SeqCst);
        if attempt < self.stall_first {
            std::future::pending::<()>().await;
        }
        if !self.seek_delay.is_zero() {
            tokio::time::sleep(self.seek_delay).await;
        }
        self.position = time;
        Ok(())
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        let red = (self.position * 10.0).round().clamp(0.0, 255.0) as u8;
        Some(RgbaImage::from_pixel(
            self.size.0,
            self.size.1,
            Rgba([red, 0, 0, 255]),
        ))
    }

    fn duplicate(&self) -> Result<Self, MediaError> {
        let mut copy = self.clone();
        copy.seeks = Arc::new(AtomicUsize::new(0));
        Ok(copy)
    }

    fn release(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a [`FakeCompositor`] was asked to do.
#[derive(Default)]
pub struct CompositorLog {
    pub renders: Mutex<Vec<f32>>,
    pub times: Mutex<Vec<f32>>,
    /// Red channel of the top-left pixel of every uploaded image.
    pub uploads: Mutex<Vec<(TextureSlot, u8)>>,
    pub disposed: AtomicUsize,
}

/// Records calls instead of drawing. `read_pixels` returns a solid frame
/// whose red channel is the last rendered progress.
pub struct FakeCompositor {
    pub supported: bool,
    pub width: u32,
    pub height: u32,
    has_image: bool,
    last_progress: f32,
    pub log: Arc<CompositorLog>,
}

impl FakeCompositor {
    pub fn new(width: u32, height: u32, log: Arc<CompositorLog>) -> Self {
        Self {
            supported: true,
            width,
            height,
            has_image: false,
            last_progress: 0.0,
            log,
        }
    }
}

impl Compositor for FakeCompositor {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn use_variant(&mut self, registry: &ShaderRegistry, key: &ShaderKey) -> ActiveProgram {
        if registry.has_variant(key) {
            ActiveProgram::Requested
        } else {
            ActiveProgram::Fallback
        }
    }

    fn update_image(&mut self, slot: TextureSlot, image: &RgbaImage) {
        self.has_image = true;
        let red = image.get_pixel(0, 0).0[0];
        self.log.uploads.lock().push((slot, red));
    }

    fn render(&mut self, progress: f32, _intensity: f32, _uniforms: &UniformMap) -> bool {
        if !self.has_image {
            return false;
        }
        self.last_progress = progress;
        self.log.renders.lock().push(progress);
        true
    }

    fn read_pixels(&mut self) -> Result<RgbaImage> {
        let red = (self.last_progress.clamp(0.0, 1.0) * 255.0).round() as u8;
        Ok(RgbaImage::from_pixel(
            self.width,
            self.height,
            Rgba([red, 0, 0, 255]),
        ))
    }

    fn pin_time(&mut self, time: Option<f32>) {
        if let Some(time) = time {
            self.log.times.lock().push(time);
        }
    }

    fn dispose(&mut self) {
        self.log.disposed.fetch_add(1, Ordering::SeqCst);
    }
}
