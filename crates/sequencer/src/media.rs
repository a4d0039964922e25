//! The seam between the frame pipelines and whatever decodes pixels.
//!
//! A [`MediaSource`] behaves like a seekable player: it reports a duration,
//! accepts a seek that completes asynchronously, and exposes the frame at
//! its current position. Seeks may stall; callers bound them with
//! [`crate::seek`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;
use thiserror::Error;
use tracing::debug;

/// Duration assumed for sources that do not report one.
pub const FALLBACK_DURATION: f64 = 10.0;

const SEQUENCE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no image frames found in {}", .0.display())]
    Empty(PathBuf),
    #[error("frame rate must be positive, got {0}")]
    InvalidFrameRate(f64),
    #[error("media unavailable: {0}")]
    Unavailable(String),
}

pub trait MediaSource: Send + Sized {
    /// Length in seconds, `None` once the source is gone or not yet known.
    fn duration(&self) -> Option<f64>;

    /// Native frame rate when the container knows it.
    fn frame_rate(&self) -> Option<f64> {
        None
    }

    /// Moves the playhead; resolves once the new frame is available.
    fn seek(&mut self, time: f64) -> impl Future<Output = Result<(), MediaError>> + Send;

    /// Frame at the current playhead.
    fn current_frame(&self) -> Option<RgbaImage>;

    /// Independent handle on the same media with its own playhead.
    fn duplicate(&self) -> Result<Self, MediaError>;

    /// Resolves once the duration is known.
    fn wait_ready(&mut self) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }

    /// Drops decoder state. The handle is not used afterwards.
    fn release(&mut self) {}
}

/// A single bitmap presented as a source of fixed length.
#[derive(Debug, Clone)]
pub struct StillImage {
    image: Arc<RgbaImage>,
    duration: f64,
}

impl StillImage {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            duration: FALLBACK_DURATION,
        }
    }

    pub fn open(path: &Path) -> Result<Self, MediaError> {
        Ok(Self::new(decode_rgba(path)?))
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        if duration.is_finite() && duration > 0.0 {
            self.duration = duration;
        }
        self
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }
}

impl MediaSource for StillImage {
    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    async fn seek(&mut self, _time: f64) -> Result<(), MediaError> {
        Ok(())
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        Some(self.image.as_ref().clone())
    }

    fn duplicate(&self) -> Result<Self, MediaError> {
        Ok(self.clone())
    }
}

/// Numbered still frames in one directory played back at a fixed rate.
/// Frames sort by file name; the clip lasts `frames / fps` seconds.
#[derive(Debug)]
pub struct ImageSequence {
    root: PathBuf,
    frames: Arc<Vec<PathBuf>>,
    fps: f64,
    position: Option<usize>,
    current: Option<RgbaImage>,
    released: bool,
}

impl ImageSequence {
    pub fn open(root: impl AsRef<Path>, fps: f64) -> Result<Self, MediaError> {
        let root = root.as_ref().to_path_buf();
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MediaError::InvalidFrameRate(fps));
        }
        let entries = std::fs::read_dir(&root).map_err(|source| MediaError::Io {
            path: root.clone(),
            source,
        })?;
        let mut frames = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| MediaError::Io {
                path: root.clone(),
                source,
            })?;
            let path = entry.path();
            let is_frame = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    SEQUENCE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                });
            if is_frame && path.is_file() {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            return Err(MediaError::Empty(root));
        }
        frames.sort();
        debug!(root = %root.display(), frames = frames.len(), fps, "opened image sequence");
        Ok(Self {
            root,
            frames: Arc::new(frames),
            fps,
            position: None,
            current: None,
            released: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Index of the frame shown at `time`.
    pub fn frame_index(&self, time: f64) -> usize {
        let last = self.frames.len().saturating_sub(1);
        if !time.is_finite() || time <= 0.0 {
            return 0;
        }
        ((time * self.fps).floor() as usize).min(last)
    }

    pub fn position(&self) -> Option<usize> {
        self.position
    }
}

impl MediaSource for ImageSequence {
    fn duration(&self) -> Option<f64> {
        if self.released {
            return None;
        }
        Some(self.frames.len() as f64 / self.fps)
    }

    fn frame_rate(&self) -> Option<f64> {
        Some(self.fps)
    }

    async fn seek(&mut self, time: f64) -> Result<(), MediaError> {
        if self.released {
            return Err(MediaError::Unavailable(self.root.display().to_string()));
        }
        let index = self.frame_index(time);
        if self.position == Some(index) && self.current.is_some() {
            return Ok(());
        }
        let path = self.frames[index].clone();
        let image = tokio::task::spawn_blocking(move || decode_rgba(&path))
            .await
            .map_err(|err| MediaError::Unavailable(format!("decode task failed: {err}")))??;
        self.position = Some(index);
        self.current = Some(image);
        Ok(())
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        self.current.clone()
    }

    fn duplicate(&self) -> Result<Self, MediaError> {
        if self.released {
            return Err(MediaError::Unavailable(self.root.display().to_string()));
        }
        Ok(Self {
            root: self.root.clone(),
            frames: Arc::clone(&self.frames),
            fps: self.fps,
            position: None,
            current: None,
            released: false,
        })
    }

    fn release(&mut self) {
        self.released = true;
        self.current = None;
        self.position = None;
    }
}

pub fn decode_rgba(path: &Path) -> Result<RgbaImage, MediaError> {
    let image = image::open(path).map_err(|source| MediaError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.into_rgba8())
}
