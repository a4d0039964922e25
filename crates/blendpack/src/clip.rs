use std::path::Path;

use anyhow::{Context, Result};
use image::RgbaImage;
use sequencer::{ImageSequence, MediaError, MediaSource, StillImage};

/// A clip given on the command line: one image, or a directory of frames.
#[derive(Debug)]
pub enum Clip {
    Still(StillImage),
    Sequence(ImageSequence),
}

impl Clip {
    pub fn open(path: &Path, sequence_fps: f64, still_duration: f64) -> Result<Self> {
        if path.is_dir() {
            let sequence = ImageSequence::open(path, sequence_fps)
                .with_context(|| format!("failed to open frame directory {}", path.display()))?;
            tracing::debug!(
                path = %path.display(),
                frames = sequence.len(),
                fps = sequence_fps,
                "opened image sequence"
            );
            Ok(Clip::Sequence(sequence))
        } else {
            let still = StillImage::open(path)
                .with_context(|| format!("failed to open image {}", path.display()))?;
            Ok(Clip::Still(still.with_duration(still_duration)))
        }
    }
}

impl MediaSource for Clip {
    fn duration(&self) -> Option<f64> {
        match self {
            Clip::Still(still) => still.duration(),
            Clip::Sequence(sequence) => sequence.duration(),
        }
    }

    fn frame_rate(&self) -> Option<f64> {
        match self {
            Clip::Still(still) => still.frame_rate(),
            Clip::Sequence(sequence) => sequence.frame_rate(),
        }
    }

    async fn seek(&mut self, time: f64) -> Result<(), MediaError> {
        match self {
            Clip::Still(still) => still.seek(time).await,
            Clip::Sequence(sequence) => sequence.seek(time).await,
        }
    }

    fn current_frame(&self) -> Option<RgbaImage> {
        match self {
            Clip::Still(still) => still.current_frame(),
            Clip::Sequence(sequence) => sequence.current_frame(),
        }
    }

    fn duplicate(&self) -> Result<Self, MediaError> {
        Ok(match self {
            Clip::Still(still) => Clip::Still(still.duplicate()?),
            Clip::Sequence(sequence) => Clip::Sequence(sequence.duplicate()?),
        })
    }

    fn release(&mut self) {
        match self {
            Clip::Still(still) => still.release(),
            Clip::Sequence(sequence) => sequence.release(),
        }
    }
}
