//! Typed configuration for the transition pipeline.
//!
//! - `TransitionSettings` is the flat record the host persists: engine and
//!   variant, timing, easing or curve, clip offsets, export mode and any
//!   extra per-shader uniform overrides.
//! - `Flavor` bundles intensity and curve presets.
//! - `AppConfig` holds pipeline tuning loaded from TOML.
use std::path::PathBuf;

mod config;
mod flavor;
mod transition;

pub use config::{AppConfig, CacheConfig, ConfigError, ExportConfig, FrameFormat, RendererConfig};
pub use flavor::Flavor;
pub use transition::{
    FrameRef, TransitionSettings, CLIP_START_RANGE, DEFAULT_DURATION, DEFAULT_EASING,
    DEFAULT_ENGINE, DEFAULT_FPS, DEFAULT_INTENSITY, DEFAULT_VARIANT, DURATION_RANGE, FPS_RANGE,
    INTENSITY_RANGE,
};

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
