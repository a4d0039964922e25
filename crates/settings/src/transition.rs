use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use engines::{ShaderKey, UniformMap, UniformValue};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use timeline::{
    CurveSpec, Easing, EasingSelection, Point, TimelineError, TimelineMode, TimelineParams,
};
use tracing::warn;

use crate::SettingsError;

pub const DEFAULT_ENGINE: &str = "Dissolve";
pub const DEFAULT_VARIANT: &str = "powder";
pub const DEFAULT_DURATION: f64 = 2.0;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_INTENSITY: f64 = 1.0;
pub const DEFAULT_EASING: &str = "linear";

pub const DURATION_RANGE: (f64, f64) = (0.1, 10.0);
pub const FPS_RANGE: (u32, u32) = (12, 60);
pub const INTENSITY_RANGE: (f64, f64) = (0.0, 2.0);
pub const CLIP_START_RANGE: (f64, f64) = (-600.0, 600.0);

/// Keys the host writes into the record that are neither settings nor shader
/// uniforms.
const HOST_ONLY_KEYS: [&str; 1] = ["isRealPreview"];

/// Reference to one uploaded frame, in the shape the host storage returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_frame_type")]
    pub kind: String,
}

fn default_frame_type() -> String {
    "temp".to_string()
}

impl FrameRef {
    pub fn new(name: impl Into<String>, subfolder: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subfolder: subfolder.into(),
            kind: kind.into(),
        }
    }
}

/// The persisted settings record. Field names follow the host's camelCase
/// JSON; anything unrecognised lands in `extra` and is treated as a live
/// shader uniform override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransitionSettings {
    pub engine: String,
    pub variant: String,
    pub duration: f64,
    #[serde(deserialize_with = "deserialize_fps")]
    pub fps: u32,
    pub intensity: f64,
    pub easing: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_p0: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_c0: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_c1: Option<Point>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub curve_p1: Option<Point>,
    #[serde(alias = "clip_a_start")]
    pub clip_a_start: f64,
    #[serde(alias = "clip_b_start")]
    pub clip_b_start: f64,
    pub export_full_videos: bool,
    #[serde(rename = "use_source_fps")]
    pub use_source_fps: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_rendered_frames: Option<Vec<FrameRef>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            engine: DEFAULT_ENGINE.to_string(),
            variant: DEFAULT_VARIANT.to_string(),
            duration: DEFAULT_DURATION,
            fps: DEFAULT_FPS,
            intensity: DEFAULT_INTENSITY,
            easing: DEFAULT_EASING.to_string(),
            curve_p0: None,
            curve_c0: None,
            curve_c1: None,
            curve_p1: None,
            clip_a_start: 0.0,
            clip_b_start: 0.0,
            export_full_videos: false,
            use_source_fps: false,
            pre_rendered_frames: None,
            extra: BTreeMap::new(),
        }
    }
}

impl TransitionSettings {
    pub fn from_json_str(input: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(input)?)
    }

    /// Reads a settings file. An empty file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String, SettingsError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn shader_key(&self) -> ShaderKey {
        ShaderKey::new(self.engine.clone(), self.variant.clone())
    }

    pub fn timeline_mode(&self) -> TimelineMode {
        TimelineMode::from_full_videos(self.export_full_videos)
    }

    /// All four points when the curve is fully configured.
    pub fn curve(&self) -> Option<CurveSpec> {
        match (self.curve_p0, self.curve_c0, self.curve_c1, self.curve_p1) {
            (Some(p0), Some(c0), Some(c1), Some(p1)) => Some(CurveSpec::new(p0, c0, c1, p1)),
            _ => None,
        }
    }

    pub fn set_curve(&mut self, curve: CurveSpec) {
        self.curve_p0 = Some(curve.p0);
        self.curve_c0 = Some(curve.c0);
        self.curve_c1 = Some(curve.c1);
        self.curve_p1 = Some(curve.p1);
    }

    pub fn clear_curve(&mut self) {
        self.curve_p0 = None;
        self.curve_c0 = None;
        self.curve_c1 = None;
        self.curve_p1 = None;
    }

    /// A complete curve wins over the easing name.
    pub fn easing_selection(&self) -> EasingSelection {
        match self.curve() {
            Some(curve) => EasingSelection::Curve(curve),
            None => EasingSelection::Named(Easing::from_name_or_linear(&self.easing)),
        }
    }

    /// Numeric, boolean and numeric-array extras, keyed by uniform name.
    pub fn live_uniforms(&self) -> UniformMap {
        self.extra
            .iter()
            .filter(|(name, _)| !HOST_ONLY_KEYS.contains(&name.as_str()))
            .filter_map(|(name, value)| json_uniform(value).map(|value| (name.clone(), value)))
            .collect()
    }

    pub fn set_uniform(&mut self, name: impl Into<String>, value: UniformValue) {
        let value = match value {
            UniformValue::Bool(flag) => serde_json::Value::Bool(flag),
            UniformValue::Float(number) => serde_json::json!(number),
            UniformValue::Vector(values) => serde_json::json!(values),
        };
        self.extra.insert(name.into(), value);
    }

    /// Frame rate used for planning. With `use_source_fps`, the first source
    /// rate above 1 fps wins.
    pub fn effective_fps(&self, source_rates: &[Option<f64>]) -> f64 {
        if self.use_source_fps {
            let source = source_rates
                .iter()
                .flatten()
                .copied()
                .find(|rate| rate.is_finite() && *rate > 1.0);
            match source {
                Some(rate) => return rate,
                None => warn!(
                    fps = self.fps,
                    "use_source_fps enabled but no source frame rate is known"
                ),
            }
        }
        f64::from(self.fps)
    }

    pub fn to_timeline_params(
        &self,
        video_dur_a: f64,
        video_dur_b: f64,
        safety_margin: f64,
    ) -> Result<TimelineParams, TimelineError> {
        Ok(TimelineParams::new(
            self.duration,
            self.clip_a_start,
            self.clip_b_start,
            video_dur_a,
            video_dur_b,
        )?
        .with_safety_margin(safety_margin))
    }

    /// Clamps every field into the range the editor allows and restores
    /// defaults for blank identifiers or non-finite numbers.
    pub fn sanitized(mut self) -> Self {
        if self.engine.trim().is_empty() {
            self.engine = DEFAULT_ENGINE.to_string();
        }
        if self.variant.trim().is_empty() {
            self.variant = DEFAULT_VARIANT.to_string();
        }
        if self.easing.trim().is_empty() {
            self.easing = DEFAULT_EASING.to_string();
        }
        self.duration = clamp_or(self.duration, DURATION_RANGE, DEFAULT_DURATION);
        self.fps = self.fps.clamp(FPS_RANGE.0, FPS_RANGE.1);
        self.intensity = clamp_or(self.intensity, INTENSITY_RANGE, DEFAULT_INTENSITY);
        self.clip_a_start = clamp_or(self.clip_a_start, CLIP_START_RANGE, 0.0);
        self.clip_b_start = clamp_or(self.clip_b_start, CLIP_START_RANGE, 0.0);
        self
    }
}

fn clamp_or(value: f64, (min, max): (f64, f64), fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn json_uniform(value: &serde_json::Value) -> Option<UniformValue> {
    match value {
        serde_json::Value::Bool(flag) => Some(UniformValue::Bool(*flag)),
        serde_json::Value::Number(number) => number.as_f64().map(UniformValue::Float),
        serde_json::Value::Array(items) if !items.is_empty() => items
            .iter()
            .map(serde_json::Value::as_f64)
            .collect::<Option<Vec<_>>>()
            .map(UniformValue::Vector),
        _ => None,
    }
}

/// Accepts integral or fractional frame rates; fractions round to nearest.
fn deserialize_fps<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = u32;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a frame rate as a non-negative number")
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u32::try_from(v).map_err(|_| E::custom(format!("frame rate {v} is out of range")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("frame rate must be non-negative"));
            }
            self.visit_u64(v as u64)
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v < 0.0 || v > f64::from(u32::MAX) {
                return Err(E::custom(format!("invalid frame rate {v}")));
            }
            Ok(v.round() as u32)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(DEFAULT_FPS)
        }
    }

    deserializer.deserialize_any(Visitor)
}
