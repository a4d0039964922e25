use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use timeline::DEFAULT_SAFETY_MARGIN;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Image container used for exported frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Webp,
    Png,
    Jpeg,
}

impl FrameFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FrameFormat::Webp => "webp",
            FrameFormat::Png => "png",
            FrameFormat::Jpeg => "jpg",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            FrameFormat::Webp => "image/webp",
            FrameFormat::Png => "image/png",
            FrameFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::str::FromStr for FrameFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(FrameFormat::Webp),
            "png" => Ok(FrameFormat::Png),
            "jpg" | "jpeg" => Ok(FrameFormat::Jpeg),
            other => Err(format!("unsupported frame format '{other}'")),
        }
    }
}

/// Pipeline tuning read from `blendpack.toml`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub renderer: RendererConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_limit_mb: u64,
    pub width: u32,
    pub height: u32,
    #[serde(with = "humantime_duration")]
    pub seek_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub settle: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    #[serde(with = "humantime_duration")]
    pub seek_timeout: Duration,
    /// Extra attempts after the first seek times out.
    pub seek_retries: u32,
    #[serde(with = "humantime_duration")]
    pub retry_backoff: Duration,
    #[serde(with = "humantime_duration")]
    pub clone_timeout: Duration,
    pub upload_concurrency: usize,
    pub format: FrameFormat,
    pub subfolder: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RendererConfig {
    pub texture_pool: usize,
}

fn default_safety_margin() -> f64 {
    DEFAULT_SAFETY_MARGIN
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            safety_margin: default_safety_margin(),
            cache: CacheConfig::default(),
            export: ExportConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512,
            width: 512,
            height: 288,
            seek_timeout: Duration::from_millis(1000),
            settle: Duration::from_millis(16),
        }
    }
}

impl CacheConfig {
    pub fn memory_limit_bytes(&self) -> u64 {
        self.memory_limit_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            seek_timeout: Duration::from_millis(500),
            seek_retries: 5,
            retry_backoff: Duration::from_millis(100),
            clone_timeout: Duration::from_secs(5),
            upload_concurrency: 4,
            format: FrameFormat::default(),
            subfolder: "blendpack_export".to_string(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self { texture_pool: 10 }
    }
}

impl AppConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: AppConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    /// Loads `path`, or the defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.safety_margin.is_finite() || self.safety_margin < 0.0 {
            return Err(ConfigError::Invalid(
                "safety_margin must be a non-negative number of seconds".into(),
            ));
        }
        if self.cache.width == 0 || self.cache.height == 0 {
            return Err(ConfigError::Invalid(
                "cache width and height must be greater than zero".into(),
            ));
        }
        if self.export.upload_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "export.upload_concurrency must be at least 1".into(),
            ));
        }
        if self.export.subfolder.contains("..") {
            return Err(ConfigError::Invalid(format!(
                "export.subfolder '{}' may not contain '..'",
                self.export.subfolder
            )));
        }
        if self.renderer.texture_pool == 0 {
            return Err(ConfigError::Invalid(
                "renderer.texture_pool must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v))
        }
    }

    deserializer.deserialize_any(Visitor)
}

mod humantime_duration {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        super::deserialize_duration(deserializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
safety_margin = 0.05

[cache]
memory_limit_mb = 256
seek_timeout = "750ms"
settle = 0.5

[export]
seek_retries = 3
retry_backoff = "250ms"
clone_timeout = 2
format = "png"
"#;

    #[test]
    fn parses_sample_config() {
        let config = AppConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.safety_margin, 0.05);
        assert_eq!(config.cache.memory_limit_bytes(), 256 * 1024 * 1024);
        assert_eq!(config.cache.width, 512);
        assert_eq!(config.cache.seek_timeout, Duration::from_millis(750));
        assert_eq!(config.cache.settle, Duration::from_millis(500));
        assert_eq!(config.export.seek_retries, 3);
        assert_eq!(config.export.retry_backoff, Duration::from_millis(250));
        assert_eq!(config.export.clone_timeout, Duration::from_secs(2));
        assert_eq!(config.export.seek_timeout, Duration::from_millis(500));
        assert_eq!(config.export.format, FrameFormat::Png);
        assert_eq!(config.renderer.texture_pool, 10);
    }

    #[test]
    fn empty_input_yields_defaults() {
        let config = AppConfig::from_toml_str("").expect("parse");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.export.upload_concurrency, 4);
        assert_eq!(config.export.subfolder, "blendpack_export");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let err = AppConfig::from_toml_str("[export]\nupload_concurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_duration() {
        let err = AppConfig::from_toml_str("[cache]\nsettle = -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn serializes_durations_as_humantime() {
        let text = toml::to_string(&AppConfig::default()).expect("serialize");
        assert!(text.contains("seek_timeout = \"500ms\""));
        let reparsed = AppConfig::from_toml_str(&text).expect("reparse");
        assert_eq!(reparsed, AppConfig::default());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_or_default(&dir.path().join("blendpack.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn frame_format_names() {
        assert_eq!("JPG".parse::<FrameFormat>(), Ok(FrameFormat::Jpeg));
        assert_eq!(FrameFormat::Webp.extension(), "webp");
        assert!("gif".parse::<FrameFormat>().is_err());
    }
}
