//! Wraps an engine pack directory so callers can load its manifest, read the
//! fragment sources, and register the result alongside the built-in library.
//!
//! - `PackError` classifies manifest parsing, validation, and I/O failures.
//! - `EnginePack::load` reads `engine.toml`, validates it, and resolves every
//!   fragment so later compile errors point at shader code, not missing files.
//! - `discover_packs` scans a directory of packs, skipping broken ones with a
//!   warning.
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::library::SHADER_COMMON;
use crate::manifest::EngineManifest;
use crate::registry::{check_declared_defaults, ShaderKey, ShaderRegistry, VariantDef};

pub const MANIFEST_FILE: &str = "engine.toml";

#[derive(Debug, Error)]
pub enum PackError {
    #[error("manifest not found at {0}")]
    ManifestMissing(PathBuf),

    #[error("failed to parse manifest: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("manifest validation failed: {0:?}")]
    ManifestValidation(Vec<String>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct EnginePack {
    root: PathBuf,
    manifest: EngineManifest,
    variants: Vec<(String, VariantDef)>,
}

impl EnginePack {
    pub fn load(root: impl AsRef<Path>) -> Result<Self, PackError> {
        let root = root.as_ref().to_path_buf();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(PackError::ManifestMissing(manifest_path));
        }

        let manifest_raw = fs::read_to_string(&manifest_path)?;
        let manifest: EngineManifest = toml::from_str(&manifest_raw)?;
        let issues = manifest.validate();
        if !issues.is_empty() {
            return Err(PackError::ManifestValidation(issues));
        }

        let mut missing = Vec::new();
        let mut variants = Vec::with_capacity(manifest.variants.len());
        for variant in &manifest.variants {
            let path = root.join(&variant.fragment);
            if !path.exists() {
                missing.push(format!("fragment '{}' not found", path.display()));
                continue;
            }
            let body = fs::read_to_string(&path)?;
            let fragment = if manifest.include_common {
                format!("{SHADER_COMMON}\n{body}")
            } else {
                body
            };
            variants.push((
                variant.name.clone(),
                VariantDef::new(fragment)
                    .with_uniforms(variant.uniforms.clone())
                    .with_description(variant.description.clone()),
            ));
        }
        if !missing.is_empty() {
            return Err(PackError::ManifestValidation(missing));
        }

        Ok(Self {
            root,
            manifest,
            variants,
        })
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn manifest(&self) -> &EngineManifest {
        &self.manifest
    }

    pub fn engine(&self) -> &str {
        &self.manifest.engine
    }

    /// Issues that do not block loading, such as defaults the fragment never
    /// declares.
    pub fn warnings(&self) -> Vec<String> {
        self.variants
            .iter()
            .flat_map(|(name, def)| {
                check_declared_defaults(&ShaderKey::new(self.engine(), name.clone()), def)
            })
            .collect()
    }

    pub fn register_into(&self, registry: &mut ShaderRegistry) {
        registry.register(self.engine(), self.variants.iter().cloned());
    }
}

/// Loads every pack directly under `root`. Unreadable packs are skipped.
pub fn discover_packs(root: &Path) -> Vec<EnginePack> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(path = %root.display(), error = %err, "engine pack root unavailable");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.join(MANIFEST_FILE).is_file())
        .collect();
    dirs.sort();

    dirs.into_iter()
        .filter_map(|dir| match EnginePack::load(&dir) {
            Ok(pack) => {
                debug!(path = %dir.display(), engine = pack.engine(), "loaded engine pack");
                Some(pack)
            }
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "skipping engine pack");
                None
            }
        })
        .collect()
}
