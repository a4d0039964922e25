//! Schema for `engine.toml`, the manifest of an on-disk engine pack. A pack
//! contributes one engine whose variants each point at a fragment file and
//! carry default uniforms plus a description.
use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::uniforms::UniformMap;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineManifest {
    pub engine: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Prepend the shared contract/noise prelude to each fragment.
    #[serde(default = "default_include_common")]
    pub include_common: bool,
    #[serde(default)]
    pub variants: Vec<VariantManifest>,
}

fn default_include_common() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VariantManifest {
    pub name: String,
    pub fragment: PathBuf,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uniforms: UniformMap,
}

impl EngineManifest {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.engine.trim().is_empty() {
            issues.push("manifest must name its engine".to_string());
        }
        if self.engine.contains('/') {
            issues.push(format!("engine name '{}' must not contain '/'", self.engine));
        }
        if self.variants.is_empty() {
            issues.push("manifest must declare at least one variant".to_string());
        }
        let mut seen = HashSet::new();
        for variant in &self.variants {
            if variant.name.trim().is_empty() || variant.name.contains('/') {
                issues.push(format!("variant name '{}' is invalid", variant.name));
            }
            if !seen.insert(variant.name.as_str()) {
                issues.push(format!("variant '{}' is declared twice", variant.name));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sparse_manifest() {
        let manifest: EngineManifest = toml::from_str(
            r#"
            engine = "Glow"

            [[variants]]
            name = "soft"
            fragment = "soft.frag"

            [variants.uniforms]
            uSoftness = 0.1
            uTint = [1.0, 0.5, 0.2]
            "#,
        )
        .expect("parse manifest");
        assert!(manifest.include_common);
        assert_eq!(manifest.variants[0].uniforms.len(), 2);
        assert!(manifest.validate().is_empty());
    }

    #[test]
    fn reports_duplicate_and_missing_variants() {
        let manifest: EngineManifest = toml::from_str(
            r#"
            engine = "Glow"
            [[variants]]
            name = "soft"
            fragment = "a.frag"
            [[variants]]
            name = "soft"
            fragment = "b.frag"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.validate().len(), 1);

        let empty: EngineManifest = toml::from_str("engine = \"\"").unwrap();
        assert_eq!(empty.validate().len(), 2);
    }
}
