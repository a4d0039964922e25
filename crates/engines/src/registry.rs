use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::uniforms::{is_contract_uniform, scan_uniform_declarations, UniformMap};

/// Composite (engine, variant) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShaderKey {
    pub engine: String,
    pub variant: String,
}

impl ShaderKey {
    pub fn new(engine: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            variant: variant.into(),
        }
    }

    /// Parses `Engine/variant`.
    pub fn parse(input: &str) -> Option<Self> {
        let (engine, variant) = input.split_once('/')?;
        let (engine, variant) = (engine.trim(), variant.trim());
        if engine.is_empty() || variant.is_empty() {
            return None;
        }
        Some(Self::new(engine, variant))
    }
}

impl fmt::Display for ShaderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.engine, self.variant)
    }
}

/// Registration payload for one variant.
#[derive(Debug, Clone, Default)]
pub struct VariantDef {
    pub fragment: String,
    pub uniforms: UniformMap,
    pub description: String,
}

impl VariantDef {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            ..Self::default()
        }
    }

    pub fn with_uniforms(mut self, uniforms: UniformMap) -> Self {
        self.uniforms = uniforms;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ShaderVariant {
    pub key: ShaderKey,
    pub fragment: String,
    pub uniforms: UniformMap,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub engine_count: usize,
    pub total_variants: usize,
    pub engines: Vec<String>,
}

/// Lookup tables from engine to its ordered variant names and from
/// [`ShaderKey`] to the variant itself. Enumeration follows registration
/// order so UI stepping keeps stable indices.
#[derive(Debug, Clone, Default)]
pub struct ShaderRegistry {
    engines: Vec<EngineEntry>,
    engine_index: HashMap<String, usize>,
    variants: HashMap<ShaderKey, ShaderVariant>,
}

#[derive(Debug, Clone)]
struct EngineEntry {
    name: String,
    variants: Vec<String>,
}

impl ShaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) an engine and its variants in iteration order.
    pub fn register<I, S>(&mut self, engine: &str, variants: I)
    where
        I: IntoIterator<Item = (S, VariantDef)>,
        S: Into<String>,
    {
        let index = match self.engine_index.get(engine) {
            Some(&index) => {
                let previous = std::mem::take(&mut self.engines[index].variants);
                for variant in previous {
                    self.variants.remove(&ShaderKey::new(engine, variant));
                }
                index
            }
            None => {
                self.engines.push(EngineEntry {
                    name: engine.to_string(),
                    variants: Vec::new(),
                });
                let index = self.engines.len() - 1;
                self.engine_index.insert(engine.to_string(), index);
                index
            }
        };

        let mut names = Vec::new();
        for (variant, def) in variants {
            let variant = variant.into();
            let key = ShaderKey::new(engine, variant.clone());
            for issue in check_declared_defaults(&key, &def) {
                warn!(shader = %key, "{issue}");
            }
            if !names.contains(&variant) {
                names.push(variant);
            }
            self.variants.insert(
                key.clone(),
                ShaderVariant {
                    key,
                    fragment: def.fragment,
                    uniforms: def.uniforms,
                    description: def.description,
                },
            );
        }
        debug!(engine, variants = names.len(), "registered engine");
        self.engines[index].variants = names;
    }

    pub fn get(&self, key: &ShaderKey) -> Option<&ShaderVariant> {
        self.variants.get(key)
    }

    pub fn shader_source(&self, key: &ShaderKey) -> Option<&str> {
        self.get(key).map(|variant| variant.fragment.as_str())
    }

    /// Default uniforms for `key`; empty for unknown keys.
    pub fn uniforms(&self, key: &ShaderKey) -> UniformMap {
        self.get(key)
            .map(|variant| variant.uniforms.clone())
            .unwrap_or_default()
    }

    pub fn variant_description(&self, key: &ShaderKey) -> &str {
        self.get(key)
            .map(|variant| variant.description.as_str())
            .unwrap_or("")
    }

    pub fn engines(&self) -> impl Iterator<Item = &str> {
        self.engines.iter().map(|entry| entry.name.as_str())
    }

    pub fn variants(&self, engine: &str) -> &[String] {
        self.engine_index
            .get(engine)
            .map(|&index| self.engines[index].variants.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_engine(&self, engine: &str) -> bool {
        self.engine_index.contains_key(engine)
    }

    pub fn has_variant(&self, key: &ShaderKey) -> bool {
        self.variants.contains_key(key)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            engine_count: self.engines.len(),
            total_variants: self.engines.iter().map(|entry| entry.variants.len()).sum(),
            engines: self.engines().map(str::to_string).collect(),
        }
    }
}

/// Reports default uniforms the fragment never declares.
pub fn check_declared_defaults(key: &ShaderKey, def: &VariantDef) -> Vec<String> {
    let declared = scan_uniform_declarations(&def.fragment);
    def.uniforms
        .keys()
        .filter(|name| !is_contract_uniform(name))
        .filter(|name| declared.iter().all(|decl| &decl.name != *name))
        .map(|name| format!("{key} declares default '{name}' that its fragment never declares"))
        .collect()
}
