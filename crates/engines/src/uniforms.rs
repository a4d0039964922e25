//! Variant uniform values and the declaration scanner shared by registry
//! validation and the renderer's parameter-block layout.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Value of one variant-specific uniform as it appears in settings or pack
/// manifests: a scalar, a flag, or a short vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniformValue {
    Bool(bool),
    Float(f64),
    Vector(Vec<f64>),
}

impl UniformValue {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            UniformValue::Float(value) => Some(*value as f32),
            UniformValue::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            UniformValue::Vector(values) => values.first().map(|value| *value as f32),
        }
    }

    /// Components padded or truncated to `len`; scalars fill the first slot.
    pub fn components(&self, len: usize) -> Vec<f32> {
        let mut out = match self {
            UniformValue::Vector(values) => values.iter().map(|value| *value as f32).collect(),
            other => other.as_f32().into_iter().collect::<Vec<_>>(),
        };
        out.resize(len, 0.0);
        out
    }
}

impl From<f64> for UniformValue {
    fn from(value: f64) -> Self {
        UniformValue::Float(value)
    }
}

impl From<bool> for UniformValue {
    fn from(value: bool) -> Self {
        UniformValue::Bool(value)
    }
}

impl From<Vec<f64>> for UniformValue {
    fn from(value: Vec<f64>) -> Self {
        UniformValue::Vector(value)
    }
}

pub type UniformMap = BTreeMap<String, UniformValue>;

/// Layers `overrides` on top of `defaults`; overrides win on collisions.
pub fn merge_uniforms(defaults: &UniformMap, overrides: &UniformMap) -> UniformMap {
    let mut merged = defaults.clone();
    for (name, value) in overrides {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Names of the fixed uniforms every transition fragment receives.
pub const CONTRACT_UNIFORMS: [&str; 6] = [
    "uTexA",
    "uTexB",
    "uProgress",
    "uIntensity",
    "uTime",
    "uResolution",
];

pub fn is_contract_uniform(name: &str) -> bool {
    CONTRACT_UNIFORMS.contains(&name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformDecl {
    pub ty: String,
    pub name: String,
    /// Declared array length, if the declaration used `name[N]`.
    pub array_len: Option<usize>,
    /// Zero-based line index in the scanned source.
    pub line: usize,
}

/// Finds top-level `uniform <type> <name>[, <name>...];` declarations.
pub fn scan_uniform_declarations(source: &str) -> Vec<UniformDecl> {
    let mut decls = Vec::new();
    for (line_index, line) in source.lines().enumerate() {
        let code = line.split("//").next().unwrap_or_default().trim();
        for statement in code.split(';') {
            let statement = statement.trim();
            let Some(rest) = statement.strip_prefix("uniform ") else {
                continue;
            };
            let mut tokens = rest.split_whitespace();
            let mut ty = match tokens.next() {
                Some(token) => token,
                None => continue,
            };
            if matches!(ty, "highp" | "mediump" | "lowp") {
                ty = match tokens.next() {
                    Some(token) => token,
                    None => continue,
                };
            }
            let names = tokens.collect::<Vec<_>>().join(" ");
            for raw in names.split(',') {
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                let (name, array_len) = match raw.split_once('[') {
                    Some((name, len)) => (
                        name.trim(),
                        len.trim_end_matches(']').trim().parse::<usize>().ok(),
                    ),
                    None => (raw, None),
                };
                decls.push(UniformDecl {
                    ty: ty.to_string(),
                    name: name.to_string(),
                    array_len,
                    line: line_index,
                });
            }
        }
    }
    decls
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_plain_and_qualified_declarations() {
        let source = "precision highp float;\n\
                      uniform sampler2D uTexA;\n\
                      uniform highp float uSoftness; // edge width\n\
                      uniform vec2 uCenter, uScale;\n\
                      uniform float uWeights[4];\n\
                      float notUniform;\n";
        let decls = scan_uniform_declarations(source);
        let names: Vec<_> = decls.iter().map(|decl| decl.name.as_str()).collect();
        assert_eq!(names, ["uTexA", "uSoftness", "uCenter", "uScale", "uWeights"]);
        assert_eq!(decls[1].ty, "float");
        assert_eq!(decls[1].line, 2);
        assert_eq!(decls[3].ty, "vec2");
        assert_eq!(decls[4].array_len, Some(4));
    }

    #[test]
    fn overrides_win_when_merging() {
        let defaults = UniformMap::from([
            ("uNoiseScale".to_string(), UniformValue::Float(0.8)),
            ("uSoftness".to_string(), UniformValue::Float(0.12)),
        ]);
        let live = UniformMap::from([
            ("uSoftness".to_string(), UniformValue::Float(0.3)),
            ("uStale".to_string(), UniformValue::Bool(true)),
        ]);
        let merged = merge_uniforms(&defaults, &live);
        assert_eq!(merged["uNoiseScale"], UniformValue::Float(0.8));
        assert_eq!(merged["uSoftness"], UniformValue::Float(0.3));
        assert!(merged.contains_key("uStale"));
    }

    #[test]
    fn values_deserialize_untagged() {
        let map: UniformMap =
            serde_json::from_str(r#"{"a": 1, "b": 0.5, "c": [1, 2], "d": true}"#).unwrap();
        assert_eq!(map["a"], UniformValue::Float(1.0));
        assert_eq!(map["c"].components(3), vec![1.0, 2.0, 0.0]);
        assert_eq!(map["d"].as_f32(), Some(1.0));
    }
}
