//! Built-in transition library, written in the WebGL 1 fragment dialect the
//! renderer adapts at compile time. Every variant starts with
//! [`SHADER_COMMON`], which declares the fixed uniform contract and a few
//! noise helpers.

use crate::registry::{ShaderKey, ShaderRegistry, VariantDef};
use crate::uniforms::{UniformMap, UniformValue};

pub const SHADER_COMMON: &str = r"precision highp float;

uniform sampler2D uTexA;
uniform sampler2D uTexB;
uniform float uProgress;
uniform float uIntensity;
uniform float uTime;
uniform vec2 uResolution;

varying vec2 vUv;

float hash(vec2 p) {
    return fract(sin(dot(p, vec2(127.1, 311.7))) * 43758.5453);
}

float noise(vec2 p) {
    vec2 i = floor(p);
    vec2 f = fract(p);
    f = f * f * (3.0 - 2.0 * f);
    float a = hash(i);
    float b = hash(i + vec2(1.0, 0.0));
    float c = hash(i + vec2(0.0, 1.0));
    float d = hash(i + vec2(1.0, 1.0));
    return mix(mix(a, b, f.x), mix(c, d, f.x), f.y);
}

float fbm(vec2 p, int octaves) {
    float value = 0.0;
    float amplitude = 0.5;
    for (int i = 0; i < 8; i++) {
        if (i >= octaves) {
            break;
        }
        value += amplitude * noise(p);
        p *= 2.0;
        amplitude *= 0.5;
    }
    return value;
}

float voronoi(vec2 p) {
    vec2 cell = floor(p);
    vec2 local = fract(p);
    float nearest = 1.0;
    for (int y = -1; y <= 1; y++) {
        for (int x = -1; x <= 1; x++) {
            vec2 neighbor = vec2(float(x), float(y));
            vec2 point = vec2(hash(cell + neighbor), hash(cell + neighbor + vec2(17.0, 31.0)));
            nearest = min(nearest, length(neighbor + point - local));
        }
    }
    return nearest;
}

float luminance(vec3 color) {
    return dot(color, vec3(0.299, 0.587, 0.114));
}

vec2 rotate2d(vec2 p, float angle) {
    float s = sin(angle);
    float c = cos(angle);
    return vec2(c * p.x - s * p.y, s * p.x + c * p.y);
}
";

const CROSSFADE_STANDARD: &str = r"
void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    gl_FragColor = mix(colorA, colorB, uProgress);
}
";

const DISSOLVE_POWDER: &str = r"
uniform float uNoiseScale;
uniform float uSoftness;

void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    float n = fbm(vUv * uNoiseScale * 8.0 + uTime * 0.1, 4);
    float soft = uSoftness * uIntensity;
    float threshold = uProgress * (1.0 + soft * 2.0);
    float edge = smoothstep(n - soft, n + soft, threshold);
    float glow = smoothstep(n - soft * 2.0, n, threshold) * (1.0 - smoothstep(n, n + soft * 2.0, threshold));
    vec4 result = mix(colorA, colorB, edge);
    result.rgb += vec3(glow * 0.5 * uIntensity);
    gl_FragColor = result;
}
";

const DISSOLVE_INK: &str = r"
uniform float uNoiseScale;
uniform float uSoftness;

void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    vec2 drift = vec2(0.0, -0.05) * (1.0 - uProgress);
    float n = pow(fbm((vUv + drift) * uNoiseScale * 6.0, 5), 0.7);
    float soft = uSoftness * uIntensity;
    float threshold = uProgress * 1.3;
    float edge = smoothstep(n - soft * 0.5, n + soft * 0.5, threshold);
    float rim = smoothstep(threshold - soft, threshold, n) * (1.0 - smoothstep(threshold, threshold + soft, n));
    vec4 result = mix(colorA, colorB, edge);
    result.rgb -= vec3(rim * 0.1 * uIntensity);
    gl_FragColor = result;
}
";

const DISSOLVE_CELLULAR: &str = r"
uniform float uNoiseScale;
uniform float uSoftness;

void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    float n = voronoi(vUv * uNoiseScale * 10.0);
    float soft = uSoftness * (0.5 + uIntensity * 0.5);
    float threshold = uProgress * (1.0 + soft * 2.0);
    float edge = smoothstep(n - soft, n + soft, threshold);
    gl_FragColor = mix(colorA, colorB, edge);
}
";

const WIPE_LINEAR: &str = r"
uniform float uSoftness;
uniform float uAngle;

void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    vec2 dir = vec2(cos(uAngle), sin(uAngle));
    float extent = max(abs(dir.x) + abs(dir.y), 0.0001);
    float mask = dot(vUv - 0.5, dir) / extent + 0.5;
    float wobble = (fbm(vUv * 10.0 + uTime * 0.5, 2) - 0.5) * 0.1 * uIntensity;
    float soft = uSoftness * (1.0 + uIntensity * 2.0);
    float front = uProgress * (1.0 + soft * 2.0 + 0.1) - soft - 0.05;
    float edge = smoothstep(mask + wobble - soft, mask + wobble + soft, front);
    gl_FragColor = mix(colorA, colorB, edge);
}
";

const WIPE_RADIAL: &str = r"
uniform float uSoftness;

void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    vec2 aspect = vec2(uResolution.x / max(uResolution.y, 1.0), 1.0);
    float mask = length((vUv - 0.5) * aspect) / length(0.5 * aspect);
    float soft = uSoftness * (1.0 + uIntensity);
    float front = uProgress * (1.0 + soft * 2.0) - soft;
    float edge = smoothstep(mask - soft, mask + soft, front);
    gl_FragColor = mix(colorA, colorB, edge);
}
";

const WIPE_DIAGONAL: &str = r"
uniform float uSoftness;

void main() {
    vec4 colorA = texture2D(uTexA, vUv);
    vec4 colorB = texture2D(uTexB, vUv);
    float mask = (vUv.x + (1.0 - vUv.y)) * 0.5;
    float soft = uSoftness * (1.0 + uIntensity * 2.0);
    float front = uProgress * (1.0 + soft * 2.0) - soft;
    float edge = smoothstep(mask - soft, mask + soft, front);
    gl_FragColor = mix(colorA, colorB, edge);
}
";

const ZOOM_PUNCH: &str = r"
uniform float uScale;

void main() {
    vec2 center = vec2(0.5, 0.5);
    float zoomA = mix(1.0, uScale, smoothstep(0.0, 0.6, uProgress) * uIntensity);
    float zoomB = mix(1.0, mix(uScale, 1.0, smoothstep(0.4, 1.0, uProgress)), uIntensity);
    vec2 uvA = (vUv - center) / max(zoomA, 0.001) + center;
    vec2 uvB = (vUv - center) / max(zoomB, 0.001) + center;
    vec4 colorA = texture2D(uTexA, clamp(uvA, 0.0, 1.0));
    vec4 colorB = texture2D(uTexB, clamp(uvB, 0.0, 1.0));
    gl_FragColor = mix(colorA, colorB, smoothstep(0.35, 0.65, uProgress));
}
";

const ZOOM_SWIRL: &str = r"
uniform float uScale;
uniform float uSwirl;

void main() {
    vec2 centered = vUv - 0.5;
    float strength = sin(uProgress * 3.14159265) * uIntensity;
    float falloff = 1.0 - smoothstep(0.0, 0.7, length(centered));
    float angle = uSwirl * 6.2831853 * strength * falloff;
    float zoom = max(mix(1.0, uScale, strength), 0.001);
    vec2 uv = clamp(rotate2d(centered / zoom, angle) + 0.5, 0.0, 1.0);
    vec4 colorA = texture2D(uTexA, uv);
    vec4 colorB = texture2D(uTexB, uv);
    gl_FragColor = mix(colorA, colorB, smoothstep(0.3, 0.7, uProgress));
}
";

const BLUR_DIRECTIONAL: &str = r"
uniform float uRadius;
uniform float uAngle;

void main() {
    float strength = sin(uProgress * 3.14159265) * uRadius * uIntensity * 0.04;
    vec2 dir = vec2(cos(uAngle), sin(uAngle)) * strength;
    vec4 sumA = vec4(0.0);
    vec4 sumB = vec4(0.0);
    for (int i = 0; i < 9; i++) {
        vec2 uv = clamp(vUv + dir * (float(i) / 8.0 - 0.5), 0.0, 1.0);
        sumA += texture2D(uTexA, uv);
        sumB += texture2D(uTexB, uv);
    }
    gl_FragColor = mix(sumA / 9.0, sumB / 9.0, uProgress);
}
";

/// Complete crossfade fragment, also used as the renderer's fallback program.
pub fn crossfade_fragment() -> String {
    with_common(CROSSFADE_STANDARD)
}

pub fn fallback_key() -> ShaderKey {
    ShaderKey::new("Crossfade", "standard")
}

fn with_common(body: &str) -> String {
    format!("{SHADER_COMMON}{body}")
}

fn floats(pairs: &[(&str, f64)]) -> UniformMap {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), UniformValue::Float(*value)))
        .collect()
}

fn variant(body: &str, uniforms: &[(&str, f64)], description: &str) -> VariantDef {
    VariantDef::new(with_common(body))
        .with_uniforms(floats(uniforms))
        .with_description(description)
}

/// Registers the built-in engines in their canonical order.
pub fn register_builtin(registry: &mut ShaderRegistry) {
    registry.register(
        "Dissolve",
        [
            (
                "powder",
                variant(
                    DISSOLVE_POWDER,
                    &[("uNoiseScale", 0.8), ("uSoftness", 0.12)],
                    "Soft noise dissolve with a glowing edge",
                ),
            ),
            (
                "ink",
                variant(
                    DISSOLVE_INK,
                    &[("uNoiseScale", 1.0), ("uSoftness", 0.06)],
                    "Ink bleeding through paper",
                ),
            ),
            (
                "cellular",
                variant(
                    DISSOLVE_CELLULAR,
                    &[("uNoiseScale", 1.2), ("uSoftness", 0.08)],
                    "Voronoi cells flipping to the next clip",
                ),
            ),
        ],
    );
    registry.register(
        "Wipe",
        [
            (
                "linear",
                variant(
                    WIPE_LINEAR,
                    &[("uSoftness", 0.02), ("uAngle", 0.0)],
                    "Straight wipe along uAngle with a wobbling edge",
                ),
            ),
            (
                "radial",
                variant(WIPE_RADIAL, &[("uSoftness", 0.04)], "Iris opening from the center"),
            ),
            (
                "diagonal",
                variant(
                    WIPE_DIAGONAL,
                    &[("uSoftness", 0.03)],
                    "Corner-to-corner wipe",
                ),
            ),
        ],
    );
    registry.register(
        "Zoom",
        [
            (
                "punch",
                variant(ZOOM_PUNCH, &[("uScale", 1.3)], "Punch in on A, settle out on B"),
            ),
            (
                "swirl",
                variant(
                    ZOOM_SWIRL,
                    &[("uScale", 1.15), ("uSwirl", 0.5)],
                    "Twisting zoom through the midpoint",
                ),
            ),
        ],
    );
    registry.register(
        "Blur",
        [(
            "directional",
            variant(
                BLUR_DIRECTIONAL,
                &[("uRadius", 1.0), ("uAngle", 0.0)],
                "Motion blur peaking at the midpoint",
            ),
        )],
    );
    registry.register(
        "Crossfade",
        [(
            "standard",
            variant(CROSSFADE_STANDARD, &[], "Linear blend between the clips"),
        )],
    );
}

impl ShaderRegistry {
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        register_builtin(&mut registry);
        registry
    }
}
