//! Adapts WebGL 1 transition fragments to Vulkan-style GLSL 450 and checks
//! them with naga before they reach the device.
//!
//! The adapted program sees the same names the fragment was written against:
//! the contract uniforms and variant uniforms are `#define`d onto members of
//! two std140 blocks, `uTexA`/`uTexB` onto combined texture/sampler
//! constructors, and `gl_FragColor` onto the colour output.

use std::borrow::Cow;

use engines::{is_contract_uniform, scan_uniform_declarations, UniformMap, UniformValue};
use thiserror::Error;
use tracing::warn;
use wgpu::naga::front::glsl::{Frontend, Options};
use wgpu::naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::naga::ShaderStage;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("GLSL parse error{}: {message}", line_suffix(.line))]
    Parse { line: Option<usize>, message: String },
    #[error("shader validation failed{}: {message}", line_suffix(.line))]
    Validation { line: Option<usize>, message: String },
    #[error("device rejected shader: {0}")]
    Device(String),
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|line| format!(" at line {line}")).unwrap_or_default()
}

impl CompileError {
    /// Line in the original fragment, when the failure points inside it.
    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::Parse { line, .. } | CompileError::Validation { line, .. } => *line,
            CompileError::Device(_) => None,
        }
    }
}

/// Scalar and vector types a variant uniform may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
    Bool,
    Vec2,
    Vec3,
    Vec4,
}

impl ParamKind {
    fn parse(ty: &str) -> Option<Self> {
        match ty {
            "float" => Some(ParamKind::Float),
            "int" => Some(ParamKind::Int),
            "bool" => Some(ParamKind::Bool),
            "vec2" => Some(ParamKind::Vec2),
            "vec3" => Some(ParamKind::Vec3),
            "vec4" => Some(ParamKind::Vec4),
            _ => None,
        }
    }

    fn components(self) -> usize {
        match self {
            ParamKind::Float | ParamKind::Int | ParamKind::Bool => 1,
            ParamKind::Vec2 => 2,
            ParamKind::Vec3 => 3,
            ParamKind::Vec4 => 4,
        }
    }

    fn align(self) -> usize {
        match self {
            ParamKind::Float | ParamKind::Int | ParamKind::Bool => 4,
            ParamKind::Vec2 => 8,
            ParamKind::Vec3 | ParamKind::Vec4 => 16,
        }
    }

    fn glsl_type(self) -> &'static str {
        match self {
            ParamKind::Float => "float",
            ParamKind::Int | ParamKind::Bool => "int",
            ParamKind::Vec2 => "vec2",
            ParamKind::Vec3 => "vec3",
            ParamKind::Vec4 => "vec4",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub array_len: Option<usize>,
    /// Byte offset inside the std140 block.
    pub offset: usize,
}

const STD140_ARRAY_STRIDE: usize = 16;

/// std140 layout of a fragment's variant uniforms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamsLayout {
    fields: Vec<ParamField>,
    size: usize,
}

impl ParamsLayout {
    pub fn from_source(source: &str) -> Self {
        let mut layout = ParamsLayout::default();
        let mut cursor = 0usize;
        for decl in scan_uniform_declarations(source) {
            if is_contract_uniform(&decl.name) || layout.field(&decl.name).is_some() {
                continue;
            }
            let Some(kind) = ParamKind::parse(&decl.ty) else {
                warn!(
                    uniform = %decl.name,
                    ty = %decl.ty,
                    "unsupported uniform type; it will not be bound"
                );
                continue;
            };
            let (align, size) = match decl.array_len {
                Some(len) => (STD140_ARRAY_STRIDE, STD140_ARRAY_STRIDE * len.max(1)),
                None => (kind.align(), kind.components() * 4),
            };
            let offset = cursor.next_multiple_of(align);
            cursor = offset + size;
            layout.fields.push(ParamField {
                name: decl.name,
                kind,
                array_len: decl.array_len,
                offset,
            });
        }
        layout.size = cursor.next_multiple_of(16).max(16);
        layout
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Block size in bytes, padded to 16 and never zero.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Writes every known uniform from `uniforms` into `bytes`. Unknown names
    /// are ignored; fields absent from `uniforms` keep their previous bytes.
    pub fn write(&self, bytes: &mut [u8], uniforms: &UniformMap) {
        for field in &self.fields {
            if let Some(value) = uniforms.get(&field.name) {
                write_field(bytes, field, value);
            }
        }
    }
}

fn write_field(bytes: &mut [u8], field: &ParamField, value: &UniformValue) {
    let components = field.kind.components();
    let elements = field.array_len.unwrap_or(1);
    let values = value.components(components * elements);
    for element in 0..elements {
        let base = field.offset + element * STD140_ARRAY_STRIDE;
        let chunk = &values[element * components..(element + 1) * components];
        match field.kind {
            ParamKind::Int => put(bytes, base, &(chunk[0].round() as i32)),
            ParamKind::Bool => put(bytes, base, &i32::from(chunk[0] != 0.0)),
            _ => {
                for (index, component) in chunk.iter().enumerate() {
                    put(bytes, base + index * 4, component);
                }
            }
        }
    }
}

fn put<T: bytemuck::Pod>(bytes: &mut [u8], offset: usize, value: &T) {
    let raw = bytemuck::bytes_of(value);
    if let Some(slot) = bytes.get_mut(offset..offset + raw.len()) {
        slot.copy_from_slice(raw);
    }
}

/// A fragment rewritten for GLSL 450 plus the layout of its parameter block.
#[derive(Debug, Clone)]
pub struct WrappedShader {
    pub source: String,
    pub layout: ParamsLayout,
    header_lines: usize,
}

impl WrappedShader {
    /// Maps a 1-based line of the wrapped source back to the fragment.
    pub fn body_line(&self, wrapped_line: usize) -> Option<usize> {
        wrapped_line
            .checked_sub(self.header_lines)
            .filter(|line| *line > 0)
    }
}

const HEADER: &str = r"#version 450
layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 blendpack_FragColor;

layout(std140, set = 0, binding = 0) uniform BlendpackContract {
    float _uProgress;
    float _uIntensity;
    float _uTime;
    float _padding0;
    vec2 _uResolution;
    vec2 _padding1;
} contract;

#define uProgress contract._uProgress
#define uIntensity contract._uIntensity
#define uTime contract._uTime
#define uResolution contract._uResolution

layout(set = 0, binding = 1) uniform texture2D blendpack_texA;
layout(set = 0, binding = 2) uniform texture2D blendpack_texB;
layout(set = 0, binding = 3) uniform sampler blendpack_sampler;

#define uTexA sampler2D(blendpack_texA, blendpack_sampler)
#define uTexB sampler2D(blendpack_texB, blendpack_sampler)

vec4 blendpack_FragCoord;
";

/// Calls the fragment's entry point after remapping `gl_FragCoord` to the
/// bottom-left origin WebGL fragments expect.
const FOOTER: &str = r"
void main() {
    blendpack_FragCoord = vec4(gl_FragCoord.x, uResolution.y - gl_FragCoord.y, gl_FragCoord.z, gl_FragCoord.w);
    blendpack_main();
}
";

/// Rewrites a WebGL 1 fragment into GLSL 450. Stripped declarations leave
/// blank lines so diagnostics keep the fragment's line numbers.
pub fn wrap_transition_fragment(source: &str) -> WrappedShader {
    let layout = ParamsLayout::from_source(source);

    let mut header = String::from(HEADER);
    header.push_str("\nlayout(std140, set = 0, binding = 4) uniform BlendpackParams {\n");
    if layout.fields().is_empty() {
        header.push_str("    float _unused;\n");
    }
    for field in layout.fields() {
        let array = field
            .array_len
            .map(|len| format!("[{len}]"))
            .unwrap_or_default();
        header.push_str(&format!(
            "    {} bp_{}{};\n",
            field.kind.glsl_type(),
            field.name,
            array
        ));
    }
    header.push_str("} params;\n\n");
    for field in layout.fields() {
        let target = match field.kind {
            ParamKind::Bool if field.array_len.is_none() => {
                format!("(params.bp_{} != 0)", field.name)
            }
            _ => format!("params.bp_{}", field.name),
        };
        header.push_str(&format!("#define {} {}\n", field.name, target));
    }
    header.push('\n');
    let header_lines = header.lines().count();

    let mut body = String::with_capacity(source.len());
    for line in source.lines() {
        body.push_str(&strip_declarations(line));
        body.push('\n');
    }
    let body = replace_identifier(&body, "texture2D", "texture");
    let body = replace_identifier(&body, "gl_FragColor", "blendpack_FragColor");
    let body = replace_identifier(&body, "gl_FragCoord", "blendpack_FragCoord");
    let body = replace_identifier(&body, "main", "blendpack_main");

    WrappedShader {
        source: format!("{header}{body}{FOOTER}"),
        layout,
        header_lines,
    }
}

const STRIPPED_KEYWORDS: [&str; 3] = ["uniform ", "precision ", "varying "];

fn strip_declarations(line: &str) -> Cow<'_, str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("#version") || trimmed.starts_with("#extension") {
        return Cow::Borrowed("");
    }
    let (code, comment) = match line.find("//") {
        Some(index) => line.split_at(index),
        None => (line, ""),
    };
    if !STRIPPED_KEYWORDS.iter().any(|keyword| code.contains(keyword)) {
        return Cow::Borrowed(line);
    }

    let mut statements: Vec<&str> = code.split(';').collect();
    let remainder = statements.pop().unwrap_or_default();
    let mut kept = String::new();
    for statement in statements {
        let head = statement.trim_start();
        if STRIPPED_KEYWORDS.iter().any(|keyword| head.starts_with(keyword)) {
            continue;
        }
        kept.push_str(statement);
        kept.push(';');
    }
    kept.push_str(remainder);
    kept.push_str(comment);
    Cow::Owned(kept)
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// Replaces whole-word occurrences of `from`.
fn replace_identifier(text: &str, from: &str, to: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (index, _) in text.match_indices(from) {
        let before = index.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(index + from.len()).copied();
        if before.is_some_and(is_ident_byte) || after.is_some_and(is_ident_byte) {
            continue;
        }
        out.push_str(&text[last..index]);
        out.push_str(to);
        last = index + from.len();
    }
    out.push_str(&text[last..]);
    out
}

/// Parses and validates the wrapped program with naga so failures carry a
/// line number instead of surfacing as device errors.
pub fn validate(wrapped: &WrappedShader) -> Result<(), CompileError> {
    let module = Frontend::default()
        .parse(&Options::from(ShaderStage::Fragment), &wrapped.source)
        .map_err(|errors| {
            let first = errors.errors.first();
            CompileError::Parse {
                line: first.and_then(|error| {
                    wrapped.body_line(error.meta.location(&wrapped.source).line_number as usize)
                }),
                message: first
                    .map(|error| error.kind.to_string())
                    .unwrap_or_else(|| "unknown parse error".to_string()),
            }
        })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|error| CompileError::Validation {
            line: error
                .location(&wrapped.source)
                .and_then(|location| wrapped.body_line(location.line_number as usize)),
            message: error.as_inner().to_string(),
        })?;
    Ok(())
}

/// Lines around `line` (1-based) with the failing one marked `>>>`.
pub fn source_excerpt(source: &str, line: usize, context: usize) -> String {
    let first = line.saturating_sub(context).max(1);
    let last = line + context;
    source
        .lines()
        .enumerate()
        .map(|(index, text)| (index + 1, text))
        .filter(|(number, _)| (first..=last).contains(number))
        .map(|(number, text)| {
            let marker = if number == line { ">>>" } else { "   " };
            format!("{marker}{number:>4} | {text}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full-screen triangle; `v_uv` runs 0..1 bottom-left to top-right.
pub(crate) const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = pos * 0.5 + vec2(0.5, 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("fullscreen triangle vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

pub(crate) fn compile_fragment_shader(
    device: &wgpu::Device,
    label: &str,
    wrapped: &WrappedShader,
) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(wrapped.source.clone()),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}
