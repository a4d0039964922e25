mod library;
mod manifest;
mod pack;
mod registry;
mod uniforms;

pub use library::{crossfade_fragment, fallback_key, register_builtin, SHADER_COMMON};
pub use manifest::{EngineManifest, VariantManifest};
pub use pack::{discover_packs, EnginePack, PackError, MANIFEST_FILE};
pub use registry::{
    check_declared_defaults, RegistryStats, ShaderKey, ShaderRegistry, ShaderVariant, VariantDef,
};
pub use uniforms::{
    is_contract_uniform, merge_uniforms, scan_uniform_declarations, UniformDecl, UniformMap,
    UniformValue, CONTRACT_UNIFORMS,
};
