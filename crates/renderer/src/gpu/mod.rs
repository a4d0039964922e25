//! Headless GPU path from two source bitmaps to one composited frame.
//!
//! - `context` owns the wgpu instance, adapter and device; no surface.
//! - `pipeline` builds the shared bind group layout and one render pipeline
//!   per (engine, variant).
//! - `uniforms` mirrors the contract block written once per frame.
//! - `textures` uploads source bitmaps and recycles allocations through a
//!   small pool keyed by size.
//! - `readback` copies the target into a mapped buffer, stripping row
//!   padding.
//! - `state` glues everything together behind `GpuState`.

mod context;
mod pipeline;
mod readback;
mod state;
mod textures;
mod uniforms;

pub(crate) use state::GpuState;
pub use textures::TexturePool;
