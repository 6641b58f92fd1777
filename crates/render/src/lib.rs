//! Rendering boundary: the scene sink tiles attach to, and the resources a
//! tile owns while it is resident.
//!
//! # Invariants
//! - The scene never owns tile resources; it only sees borrowed views while
//!   attaching and an opaque id afterwards.
//! - Every GPU/CPU resource is a [`Tracked`] value; dropping it releases it
//!   from its [`ResourceLedger`].
//!
//! # Workaround
//! Ships a [`DebugScene`] text sink in place of a GPU backend. The trait is
//! stable; a real renderer implements [`SceneSink`] without touching callers.

mod resources;
mod scene;

pub use resources::{
    Material, RenderError, ResourceCounts, ResourceKind, ResourceLedger, TextureData, Tracked,
};
pub use scene::{DebugScene, RenderableId, SceneEntry, SceneSink, TileRenderable};

pub fn crate_info() -> &'static str {
    "terrastream-render v0.1.0"
}
