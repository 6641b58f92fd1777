use std::collections::BTreeMap;

use glam::DVec3;
use terrastream_common::TileCoord;
use terrastream_mesh::MeshData;

use crate::resources::{Material, TextureData};

/// Opaque handle the scene hands back for an attached renderable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderableId(pub u64);

/// Borrowed view of a loaded tile's visual representation.
#[derive(Debug, Clone, Copy)]
pub struct TileRenderable<'a> {
    pub tile: TileCoord,
    /// World-space translation of the mesh's local origin.
    pub translation: DVec3,
    pub mesh: &'a MeshData,
    pub material: &'a Material,
    pub texture: &'a TextureData,
}

/// Add/remove interface the streamer uses to show and hide tiles.
///
/// Implementations may copy or upload what they need during `attach`; they
/// must not assume the borrowed buffers outlive the call.
pub trait SceneSink {
    fn attach(&mut self, renderable: &TileRenderable<'_>) -> RenderableId;

    fn detach(&mut self, id: RenderableId);

    fn update_material(&mut self, id: RenderableId, material: &Material);
}

/// What the debug scene remembers about an attached tile.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntry {
    pub tile: TileCoord,
    pub translation: DVec3,
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub texture_size: (u32, u32),
    pub wireframe: bool,
}

/// Text scene standing in for a GPU scene graph.
///
/// Records attached renderables and produces a human-readable dump. Useful
/// for CLI output, logging, and asserting scene contents in tests.
#[derive(Debug, Default)]
pub struct DebugScene {
    next_id: u64,
    entries: BTreeMap<RenderableId, SceneEntry>,
    attached_total: u64,
    detached_total: u64,
}

impl DebugScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&RenderableId, &SceneEntry)> {
        self.entries.iter()
    }

    pub fn get(&self, id: RenderableId) -> Option<&SceneEntry> {
        self.entries.get(&id)
    }

    pub fn contains_tile(&self, tile: TileCoord) -> bool {
        self.entries.values().any(|e| e.tile == tile)
    }

    pub fn count_for_tile(&self, tile: TileCoord) -> usize {
        self.entries.values().filter(|e| e.tile == tile).count()
    }

    pub fn attached_total(&self) -> u64 {
        self.attached_total
    }

    pub fn detached_total(&self) -> u64 {
        self.detached_total
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "=== Scene ({} tiles, {} attached, {} detached) ===\n",
            self.entries.len(),
            self.attached_total,
            self.detached_total
        ));
        for (id, e) in &self.entries {
            out.push_str(&format!(
                "  #{} tile={} at=({:.1}, {:.1}) tris={} tex={}x{}{}\n",
                id.0,
                e.tile,
                e.translation.x,
                e.translation.y,
                e.triangle_count,
                e.texture_size.0,
                e.texture_size.1,
                if e.wireframe { " wireframe" } else { "" }
            ));
        }
        out
    }
}

impl SceneSink for DebugScene {
    fn attach(&mut self, renderable: &TileRenderable<'_>) -> RenderableId {
        self.next_id += 1;
        self.attached_total += 1;
        let id = RenderableId(self.next_id);
        self.entries.insert(
            id,
            SceneEntry {
                tile: renderable.tile,
                translation: renderable.translation,
                vertex_count: renderable.mesh.vertex_count(),
                triangle_count: renderable.mesh.triangle_count(),
                texture_size: (renderable.texture.width, renderable.texture.height),
                wireframe: renderable.material.wireframe,
            },
        );
        id
    }

    fn detach(&mut self, id: RenderableId) {
        if self.entries.remove(&id).is_some() {
            self.detached_total += 1;
        } else {
            tracing::warn!(?id, "detach of unknown renderable");
        }
    }

    fn update_material(&mut self, id: RenderableId, material: &Material) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.wireframe = material.wireframe;
        }
    }
}
