use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use serde::{Deserialize, Serialize};

/// Errors from validating render resources.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("texture has zero size ({width}x{height})")]
    EmptyTexture { width: u32, height: u32 },
    #[error("texture {width}x{height} needs {expected} bytes, got {actual}")]
    TextureSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// Decoded RGBA8 texture owned by exactly one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyTexture { width, height });
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RenderError::TextureSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Single-color texture.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, RenderError> {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::rgba8(width, height, pixels)
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }
}

/// Surface parameters for a tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    pub wireframe: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "terrain".into(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            wireframe: false,
        }
    }
}

/// Kinds of resource a resident tile holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    MeshBuffers,
    Texture,
    Material,
    SpatialIndex,
}

/// Live resource totals at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    pub mesh_buffers: usize,
    pub textures: usize,
    pub materials: usize,
    pub spatial_indices: usize,
    pub bytes: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.mesh_buffers + self.textures + self.materials + self.spatial_indices
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0 && self.bytes == 0
    }

    fn slot(&mut self, kind: ResourceKind) -> &mut usize {
        match kind {
            ResourceKind::MeshBuffers => &mut self.mesh_buffers,
            ResourceKind::Texture => &mut self.textures,
            ResourceKind::Material => &mut self.materials,
            ResourceKind::SpatialIndex => &mut self.spatial_indices,
        }
    }
}

impl std::fmt::Display for ResourceCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "meshes={} textures={} materials={} indices={} bytes={}",
            self.mesh_buffers, self.textures, self.materials, self.spatial_indices, self.bytes
        )
    }
}

/// Shared counter of live tile resources.
///
/// Single-threaded by construction: all resources are created and dropped on
/// the update thread, so a shared `Cell` is enough.
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    counts: Rc<Cell<ResourceCounts>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ResourceCounts {
        self.counts.get()
    }

    /// Register `value` as a live resource of `kind` occupying `bytes`.
    pub fn track<T>(&self, kind: ResourceKind, bytes: usize, value: T) -> Tracked<T> {
        let mut counts = self.counts.get();
        *counts.slot(kind) += 1;
        counts.bytes += bytes;
        self.counts.set(counts);
        Tracked {
            value,
            kind,
            bytes,
            ledger: self.clone(),
        }
    }

    fn release(&self, kind: ResourceKind, bytes: usize) {
        let mut counts = self.counts.get();
        let slot = counts.slot(kind);
        *slot = slot.saturating_sub(1);
        counts.bytes = counts.bytes.saturating_sub(bytes);
        self.counts.set(counts);
    }
}

/// A resource registered with a [`ResourceLedger`]. Released on drop.
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    kind: ResourceKind,
    bytes: usize,
    ledger: ResourceLedger,
}

impl<T> Tracked<T> {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.ledger.release(self.kind, self.bytes);
    }
}
