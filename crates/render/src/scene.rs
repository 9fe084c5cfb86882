//! Collaborator-facing scene data consumed by render stages.
//!
//! The scene/asset system produces a per-frame draw list plus "updated"
//! flags per storage category. Stages inspect the flags in their `update`
//! pass and re-push only the descriptor data that actually changed, instead
//! of re-allocating every frame.

use glam::{Mat4, Vec3};

/// Non-owning reference to a primitive registered with the geometry storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PrimitiveHandle(pub u32);

/// One draw recorded for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct DrawItem {
    /// Primitive to draw.
    pub primitive: PrimitiveHandle,
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Index into the material storage.
    pub material_index: u32,
}

/// Per-category change flags, set by the scene system and cleared by the
/// renderer once every stage has updated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateFlags {
    /// Geometry storage changed (primitives added/removed/rebuilt).
    pub geometry: bool,
    /// Material storage changed.
    pub materials: bool,
    /// Texture storage changed.
    pub textures: bool,
}

impl UpdateFlags {
    /// Returns true if any storage category changed.
    #[inline]
    pub fn any(&self) -> bool {
        self.geometry || self.materials || self.textures
    }
}

/// Camera state for the current frame.
#[derive(Clone, Copy, Debug)]
pub struct CameraView {
    /// Combined view-projection matrix.
    pub view_projection: Mat4,
    /// Camera world position.
    pub position: Vec3,
}

impl Default for CameraView {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
        }
    }
}

/// Per-frame view of the scene, supplied by the scene collaborator.
#[derive(Clone, Debug, Default)]
pub struct SceneView {
    /// Draws for this frame, in submission order.
    pub draws: Vec<DrawItem>,
    /// Camera for this frame.
    pub camera: CameraView,
    /// Which storage categories changed since the last frame.
    pub updated: UpdateFlags,
}

impl SceneView {
    /// Clears the update flags after every stage has consumed them.
    pub fn clear_updated(&mut self) {
        self.updated = UpdateFlags::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_flags_any() {
        assert!(!UpdateFlags::default().any());
        assert!(
            UpdateFlags {
                materials: true,
                ..Default::default()
            }
            .any()
        );
    }

    #[test]
    fn test_clear_updated() {
        let mut view = SceneView {
            updated: UpdateFlags {
                geometry: true,
                materials: true,
                textures: false,
            },
            ..Default::default()
        };

        view.clear_updated();
        assert!(!view.updated.any());
    }
}
