//! Uniform buffer object definitions shared by the render stages.
//!
//! All structures use `#[repr(C)]` for predictable memory layout and
//! implement `Pod` and `Zeroable` for safe byte casting. Per-frame data goes
//! into PerSlice descriptor sets, one buffer per frame slot.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Per-frame camera and timing data.
///
/// # Memory Layout
///
/// - Offset 0: view-projection matrix (64 bytes)
/// - Offset 64: inverse view-projection matrix (64 bytes)
/// - Offset 128: camera world position (12 bytes)
/// - Offset 140: frame index (4 bytes)
/// - Total size: 144 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct FrameUBO {
    /// Combined view-projection matrix.
    pub view_projection: Mat4,
    /// Inverse view-projection, used to reconstruct world positions from
    /// depth.
    pub inverse_view_projection: Mat4,
    /// Camera world position.
    pub camera_position: Vec3,
    /// Monotonic frame counter, drives temporal accumulation.
    pub frame_index: u32,
}

impl FrameUBO {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Creates per-frame data from a view-projection matrix.
    pub fn new(view_projection: Mat4, camera_position: Vec3, frame_index: u32) -> Self {
        Self {
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            camera_position,
            frame_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_ubo_size() {
        // 2 Mat4 (2 * 64) + Vec3 (12) + u32 (4) = 144 bytes
        assert_eq!(FrameUBO::SIZE, 144);
    }

    #[test]
    fn test_frame_ubo_alignment() {
        // Mat4 requires 16-byte alignment on the GPU side
        assert_eq!(std::mem::align_of::<FrameUBO>(), 16);
    }

    #[test]
    fn test_frame_ubo_new_inverts_view_projection() {
        let view_projection =
            Mat4::perspective_rh(60.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0)
                * Mat4::look_at_rh(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);

        let ubo = FrameUBO::new(view_projection, Vec3::new(0.0, 2.0, 5.0), 7);

        assert_eq!(ubo.inverse_view_projection, view_projection.inverse());
        assert_eq!(ubo.frame_index, 7);
    }

    #[test]
    fn test_frame_ubo_pod_cast() {
        let ubo = FrameUBO::default();
        let bytes: &[u8] = bytemuck::bytes_of(&ubo);
        assert_eq!(bytes.len(), FrameUBO::SIZE);
    }
}
