//! Concrete render stages, in fixed dependency order:
//! G-buffer → Lighting → Path tracing → Post-process.
//!
//! Each stage owns its attachments, per-slice uniforms and descriptor
//! slots, and records the barriers between what it produces and what the
//! next stage consumes. Graphics passes (geometry, composite) take a
//! recorder closure from the material-pipeline collaborator; compute
//! pipelines (lighting, path tracing) are built in place from
//! collaborator-compiled shader modules.
//!
//! Resize contract: stage resize runs only after the frame loop has flushed
//! deferred destruction under device idle, so extent-dependent images can
//! be replaced in place.

mod gbuffer;
mod lighting;
mod path_tracing;
mod post_process;

pub use gbuffer::{
    GBufferStage, GBufferTargets, SharedGBufferTargets, COLOR_ATTACHMENT_COUNT, COLOR_FORMATS,
    DEPTH_FORMAT,
};
pub use lighting::{LightingStage, SharedImage, LIT_FORMAT};
pub use path_tracing::{PathTracingStage, ACCUMULATION_FORMAT};
pub use post_process::PostProcessStage;

/// Compute workgroup size shared by the dispatching stages; must match the
/// shaders' local size.
pub const WORK_GROUP_SIZE: [u32; 2] = [8, 8];

use std::sync::Arc;

use ash::vk;

use hybrid_rhi::command::CommandBuffer;
use hybrid_rhi::device::DeviceContext;
use hybrid_rhi::RhiResult;

/// Closure the material-pipeline collaborator installs to record draws
/// inside a stage's graphics pass. Receives the command buffer and the
/// stage's descriptor slice for the current frame.
pub type PassRecorder = Box<dyn FnMut(&CommandBuffer, &[vk::DescriptorSet])>;

/// Workgroup dispatch count along one axis.
pub(crate) fn group_count(size: u32, local_size: u32) -> u32 {
    size.div_ceil(local_size)
}

/// Creates the clamp-to-edge linear sampler stages read attachments with.
pub(crate) fn create_texel_sampler(device: &Arc<DeviceContext>) -> RhiResult<vk::Sampler> {
    let create_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
        .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
        .max_lod(vk::LOD_CLAMP_NONE);

    let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
    Ok(sampler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(group_count(1920, 8), 240);
        assert_eq!(group_count(1921, 8), 241);
        assert_eq!(group_count(7, 8), 1);
        assert_eq!(group_count(8, 8), 1);
    }
}
