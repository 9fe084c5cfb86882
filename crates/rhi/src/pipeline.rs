//! Pipeline layout and compute pipeline creation.
//!
//! Graphics pipelines for material rendering are built by the collaborator
//! that owns the material system; the core itself only creates pipeline
//! layouts (from the descriptor layouts a stage declares) and compute
//! pipelines (for the lighting and path-tracing dispatches).

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult};
use crate::shader::{ShaderModule, ShaderStage};

/// Pipeline layout wrapper.
///
/// Defines the descriptor set layouts and push constant ranges a pipeline
/// binds against.
pub struct PipelineLayout {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Vulkan pipeline layout handle.
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a new pipeline layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout: {} set layout(s), {} push constant range(s)",
            set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Destroyed pipeline layout");
    }
}

/// Compute pipeline wrapper.
pub struct ComputePipeline {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Vulkan pipeline handle.
    pipeline: vk::Pipeline,
}

impl ComputePipeline {
    /// Creates a compute pipeline from a compiled compute shader module.
    ///
    /// # Errors
    ///
    /// Returns an error if the module is not a compute shader or pipeline
    /// creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        shader: &ShaderModule,
        layout: &PipelineLayout,
    ) -> RhiResult<Self> {
        if shader.stage() != ShaderStage::Compute {
            return Err(RhiError::ShaderError(format!(
                "Compute pipeline requires a compute shader, got {}",
                shader.stage()
            )));
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_create_info())
            .layout(layout.handle());

        let pipelines = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| RhiError::VulkanError(e))?
        };

        info!("Compute pipeline created");

        Ok(Self {
            device,
            pipeline: pipelines[0],
        })
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Returns the bind point for this pipeline.
    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::COMPUTE
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("Destroyed compute pipeline");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_layout_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<PipelineLayout>();
    }

    #[test]
    fn test_compute_pipeline_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ComputePipeline>();
    }
}
