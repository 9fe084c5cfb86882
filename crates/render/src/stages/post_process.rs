//! Final composite: samples the lit image and writes the swapchain image.
//!
//! The fullscreen composite pipeline belongs to the material collaborator
//! and records through a [`PassRecorder`](super::PassRecorder); the stage
//! owns the swapchain-image layout transitions, including the final
//! transition to the present layout.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use hybrid_rhi::barrier::{PipelineBarrier, SyncScope};
use hybrid_rhi::command::CommandBuffer;
use hybrid_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use hybrid_rhi::device::DeviceContext;
use hybrid_rhi::image::ImageUsage;
use hybrid_rhi::rendering::{ColorAttachment, RenderingConfig};
use hybrid_rhi::shader::ShaderProvider;

use crate::descriptor_slots::{DescriptorSlotProvider, DescriptorWrite, SlotRate};
use crate::error::{RenderError, RenderResult};
use crate::scene::SceneView;
use crate::stage::{FrameContext, RenderStage};
use crate::stages::{create_texel_sampler, PassRecorder, SharedImage};

/// Composite stage writing the acquired swapchain image.
pub struct PostProcessStage {
    device: Arc<DeviceContext>,
    /// Lit image produced by the lighting stage.
    input: SharedImage,
    sampler: vk::Sampler,
    descriptor_pool: DescriptorPool,
    input_layout: DescriptorSetLayout,
    descriptors: DescriptorSlotProvider,
    composite_recorder: Option<PassRecorder>,
    registered: bool,
}

impl PostProcessStage {
    /// Creates the stage sampling `input`.
    ///
    /// # Errors
    ///
    /// Returns an error if sampler or descriptor creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        slice_count: u32,
        input: SharedImage,
    ) -> RenderResult<Self> {
        let sampler = create_texel_sampler(&device)?;

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)];
        let descriptor_pool = DescriptorPool::new(device.clone(), 1, &pool_sizes)?;

        let input_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::combined_image_sampler(
                0,
                vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let mut descriptors = DescriptorSlotProvider::new(device.clone());
        descriptors.allocate(
            &descriptor_pool,
            &[(input_layout.handle(), SlotRate::Global)],
            slice_count,
        )?;

        let mut stage = Self {
            device,
            input,
            sampler,
            descriptor_pool,
            input_layout,
            descriptors,
            composite_recorder: None,
            registered: false,
        };

        stage.push_input_descriptor()?;

        info!("Post-process stage created");

        Ok(stage)
    }

    /// Returns the input descriptor layout, for collaborator pipeline
    /// creation.
    pub fn input_layout(&self) -> vk::DescriptorSetLayout {
        self.input_layout.handle()
    }

    /// Installs the fullscreen composite recorder.
    pub fn set_composite_recorder(&mut self, recorder: PassRecorder) {
        self.composite_recorder = Some(recorder);
    }

    fn push_input_descriptor(&mut self) -> RenderResult<()> {
        let view = self.input.borrow().view();
        self.descriptors.push_global(
            0,
            0,
            DescriptorWrite::CombinedImageSampler {
                sampler: self.sampler,
                view,
                layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            },
        )?;
        self.descriptors.flush();
        Ok(())
    }
}

impl RenderStage for PostProcessStage {
    fn name(&self) -> &'static str {
        "post_process"
    }

    fn register_scene(
        &mut self,
        _scene: &SceneView,
        _shaders: &dyn ShaderProvider,
    ) -> RenderResult<()> {
        self.registered = true;
        Ok(())
    }

    fn remove_scene(&mut self) -> RenderResult<()> {
        self.registered = false;
        Ok(())
    }

    fn update(&mut self, _scene: &SceneView, _slice_index: u32) -> RenderResult<()> {
        // The composite has no per-frame data of its own.
        Ok(())
    }

    fn render(&mut self, cmd: &CommandBuffer, frame: &FrameContext) -> RenderResult<()> {
        if !self.registered {
            return Err(RenderError::Stage(
                "Post-process stage has no registered scene".to_string(),
            ));
        }

        let swapchain_range = hybrid_rhi::image::Image::subresource_range_for(
            ImageUsage::ColorAttachment,
        );

        cmd.transition_image_layout(
            frame.swapchain_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            PipelineBarrier::new(SyncScope::WAIT_FOR_NONE, SyncScope::COLOR_ATTACHMENT_WRITE),
            swapchain_range,
        );

        let config = RenderingConfig::from_extent(frame.extent)
            .with_color_attachment(ColorAttachment::new(frame.swapchain_view));

        let bundle = config.build();
        cmd.begin_rendering(&bundle.info());

        cmd.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: frame.extent.width as f32,
            height: frame.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(&bundle.render_area());

        if let Some(recorder) = &mut self.composite_recorder {
            recorder(cmd, self.descriptors.descriptor_slice(frame.slice_index));
        }

        cmd.end_rendering();

        cmd.transition_image_layout(
            frame.swapchain_image,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            PipelineBarrier::new(SyncScope::COLOR_ATTACHMENT_WRITE, SyncScope::BLOCK_NONE),
            swapchain_range,
        );

        Ok(())
    }

    fn resize(&mut self, _extent: vk::Extent2D) -> RenderResult<()> {
        // The lighting stage recreated its target first (pipeline order);
        // re-point the input binding at the new view.
        self.push_input_descriptor()?;
        debug!("Post-process input descriptor re-pushed after resize");
        Ok(())
    }

    fn reload_shaders(&mut self, _shaders: &dyn ShaderProvider) -> RenderResult<()> {
        // The composite pipeline is rebuilt by the collaborator that
        // installed the recorder.
        debug!("Post-process stage has no stage-owned pipelines to reload");
        Ok(())
    }
}

impl Drop for PostProcessStage {
    fn drop(&mut self) {
        if let Err(e) = self.descriptors.free(&self.descriptor_pool) {
            tracing::warn!("Failed to free post-process descriptor sets: {}", e);
        }
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}
