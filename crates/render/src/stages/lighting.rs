//! Deferred lighting pass: a compute dispatch over the G-buffer.
//!
//! Consumes the G-buffer attachments through a Global descriptor set and
//! writes the lit image, which the post-process stage composites. The
//! compute pipeline is built in place from a collaborator-compiled module
//! at scene registration and rebuilt by `reload_shaders`.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use hybrid_rhi::barrier::{PipelineBarrier, SyncScope};
use hybrid_rhi::buffer::{Buffer, BufferUsage};
use hybrid_rhi::command::CommandBuffer;
use hybrid_rhi::descriptor::{DescriptorBindingBuilder, DescriptorPool, DescriptorSetLayout};
use hybrid_rhi::device::DeviceContext;
use hybrid_rhi::image::{Image, ImageUsage};
use hybrid_rhi::pipeline::{ComputePipeline, PipelineLayout};
use hybrid_rhi::shader::{ShaderProvider, ShaderRequest, ShaderStage};

use crate::descriptor_slots::{DescriptorSlotProvider, DescriptorWrite, SlotRate};
use crate::error::{RenderError, RenderResult};
use crate::scene::SceneView;
use crate::stage::{FrameContext, RenderStage};
use crate::stages::gbuffer::COLOR_ATTACHMENT_COUNT;
use crate::stages::{create_texel_sampler, group_count, SharedGBufferTargets, WORK_GROUP_SIZE};
use crate::ubo::FrameUBO;

/// Lit output format.
pub const LIT_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Shared handle to a stage-owned image.
pub type SharedImage = Rc<RefCell<Image>>;

/// Deferred lighting stage.
pub struct LightingStage {
    device: Arc<DeviceContext>,
    extent: vk::Extent2D,
    gbuffer: SharedGBufferTargets,
    lit_target: SharedImage,
    sampler: vk::Sampler,
    frame_uniforms: Vec<Buffer>,
    descriptor_pool: DescriptorPool,
    global_layout: DescriptorSetLayout,
    frame_layout: DescriptorSetLayout,
    descriptors: DescriptorSlotProvider,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<ComputePipeline>,
    /// Define source for pipeline (re)builds, captured at registration.
    light_count: u32,
    frame_counter: u32,
    registered: bool,
}

impl LightingStage {
    /// Creates the stage reading `gbuffer` with `slice_count` frame slices.
    ///
    /// # Errors
    ///
    /// Returns an error if image, sampler, buffer or descriptor creation
    /// fails.
    pub fn new(
        device: Arc<DeviceContext>,
        extent: vk::Extent2D,
        slice_count: u32,
        gbuffer: SharedGBufferTargets,
    ) -> RenderResult<Self> {
        let lit_target = Rc::new(RefCell::new(Image::new(
            device.clone(),
            ImageUsage::Storage,
            LIT_FORMAT,
            extent,
        )?));

        let sampler = create_texel_sampler(&device)?;

        let frame_uniforms = (0..slice_count)
            .map(|_| {
                Buffer::new(
                    device.clone(),
                    BufferUsage::Uniform,
                    FrameUBO::SIZE as vk::DeviceSize,
                )
                .map_err(RenderError::Rhi)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let sampled_count = COLOR_ATTACHMENT_COUNT as u32 + 1;
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(sampled_count),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(slice_count),
        ];
        let descriptor_pool = DescriptorPool::new(device.clone(), slice_count + 1, &pool_sizes)?;

        // Set 0 (Global): the G-buffer attachments, depth and the lit
        // output; set 1 (PerSlice): the per-frame uniform.
        let mut global_bindings = Vec::with_capacity(COLOR_ATTACHMENT_COUNT + 2);
        for binding in 0..COLOR_ATTACHMENT_COUNT as u32 + 1 {
            global_bindings.push(DescriptorBindingBuilder::combined_image_sampler(
                binding,
                vk::ShaderStageFlags::COMPUTE,
            ));
        }
        global_bindings.push(DescriptorBindingBuilder::storage_image(
            COLOR_ATTACHMENT_COUNT as u32 + 1,
            vk::ShaderStageFlags::COMPUTE,
        ));

        let global_layout = DescriptorSetLayout::new(device.clone(), &global_bindings)?;
        let frame_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::uniform_buffer(
                0,
                vk::ShaderStageFlags::COMPUTE,
            )],
        )?;

        let mut descriptors = DescriptorSlotProvider::new(device.clone());
        descriptors.allocate(
            &descriptor_pool,
            &[
                (global_layout.handle(), SlotRate::Global),
                (frame_layout.handle(), SlotRate::PerSlice),
            ],
            slice_count,
        )?;

        let mut stage = Self {
            device,
            extent,
            gbuffer,
            lit_target,
            sampler,
            frame_uniforms,
            descriptor_pool,
            global_layout,
            frame_layout,
            descriptors,
            pipeline_layout: None,
            pipeline: None,
            light_count: 0,
            frame_counter: 0,
            registered: false,
        };

        stage.push_input_descriptors()?;
        for (slice, buffer) in stage.frame_uniforms.iter().enumerate() {
            stage.descriptors.push_slice(
                1,
                slice as u32,
                0,
                DescriptorWrite::UniformBuffer {
                    buffer: buffer.handle(),
                    offset: 0,
                    range: FrameUBO::SIZE as vk::DeviceSize,
                },
            )?;
        }
        stage.descriptors.flush();

        info!(
            "Lighting stage created: {}x{}, {} sampled inputs",
            extent.width, extent.height, sampled_count
        );

        Ok(stage)
    }

    /// Returns the lit output image for the post-process consumer.
    pub fn lit_target(&self) -> SharedImage {
        self.lit_target.clone()
    }

    /// Re-pushes the Global inputs: G-buffer textures, depth, lit output.
    fn push_input_descriptors(&mut self) -> RenderResult<()> {
        let gbuffer = self.gbuffer.borrow();

        for (binding, color) in gbuffer.colors.iter().enumerate() {
            self.descriptors.push_global(
                0,
                binding as u32,
                DescriptorWrite::CombinedImageSampler {
                    sampler: self.sampler,
                    view: color.view(),
                    layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            )?;
        }

        self.descriptors.push_global(
            0,
            COLOR_ATTACHMENT_COUNT as u32,
            DescriptorWrite::CombinedImageSampler {
                sampler: self.sampler,
                view: gbuffer.depth.view(),
                layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            },
        )?;

        self.descriptors.push_global(
            0,
            COLOR_ATTACHMENT_COUNT as u32 + 1,
            DescriptorWrite::StorageImage {
                view: self.lit_target.borrow().view(),
                layout: vk::ImageLayout::GENERAL,
            },
        )?;

        Ok(())
    }

    fn build_pipeline(&mut self, shaders: &dyn ShaderProvider) -> RenderResult<()> {
        let request = ShaderRequest::new(ShaderStage::Compute, "hybrid/lighting.comp")
            .with_define("WORK_GROUP_SIZE_X", WORK_GROUP_SIZE[0].to_string())
            .with_define("WORK_GROUP_SIZE_Y", WORK_GROUP_SIZE[1].to_string())
            .with_define("LIGHT_COUNT", self.light_count.to_string());

        let module = shaders.load(&request)?;

        let set_count = module.reflection().set_count();
        if set_count > 2 {
            return Err(RenderError::Shader(format!(
                "Lighting shader expects {} descriptor sets, stage provides 2",
                set_count
            )));
        }

        let layout = PipelineLayout::new(
            self.device.clone(),
            &[self.global_layout.handle(), self.frame_layout.handle()],
            &[],
        )?;
        let pipeline = ComputePipeline::new(self.device.clone(), &module, &layout)?;

        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);

        Ok(())
    }
}

impl RenderStage for LightingStage {
    fn name(&self) -> &'static str {
        "lighting"
    }

    fn register_scene(
        &mut self,
        scene: &SceneView,
        shaders: &dyn ShaderProvider,
    ) -> RenderResult<()> {
        // Light storage is collaborator-owned; the draw list length stands
        // in for the scene's light count define until lights are wired up.
        self.light_count = scene.draws.len() as u32;
        self.build_pipeline(shaders)?;
        self.registered = true;
        Ok(())
    }

    fn remove_scene(&mut self) -> RenderResult<()> {
        self.pipeline = None;
        self.pipeline_layout = None;
        self.registered = false;
        self.frame_counter = 0;
        Ok(())
    }

    fn update(&mut self, scene: &SceneView, slice_index: u32) -> RenderResult<()> {
        let ubo = FrameUBO::new(
            scene.camera.view_projection,
            scene.camera.position,
            self.frame_counter,
        );
        self.frame_uniforms[slice_index as usize].write_data(0, bytemuck::bytes_of(&ubo))?;
        self.frame_counter = self.frame_counter.wrapping_add(1);

        if scene.updated.textures || scene.updated.materials {
            debug!("Material/texture storage updated; lighting inputs unchanged");
        }

        Ok(())
    }

    fn render(&mut self, cmd: &CommandBuffer, frame: &FrameContext) -> RenderResult<()> {
        let (pipeline, layout) = match (&self.pipeline, &self.pipeline_layout) {
            (Some(pipeline), Some(layout)) => (pipeline, layout),
            _ => {
                return Err(RenderError::Stage(
                    "Lighting stage rendered without a registered scene".to_string(),
                ));
            }
        };

        let lit = self.lit_target.borrow();

        cmd.transition_image_layout(
            lit.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
            PipelineBarrier::new(SyncScope::WAIT_FOR_NONE, SyncScope::COMPUTE_SHADER_WRITE),
            lit.subresource_range(),
        );

        cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        cmd.bind_descriptor_sets(
            pipeline.bind_point(),
            layout.handle(),
            0,
            self.descriptors.descriptor_slice(frame.slice_index),
        );

        cmd.dispatch(
            group_count(self.extent.width, WORK_GROUP_SIZE[0]),
            group_count(self.extent.height, WORK_GROUP_SIZE[1]),
            1,
        );

        // Producer barrier toward the post-process sampler read.
        cmd.transition_image_layout(
            lit.handle(),
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            PipelineBarrier::new(
                SyncScope::COMPUTE_SHADER_WRITE,
                SyncScope::FRAGMENT_SHADER_READ,
            ),
            lit.subresource_range(),
        );

        Ok(())
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        // The G-buffer stage resized first (pipeline order), so its views
        // are current when the inputs are re-pushed.
        *self.lit_target.borrow_mut() = Image::new(
            self.device.clone(),
            ImageUsage::Storage,
            LIT_FORMAT,
            extent,
        )?;
        self.extent = extent;

        self.push_input_descriptors()?;
        self.descriptors.flush();

        debug!("Lighting target recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn reload_shaders(&mut self, shaders: &dyn ShaderProvider) -> RenderResult<()> {
        if !self.registered {
            return Err(RenderError::Stage(
                "Lighting stage cannot reload shaders without a scene".to_string(),
            ));
        }
        self.build_pipeline(shaders)
    }
}

impl Drop for LightingStage {
    fn drop(&mut self) {
        if let Err(e) = self.descriptors.free(&self.descriptor_pool) {
            tracing::warn!("Failed to free lighting descriptor sets: {}", e);
        }
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}
