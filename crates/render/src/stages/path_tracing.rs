//! Progressive path tracing over the scene's acceleration structure.
//!
//! The stage owns an accumulation target that integrates samples across
//! frames; any scene change resets the accumulation. Tracing runs as a
//! compute dispatch (ray queries against the collaborator-built TLAS), so
//! the dependency on acceleration-structure builds is expressed with the
//! acceleration-structure scopes before the dispatch.

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
use crate::stages::{group_count, WORK_GROUP_SIZE};
use crate::ubo::FrameUBO;

/// Accumulation target format; needs headroom for many integrated samples.
pub const ACCUMULATION_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Progressive path-tracing stage.
pub struct PathTracingStage {
    device: Arc<DeviceContext>,
    extent: vk::Extent2D,
    accumulation: Image,
    /// The accumulation image transitions out of UNDEFINED exactly once
    /// per (re)creation.
    accumulation_initialized: bool,
    /// Samples integrated so far; pushed to the shader each dispatch.
    accumulation_index: u32,
    /// Set when the TLAS was rebuilt since the last dispatch.
    tlas_dirty: bool,
    frame_uniforms: Vec<Buffer>,
    descriptor_pool: DescriptorPool,
    global_layout: DescriptorSetLayout,
    frame_layout: DescriptorSetLayout,
    descriptors: DescriptorSlotProvider,
    pipeline_layout: Option<PipelineLayout>,
    pipeline: Option<ComputePipeline>,
    frame_counter: u32,
    registered: bool,
}

impl PathTracingStage {
    /// Creates the stage with `slice_count` frame slices.
    ///
    /// # Errors
    ///
    /// Returns an error if image, buffer or descriptor creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        extent: vk::Extent2D,
        slice_count: u32,
    ) -> RenderResult<Self> {
        let accumulation = Image::new(
            device.clone(),
            ImageUsage::Storage,
            ACCUMULATION_FORMAT,
            extent,
        )?;

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

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(1),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(slice_count),
        ];
        let descriptor_pool = DescriptorPool::new(device.clone(), slice_count + 1, &pool_sizes)?;

        let global_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::storage_image(
                0,
                vk::ShaderStageFlags::COMPUTE,
            )],
        )?;
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
            accumulation,
            accumulation_initialized: false,
            accumulation_index: 0,
            tlas_dirty: false,
            frame_uniforms,
            descriptor_pool,
            global_layout,
            frame_layout,
            descriptors,
            pipeline_layout: None,
            pipeline: None,
            frame_counter: 0,
            registered: false,
        };

        stage.push_descriptors()?;

        info!(
            "Path-tracing stage created: {}x{} accumulation target",
            extent.width, extent.height
        );

        Ok(stage)
    }

    /// Returns how many samples have been integrated into the accumulation
    /// target.
    #[inline]
    pub fn accumulation_index(&self) -> u32 {
        self.accumulation_index
    }

    /// Discards integrated samples; the next dispatch starts over.
    pub fn reset_accumulation(&mut self) {
        if self.accumulation_index != 0 {
            debug!(
                "Accumulation reset after {} samples",
                self.accumulation_index
            );
        }
        self.accumulation_index = 0;
    }

    fn push_descriptors(&mut self) -> RenderResult<()> {
        self.descriptors.push_global(
            0,
            0,
            DescriptorWrite::StorageImage {
                view: self.accumulation.view(),
                layout: vk::ImageLayout::GENERAL,
            },
        )?;

        for slice in 0..self.frame_uniforms.len() {
            let buffer = self.frame_uniforms[slice].handle();
            self.descriptors.push_slice(
                1,
                slice as u32,
                0,
                DescriptorWrite::UniformBuffer {
                    buffer,
                    offset: 0,
                    range: FrameUBO::SIZE as vk::DeviceSize,
                },
            )?;
        }
        self.descriptors.flush();

        Ok(())
    }

    fn build_pipeline(&mut self, shaders: &dyn ShaderProvider) -> RenderResult<()> {
        let request = ShaderRequest::new(ShaderStage::Compute, "path_tracing/path_trace.comp")
            .with_define("WORK_GROUP_SIZE_X", WORK_GROUP_SIZE[0].to_string())
            .with_define("WORK_GROUP_SIZE_Y", WORK_GROUP_SIZE[1].to_string());

        let module = shaders.load(&request)?;

        let set_count = module.reflection().set_count();
        if set_count > 2 {
            return Err(RenderError::Shader(format!(
                "Path-tracing shader expects {} descriptor sets, stage provides 2",
                set_count
            )));
        }

        let push_constant_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(std::mem::size_of::<u32>() as u32)];

        let layout = PipelineLayout::new(
            self.device.clone(),
            &[self.global_layout.handle(), self.frame_layout.handle()],
            &push_constant_ranges,
        )?;
        let pipeline = ComputePipeline::new(self.device.clone(), &module, &layout)?;

        self.pipeline_layout = Some(layout);
        self.pipeline = Some(pipeline);

        Ok(())
    }
}

impl RenderStage for PathTracingStage {
    fn name(&self) -> &'static str {
        "path_tracing"
    }

    fn register_scene(
        &mut self,
        _scene: &SceneView,
        shaders: &dyn ShaderProvider,
    ) -> RenderResult<()> {
        self.build_pipeline(shaders)?;
        self.reset_accumulation();
        self.tlas_dirty = true;
        self.registered = true;
        Ok(())
    }

    fn remove_scene(&mut self) -> RenderResult<()> {
        self.pipeline = None;
        self.pipeline_layout = None;
        self.reset_accumulation();
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

        // Any storage change invalidates integrated samples; a geometry
        // change also means the TLAS was rebuilt this frame.
        if scene.updated.any() {
            self.reset_accumulation();
        }
        if scene.updated.geometry {
            self.tlas_dirty = true;
        }

        Ok(())
    }

    fn render(&mut self, cmd: &CommandBuffer, frame: &FrameContext) -> RenderResult<()> {
        let (pipeline, layout) = match (&self.pipeline, &self.pipeline_layout) {
            (Some(pipeline), Some(layout)) => (pipeline, layout),
            _ => {
                return Err(RenderError::Stage(
                    "Path-tracing stage rendered without a registered scene".to_string(),
                ));
            }
        };

        // Ray queries must see the finished TLAS build.
        if self.tlas_dirty {
            cmd.memory_barrier(PipelineBarrier::new(
                SyncScope::ACCELERATION_STRUCTURE_WRITE,
                SyncScope::ACCELERATION_STRUCTURE_READ,
            ));
            self.tlas_dirty = false;
        }

        if self.accumulation_initialized {
            // Frame N reads what frame N-1 integrated.
            cmd.memory_barrier(PipelineBarrier::new(
                SyncScope::COMPUTE_SHADER_WRITE,
                SyncScope::COMPUTE_SHADER_READ | SyncScope::COMPUTE_SHADER_WRITE,
            ));
        } else {
            cmd.transition_image_layout(
                self.accumulation.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
                PipelineBarrier::new(
                    SyncScope::WAIT_FOR_NONE,
                    SyncScope::COMPUTE_SHADER_READ | SyncScope::COMPUTE_SHADER_WRITE,
                ),
                self.accumulation.subresource_range(),
            );
            self.accumulation_initialized = true;
        }

        cmd.bind_pipeline(pipeline.bind_point(), pipeline.handle());
        cmd.bind_descriptor_sets(
            pipeline.bind_point(),
            layout.handle(),
            0,
            self.descriptors.descriptor_slice(frame.slice_index),
        );
        cmd.push_constants(
            layout.handle(),
            vk::ShaderStageFlags::COMPUTE,
            0,
            &self.accumulation_index,
        );

        cmd.dispatch(
            group_count(self.extent.width, WORK_GROUP_SIZE[0]),
            group_count(self.extent.height, WORK_GROUP_SIZE[1]),
            1,
        );

        self.accumulation_index += 1;

        Ok(())
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.accumulation = Image::new(
            self.device.clone(),
            ImageUsage::Storage,
            ACCUMULATION_FORMAT,
            extent,
        )?;
        self.accumulation_initialized = false;
        self.reset_accumulation();
        self.extent = extent;

        self.descriptors.push_global(
            0,
            0,
            DescriptorWrite::StorageImage {
                view: self.accumulation.view(),
                layout: vk::ImageLayout::GENERAL,
            },
        )?;
        self.descriptors.flush();

        debug!(
            "Accumulation target recreated at {}x{}",
            extent.width, extent.height
        );
        Ok(())
    }

    fn reload_shaders(&mut self, shaders: &dyn ShaderProvider) -> RenderResult<()> {
        if !self.registered {
            return Err(RenderError::Stage(
                "Path-tracing stage cannot reload shaders without a scene".to_string(),
            ));
        }
        self.build_pipeline(shaders)?;
        self.reset_accumulation();
        Ok(())
    }
}

impl Drop for PathTracingStage {
    fn drop(&mut self) {
        if let Err(e) = self.descriptors.free(&self.descriptor_pool) {
            tracing::warn!("Failed to free path-tracing descriptor sets: {}", e);
        }
    }
}
