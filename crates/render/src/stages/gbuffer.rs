//! Geometry pass: renders scene geometry into the G-buffer targets.
//!
//! The stage owns the G-buffer attachments (recreated on resize) and the
//! per-slice frame uniforms. Geometry submission itself goes through a
//! [`PassRecorder`](super::PassRecorder) installed by the material-pipeline
//! collaborator; the stage contributes the attachment transitions, the
//! render pass structure and the producer barrier toward the lighting
//! consumer.

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
use hybrid_rhi::rendering::{ColorAttachment, DepthAttachment, RenderingConfig};
use hybrid_rhi::shader::ShaderProvider;

use crate::descriptor_slots::{DescriptorSlotProvider, DescriptorWrite, SlotRate};
use crate::error::{RenderError, RenderResult};
use crate::scene::SceneView;
use crate::stage::{FrameContext, RenderStage};
use crate::stages::PassRecorder;
use crate::ubo::FrameUBO;

/// G-buffer color attachment formats.
///
/// Layout: normals, emission, base color + occlusion, roughness + metallic.
pub const COLOR_FORMATS: [vk::Format; 4] = [
    vk::Format::A2B10G10R10_UNORM_PACK32,
    vk::Format::B10G11R11_UFLOAT_PACK32,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::R8G8_UNORM,
];

/// G-buffer depth format.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Number of color attachments.
pub const COLOR_ATTACHMENT_COUNT: usize = COLOR_FORMATS.len();

/// The G-buffer render targets, shared with the consuming stages.
///
/// The G-buffer stage replaces the contents on resize; consumers re-read
/// the views in their own resize pass, which runs after this stage's in the
/// pipeline order.
pub struct GBufferTargets {
    /// Color attachments, in [`COLOR_FORMATS`] order.
    pub colors: Vec<Image>,
    /// Depth attachment.
    pub depth: Image,
}

impl GBufferTargets {
    fn create(device: &Arc<DeviceContext>, extent: vk::Extent2D) -> RenderResult<Self> {
        let colors = COLOR_FORMATS
            .iter()
            .map(|&format| {
                Image::new(device.clone(), ImageUsage::ColorAttachment, format, extent)
                    .map_err(RenderError::Rhi)
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let depth = Image::new(
            device.clone(),
            ImageUsage::DepthAttachment,
            DEPTH_FORMAT,
            extent,
        )?;

        Ok(Self { colors, depth })
    }
}

/// Shared handle to the G-buffer targets.
pub type SharedGBufferTargets = Rc<RefCell<GBufferTargets>>;

/// Geometry stage writing the G-buffer.
pub struct GBufferStage {
    device: Arc<DeviceContext>,
    extent: vk::Extent2D,
    targets: SharedGBufferTargets,
    /// One frame uniform buffer per slice; rewritten every frame through
    /// the PerSlice set, never while the GPU reads it.
    frame_uniforms: Vec<Buffer>,
    descriptor_pool: DescriptorPool,
    frame_layout: DescriptorSetLayout,
    descriptors: DescriptorSlotProvider,
    geometry_recorder: Option<PassRecorder>,
    frame_counter: u32,
    registered: bool,
}

impl GBufferStage {
    /// Creates the stage with `slice_count` frame slices.
    ///
    /// # Errors
    ///
    /// Returns an error if target, buffer or descriptor creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        extent: vk::Extent2D,
        slice_count: u32,
    ) -> RenderResult<Self> {
        let targets = Rc::new(RefCell::new(GBufferTargets::create(&device, extent)?));

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

        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(slice_count)];
        let descriptor_pool = DescriptorPool::new(device.clone(), slice_count, &pool_sizes)?;

        let frame_layout = DescriptorSetLayout::new(
            device.clone(),
            &[DescriptorBindingBuilder::uniform_buffer(
                0,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            )],
        )?;

        let mut descriptors = DescriptorSlotProvider::new(device.clone());
        descriptors.allocate(
            &descriptor_pool,
            &[(frame_layout.handle(), SlotRate::PerSlice)],
            slice_count,
        )?;

        for (slice, buffer) in frame_uniforms.iter().enumerate() {
            descriptors.push_slice(
                0,
                slice as u32,
                0,
                DescriptorWrite::UniformBuffer {
                    buffer: buffer.handle(),
                    offset: 0,
                    range: FrameUBO::SIZE as vk::DeviceSize,
                },
            )?;
        }
        descriptors.flush();

        info!(
            "G-buffer stage created: {}x{}, {} color attachments",
            extent.width, extent.height, COLOR_ATTACHMENT_COUNT
        );

        Ok(Self {
            device,
            extent,
            targets,
            frame_uniforms,
            descriptor_pool,
            frame_layout,
            descriptors,
            geometry_recorder: None,
            frame_counter: 0,
            registered: false,
        })
    }

    /// Returns the shared targets for consuming stages.
    pub fn targets(&self) -> SharedGBufferTargets {
        self.targets.clone()
    }

    /// Returns the frame descriptor layout, for collaborator pipeline
    /// creation.
    pub fn frame_layout(&self) -> vk::DescriptorSetLayout {
        self.frame_layout.handle()
    }

    /// Installs the geometry recorder that submits the scene's draws inside
    /// the pass.
    pub fn set_geometry_recorder(&mut self, recorder: PassRecorder) {
        self.geometry_recorder = Some(recorder);
    }
}

impl RenderStage for GBufferStage {
    fn name(&self) -> &'static str {
        "gbuffer"
    }

    fn register_scene(
        &mut self,
        scene: &SceneView,
        _shaders: &dyn ShaderProvider,
    ) -> RenderResult<()> {
        // Geometry pipelines belong to the material collaborator; the stage
        // only tracks registration for its lifecycle contract.
        debug!("G-buffer stage registered scene with {} draws", scene.draws.len());
        self.registered = true;
        Ok(())
    }

    fn remove_scene(&mut self) -> RenderResult<()> {
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

        if scene.updated.geometry {
            debug!("Geometry storage updated; draw list re-read next pass");
        }

        Ok(())
    }

    fn render(&mut self, cmd: &CommandBuffer, frame: &FrameContext) -> RenderResult<()> {
        if !self.registered {
            return Err(RenderError::Stage(
                "G-buffer stage has no registered scene".to_string(),
            ));
        }

        let targets = self.targets.borrow();

        for color in &targets.colors {
            cmd.transition_image_layout(
                color.handle(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                PipelineBarrier::new(SyncScope::WAIT_FOR_NONE, SyncScope::COLOR_ATTACHMENT_WRITE),
                color.subresource_range(),
            );
        }

        cmd.transition_image_layout(
            targets.depth.handle(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            PipelineBarrier::new(
                SyncScope::WAIT_FOR_NONE,
                SyncScope::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ),
            targets.depth.subresource_range(),
        );

        let config = RenderingConfig::from_extent(self.extent)
            .with_color_attachments(
                targets
                    .colors
                    .iter()
                    .map(|image| ColorAttachment::new(image.view())),
            )
            .with_depth_attachment(DepthAttachment::new(targets.depth.view()).store());

        let bundle = config.build();
        cmd.begin_rendering(&bundle.info());

        cmd.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(&bundle.render_area());

        if let Some(recorder) = &mut self.geometry_recorder {
            recorder(cmd, self.descriptors.descriptor_slice(frame.slice_index));
        }

        cmd.end_rendering();

        // Producer barrier: the lighting dispatch reads every attachment.
        for color in &targets.colors {
            cmd.transition_image_layout(
                color.handle(),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                PipelineBarrier::new(
                    SyncScope::COLOR_ATTACHMENT_WRITE,
                    SyncScope::COMPUTE_SHADER_READ,
                ),
                color.subresource_range(),
            );
        }

        cmd.transition_image_layout(
            targets.depth.handle(),
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            PipelineBarrier::new(
                SyncScope::DEPTH_STENCIL_ATTACHMENT_WRITE,
                SyncScope::COMPUTE_SHADER_READ,
            ),
            targets.depth.subresource_range(),
        );

        Ok(())
    }

    fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        // Runs under the device-idle resize contract; the replaced targets
        // have no in-flight readers.
        *self.targets.borrow_mut() = GBufferTargets::create(&self.device, extent)?;
        self.extent = extent;

        debug!("G-buffer targets recreated at {}x{}", extent.width, extent.height);
        Ok(())
    }

    fn reload_shaders(&mut self, _shaders: &dyn ShaderProvider) -> RenderResult<()> {
        // Geometry pipelines are rebuilt by the material collaborator that
        // installed the recorder.
        debug!("G-buffer stage has no stage-owned pipelines to reload");
        Ok(())
    }
}

impl Drop for GBufferStage {
    fn drop(&mut self) {
        if let Err(e) = self.descriptors.free(&self.descriptor_pool) {
            tracing::warn!("Failed to free G-buffer descriptor sets: {}", e);
        }
    }
}
