//! Render stage lifecycle contract and the fixed-order stage pipeline.
//!
//! Every concrete stage implements [`RenderStage`]: a closed capability set
//! of scene registration, incremental update, per-frame recording, resize
//! and shader reload. [`StagePipeline`] holds the stages as an ordered list
//! and forwards each lifecycle call in dependency order, enforcing the
//! state machine:
//!
//! Unregistered → `register_scene` → Active → `render`/`update` (loop)
//! → `remove_scene` → Unregistered. `resize` and `reload_shaders` are side
//! transitions from Active back to Active.
//!
//! Stages express all inter-stage dependencies through
//! [`PipelineBarrier`](hybrid_rhi::barrier::PipelineBarrier)s recorded
//! between a producing pass and its consumer.

use ash::vk;
use tracing::debug;

use hybrid_rhi::command::CommandBuffer;
use hybrid_rhi::shader::ShaderProvider;

use crate::error::{RenderError, RenderResult};
use crate::scene::SceneView;

/// Per-frame data handed to each stage's `render`.
pub struct FrameContext {
    /// Frame slot index; selects the PerSlice descriptor slice.
    pub slice_index: u32,
    /// Acquired swapchain image index.
    pub image_index: u32,
    /// Current render extent.
    pub extent: vk::Extent2D,
    /// Acquired swapchain image.
    pub swapchain_image: vk::Image,
    /// View of the acquired swapchain image.
    pub swapchain_view: vk::ImageView,
}

/// The five-method lifecycle every concrete stage implements.
pub trait RenderStage {
    /// Stage name for logging.
    fn name(&self) -> &'static str;

    /// Binds scene-dependent resources and builds scene-dependent pipelines;
    /// transitions the stage to Active.
    fn register_scene(
        &mut self,
        scene: &SceneView,
        shaders: &dyn ShaderProvider,
    ) -> RenderResult<()>;

    /// Releases scene-dependent resources; transitions back to
    /// Unregistered.
    fn remove_scene(&mut self) -> RenderResult<()>;

    /// Incremental path: re-pushes descriptor data for storage categories
    /// whose updated flag is set. Runs once per frame before `render`.
    fn update(&mut self, scene: &SceneView, slice_index: u32) -> RenderResult<()>;

    /// Records this stage's commands for the current frame.
    fn render(&mut self, cmd: &CommandBuffer, frame: &FrameContext) -> RenderResult<()>;

    /// Rebuilds extent-dependent resources in place.
    fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()>;

    /// Rebuilds shader-dependent resources in place.
    fn reload_shaders(&mut self, shaders: &dyn ShaderProvider) -> RenderResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PipelineState {
    Unregistered,
    Active,
}

/// Ordered list of stages, executed in fixed dependency order each frame.
pub struct StagePipeline {
    stages: Vec<Box<dyn RenderStage>>,
    state: PipelineState,
}

impl Default for StagePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StagePipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            state: PipelineState::Unregistered,
        }
    }

    /// Creates a pipeline from stages already in dependency order.
    pub fn with_stages(stages: Vec<Box<dyn RenderStage>>) -> Self {
        Self {
            stages,
            state: PipelineState::Unregistered,
        }
    }

    /// Appends a stage; it renders after every stage added before it.
    ///
    /// # Errors
    ///
    /// Returns an error if a scene is currently registered.
    pub fn push(&mut self, stage: Box<dyn RenderStage>) -> RenderResult<()> {
        if self.state != PipelineState::Unregistered {
            return Err(RenderError::Stage(
                "Cannot add stages while a scene is registered".to_string(),
            ));
        }
        self.stages.push(stage);
        Ok(())
    }

    /// Returns the number of stages.
    #[inline]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the pipeline holds no stages.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns true if a scene is registered.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == PipelineState::Active
    }

    /// Registers the scene with every stage, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if a scene is already registered or any stage
    /// fails.
    pub fn register_scene(
        &mut self,
        scene: &SceneView,
        shaders: &dyn ShaderProvider,
    ) -> RenderResult<()> {
        self.expect_state(PipelineState::Unregistered, "register_scene")?;

        for stage in &mut self.stages {
            debug!("Registering scene with stage {}", stage.name());
            stage.register_scene(scene, shaders)?;
        }

        self.state = PipelineState::Active;
        Ok(())
    }

    /// Removes the scene from every stage, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if no scene is registered or any stage fails.
    pub fn remove_scene(&mut self) -> RenderResult<()> {
        self.expect_state(PipelineState::Active, "remove_scene")?;

        for stage in &mut self.stages {
            debug!("Removing scene from stage {}", stage.name());
            stage.remove_scene()?;
        }

        self.state = PipelineState::Unregistered;
        Ok(())
    }

    /// Runs the incremental update on every stage, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if no scene is registered or any stage fails.
    pub fn update(&mut self, scene: &SceneView, slice_index: u32) -> RenderResult<()> {
        self.expect_state(PipelineState::Active, "update")?;

        for stage in &mut self.stages {
            stage.update(scene, slice_index)?;
        }

        Ok(())
    }

    /// Records every stage's commands, in order.
    ///
    /// Runs inside the frame loop's draw callback.
    ///
    /// # Errors
    ///
    /// Returns an error if no scene is registered or any stage fails.
    pub fn render(&mut self, cmd: &CommandBuffer, frame: &FrameContext) -> RenderResult<()> {
        self.expect_state(PipelineState::Active, "render")?;

        for stage in &mut self.stages {
            stage.render(cmd, frame)?;
        }

        Ok(())
    }

    /// Rebuilds extent-dependent resources on every stage, in order.
    ///
    /// Side transition: the pipeline stays Active.
    ///
    /// # Errors
    ///
    /// Returns an error if no scene is registered or any stage fails.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        self.expect_state(PipelineState::Active, "resize")?;

        for stage in &mut self.stages {
            debug!("Resizing stage {}", stage.name());
            stage.resize(extent)?;
        }

        Ok(())
    }

    /// Reloads shaders on every stage, in order.
    ///
    /// Side transition: the pipeline stays Active.
    ///
    /// # Errors
    ///
    /// Returns an error if no scene is registered or any stage fails.
    pub fn reload_shaders(&mut self, shaders: &dyn ShaderProvider) -> RenderResult<()> {
        self.expect_state(PipelineState::Active, "reload_shaders")?;

        for stage in &mut self.stages {
            debug!("Reloading shaders for stage {}", stage.name());
            stage.reload_shaders(shaders)?;
        }

        Ok(())
    }

    fn expect_state(&self, expected: PipelineState, operation: &str) -> RenderResult<()> {
        if self.state != expected {
            return Err(RenderError::Stage(format!(
                "{} requires {:?} state, pipeline is {:?}",
                operation, expected, self.state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    use hybrid_rhi::shader::{ShaderModule, ShaderRequest};
    use hybrid_rhi::RhiError;

    /// Provider stand-in for tests whose stages never load shaders.
    struct NoShaders;

    impl ShaderProvider for NoShaders {
        fn load(&self, request: &ShaderRequest) -> hybrid_rhi::RhiResult<ShaderModule> {
            Err(RhiError::ShaderError(format!(
                "no shader source for {:?} in tests",
                request.path
            )))
        }
    }

    struct RecordingStage {
        name: &'static str,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl RecordingStage {
        fn log_call(&self, call: &str) {
            self.log.borrow_mut().push(format!("{}:{}", self.name, call));
        }
    }

    impl RenderStage for RecordingStage {
        fn name(&self) -> &'static str {
            self.name
        }

        fn register_scene(
            &mut self,
            _scene: &SceneView,
            _shaders: &dyn ShaderProvider,
        ) -> RenderResult<()> {
            self.log_call("register");
            Ok(())
        }

        fn remove_scene(&mut self) -> RenderResult<()> {
            self.log_call("remove");
            Ok(())
        }

        fn update(&mut self, _scene: &SceneView, _slice_index: u32) -> RenderResult<()> {
            self.log_call("update");
            Ok(())
        }

        fn render(&mut self, _cmd: &CommandBuffer, _frame: &FrameContext) -> RenderResult<()> {
            self.log_call("render");
            Ok(())
        }

        fn resize(&mut self, _extent: vk::Extent2D) -> RenderResult<()> {
            self.log_call("resize");
            Ok(())
        }

        fn reload_shaders(&mut self, _shaders: &dyn ShaderProvider) -> RenderResult<()> {
            self.log_call("reload");
            Ok(())
        }
    }

    fn recording_pipeline() -> (StagePipeline, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let pipeline = StagePipeline::with_stages(vec![
            Box::new(RecordingStage {
                name: "gbuffer",
                log: log.clone(),
            }),
            Box::new(RecordingStage {
                name: "lighting",
                log: log.clone(),
            }),
            Box::new(RecordingStage {
                name: "post",
                log: log.clone(),
            }),
        ]);
        (pipeline, log)
    }

    #[test]
    fn test_lifecycle_calls_run_in_stage_order() {
        let (mut pipeline, log) = recording_pipeline();
        let scene = SceneView::default();

        pipeline.register_scene(&scene, &NoShaders).unwrap();
        pipeline.update(&scene, 0).unwrap();
        pipeline.remove_scene().unwrap();

        let calls = log.borrow();
        assert_eq!(
            *calls,
            vec![
                "gbuffer:register",
                "lighting:register",
                "post:register",
                "gbuffer:update",
                "lighting:update",
                "post:update",
                "gbuffer:remove",
                "lighting:remove",
                "post:remove",
            ]
        );
    }

    #[test]
    fn test_double_registration_rejected() {
        let (mut pipeline, _log) = recording_pipeline();
        let scene = SceneView::default();

        pipeline.register_scene(&scene, &NoShaders).unwrap();
        assert!(matches!(
            pipeline.register_scene(&scene, &NoShaders),
            Err(RenderError::Stage(_))
        ));
    }

    #[test]
    fn test_update_requires_registered_scene() {
        let (mut pipeline, _log) = recording_pipeline();
        let scene = SceneView::default();

        assert!(matches!(
            pipeline.update(&scene, 0),
            Err(RenderError::Stage(_))
        ));
    }

    #[test]
    fn test_remove_without_scene_rejected() {
        let (mut pipeline, _log) = recording_pipeline();

        assert!(matches!(
            pipeline.remove_scene(),
            Err(RenderError::Stage(_))
        ));
    }

    #[test]
    fn test_resize_is_side_transition() {
        let (mut pipeline, log) = recording_pipeline();
        let scene = SceneView::default();

        pipeline.register_scene(&scene, &NoShaders).unwrap();
        pipeline
            .resize(vk::Extent2D {
                width: 800,
                height: 600,
            })
            .unwrap();

        assert!(pipeline.is_active());
        assert!(log.borrow().contains(&"lighting:resize".to_string()));

        // Still usable after the side transition.
        pipeline.update(&scene, 1).unwrap();
    }

    #[test]
    fn test_push_rejected_while_active() {
        let (mut pipeline, log) = recording_pipeline();
        let scene = SceneView::default();

        pipeline.register_scene(&scene, &NoShaders).unwrap();

        let result = pipeline.push(Box::new(RecordingStage {
            name: "late",
            log: log.clone(),
        }));
        assert!(matches!(result, Err(RenderError::Stage(_))));
    }
}
