//! Shader module handles and binding reflection.
//!
//! Shader compilation is an external collaborator concern. The core requests
//! a module by stage, source path and preprocessor defines
//! ([`ShaderRequest`]) and receives back a compiled `vk::ShaderModule` plus
//! a [`ShaderReflection`] describing the descriptor bindings the module
//! expects. Render stages validate their descriptor layouts against the
//! reflection when shaders are (re)loaded.

use std::ffi::CString;
use std::path::PathBuf;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult};

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
    /// Compute shader stage - general-purpose GPU computation
    Compute,
    /// Ray generation shader stage
    RayGen,
    /// Ray miss shader stage
    Miss,
    /// Ray closest-hit shader stage
    ClosestHit,
}

impl ShaderStage {
    /// Converts the shader stage to Vulkan shader stage flags.
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::RayGen => vk::ShaderStageFlags::RAYGEN_KHR,
            ShaderStage::Miss => vk::ShaderStageFlags::MISS_KHR,
            ShaderStage::ClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        }
    }

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "compute",
            ShaderStage::RayGen => "ray generation",
            ShaderStage::Miss => "ray miss",
            ShaderStage::ClosestHit => "ray closest-hit",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A request for a compiled shader module, addressed to the collaborator's
/// shader compiler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderRequest {
    /// Stage the module will be used in.
    pub stage: ShaderStage,
    /// Source path, relative to the collaborator's shader root.
    pub path: PathBuf,
    /// Preprocessor defines as (name, value) pairs.
    pub defines: Vec<(String, String)>,
}

impl ShaderRequest {
    /// Creates a request without preprocessor defines.
    pub fn new(stage: ShaderStage, path: impl Into<PathBuf>) -> Self {
        Self {
            stage,
            path: path.into(),
            defines: Vec::new(),
        }
    }

    /// Adds a preprocessor define.
    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }
}

/// One descriptor binding a shader module expects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReflectedBinding {
    /// Descriptor set index.
    pub set: u32,
    /// Binding index within the set.
    pub binding: u32,
    /// Descriptor type at this binding.
    pub descriptor_type: vk::DescriptorType,
    /// Array element count.
    pub count: u32,
    /// Binding name from the shader source.
    pub name: String,
}

/// Descriptor bindings reflected from a compiled shader module.
#[derive(Clone, Debug, Default)]
pub struct ShaderReflection {
    /// All reflected bindings, in (set, binding) order.
    pub bindings: Vec<ReflectedBinding>,
}

impl ShaderReflection {
    /// Looks up a binding by its source-level name.
    pub fn binding(&self, name: &str) -> Option<&ReflectedBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Returns the number of distinct descriptor sets the module uses.
    pub fn set_count(&self) -> u32 {
        self.bindings
            .iter()
            .map(|b| b.set + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Compiled shader module handle with its reflection.
///
/// # Thread Safety
///
/// Immutable after creation; safe to share between threads.
pub struct ShaderModule {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Vulkan shader module handle.
    module: vk::ShaderModule,
    /// Shader stage type.
    stage: ShaderStage,
    /// Entry point function name.
    entry_point: CString,
    /// Descriptor bindings the module expects.
    reflection: ShaderReflection,
}

impl ShaderModule {
    /// Wraps a compiled module handle produced by the collaborator's
    /// compiler.
    ///
    /// Ownership of the handle transfers; the module is destroyed on drop.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is null or the entry point name
    /// contains null bytes.
    pub fn from_compiled(
        device: Arc<DeviceContext>,
        module: vk::ShaderModule,
        stage: ShaderStage,
        entry_point: &str,
        reflection: ShaderReflection,
    ) -> RhiResult<Self> {
        if module == vk::ShaderModule::null() {
            return Err(RhiError::ShaderError(
                "Compiled shader module handle is null".to_string(),
            ));
        }

        let entry_point = CString::new(entry_point)
            .map_err(|e| RhiError::ShaderError(format!("Invalid entry point name: {}", e)))?;

        debug!(
            "Wrapped {} shader module with {} reflected binding(s)",
            stage,
            reflection.bindings.len()
        );

        Ok(Self {
            device,
            module,
            stage,
            entry_point,
            reflection,
        })
    }

    /// Returns the Vulkan shader module handle.
    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    /// Returns the shader stage.
    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Returns the entry point function name.
    #[inline]
    pub fn entry_point(&self) -> &std::ffi::CStr {
        &self.entry_point
    }

    /// Returns the reflected descriptor bindings.
    #[inline]
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// Creates a pipeline shader stage create info structure.
    ///
    /// The returned structure borrows from this module and must not outlive
    /// it.
    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

/// Collaborator-implemented shader source: compiles a request into a module
/// plus reflection.
pub trait ShaderProvider {
    /// Compiles (or fetches from cache) the requested shader module.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be found or compiled.
    fn load(&self, request: &ShaderRequest) -> RhiResult<ShaderModule>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Compute.to_vk_stage(),
            vk::ShaderStageFlags::COMPUTE
        );
        assert_eq!(
            ShaderStage::RayGen.to_vk_stage(),
            vk::ShaderStageFlags::RAYGEN_KHR
        );
        assert_eq!(
            ShaderStage::ClosestHit.to_vk_stage(),
            vk::ShaderStageFlags::CLOSEST_HIT_KHR
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
        assert_eq!(format!("{}", ShaderStage::Miss), "ray miss");
    }

    #[test]
    fn test_shader_request_defines() {
        let request = ShaderRequest::new(ShaderStage::Compute, "hybrid/lighting.comp")
            .with_define("LIGHT_COUNT", "4")
            .with_define("RAY_TRACING_ENABLED", "1");

        assert_eq!(request.defines.len(), 2);
        assert_eq!(request.defines[0].0, "LIGHT_COUNT");
        assert_eq!(request.path, PathBuf::from("hybrid/lighting.comp"));
    }

    #[test]
    fn test_reflection_binding_lookup() {
        let reflection = ShaderReflection {
            bindings: vec![
                ReflectedBinding {
                    set: 0,
                    binding: 0,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    count: 1,
                    name: "frame".to_string(),
                },
                ReflectedBinding {
                    set: 1,
                    binding: 0,
                    descriptor_type: vk::DescriptorType::STORAGE_IMAGE,
                    count: 1,
                    name: "renderTarget".to_string(),
                },
            ],
        };

        assert_eq!(reflection.binding("frame").unwrap().set, 0);
        assert_eq!(
            reflection.binding("renderTarget").unwrap().descriptor_type,
            vk::DescriptorType::STORAGE_IMAGE
        );
        assert!(reflection.binding("missing").is_none());
        assert_eq!(reflection.set_count(), 2);
    }

    #[test]
    fn test_empty_reflection_set_count() {
        assert_eq!(ShaderReflection::default().set_count(), 0);
    }
}
