//! Descriptor set layouts and pools.
//!
//! This module provides the raw descriptor building blocks:
//! - [`DescriptorSetLayout`] defines the layout of shader bindings
//! - [`DescriptorPool`] manages allocation of descriptor sets
//! - [`DescriptorBindingBuilder`] constructs common layout bindings
//!
//! Allocation policy (which sets exist per frame slot, when staged writes are
//! flushed) lives above this module in the render crate's slot provider;
//! everything here maps one-to-one onto native calls.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::RhiResult;

/// Descriptor set layout wrapper.
///
/// A descriptor set layout defines the structure of resources that can be
/// bound to a shader: binding points, descriptor types, and the shader
/// stages that access each resource.
///
/// # Thread Safety
///
/// Immutable after creation; can be shared between threads behind `Arc`.
pub struct DescriptorSetLayout {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Vulkan descriptor set layout handle.
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a new descriptor set layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan descriptor set layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// Descriptor pool for allocating descriptor sets.
///
/// Created with the `FREE_DESCRIPTOR_SET` flag so that individual sets can
/// be returned to the pool when a slot provider re-allocates on resize.
///
/// # Thread Safety
///
/// Descriptor pool operations are not thread-safe. Synchronize access
/// externally when sharing between threads.
pub struct DescriptorPool {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Vulkan descriptor pool handle.
    pool: vk::DescriptorPool,
    /// Maximum number of sets that can be allocated.
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<DeviceContext>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one descriptor set per given layout.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation fails (e.g., pool exhausted).
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        debug!("Allocated {} descriptor set(s)", sets.len());

        Ok(sets)
    }

    /// Frees descriptor sets back to the pool.
    ///
    /// The caller must ensure the descriptor sets are not in use by the GPU.
    ///
    /// # Errors
    ///
    /// Returns an error if freeing fails.
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> RhiResult<()> {
        if sets.is_empty() {
            return Ok(());
        }

        unsafe {
            self.device.handle().free_descriptor_sets(self.pool, sets)?;
        }

        debug!("Freed {} descriptor set(s)", sets.len());

        Ok(())
    }

    /// Returns the Vulkan descriptor pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Returns the maximum number of sets that can be allocated.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Updates descriptor sets with resource bindings.
///
/// Applies all writes in a single native call; the slot provider batches its
/// staged writes into one invocation of this function.
pub fn update_descriptor_sets(device: &DeviceContext, writes: &[vk::WriteDescriptorSet]) {
    if writes.is_empty() {
        return;
    }

    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }

    debug!("Updated {} descriptor write(s)", writes.len());
}

/// Builder for creating descriptor set layout bindings.
///
/// # Example
///
/// ```no_run
/// use ash::vk;
/// use hybrid_rhi::descriptor::DescriptorBindingBuilder;
///
/// let bindings = [
///     DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::COMPUTE),
///     DescriptorBindingBuilder::storage_image(1, vk::ShaderStageFlags::COMPUTE),
/// ];
/// ```
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    /// Creates a uniform buffer binding.
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// Creates a storage buffer binding.
    #[inline]
    pub fn storage_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// Creates a combined image sampler binding.
    #[inline]
    pub fn combined_image_sampler(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// Creates a storage image binding.
    #[inline]
    pub fn storage_image(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// Creates an acceleration structure binding.
    #[inline]
    pub fn acceleration_structure(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_binding_builder_uniform_buffer() {
        let binding = DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX);
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_descriptor_binding_builder_storage_image() {
        let binding = DescriptorBindingBuilder::storage_image(2, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(binding.binding, 2);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
    }

    #[test]
    fn test_descriptor_binding_builder_acceleration_structure() {
        let binding = DescriptorBindingBuilder::acceleration_structure(
            3,
            vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::COMPUTE,
        );
        assert_eq!(binding.binding, 3);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
        assert!(binding.stage_flags.contains(vk::ShaderStageFlags::COMPUTE));
    }
}
