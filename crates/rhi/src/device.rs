//! Device context over bootstrap-provided Vulkan handles.
//!
//! This module wraps the logical device, queues and memory allocator that the
//! platform bootstrap hands over. The context performs no instance creation or
//! physical-device selection; it takes ownership of an already valid device
//! and becomes the single object every manager borrows to reach the GPU.
//!
//! # Overview
//!
//! The [`DeviceContext`] struct provides:
//! - Queue access for graphics, presentation, and compute submission
//! - Memory allocation via gpu-allocator
//! - Scoped one-shot command submission ([`DeviceContext::execute_one_time`])
//!
//! # Ownership
//!
//! The context owns the `ash::Device` and destroys it on drop. The
//! `ash::Instance` stays owned by the bootstrap; the context only keeps the
//! clone the allocator needs.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, info};

use crate::command::CommandBuffer;
use crate::error::{RhiError, RhiResult};

/// Queue family indices selected by the bootstrap.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamilyIndices {
    /// Graphics queue family.
    pub graphics: u32,
    /// Presentation queue family (may equal `graphics`).
    pub present: u32,
    /// Dedicated compute queue family, if one exists.
    pub compute: Option<u32>,
}

/// Handles produced by the device/instance bootstrap.
///
/// All handles must be valid; the context does not re-validate them.
pub struct DeviceHandles {
    /// Instance the device was created from (not owned; cloned for the
    /// allocator).
    pub instance: ash::Instance,
    /// Logical device. Ownership transfers to the context.
    pub device: ash::Device,
    /// Physical device the logical device was created on.
    pub physical_device: vk::PhysicalDevice,
    /// Graphics queue handle.
    pub graphics_queue: vk::Queue,
    /// Presentation queue handle.
    pub present_queue: vk::Queue,
    /// Compute queue handle, if a dedicated family exists.
    pub compute_queue: Option<vk::Queue>,
    /// Queue family indices the queues were retrieved from.
    pub queue_families: QueueFamilyIndices,
}

/// Vulkan device context shared by every manager.
///
/// # Thread Safety
///
/// The context is designed to be shared across threads using `Arc`. The
/// internal allocator and the one-shot command pool are protected by mutexes.
pub struct DeviceContext {
    /// Vulkan logical device handle (owned).
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// GPU memory allocator (thread-safe via Mutex).
    allocator: Mutex<Allocator>,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle.
    present_queue: vk::Queue,
    /// Compute queue handle (may be the same as graphics queue).
    compute_queue: Option<vk::Queue>,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
    /// Transient pool backing one-shot command submission.
    one_time_pool: Mutex<vk::CommandPool>,
}

impl DeviceContext {
    /// Wraps bootstrap-provided handles into a device context.
    ///
    /// Initializes the gpu-allocator and the transient command pool used for
    /// one-shot submissions.
    ///
    /// # Errors
    ///
    /// Returns an error if allocator or command pool creation fails.
    pub fn new(handles: DeviceHandles) -> RhiResult<Arc<Self>> {
        let DeviceHandles {
            instance,
            device,
            physical_device,
            graphics_queue,
            present_queue,
            compute_queue,
            queue_families,
        } = handles;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance,
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_families.graphics)
            .flags(
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                    | vk::CommandPoolCreateFlags::TRANSIENT,
            );

        let one_time_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        debug!(
            "One-shot command pool created for queue family {}",
            queue_families.graphics
        );

        info!("Device context created from bootstrap handles");

        Ok(Arc::new(Self {
            device,
            physical_device,
            allocator: Mutex::new(allocator),
            graphics_queue,
            present_queue,
            compute_queue,
            queue_families,
            one_time_pool: Mutex::new(one_time_pool),
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the compute queue handle.
    ///
    /// This may be `None` when no dedicated compute queue family exists;
    /// submission falls back to the graphics queue.
    #[inline]
    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.compute_queue
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Waits for the device to become idle.
    ///
    /// Blocks until all outstanding operations on all queues have completed.
    /// Required before resource teardown and before force-completing deferred
    /// destruction.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if provided) is not in use
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Submits command buffers to the compute queue.
    ///
    /// Falls back to the graphics queue if no dedicated compute queue is
    /// available.
    ///
    /// # Safety
    ///
    /// Same contract as [`DeviceContext::submit_graphics`].
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_compute(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let queue = self.compute_queue.unwrap_or(self.graphics_queue);
        unsafe {
            self.device.queue_submit(queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Records, submits and waits out a one-shot command buffer.
    ///
    /// The command buffer is allocated from the internal transient pool,
    /// recorded by `record`, submitted to the graphics queue and waited on
    /// with an internal fence. The buffer and fence are released on every
    /// exit path, including when `record` or any native call fails.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered while recording or submitting.
    pub fn execute_one_time<F>(self: &Arc<Self>, record: F) -> RhiResult<()>
    where
        F: FnOnce(&CommandBuffer) -> RhiResult<()>,
    {
        let pool = *self.one_time_pool.lock().unwrap();

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        let cmd = buffers[0];

        let fence_info = vk::FenceCreateInfo::default();
        let fence = match unsafe { self.device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                unsafe { self.device.free_command_buffers(pool, &buffers) };
                return Err(RhiError::VulkanError(e));
            }
        };

        let result = (|| {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { self.device.begin_command_buffer(cmd, &begin_info)? };

            record(&CommandBuffer::from_handle(self.clone(), cmd))?;

            unsafe { self.device.end_command_buffer(cmd)? };

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

            unsafe {
                self.device
                    .queue_submit(self.graphics_queue, &[submit_info], fence)?;
                self.device.wait_for_fences(&[fence], true, u64::MAX)?;
            }

            Ok(())
        })();

        unsafe {
            self.device.destroy_fence(fence, None);
            self.device.free_command_buffers(pool, &buffers);
        }

        result
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            // Wait for all operations to complete before cleanup
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }

            let pool = *self.one_time_pool.lock().unwrap();
            self.device.destroy_command_pool(pool, None);

            // Allocator is dropped automatically when the Mutex is dropped
            // and must be empty at this point (all allocations freed)

            self.device.destroy_device(None);
        }
        info!("Device context destroyed");
    }
}

// Safety: DeviceContext is Send+Sync because:
// - ash::Device is Send+Sync
// - vk::PhysicalDevice and vk::Queue are Copy handle types
// - Allocator and the one-shot pool are protected by mutexes
// - QueueFamilyIndices is Copy
unsafe impl Send for DeviceContext {}
unsafe impl Sync for DeviceContext {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_context_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DeviceContext>();
    }

    #[test]
    fn test_queue_family_indices_copy() {
        let families = QueueFamilyIndices {
            graphics: 0,
            present: 0,
            compute: Some(1),
        };
        let copied = families;
        assert_eq!(copied.graphics, 0);
        assert_eq!(copied.compute, Some(1));
    }
}
