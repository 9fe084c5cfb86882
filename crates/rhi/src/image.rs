//! GPU image management for render targets and storage images.
//!
//! This module creates 2D images with GPU-only memory and an associated
//! image view. Render stages own their attachment images through this type
//! and recreate them on resize.
//!
//! # Overview
//!
//! - [`ImageUsage`] defines how an image will be consumed (color attachment,
//!   depth attachment, storage)
//! - [`Image`] wraps a VkImage, its memory allocation and a full-subresource
//!   VkImageView

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::debug;

use crate::device::DeviceContext;
use crate::error::{RhiError, RhiResult};

/// Image usage type.
///
/// Attachment images are also created with SAMPLED usage so a later stage
/// can read them; storage images additionally allow transfer so they can be
/// cleared or copied out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageUsage {
    /// Color render target, readable by later stages.
    ColorAttachment,
    /// Depth render target, readable by later stages.
    DepthAttachment,
    /// Storage image written by compute or ray-tracing work.
    Storage,
}

impl ImageUsage {
    /// Converts to Vulkan image usage flags.
    pub fn to_vk_usage(self) -> vk::ImageUsageFlags {
        match self {
            ImageUsage::ColorAttachment => {
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            ImageUsage::DepthAttachment => {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            ImageUsage::Storage => {
                vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST
            }
        }
    }

    /// Returns the aspect mask matching this usage.
    pub fn aspect_mask(self) -> vk::ImageAspectFlags {
        match self {
            ImageUsage::DepthAttachment => vk::ImageAspectFlags::DEPTH,
            _ => vk::ImageAspectFlags::COLOR,
        }
    }

    /// Returns a human-readable name for the image type.
    pub fn name(self) -> &'static str {
        match self {
            ImageUsage::ColorAttachment => "color attachment",
            ImageUsage::DepthAttachment => "depth attachment",
            ImageUsage::Storage => "storage",
        }
    }
}

/// GPU image with managed memory and a default view.
///
/// # Resource Destruction
///
/// Resources are destroyed in the following order:
/// 1. Image view
/// 2. Memory allocation
/// 3. Image
pub struct Image {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Vulkan image handle.
    image: vk::Image,
    /// Vulkan image view handle.
    image_view: vk::ImageView,
    /// GPU memory allocation.
    allocation: Option<Allocation>,
    /// Image format.
    format: vk::Format,
    /// Image dimensions.
    extent: vk::Extent2D,
    /// Image usage type.
    usage: ImageUsage,
}

impl Image {
    /// Creates a new 2D image with the specified dimensions and format.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Either dimension is zero
    /// - Image creation, memory allocation or view creation fails
    pub fn new(
        device: Arc<DeviceContext>,
        usage: ImageUsage,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "Image dimensions must be greater than 0".to_string(),
            ));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = {
            let mut allocator = device.allocator().lock().unwrap();
            allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })?
        };

        unsafe {
            device
                .handle()
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(Self::subresource_range_for(usage));

        let image_view = unsafe { device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} image: {}x{} {:?}",
            usage.name(),
            extent.width,
            extent.height,
            format
        );

        Ok(Self {
            device,
            image,
            image_view,
            allocation: Some(allocation),
            format,
            extent,
            usage,
        })
    }

    /// Returns the full subresource range for an image of the given usage.
    pub fn subresource_range_for(usage: ImageUsage) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange::default()
            .aspect_mask(usage.aspect_mask())
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the image view handle.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the image dimensions.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the image usage type.
    #[inline]
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    /// Returns this image's full subresource range.
    #[inline]
    pub fn subresource_range(&self) -> vk::ImageSubresourceRange {
        Self::subresource_range_for(self.usage)
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_image_view(self.image_view, None);
        }

        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self.device.allocator().lock().unwrap();
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free image allocation: {:?}", e);
            }
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }

        debug!("Destroyed {} image", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_usage_to_vk_usage() {
        assert!(
            ImageUsage::ColorAttachment
                .to_vk_usage()
                .contains(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        );
        assert!(
            ImageUsage::DepthAttachment
                .to_vk_usage()
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );
        assert!(
            ImageUsage::Storage
                .to_vk_usage()
                .contains(vk::ImageUsageFlags::STORAGE)
        );
    }

    #[test]
    fn test_image_usage_aspect_mask() {
        assert_eq!(
            ImageUsage::ColorAttachment.aspect_mask(),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            ImageUsage::DepthAttachment.aspect_mask(),
            vk::ImageAspectFlags::DEPTH
        );
    }

    #[test]
    fn test_subresource_range_covers_single_mip_and_layer() {
        let range = Image::subresource_range_for(ImageUsage::Storage);
        assert_eq!(range.base_mip_level, 0);
        assert_eq!(range.level_count, 1);
        assert_eq!(range.base_array_layer, 0);
        assert_eq!(range.layer_count, 1);
    }
}
