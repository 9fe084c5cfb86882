//! Swapchain wrapper over bootstrap-provided handles.
//!
//! The windowing bootstrap creates the surface and swapchain and selects
//! format, present mode and image count. This wrapper takes ownership of the
//! resulting handles and exposes only what the frame loop needs: image
//! acquisition, presentation and the extent/format/image accessors.
//!
//! On an out-of-date condition the frame loop surfaces
//! `DrawOutcome::SwapchainOutOfDate` and the bootstrap builds a replacement
//! wrapper via [`Swapchain::from_handles`].

use std::sync::Arc;

use ash::vk;
use tracing::info;

use crate::device::DeviceContext;

/// Handles produced by the swapchain bootstrap.
///
/// All handles must be valid; ownership transfers to the wrapper.
pub struct SwapchainHandles {
    /// Swapchain extension loader.
    pub loader: ash::khr::swapchain::Device,
    /// Swapchain handle.
    pub swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain itself).
    pub images: Vec<vk::Image>,
    /// Image views for the swapchain images.
    pub image_views: Vec<vk::ImageView>,
    /// Swapchain image format.
    pub format: vk::Format,
    /// Swapchain extent (resolution).
    pub extent: vk::Extent2D,
}

/// Vulkan swapchain wrapper.
///
/// # Thread Safety
///
/// The swapchain is not thread-safe. Only one thread should interact with
/// it at a time.
pub struct Swapchain {
    /// Reference to the device context.
    device: Arc<DeviceContext>,
    /// Swapchain extension loader.
    loader: ash::khr::swapchain::Device,
    /// Swapchain handle.
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain).
    images: Vec<vk::Image>,
    /// Image views for the swapchain images.
    image_views: Vec<vk::ImageView>,
    /// Swapchain image format.
    format: vk::Format,
    /// Swapchain extent (resolution).
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Wraps bootstrap-provided swapchain handles.
    ///
    /// The wrapper destroys the image views and the swapchain on drop.
    pub fn from_handles(device: Arc<DeviceContext>, handles: SwapchainHandles) -> Self {
        info!(
            "Swapchain wrapped: {}x{}, {:?}, {} images",
            handles.extent.width,
            handles.extent.height,
            handles.format,
            handles.images.len()
        );

        Self {
            device,
            loader: handles.loader,
            swapchain: handles.swapchain,
            images: handles.images,
            image_views: handles.image_views,
            format: handles.format,
            extent: handles.extent,
        }
    }

    /// Acquires the next swapchain image for rendering.
    ///
    /// May suspend on the underlying driver primitive until an image becomes
    /// available.
    ///
    /// # Returns
    ///
    /// `(image_index, suboptimal)` on success.
    ///
    /// # Errors
    ///
    /// `vk::Result::ERROR_OUT_OF_DATE_KHR` when the swapchain must be
    /// rebuilt; any other error is a fatal driver condition.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Presents the rendered image to the screen.
    ///
    /// # Returns
    ///
    /// `true` if the swapchain is suboptimal and should be rebuilt.
    ///
    /// # Errors
    ///
    /// `vk::Result::ERROR_OUT_OF_DATE_KHR` when the swapchain must be
    /// rebuilt; any other error is a fatal driver condition.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the swapchain image at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// Returns the image view at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    /// Returns all image views.
    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.handle().destroy_image_view(image_view, None);
            }
        }

        // Images are destroyed together with the swapchain
        unsafe {
            self.loader.destroy_swapchain(self.swapchain, None);
        }

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}
