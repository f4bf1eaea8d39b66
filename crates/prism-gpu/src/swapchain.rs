//! Swapchain management.

use crate::error::{GpuError, Result};
use ash::vk;

/// Swapchain wrapper: images, views, format, and extent.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn new(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        surface_capabilities: &vk::SurfaceCapabilitiesKHR,
        surface_format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
        old_swapchain: Option<vk::SwapchainKHR>,
        graphics_queue_family: u32,
    ) -> Result<Self> {
        // One image beyond the minimum avoids stalling on the driver; a max
        // of zero means the surface imposes no upper bound.
        let mut image_count = surface_capabilities.min_image_count + 1;
        if surface_capabilities.max_image_count > 0 {
            image_count = image_count.min(surface_capabilities.max_image_count);
        }

        let queue_families = [graphics_queue_family];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(surface_capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        let image_views: Vec<_> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device.create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: surface_format.format,
            extent,
        })
    }

    /// Acquire the next image. Returns the image index and whether the
    /// swapchain is suboptimal. OUT_OF_DATE surfaces as an error; the caller
    /// must recreate the swapchain.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let acquired = swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        )?;
        Ok(acquired)
    }

    /// Present an image. Returns whether the swapchain should be recreated
    /// (suboptimal or out of date).
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match swapchain_loader.queue_present(queue, &present_info) {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain and its image views.
    ///
    /// # Safety
    /// All handles must be valid and the swapchain must not be in use.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

/// Rank of a surface format: sRGB presentation formats first, BGRA before
/// RGBA (the common native swapchain order), everything else last.
fn surface_format_rank(format: &vk::SurfaceFormatKHR) -> u32 {
    if format.color_space != vk::ColorSpaceKHR::SRGB_NONLINEAR {
        return 4;
    }
    match format.format {
        vk::Format::B8G8R8A8_SRGB => 0,
        vk::Format::R8G8B8A8_SRGB => 1,
        vk::Format::B8G8R8A8_UNORM | vk::Format::R8G8B8A8_UNORM => 2,
        _ => 3,
    }
}

/// Pick the best-ranked surface format the surface offers.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    available
        .iter()
        .min_by_key(|format| surface_format_rank(format))
        .copied()
        .unwrap_or(vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        })
}

/// Pick a present mode: FIFO when vsync is requested, otherwise the first
/// available low-latency mode. FIFO is the guaranteed fallback either way.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let preferred: &[vk::PresentModeKHR] = if vsync {
        &[vk::PresentModeKHR::FIFO]
    } else {
        &[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
    };

    preferred
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Resolve the swapchain extent. A current extent of `u32::MAX` means the
/// surface leaves the size to the application, clamped to its limits.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: desired_width.clamp(min.width, max.width),
        height: desired_height.clamp(min.height, max.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_ranking_prefers_bgra_srgb() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(select_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);

        // An sRGB variant beats a UNORM one even when listed later.
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(select_surface_format(&formats).format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn present_mode_follows_vsync_preference() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);

        // Without mailbox/immediate, uncapped rendering still lands on FIFO.
        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&fifo_only, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_clamps_to_surface_limits() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 4096, 16);
        assert_eq!(extent.width, 2048);
        assert_eq!(extent.height, 64);
    }
}
