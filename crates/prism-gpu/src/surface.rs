//! Surface management for windowed rendering.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::{calculate_extent, select_present_mode, select_surface_format, Swapchain};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Surface context for windowed rendering.
///
/// Owns the Vulkan surface and the extension loaders needed to create and
/// present swapchains for one window.
pub struct SurfaceContext {
    /// The Vulkan surface handle.
    pub surface: vk::SurfaceKHR,
    /// Surface extension loader.
    pub surface_loader: ash::khr::surface::Instance,
    /// Swapchain extension loader.
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Create a surface for a window and verify the context's present queue
    /// can present to it.
    ///
    /// # Safety
    /// The GPU context must be valid and the window must have valid handles.
    pub unsafe fn from_window<W>(gpu: &GpuContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("failed to get display handle: {e}")))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("failed to get window handle: {e}")))?
            .as_raw();

        let surface =
            ash_window::create_surface(gpu.entry(), gpu.instance(), display, window_handle, None)
                .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(gpu.entry(), gpu.instance());
        let swapchain_loader = ash::khr::swapchain::Device::new(gpu.instance(), gpu.device());

        let present_supported = surface_loader
            .get_physical_device_surface_support(
                gpu.physical_device(),
                gpu.graphics_queue_family(),
                surface,
            )
            .unwrap_or(false);
        if !present_supported {
            surface_loader.destroy_surface(surface, None);
            return Err(GpuError::SurfaceCreation(
                "graphics queue family cannot present to this surface".to_string(),
            ));
        }

        Ok(Self {
            surface,
            surface_loader,
            swapchain_loader,
        })
    }

    /// Query surface capabilities, formats, and present modes.
    pub fn capabilities(&self, gpu: &GpuContext) -> Result<SurfaceCapabilities> {
        let physical_device = gpu.physical_device();
        unsafe {
            Ok(SurfaceCapabilities {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(physical_device, self.surface)?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)?,
            })
        }
    }

    /// Create a swapchain for this surface.
    ///
    /// # Safety
    /// The GPU context must be valid.
    pub unsafe fn create_swapchain(
        &self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
        vsync: bool,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Swapchain> {
        let caps = self.capabilities(gpu)?;

        Swapchain::new(
            gpu.device(),
            &self.swapchain_loader,
            self.surface,
            &caps.capabilities,
            select_surface_format(&caps.formats),
            select_present_mode(&caps.present_modes, vsync),
            calculate_extent(&caps.capabilities, width, height),
            old_swapchain,
            gpu.graphics_queue_family(),
        )
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// The surface must not be in use.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}
