//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::resource::ResourceAllocator;
use ash::vk;

/// Main GPU context: instance, device, queues, and the resource allocator.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    capabilities: GpuCapabilities,
    allocator: ResourceAllocator,

    graphics_queue_family: u32,
    compute_queue_family: u32,
    transfer_queue_family: u32,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    transfer_queue: vk::Queue,
}

impl GpuContext {
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Presentation happens on the graphics queue; surface support is
    /// verified when the surface context is created.
    pub fn present_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub fn compute_queue_family(&self) -> u32 {
        self.compute_queue_family
    }

    pub fn transfer_queue_family(&self) -> u32 {
        self.transfer_queue_family
    }

    /// Whether sampled images of `format` support linear-filtered blits.
    pub fn supports_linear_blit(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Free all device memory before the device goes away.
            self.allocator.shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Prism".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        let entry = match unsafe { ash::Entry::load() } {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!("Failed to load Vulkan: {e}");
                return Err(GpuError::NotInitialized("Vulkan loader"));
            }
        };

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        // Selection already filters on the engine baseline (Vulkan 1.3).
        let physical_device = match unsafe { select_physical_device(&instance) } {
            Ok(device) => device,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let queue_families = unsafe { find_queue_families(&instance, physical_device) }?;
        let device =
            unsafe { create_device(&instance, physical_device, &queue_families, &capabilities)? };
        let [graphics_queue, compute_queue, transfer_queue] = unsafe {
            [
                device.get_device_queue(queue_families.graphics, 0),
                device.get_device_queue(queue_families.compute, 0),
                device.get_device_queue(queue_families.transfer, 0),
            ]
        };

        let debug_utils = self
            .enable_validation
            .then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        let allocator = unsafe {
            ResourceAllocator::new(&instance, device.clone(), physical_device, debug_utils)?
        };

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator,
            graphics_queue_family: queue_families.graphics,
            compute_queue_family: queue_families.compute,
            transfer_queue_family: queue_families.transfer,
            graphics_queue,
            compute_queue,
            transfer_queue,
        })
    }
}

/// Queue family indices.
struct QueueFamilyIndices {
    graphics: u32,
    compute: u32,
    transfer: u32,
}

/// Solve the queue family assignment. Compute and transfer each prefer a
/// dedicated family (one without the heavier capabilities) so async work
/// stays off the graphics queue; anything missing falls back down the
/// chain graphics → compute → transfer.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_families(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<QueueFamilyIndices> {
    let families = instance.get_physical_device_queue_family_properties(physical_device);

    let first_matching = |required: vk::QueueFlags, rejected: vk::QueueFlags| {
        families
            .iter()
            .position(|family| {
                family.queue_flags.contains(required) && !family.queue_flags.intersects(rejected)
            })
            .map(|index| index as u32)
    };

    let graphics = first_matching(vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty())
        .ok_or(GpuError::NoSuitableDevice)?;
    let compute =
        first_matching(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);
    let transfer = first_matching(
        vk::QueueFlags::TRANSFER,
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
    )
    .unwrap_or(compute);

    Ok(QueueFamilyIndices {
        graphics,
        compute,
        transfer,
    })
}

/// Create the logical device with the engine baseline enabled: dynamic
/// rendering and synchronization2 (Vulkan 1.3 core) plus sampler anisotropy
/// when the hardware has it.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: &QueueFamilyIndices,
    capabilities: &GpuCapabilities,
) -> Result<ash::Device> {
    let mut unique_families = vec![
        queue_families.graphics,
        queue_families.compute,
        queue_families.transfer,
    ];
    unique_families.sort_unstable();
    unique_families.dedup();

    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names = [ash::khr::swapchain::NAME.as_ptr()];

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(
            vk::PhysicalDeviceFeatures::default()
                .sampler_anisotropy(capabilities.sampler_anisotropy),
        )
        .push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)
}
