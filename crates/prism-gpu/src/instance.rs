//! Vulkan instance creation and device selection.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// Required instance extensions for windowed rendering.
pub fn required_instance_extensions(enable_debug_utils: bool) -> Vec<&'static CStr> {
    let mut extensions = vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];
    if enable_debug_utils {
        extensions.push(ash::ext::debug_utils::NAME);
    }
    extensions
}

/// Create a Vulkan instance.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidArgument("application name contains NUL".to_string()))?;
    let engine_name = c"Prism";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_3);

    let extension_names: Vec<*const i8> = required_instance_extensions(enable_validation)
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let layers: Vec<&CStr> = if enable_validation {
        vec![c"VK_LAYER_KHRONOS_validation"]
    } else {
        Vec::new()
    };

    // Warn for missing layers instead of failing; the driver ignores unknown
    // layers only if we drop them here.
    let available_layers = entry.enumerate_instance_layer_properties()?;
    let layers: Vec<&CStr> = layers
        .into_iter()
        .filter(|layer| {
            let found = available_layers.iter().any(|props| {
                CStr::from_ptr(props.layer_name.as_ptr()) == *layer
            });
            if !found {
                tracing::warn!("Validation layer {:?} not available", layer);
            }
            found
        })
        .collect();
    let layer_names: Vec<*const i8> = layers.iter().map(|l| l.as_ptr()).collect();

    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry.create_instance(&create_info, None)?;
    Ok(instance)
}

/// Select the best physical device.
///
/// Each candidate is reduced to its [`GpuCapabilities`] snapshot; devices
/// that fail the engine's baseline (Vulkan 1.3) are filtered out and the
/// survivors compete on device class, then device-local memory.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = instance.enumerate_physical_devices()?;

    devices
        .into_iter()
        .filter_map(|device| {
            let capabilities = GpuCapabilities::query(instance, device);
            if !capabilities.meets_requirements() {
                return None;
            }

            let class_weight: u64 =
                match instance.get_physical_device_properties(device).device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
                    _ => 0,
                };
            let memory_weight = capabilities.device_local_memory_mb / 1024;

            Some((device, class_weight + memory_weight))
        })
        .max_by_key(|&(_, weight)| weight)
        .map(|(device, _)| device)
        .ok_or(GpuError::NoSuitableDevice)
}
