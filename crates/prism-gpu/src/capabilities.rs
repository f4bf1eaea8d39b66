//! GPU capability detection.

use ash::vk;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Capabilities the engine cares about, captured once at context creation.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    pub driver_version: u32,
    /// Whether the device supports anisotropic sampler filtering.
    pub sampler_anisotropy: bool,
    /// Hardware limit for sampler anisotropy.
    pub max_sampler_anisotropy: f32,
    /// Device-local memory in MB.
    pub device_local_memory_mb: u64,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            device_local_memory_mb,
        }
    }

    /// Vulkan 1.3 is required for dynamic rendering and synchronization2.
    pub fn meets_requirements(&self) -> bool {
        let major = vk::api_version_major(self.api_version);
        let minor = vk::api_version_minor(self.api_version);
        major > 1 || (major == 1 && minor >= 3)
    }

    /// Human-readable one-line summary.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn requirements_need_vulkan_1_3() {
        let caps = GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            api_version: vk::make_api_version(0, 1, 2, 0),
            driver_version: 0,
            sampler_anisotropy: true,
            max_sampler_anisotropy: 16.0,
            device_local_memory_mb: 4096,
        };
        assert!(!caps.meets_requirements());

        let caps = GpuCapabilities {
            api_version: vk::API_VERSION_1_3,
            ..caps
        };
        assert!(caps.meets_requirements());
    }
}
