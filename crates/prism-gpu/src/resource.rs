//! Device resource allocation and RAII ownership.
//!
//! The allocator hands out move-only `Managed*` handles. Each handle keeps a
//! reference to the allocator's shared state and releases its device resource
//! exactly once when dropped.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use std::ffi::CString;
use std::sync::Arc;

bitflags::bitflags! {
    /// Semantic buffer usage, translated to Vulkan usage flags internally.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const VERTEX = 1 << 0;
        const INDEX = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
        /// Host-to-device staging source.
        const STAGING_SRC = 1 << 4;
        /// Device-to-host readback target.
        const STAGING_DST = 1 << 5;
        const INDIRECT = 1 << 6;
        const TRANSFER_SRC = 1 << 7;
        const TRANSFER_DST = 1 << 8;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        BufferUsage::empty()
    }
}

bitflags::bitflags! {
    /// Semantic image usage, translated to Vulkan usage flags internally.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ImageUsage: u32 {
        const COLOR_RT = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const TRANSFER_SRC = 1 << 4;
        const TRANSFER_DST = 1 << 5;
        const INPUT_ATTACHMENT = 1 << 6;
    }
}

/// Where an allocation lives and which side may touch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// Device-only, fastest, never mapped.
    #[default]
    GpuOnly,
    /// Host writes, device reads (uploads). Persistently mapped.
    CpuToGpu,
    /// Device writes, host reads (readback). Persistently mapped.
    GpuToCpu,
}

impl MemoryMode {
    fn location(self) -> MemoryLocation {
        match self {
            MemoryMode::GpuOnly => MemoryLocation::GpuOnly,
            MemoryMode::CpuToGpu => MemoryLocation::CpuToGpu,
            MemoryMode::GpuToCpu => MemoryLocation::GpuToCpu,
        }
    }
}

/// Buffer creation parameters.
#[derive(Debug, Clone, Default)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: BufferUsage,
    pub memory: MemoryMode,
    pub debug_name: String,
}

/// Image creation parameters. The allocator also creates a default view.
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub usage: ImageUsage,
    pub memory: MemoryMode,
    pub tiling: vk::ImageTiling,
    pub image_type: vk::ImageType,
    pub flags: vk::ImageCreateFlags,
    pub debug_name: String,
}

impl Default for ImageDesc {
    fn default() -> Self {
        Self {
            width: 1,
            height: 1,
            depth: 1,
            mip_levels: 1,
            array_layers: 1,
            format: vk::Format::UNDEFINED,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: ImageUsage::COLOR_RT | ImageUsage::SAMPLED,
            memory: MemoryMode::GpuOnly,
            tiling: vk::ImageTiling::OPTIMAL,
            image_type: vk::ImageType::TYPE_2D,
            flags: vk::ImageCreateFlags::empty(),
            debug_name: String::new(),
        }
    }
}

fn to_vk_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::STAGING_SRC) || usage.contains(BufferUsage::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::STAGING_DST) || usage.contains(BufferUsage::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    flags
}

fn to_vk_image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::COLOR_RT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::INPUT_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
    }
    flags
}

pub(crate) struct AllocatorShared {
    device: ash::Device,
    allocator: Mutex<Option<Allocator>>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl AllocatorShared {
    fn set_debug_name<H: vk::Handle + Copy>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        // Naming failures are diagnostics-only.
        unsafe {
            let _ = debug_utils.set_debug_utils_object_name(&info);
        }
    }

    fn free_buffer(&self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        let mut guard = self.allocator.lock();
        if let (Some(allocator), Some(allocation)) = (guard.as_mut(), allocation) {
            if let Err(e) = allocator.free(allocation) {
                tracing::warn!("Failed to free buffer allocation: {e}");
            }
        }
        unsafe {
            self.device.destroy_buffer(buffer, None);
        }
    }

    fn free_image(&self, image: vk::Image, allocation: Option<Allocation>) {
        let mut guard = self.allocator.lock();
        if let (Some(allocator), Some(allocation)) = (guard.as_mut(), allocation) {
            if let Err(e) = allocator.free(allocation) {
                tracing::warn!("Failed to free image allocation: {e}");
            }
        }
        unsafe {
            self.device.destroy_image(image, None);
        }
    }

    fn free_image_view(&self, view: vk::ImageView) {
        unsafe {
            self.device.destroy_image_view(view, None);
        }
    }

    fn free_sampler(&self, sampler: vk::Sampler) {
        unsafe {
            self.device.destroy_sampler(sampler, None);
        }
    }
}

/// Device resource allocator.
///
/// Cheap to clone; all clones share the same underlying gpu-allocator
/// instance. Handles created from any clone stay valid until they are
/// dropped or `shutdown` is called.
#[derive(Clone)]
pub struct ResourceAllocator {
    shared: Arc<AllocatorShared>,
}

impl ResourceAllocator {
    /// Create a new allocator for the given device.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid, and the
    /// device must have been created from the physical device.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: ash::Device,
        physical_device: vk::PhysicalDevice,
        debug_utils: Option<ash::ext::debug_utils::Device>,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            shared: Arc::new(AllocatorShared {
                device,
                allocator: Mutex::new(Some(allocator)),
                debug_utils,
            }),
        })
    }

    /// Create a buffer with its backing allocation.
    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<ManagedBuffer> {
        if desc.size == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "buffer '{}' requested with zero size",
                desc.debug_name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(to_vk_buffer_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.shared.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.shared.device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut guard = self.shared.allocator.lock();
            let allocator = match guard.as_mut() {
                Some(a) => a,
                None => {
                    unsafe { self.shared.device.destroy_buffer(buffer, None) };
                    return Err(GpuError::NotInitialized("ResourceAllocator"));
                }
            };
            match allocator.allocate(&AllocationCreateDesc {
                name: &desc.debug_name,
                requirements,
                location: desc.memory.location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(a) => a,
                Err(e) => {
                    unsafe { self.shared.device.destroy_buffer(buffer, None) };
                    return Err(GpuError::AllocationFailed(e.to_string()));
                }
            }
        };

        unsafe {
            self.shared
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        if !desc.debug_name.is_empty() {
            self.shared.set_debug_name(buffer, &desc.debug_name);
        }

        Ok(ManagedBuffer {
            buffer,
            allocation: Some(allocation),
            size: desc.size,
            debug_name: desc.debug_name.clone(),
            owner: self.shared.clone(),
        })
    }

    /// Create an image together with a default view covering all mips and
    /// layers. The view type is inferred from the image type (cube when the
    /// cube-compatible flag is set).
    pub fn create_image(&self, desc: &ImageDesc, aspect_mask: vk::ImageAspectFlags) -> Result<ManagedImage> {
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "image '{}' requested with zero extent",
                desc.debug_name
            )));
        }

        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
        };

        let image_info = vk::ImageCreateInfo::default()
            .image_type(desc.image_type)
            .extent(extent)
            .mip_levels(desc.mip_levels)
            .array_layers(desc.array_layers)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(to_vk_image_usage(desc.usage))
            .samples(desc.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .flags(desc.flags);

        let image = unsafe { self.shared.device.create_image(&image_info, None)? };
        let requirements = unsafe { self.shared.device.get_image_memory_requirements(image) };

        let allocation = {
            let mut guard = self.shared.allocator.lock();
            let allocator = match guard.as_mut() {
                Some(a) => a,
                None => {
                    unsafe { self.shared.device.destroy_image(image, None) };
                    return Err(GpuError::NotInitialized("ResourceAllocator"));
                }
            };
            match allocator.allocate(&AllocationCreateDesc {
                name: &desc.debug_name,
                requirements,
                location: desc.memory.location(),
                linear: desc.tiling == vk::ImageTiling::LINEAR,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(a) => a,
                Err(e) => {
                    unsafe { self.shared.device.destroy_image(image, None) };
                    return Err(GpuError::AllocationFailed(e.to_string()));
                }
            }
        };

        unsafe {
            self.shared
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        let view_type = if desc.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE) {
            vk::ImageViewType::CUBE
        } else {
            match desc.image_type {
                vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
                vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
                _ => vk::ImageViewType::TYPE_2D,
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(view_type)
            .format(desc.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(desc.mip_levels)
                    .base_array_layer(0)
                    .layer_count(desc.array_layers),
            );

        let view = match unsafe { self.shared.device.create_image_view(&view_info, None) } {
            Ok(v) => v,
            Err(e) => {
                self.shared.free_image(image, Some(allocation));
                return Err(GpuError::Vulkan(e));
            }
        };

        if !desc.debug_name.is_empty() {
            self.shared.set_debug_name(image, &desc.debug_name);
            self.shared.set_debug_name(view, &desc.debug_name);
        }

        Ok(ManagedImage {
            image,
            view,
            allocation: Some(allocation),
            extent,
            format: desc.format,
            aspect_mask,
            mip_levels: desc.mip_levels,
            array_layers: desc.array_layers,
            debug_name: desc.debug_name.clone(),
            owner: self.shared.clone(),
        })
    }

    /// Create an additional view over an existing image (for example a single
    /// mip level). The returned handle owns only the view; dropping it leaves
    /// the underlying image alive.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_view(
        &self,
        image: &ManagedImage,
        aspect_mask: vk::ImageAspectFlags,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
        view_type: vk::ImageViewType,
        debug_name: &str,
    ) -> Result<ManagedImage> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(view_type)
            .format(image.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(base_mip_level)
                    .level_count(level_count)
                    .base_array_layer(base_array_layer)
                    .layer_count(layer_count),
            );

        let view = unsafe { self.shared.device.create_image_view(&view_info, None)? };

        if !debug_name.is_empty() {
            self.shared.set_debug_name(view, debug_name);
        }

        Ok(ManagedImage {
            image: image.image,
            view,
            allocation: None,
            extent: image.extent,
            format: image.format,
            aspect_mask,
            mip_levels: level_count,
            array_layers: layer_count,
            debug_name: debug_name.to_string(),
            owner: self.shared.clone(),
        })
    }

    /// Create a sampler. Anisotropic filtering is enabled when
    /// `max_anisotropy > 1.0`.
    pub fn create_sampler(
        &self,
        mag_filter: vk::Filter,
        min_filter: vk::Filter,
        mipmap_mode: vk::SamplerMipmapMode,
        address_mode: vk::SamplerAddressMode,
        max_anisotropy: f32,
        debug_name: &str,
    ) -> Result<ManagedSampler> {
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(mag_filter)
            .min_filter(min_filter)
            .mipmap_mode(mipmap_mode)
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .mip_lod_bias(0.0)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false);

        let sampler = unsafe { self.shared.device.create_sampler(&sampler_info, None)? };

        if !debug_name.is_empty() {
            self.shared.set_debug_name(sampler, debug_name);
        }

        Ok(ManagedSampler {
            sampler,
            debug_name: debug_name.to_string(),
            owner: self.shared.clone(),
        })
    }

    /// Release the underlying allocator, freeing all remaining device memory.
    ///
    /// Must be called (or the allocator dropped) before the device is
    /// destroyed. Handles dropped afterwards destroy their Vulkan objects but
    /// can no longer return memory to the allocator.
    pub fn shutdown(&self) {
        let mut guard = self.shared.allocator.lock();
        if let Some(allocator) = guard.take() {
            drop(allocator);
        }
    }
}

/// An owned device buffer. Move-only; the device resource is released when
/// the handle is dropped.
pub struct ManagedBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    debug_name: String,
    owner: Arc<AllocatorShared>,
}

impl ManagedBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// Host pointer for persistently mapped (CpuToGpu / GpuToCpu) buffers.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .map(|p| p.as_ptr() as *mut u8)
    }

    /// Write raw bytes at the given offset. The buffer must be host-visible.
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let ptr = self.mapped_ptr().ok_or_else(|| {
            GpuError::InvalidArgument(format!("buffer '{}' is not host-visible", self.debug_name))
        })?;

        let end = offset
            .checked_add(data.len() as vk::DeviceSize)
            .ok_or_else(|| GpuError::OutOfRange("write offset overflows".to_string()))?;
        if end > self.size {
            return Err(GpuError::OutOfRange(format!(
                "write of {} bytes at offset {offset} exceeds buffer size {}",
                data.len(),
                self.size
            )));
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }
}

impl Drop for ManagedBuffer {
    fn drop(&mut self) {
        if self.buffer != vk::Buffer::null() {
            self.owner.free_buffer(self.buffer, self.allocation.take());
            self.buffer = vk::Buffer::null();
        }
    }
}

/// An owned device image with its default view, or an alias view over
/// another image (in which case `allocation` is absent and only the view is
/// destroyed on drop).
pub struct ManagedImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent3D,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
    mip_levels: u32,
    array_layers: u32,
    debug_name: String,
    owner: Arc<AllocatorShared>,
}

impl ManagedImage {
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent3D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.aspect_mask
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn array_layers(&self) -> u32 {
        self.array_layers
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for ManagedImage {
    fn drop(&mut self) {
        if self.view != vk::ImageView::null() {
            self.owner.free_image_view(self.view);
            self.view = vk::ImageView::null();
        }
        if let Some(allocation) = self.allocation.take() {
            self.owner.free_image(self.image, Some(allocation));
        }
        self.image = vk::Image::null();
    }
}

/// An owned sampler.
pub struct ManagedSampler {
    sampler: vk::Sampler,
    debug_name: String,
    owner: Arc<AllocatorShared>,
}

impl ManagedSampler {
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }
}

impl Drop for ManagedSampler {
    fn drop(&mut self) {
        if self.sampler != vk::Sampler::null() {
            self.owner.free_sampler(self.sampler);
            self.sampler = vk::Sampler::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_usage_translation() {
        let flags = to_vk_buffer_usage(BufferUsage::VERTEX | BufferUsage::TRANSFER_DST);
        assert!(flags.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(flags.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(!flags.contains(vk::BufferUsageFlags::UNIFORM_BUFFER));
    }

    #[test]
    fn staging_flags_map_to_transfer() {
        assert_eq!(
            to_vk_buffer_usage(BufferUsage::STAGING_SRC),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            to_vk_buffer_usage(BufferUsage::STAGING_DST),
            vk::BufferUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn image_usage_translation() {
        let flags = to_vk_image_usage(ImageUsage::DEPTH_STENCIL | ImageUsage::SAMPLED);
        assert!(flags.contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT));
        assert!(flags.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(!flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn memory_mode_locations() {
        assert_eq!(MemoryMode::GpuOnly.location(), MemoryLocation::GpuOnly);
        assert_eq!(MemoryMode::CpuToGpu.location(), MemoryLocation::CpuToGpu);
        assert_eq!(MemoryMode::GpuToCpu.location(), MemoryLocation::GpuToCpu);
    }
}
