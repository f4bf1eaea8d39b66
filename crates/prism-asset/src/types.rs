//! Asset data types shared across loaders and the renderer.

use crate::error::{AssetError, Result};
use ash::vk;
use glam::{Vec2, Vec3, Vec4};
use std::sync::Arc;

/// Standard vertex layout used by every mesh pipeline.
///
/// Members are ordered by size for tight packing; shader locations are
/// color → 0, position → 1, normal → 2, texCoord → 3.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub color: [f32; 4],
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, tex_coord: Vec2, color: Vec4) -> Self {
        Self {
            color: color.to_array(),
            position: position.to_array(),
            normal: normal.to_array(),
            tex_coord: tex_coord.to_array(),
        }
    }

    /// Vertex buffer binding at index 0.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Vertex>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    /// The four fixed vertex attributes.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        [
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(0)
                .format(vk::Format::R32G32B32A32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, color) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(1)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, position) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(2)
                .format(vk::Format::R32G32B32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, normal) as u32),
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(3)
                .format(vk::Format::R32G32_SFLOAT)
                .offset(std::mem::offset_of!(Vertex, tex_coord) as u32),
        ]
    }
}

/// CPU-side mesh: a vertex array plus triangle-list indices.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub debug_name: String,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty()
    }
}

/// CPU-side texture payload.
///
/// For HDR sources `pixels` carries f32 data reinterpreted as bytes and
/// `is_hdr` is set; the consumer picks the matching Vulkan format.
#[derive(Debug, Clone, Default)]
pub struct TextureData {
    pub debug_name: String,
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub is_hdr: bool,
}

impl TextureData {
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_valid(&self) -> bool {
        !self.pixels.is_empty() && self.width > 0 && self.height > 0
    }
}

/// Alpha handling for materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlphaMode {
    /// Alpha is ignored.
    #[default]
    Opaque,
    /// Alpha test against a cutoff.
    Mask,
    /// Alpha blending.
    Blend,
}

/// Owned Vulkan shader module. Move-only; destroyed on drop.
pub struct ShaderModule {
    device: ash::Device,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    /// Create a module from SPIR-V words.
    pub fn new(device: &ash::Device, spirv: &[u32], stage: vk::ShaderStageFlags) -> Result<Self> {
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(|e| AssetError::Gpu(e.into()))?
        };
        Ok(Self {
            device: device.clone(),
            module,
            stage,
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        if self.module != vk::ShaderModule::null() {
            unsafe {
                self.device.destroy_shader_module(self.module, None);
            }
            self.module = vk::ShaderModule::null();
        }
    }
}

/// A linked set of shader stages. Modules are shared because the same module
/// may appear in several programs.
#[derive(Clone, Default)]
pub struct ShaderProgram {
    pub vertex: Option<Arc<ShaderModule>>,
    pub fragment: Option<Arc<ShaderModule>>,
    pub compute: Option<Arc<ShaderModule>>,
}

impl ShaderProgram {
    pub fn is_valid(&self) -> bool {
        self.vertex.is_some() || self.fragment.is_some() || self.compute.is_some()
    }

    pub fn has_compute(&self) -> bool {
        self.compute.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
    }

    #[test]
    fn vertex_attribute_locations() {
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(attributes[0].location, 0);
        assert_eq!(attributes[0].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[1].offset, 16);
        assert_eq!(attributes[3].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn empty_program_is_invalid() {
        let program = ShaderProgram::default();
        assert!(!program.is_valid());
        assert!(!program.has_compute());
    }
}
