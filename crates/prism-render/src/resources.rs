//! Per-frame GPU resources and upload helpers.

use crate::error::{RenderError, Result};
use ash::vk;
use prism_asset::{CameraUniforms, LightUniforms, ResourceCache};
use prism_gpu::{
    BufferDesc, BufferUsage, DescriptorSetSchema, DescriptorSetWriter, ManagedBuffer, MemoryMode,
    ResourceAllocator, TransferEngine, TransferToken,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Global assets to preload before rendering starts.
#[derive(Clone, Default)]
pub struct RendererGlobalResources {
    pub mesh_files: Vec<PathBuf>,
    pub texture_files: Vec<PathBuf>,
    pub shaders: Vec<ShaderRequest>,
}

/// One shader program to preload.
#[derive(Clone)]
pub struct ShaderRequest {
    pub directory: PathBuf,
    /// Shader prefix, e.g. "pbr_mesh" for `pbr_mesh.vert.spv` etc.
    pub name: String,
    pub enable_compute: bool,
}

/// Sizing and association for per-frame uniform resources.
#[derive(Clone)]
pub struct FrameResourceDefinition {
    /// Shader prefix whose schemas back the per-frame descriptor sets.
    pub shader_prefix: String,
    pub camera_buffer_size: vk::DeviceSize,
    pub light_buffer_size: vk::DeviceSize,
    /// Must be at least 1.
    pub frames_in_flight: u32,
}

impl Default for FrameResourceDefinition {
    fn default() -> Self {
        Self {
            shader_prefix: String::new(),
            camera_buffer_size: std::mem::size_of::<CameraUniforms>() as vk::DeviceSize,
            light_buffer_size: std::mem::size_of::<LightUniforms>() as vk::DeviceSize,
            frames_in_flight: 3,
        }
    }
}

/// GPU resources owned by one frame slot.
///
/// Descriptor sets are allocated per frame (never shared between slots) so a
/// frame only ever writes sets that no in-flight frame is reading.
pub struct PerFrameGpuResources {
    pub camera_buffer: ManagedBuffer,
    pub light_buffer: ManagedBuffer,
    /// Schemas from the shader prefix, ordered by set index.
    pub descriptor_schemas: Vec<Arc<DescriptorSetSchema>>,
    /// Descriptor sets matched 1:1 to the schemas.
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

/// Couples the resource cache, allocator, and transfer engine for frame
/// resource creation and uniform uploads.
pub struct FrameResourceService {
    resources: ResourceCache,
    transfer: Arc<TransferEngine>,
    allocator: ResourceAllocator,
    device: ash::Device,
}

impl FrameResourceService {
    pub fn new(
        resources: ResourceCache,
        transfer: Arc<TransferEngine>,
        allocator: ResourceAllocator,
        device: &ash::Device,
    ) -> Self {
        Self {
            resources,
            transfer,
            allocator,
            device: device.clone(),
        }
    }

    pub fn resources(&self) -> &ResourceCache {
        &self.resources
    }

    /// Synchronously load every global resource in the definition.
    pub fn preload_global_resources(&self, global: &RendererGlobalResources) -> Result<()> {
        for mesh in &global.mesh_files {
            self.resources.load_mesh(mesh)?;
        }
        for texture in &global.texture_files {
            self.resources.load_texture(texture)?;
        }
        for shader in &global.shaders {
            self.resources
                .load_shader(&shader.directory, &shader.name, shader.enable_compute)?;
        }
        Ok(())
    }

    /// Create one frame slot's GPU resources.
    pub fn create_per_frame_resources(
        &self,
        definition: &FrameResourceDefinition,
    ) -> Result<PerFrameGpuResources> {
        if definition.frames_in_flight == 0 {
            return Err(RenderError::InvalidArgument(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let camera_buffer = self.allocator.create_buffer(&BufferDesc {
            size: definition.camera_buffer_size,
            usage: BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
            memory: MemoryMode::GpuOnly,
            debug_name: "camera_uniforms".to_string(),
        })?;
        let light_buffer = self.allocator.create_buffer(&BufferDesc {
            size: definition.light_buffer_size,
            usage: BufferUsage::UNIFORM | BufferUsage::TRANSFER_DST,
            memory: MemoryMode::GpuOnly,
            debug_name: "light_uniforms".to_string(),
        })?;

        let descriptor_schemas = self.resources.shader_schemas(&definition.shader_prefix);
        let mut descriptor_sets = Vec::with_capacity(descriptor_schemas.len());
        for schema in &descriptor_schemas {
            descriptor_sets.push(self.resources.pool_allocator().allocate_one(schema)?);
        }

        Ok(PerFrameGpuResources {
            camera_buffer,
            light_buffer,
            descriptor_schemas,
            descriptor_sets,
        })
    }

    /// Upload camera uniforms into the frame's device-local buffer.
    pub fn upload_camera_data(
        &self,
        frame: &PerFrameGpuResources,
        camera: &CameraUniforms,
    ) -> Result<TransferToken> {
        Ok(self
            .transfer
            .upload_to_buffer(&frame.camera_buffer, bytemuck::bytes_of(camera), 0)?)
    }

    /// Upload light uniforms into the frame's device-local buffer.
    pub fn upload_light_data(
        &self,
        frame: &PerFrameGpuResources,
        lights: &LightUniforms,
    ) -> Result<TransferToken> {
        Ok(self
            .transfer
            .upload_to_buffer(&frame.light_buffer, bytemuck::bytes_of(lights), 0)?)
    }

    /// Start a descriptor write session for one of the frame's sets.
    pub fn begin_descriptor_write(
        &self,
        frame: &PerFrameGpuResources,
        set_index: usize,
    ) -> Result<DescriptorSetWriter> {
        let schema = frame.descriptor_schemas.get(set_index).ok_or_else(|| {
            RenderError::InvalidArgument(format!(
                "descriptor set index {set_index} exceeds the frame's {} sets",
                frame.descriptor_schemas.len()
            ))
        })?;
        let set = frame.descriptor_sets[set_index];
        Ok(DescriptorSetWriter::begin(&self.device, schema.clone(), set))
    }
}
