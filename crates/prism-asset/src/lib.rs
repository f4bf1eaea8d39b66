//! Asset pipeline for the Prism engine.
//!
//! This crate provides:
//! - Mesh (OBJ/STL) and texture (PNG/JPEG/PNM/HDR) loading
//! - Procedural meshes and textures
//! - SPIR-V shader loading with descriptor reflection
//! - A deduplicating, async-capable resource cache
//! - PBR materials from JSON descriptors
//! - The scene container and GPU uniform layouts

pub mod cache;
pub mod error;
pub mod future;
pub mod material;
pub mod mesh;
pub mod scene;
pub mod shader;
pub mod texture;
pub mod types;

pub use cache::{
    normalize_resource_path, LoadHandle, LoadResult, ResourceCache, DEFAULT_CUBE_ID,
    DEFAULT_WHITE_ID,
};
pub use error::{AssetError, Result};
pub use future::LoadFuture;
pub use material::{MaterialManager, PbrAlpha, PbrFactors, PbrMaterial, PbrOptical, PbrTextures};
pub use mesh::{create_cube, create_sphere, detect_model_format, load_model, ModelFormat};
pub use scene::{
    Camera, CameraUniforms, ColliderComponent, GpuLight, Light, LightType, LightUniforms,
    RenderableComponent, Scene, SceneNode, SceneNodeType, TransformComponent, MAX_LIGHTS,
};
pub use texture::{
    checkerboard, detect_texture_format, load_texture, load_texture_from_memory, solid_color,
    TextureFormat,
};
pub use types::{AlphaMode, MeshData, ShaderModule, ShaderProgram, TextureData, Vertex};
