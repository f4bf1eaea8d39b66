//! Vulkan abstraction layer for the Prism engine.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - RAII device resources via gpu-allocator
//! - A pooled staging/transfer engine with completion tokens
//! - Descriptor layout caching, pooled set allocation, and by-name writes
//! - Swapchain and surface handling

pub mod barrier;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod resource;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use barrier::{cmd_transition_image, layout_access_and_stage, ImageLayoutTransition};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    DescriptorBindingInfo, DescriptorLayoutCache, DescriptorPoolAllocator, DescriptorSetSchema,
    DescriptorSetWriter,
};
pub use error::{GpuError, Result};
pub use resource::{
    BufferDesc, BufferUsage, ImageDesc, ImageUsage, ManagedBuffer, ManagedImage, ManagedSampler,
    MemoryMode, ResourceAllocator,
};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::Swapchain;
pub use transfer::{TransferEngine, TransferEngineConfig, TransferToken};
