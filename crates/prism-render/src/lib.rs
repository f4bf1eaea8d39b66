//! Frame orchestration for the Prism engine.
//!
//! This crate provides:
//! - Declarative render pass definitions
//! - A default dynamic-rendering pipeline builder with caching
//! - Per-frame uniform buffers and descriptor sets
//! - The frame orchestrator that records barriers, dynamic rendering, and
//!   pass draw callbacks

pub mod error;
pub mod passes;
pub mod pipeline;
pub mod renderer;
pub mod resources;

pub use error::{RenderError, Result};
pub use passes::{
    AttachmentType, RenderAttachment, RenderPassDefinition, RenderPassIo, RenderPassSequence,
};
pub use pipeline::{GraphicsPipelineBuilder, PipelineLibrary};
pub use renderer::{
    PassDrawCallback, PassDrawContext, Renderer, RendererConfig, SwapchainTarget,
};
pub use resources::{
    FrameResourceDefinition, FrameResourceService, PerFrameGpuResources, RendererGlobalResources,
    ShaderRequest,
};
