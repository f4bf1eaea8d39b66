//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// All variants are cheap to clone so they can travel through shared load
/// futures without losing the error kind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// A service was used before initialization (or after shutdown).
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Invalid argument (zero size, empty name, bad index).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A named binding or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Offset/size exceeds a buffer range.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Structural mismatch on schema re-registration or reflection merge.
    #[error("incompatible schema: {0}")]
    IncompatibleSchema(String),

    /// Format lacks a required feature, or an unimplemented format enum.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Memory allocation failed.
    #[error("memory allocation failed: {0}")]
    AllocationFailed(String),

    /// No suitable GPU found.
    #[error("no suitable GPU found")]
    NoSuitableDevice,

    /// Surface creation failed.
    #[error("surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Pipeline creation failed.
    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
