//! Renderer error types.

use prism_asset::AssetError;
use prism_gpu::GpuError;
use thiserror::Error;

/// Errors surfaced by pass setup and frame recording.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Unknown attachment names, duplicate pass names, bad indices.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Error from the GPU layer.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Error from the asset layer.
    #[error(transparent)]
    Asset(#[from] AssetError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;
