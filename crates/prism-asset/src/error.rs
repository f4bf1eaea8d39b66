//! Asset error types.

use prism_gpu::GpuError;
use thiserror::Error;

/// Errors surfaced by asset loading and caching.
///
/// Clonable so shared load futures can hand the same failure to every
/// waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssetError {
    /// Missing file, unreadable file, or malformed on-disk size.
    #[error("filesystem error: {0}")]
    FileSystem(String),

    /// Format enum exists but the loader is not implemented, or the data
    /// uses a feature the loader does not support.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// File parsed but its content is invalid.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Resource id absent from the cache.
    #[error("resource not found: {0}")]
    NotFound(String),

    /// Error from the GPU layer (shader modules, descriptor layouts).
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl From<std::io::Error> for AssetError {
    fn from(e: std::io::Error) -> Self {
        AssetError::FileSystem(e.to_string())
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, AssetError>;
