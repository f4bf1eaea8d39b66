//! Per-frame context for rendering.

use ash::vk;

/// Context for the frame currently being recorded.
pub struct FrameContext {
    /// Command buffer in the recording state.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The swapchain image for this frame.
    pub swapchain_image: vk::Image,
    /// Frame slot index (frame number modulo frames in flight).
    pub frame_slot: u32,
    /// Seconds since the last frame.
    pub dt: f32,
    /// Total frames rendered so far.
    pub frame_number: u64,
}
