//! Application context: window, GPU, swapchain, and per-frame sync.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use prism_gpu::command::CommandPool;
use prism_gpu::swapchain::Swapchain;
use prism_gpu::sync::{create_fence, create_semaphore, wait_for_fence};
use prism_gpu::{GpuContext, SurfaceContext};
use winit::window::Window;

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Shared application context.
pub struct AppContext {
    /// The window handle.
    pub window: Arc<Window>,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// Surface context for windowed rendering.
    pub surface: SurfaceContext,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Command pool for the per-frame command buffers.
    pub command_pool: CommandPool,
    /// Per-frame synchronization data.
    pub(crate) frames: Vec<FrameSyncData>,
    /// Per-swapchain-image render-finished semaphores.
    pub(crate) render_finished_semaphores: Vec<vk::Semaphore>,
    /// Current frame slot (into `frames`).
    pub(crate) current_frame_index: usize,
    /// Total frames rendered.
    pub frame_count: u64,
    /// Timestamp of the previous frame.
    pub(crate) last_frame_time: Instant,
    /// Whether vsync is enabled.
    pub vsync: bool,
}

/// Per-frame synchronization primitives.
pub(crate) struct FrameSyncData {
    /// Signaled when the swapchain image is available.
    pub image_available: vk::Semaphore,
    /// Signaled when the frame's submission completes; gates slot reuse.
    pub in_flight_fence: vk::Fence,
    /// Command buffer for this frame slot.
    pub command_buffer: vk::CommandBuffer,
}

impl AppContext {
    /// Create the context for a window.
    ///
    /// # Safety
    /// The window must have valid handles.
    pub(crate) unsafe fn new(window: Arc<Window>, gpu: GpuContext, vsync: bool) -> anyhow::Result<Self> {
        let surface = SurfaceContext::from_window(&gpu, window.as_ref())?;

        let size = window.inner_size();
        let width = size.width.max(1);
        let height = size.height.max(1);

        let swapchain = surface.create_swapchain(&gpu, width, height, vsync, None)?;

        tracing::info!(
            "Swapchain created: {}x{} ({} images)",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len()
        );

        let command_pool = CommandPool::new(
            gpu.device(),
            gpu.graphics_queue_family(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        )?;
        let command_buffers = command_pool.allocate(gpu.device(), FRAMES_IN_FLIGHT as u32)?;

        let mut frames = Vec::with_capacity(FRAMES_IN_FLIGHT);
        for command_buffer in command_buffers {
            frames.push(FrameSyncData {
                image_available: create_semaphore(gpu.device())?,
                in_flight_fence: create_fence(gpu.device(), true)?,
                command_buffer,
            });
        }

        let mut render_finished_semaphores = Vec::with_capacity(swapchain.images.len());
        for _ in 0..swapchain.images.len() {
            render_finished_semaphores.push(create_semaphore(gpu.device())?);
        }

        Ok(Self {
            window,
            gpu,
            surface,
            swapchain,
            command_pool,
            frames,
            render_finished_semaphores,
            current_frame_index: 0,
            frame_count: 0,
            last_frame_time: Instant::now(),
            vsync,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn width(&self) -> u32 {
        self.swapchain.extent.width
    }

    pub fn height(&self) -> u32 {
        self.swapchain.extent.height
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.swapchain.extent.width as f32 / self.swapchain.extent.height as f32
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    /// Wait for all in-flight frame fences.
    pub fn wait_for_all_in_flight_frames(&self, timeout_ns: u64) -> anyhow::Result<()> {
        let device = self.gpu.device();
        unsafe {
            for frame in &self.frames {
                wait_for_fence(device, frame.in_flight_fence, timeout_ns)?;
            }
        }
        Ok(())
    }

    /// Recreate the swapchain after a resize.
    ///
    /// # Safety
    /// The GPU must be idle.
    pub(crate) unsafe fn recreate_swapchain(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.swapchain
            .destroy(self.gpu.device(), &self.surface.swapchain_loader);
        self.swapchain = self
            .surface
            .create_swapchain(&self.gpu, width, height, self.vsync, None)?;

        // The image count can change; keep one semaphore per image.
        let device = self.gpu.device();
        while self.render_finished_semaphores.len() < self.swapchain.images.len() {
            self.render_finished_semaphores.push(create_semaphore(device)?);
        }

        tracing::info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(())
    }

    /// Destroy everything owned by the context.
    ///
    /// # Safety
    /// The GPU must be idle and none of the resources may be in use.
    pub(crate) unsafe fn cleanup(&mut self) {
        let device = self.gpu.device();

        for frame in &self.frames {
            device.destroy_semaphore(frame.image_available, None);
            device.destroy_fence(frame.in_flight_fence, None);
        }
        self.frames.clear();

        for semaphore in &self.render_finished_semaphores {
            device.destroy_semaphore(*semaphore, None);
        }
        self.render_finished_semaphores.clear();

        self.command_pool.destroy(device);

        self.swapchain.destroy(device, &self.surface.swapchain_loader);
        self.surface.destroy();
    }
}
