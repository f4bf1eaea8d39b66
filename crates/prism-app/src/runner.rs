//! Application runner and event loop.

use std::sync::Arc;

use ash::vk;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use prism_gpu::command::submit_command_buffers;
use prism_gpu::sync::{reset_fence, wait_for_fence};
use prism_gpu::{GpuContextBuilder, GpuError};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::PrismApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Prism Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            validation: cfg!(debug_assertions),
        }
    }
}

impl AppConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Run a [`PrismApp`]: initialize logging, create the window and GPU
/// context, and drive the event loop until exit.
pub fn run_app<A: PrismApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };
    if let Err(e) = event_loop.run_app(&mut runner) {
        error!("Event loop error: {e}");
    }

    Ok(())
}

struct AppRunner<A: PrismApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

// Field order matters: the app (and its GPU resources) must drop before the
// context destroys the device.
struct AppState<A: PrismApp> {
    app: A,
    ctx: AppContext,
}

impl<A: PrismApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready");
            }
            Err(e) => {
                error!("Failed to initialize application: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = &mut self.state {
                    match state.render_frame() {
                        Ok(()) => {}
                        Err(e) if is_swapchain_out_of_date(&e) => {
                            let size = state.ctx.window.inner_size();
                            if let Err(e) = state.handle_resize(size.width, size.height) {
                                error!("Swapchain recreation failed: {e}");
                            }
                        }
                        Err(e) => error!("Render error: {e}"),
                    }
                    state.ctx.window.request_redraw();
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    if let Err(e) = state.handle_resize(size.width, size.height) {
                        error!("Resize error: {e}");
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

fn is_swapchain_out_of_date(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<GpuError>(),
        Some(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    )
}

impl<A: PrismApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .build()?;

        let mut ctx = unsafe { AppContext::new(window, gpu, self.config.vsync)? };
        let app = A::init(&mut ctx)?;

        Ok(AppState { app, ctx })
    }
}

impl<A: PrismApp> AppState<A> {
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let now = std::time::Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        self.app.update(&self.ctx, dt);

        let device = self.ctx.gpu.device();
        let frame_data = &self.ctx.frames[self.ctx.current_frame_index];

        // Gate this frame slot on its fence: frame N and frame
        // N + frames_in_flight can never record at the same time.
        let image_index = unsafe {
            wait_for_fence(device, frame_data.in_flight_fence, u64::MAX)?;

            let (image_index, _suboptimal) = self.ctx.swapchain.acquire_next_image(
                &self.ctx.surface.swapchain_loader,
                frame_data.image_available,
                u64::MAX,
            )?;

            // Reset only after a successful acquire.
            reset_fence(device, frame_data.in_flight_fence)?;

            image_index
        };

        unsafe {
            device.reset_command_buffer(
                frame_data.command_buffer,
                vk::CommandBufferResetFlags::empty(),
            )?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(frame_data.command_buffer, &begin_info)?;
        }

        let mut frame_ctx = FrameContext {
            command_buffer: frame_data.command_buffer,
            image_index,
            swapchain_image: self.ctx.swapchain.images[image_index as usize],
            frame_slot: self.ctx.current_frame_index as u32,
            dt,
            frame_number: self.ctx.frame_count,
        };

        self.app.render(&self.ctx, &mut frame_ctx)?;

        unsafe {
            self.ctx
                .gpu
                .device()
                .end_command_buffer(frame_data.command_buffer)?;
        }

        let render_finished = self.ctx.render_finished_semaphores[image_index as usize];
        let wait_semaphores = [frame_data.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [frame_data.command_buffer];

        unsafe {
            submit_command_buffers(
                self.ctx.gpu.device(),
                self.ctx.gpu.graphics_queue(),
                &command_buffers,
                &wait_semaphores,
                &wait_stages,
                &signal_semaphores,
                frame_data.in_flight_fence,
            )?;

            self.ctx.swapchain.present(
                &self.ctx.surface.swapchain_loader,
                self.ctx.gpu.present_queue(),
                image_index,
                &[render_finished],
            )?;
        }

        self.ctx.current_frame_index = (self.ctx.current_frame_index + 1) % self.ctx.frames.len();
        self.ctx.frame_count += 1;

        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }

        self.ctx.gpu.wait_idle()?;
        unsafe {
            self.ctx.recreate_swapchain(width, height)?;
        }
        self.app.on_resize(&mut self.ctx, width, height)?;

        info!("Resized to {}x{}", width, height);
        Ok(())
    }

    fn cleanup(&mut self) {
        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        self.app.cleanup(&mut self.ctx);
        unsafe {
            self.ctx.cleanup();
        }
        info!("Cleanup complete after {} frames", self.ctx.frame_count);
    }
}
